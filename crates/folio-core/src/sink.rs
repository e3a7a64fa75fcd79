use thiserror::Error;

use crate::{EntityKind, ExtractedRecord};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize record: {0}")]
    Serialize(String),
    #[error("sink rejected {name}: {reason}")]
    Rejected { name: String, reason: String },
}

/// Destination for accepted records.
///
/// Called once per record. Failures are reported back to the caller as a
/// category diagnostic and never retried.
pub trait PersistenceSink: Send + Sync {
    /// Store a record and return where it went.
    fn save(
        &self,
        record: &ExtractedRecord,
        kind: EntityKind,
        category: &str,
        subcategory: &str,
        name: &str,
    ) -> Result<String, SinkError>;
}

/// Destination for binary assets (token art, maps).
pub trait AssetSink: Send + Sync {
    fn save_asset(
        &self,
        bytes: &[u8],
        extension: &str,
        category: &str,
        name: &str,
    ) -> Result<String, SinkError>;
}
