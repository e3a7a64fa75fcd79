use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod backend;
pub mod config_file;
pub mod profile_def;
pub mod sink;
pub mod text_utils;

// Re-export for convenience
pub use backend::{BackendError, PageImage, PageTextProvider, TextPages};
pub use profile_def::{
    CategoryDef, EntityKind, FieldDef, FieldKind, Layout, ProfileDef, SectionDef, Subcategory,
};
pub use sink::{AssetSink, PersistenceSink, SinkError};

/// A value filled into a record slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
    /// Every match of a list slot, in document order.
    List(Vec<String>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(n) => write!(f, "{}", n),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

/// One die face of a roll table.
///
/// Tables are stored at single-face granularity, so `range_start == range_end`
/// for every entry produced by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableResult {
    pub range_start: u32,
    pub range_end: u32,
    pub text: String,
}

/// Roll table payload of an [`ExtractedRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollTable {
    /// Die expression as written in the source (`d6`, `2d6`, `d100`).
    pub formula: String,
    /// Lowest possible roll of `formula`.
    pub min_roll: u32,
    /// Highest possible roll of `formula`.
    pub max_roll: u32,
    /// Entries ordered by face.
    pub results: Vec<TableResult>,
}

impl RollTable {
    /// Every face between `min_roll` and `max_roll` has exactly one entry.
    pub fn is_well_formed(&self) -> bool {
        if self.max_roll < self.min_roll {
            return false;
        }
        let expected = (self.max_roll - self.min_roll + 1) as usize;
        self.results.len() == expected
            && self
                .results
                .iter()
                .zip(self.min_roll..=self.max_roll)
                .all(|(r, face)| r.range_start == face && r.range_end == face)
    }

    /// Look up the result for a roll.
    pub fn result_for(&self, roll: u32) -> Option<&str> {
        self.results
            .iter()
            .find(|r| roll >= r.range_start && roll <= r.range_end)
            .map(|r| r.text.as_str())
    }
}

/// A structured record parsed from one candidate block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub category: String,
    /// Always non-empty and trimmed.
    pub name: String,
    /// Folder the record is filed under when persisted (creature type, spell level, ...).
    pub subcategory: Option<String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub raw_text: String,
    /// Human-readable provenance, e.g. `"Monster Manual, p. 12"`.
    pub source_label: String,
    /// 1-based page the block starts on, when page boundaries are known.
    pub page: Option<usize>,
    /// Opaque token, unique within one run.
    pub identifier: String,
    pub table: Option<RollTable>,
}

impl ExtractedRecord {
    pub fn field(&self, slot: &str) -> Option<&FieldValue> {
        self.fields.get(slot)
    }

    pub fn text(&self, slot: &str) -> Option<&str> {
        self.fields.get(slot).and_then(FieldValue::as_text)
    }

    pub fn integer(&self, slot: &str) -> Option<i64> {
        self.fields.get(slot).and_then(FieldValue::as_integer)
    }
}

/// Statistics about candidate blocks seen for one category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub candidates: usize,
    pub accepted: usize,
    pub too_short: usize,
    pub missing_required: usize,
    pub empty_name: usize,
}

impl CategoryStats {
    pub fn rejected(&self) -> usize {
        self.too_short + self.missing_required + self.empty_name
    }
}

/// Final state of one requested category within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    Completed,
    /// Locating or parsing raised an error; the record list is empty.
    Failed,
    /// The profile does not define the category.
    Unsupported,
    /// The run was cancelled or timed out before the category finished.
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    FallbackProfile,
    UnsupportedCategory,
    CategoryFailure,
    Abandoned,
    PersistenceFailure,
    AssetFailure,
}

/// A non-fatal problem recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub category: Option<String>,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(category: Option<&str>, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            category: category.map(str::to_string),
            kind,
            message: message.into(),
        }
    }
}

/// Output of processing a single category.
#[derive(Debug, Clone)]
pub struct CategoryOutcome {
    pub records: Vec<ExtractedRecord>,
    pub stats: CategoryStats,
    pub status: CategoryStatus,
    pub diagnostic: Option<Diagnostic>,
}

impl CategoryOutcome {
    pub fn completed(records: Vec<ExtractedRecord>, stats: CategoryStats) -> Self {
        Self {
            records,
            stats,
            status: CategoryStatus::Completed,
            diagnostic: None,
        }
    }

    /// An empty outcome carrying a diagnostic.
    pub fn empty(status: CategoryStatus, diagnostic: Diagnostic) -> Self {
        Self {
            records: Vec::new(),
            stats: CategoryStats::default(),
            status,
            diagnostic: Some(diagnostic),
        }
    }
}

/// Result of one extraction run.
///
/// Keyed by category id; every requested category has an entry in `records`,
/// `status` and `stats`, even when its list is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Id of the profile actually used.
    pub system: String,
    /// True when the requested system id was unknown and the generic profile was used.
    pub used_fallback: bool,
    pub records: BTreeMap<String, Vec<ExtractedRecord>>,
    pub status: BTreeMap<String, CategoryStatus>,
    pub stats: BTreeMap<String, CategoryStats>,
    pub diagnostics: Vec<Diagnostic>,
    /// False when the run was cancelled or timed out; the lists are then partial.
    pub complete: bool,
}

impl ExtractionResult {
    pub fn new(system: impl Into<String>, used_fallback: bool) -> Self {
        Self {
            system: system.into(),
            used_fallback,
            records: BTreeMap::new(),
            status: BTreeMap::new(),
            stats: BTreeMap::new(),
            diagnostics: Vec::new(),
            complete: true,
        }
    }

    /// Merge the outcome of one category into the result.
    pub fn insert_outcome(&mut self, category: &str, outcome: CategoryOutcome) {
        if outcome.status == CategoryStatus::Abandoned {
            self.complete = false;
        }
        self.records.insert(category.to_string(), outcome.records);
        self.status.insert(category.to_string(), outcome.status);
        self.stats.insert(category.to_string(), outcome.stats);
        if let Some(d) = outcome.diagnostic {
            self.diagnostics.push(d);
        }
    }

    pub fn records_for(&self, category: &str) -> &[ExtractedRecord] {
        self.records.get(category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total_records(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }
}

/// Progress events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Normalized {
        pages: usize,
        chars: usize,
    },
    CategoryStarted {
        category: String,
    },
    CategoryFinished {
        category: String,
        accepted: usize,
        candidates: usize,
        elapsed: Duration,
    },
    CategoryFailed {
        category: String,
        message: String,
    },
    Abandoned {
        categories: Vec<String>,
    },
}

/// 1-based inclusive page range. `end = None` means "to the last page".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: usize,
    pub end: Option<usize>,
}

impl Default for PageRange {
    fn default() -> Self {
        Self {
            start: 1,
            end: None,
        }
    }
}

impl PageRange {
    pub fn new(start: usize, end: Option<usize>) -> Self {
        Self { start, end }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid page range {0:?} (expected N, N-M or N-)")]
pub struct PageRangeParseError(pub String);

impl FromStr for PageRange {
    type Err = PageRangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || PageRangeParseError(s.to_string());
        let s = s.trim();
        match s.split_once('-') {
            None => {
                let n = s.parse().map_err(|_| err())?;
                Ok(PageRange::new(n, Some(n)))
            }
            Some((a, b)) => {
                let start = a.trim().parse().map_err(|_| err())?;
                let b = b.trim();
                let end = if b.is_empty() {
                    None
                } else {
                    Some(b.parse().map_err(|_| err())?)
                };
                Ok(PageRange::new(start, end))
            }
        }
    }
}

/// Runtime configuration for an extraction run.
///
/// Passed explicitly into the extractor and orchestrator; nothing reads
/// process-wide settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Game-system profile id. Unknown ids fall back to the generic profile.
    pub system: String,
    /// Requested categories in processing order. Empty = the profile's defaults.
    pub categories: Vec<String>,
    pub pages: PageRange,
    /// Label recorded in every record's `source_label` (usually the file name).
    pub source_name: String,
    pub num_workers: usize,
    /// Overall deadline for the category phase.
    pub timeout: Option<Duration>,
    pub output_dir: Option<PathBuf>,
    pub write_assets: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system: "generic".to_string(),
            categories: vec![],
            pages: PageRange::default(),
            source_name: String::new(),
            num_workers: 4,
            timeout: None,
            output_dir: None,
            write_assets: true,
        }
    }
}
