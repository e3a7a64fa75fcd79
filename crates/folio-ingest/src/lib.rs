use std::path::Path;

use folio_core::TextPages;
use thiserror::Error;

pub mod orchestrator;
pub mod persist;

// Re-export the pieces a caller needs for a full run
pub use folio_core::{ExtractionResult, PageTextProvider, ProgressEvent};
pub use orchestrator::{extract_categories, extract_document};
pub use persist::{AssetSource, FsSink, PersistStats, persist_result};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("PDF decoding error: {0}")]
    Pdf(#[from] folio_core::BackendError),
    #[error(transparent)]
    Input(#[from] folio_parsing::InputError),
    #[cfg(not(feature = "pdf"))]
    #[error("PDF support not compiled in (enable the `pdf` feature of folio-ingest)")]
    NoPdfSupport,
}

/// Open a document as a page source.
///
/// Dispatches on file extension:
/// - `.pdf` → MuPDF (requires the `pdf` feature)
/// - anything else → UTF-8 text, pages split on form feeds
///
/// `with_images` controls whether PDF page images are rendered for token and
/// map assets. Text inputs never carry images.
pub fn open_document(path: &Path, with_images: bool) -> Result<TextPages, IngestError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "pdf" => open_pdf(path, with_images),
        _ => {
            let text = std::fs::read_to_string(path).map_err(|source| IngestError::Read {
                path: path.display().to_string(),
                source,
            })?;
            Ok(TextPages::from_text(&text))
        }
    }
}

#[cfg(feature = "pdf")]
fn open_pdf(path: &Path, with_images: bool) -> Result<TextPages, IngestError> {
    let backend = folio_pdf_mupdf::MupdfBackend::default().with_images(with_images);
    Ok(backend.load(path)?)
}

#[cfg(not(feature = "pdf"))]
fn open_pdf(_path: &Path, _with_images: bool) -> Result<TextPages, IngestError> {
    Err(IngestError::NoPdfSupport)
}

/// Label for `source_label`: the file name without its extension.
pub fn source_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}
