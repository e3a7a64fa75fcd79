use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to open document: {0}")]
    OpenError(String),
    #[error("failed to extract text: {0}")]
    ExtractionError(String),
    #[error("page {page} out of range (document has {count} pages)")]
    PageOutOfRange { page: usize, count: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw image bytes found on a page.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub data: Vec<u8>,
    /// File extension without the dot (`png`, `jpeg`).
    pub ext: String,
    pub width: u32,
    pub height: u32,
}

/// Trait for page-decoding backends.
///
/// Implementors turn a document into per-page text; the extraction pipeline
/// (normalization, block location, parsing) lives in `folio_parsing`.
/// Pages are 1-based. Callers may request the same page more than once.
pub trait PageTextProvider: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self) -> Result<usize, BackendError>;

    /// Decoded text of one page.
    fn page_text(&self, page: usize) -> Result<String, BackendError>;

    /// Images embedded in one page. Backends without image support return none.
    fn page_images(&self, _page: usize) -> Result<Vec<PageImage>, BackendError> {
        Ok(Vec::new())
    }
}

/// In-memory [`PageTextProvider`] over already-decoded text, optionally
/// with the images found on each page.
///
/// Pages are separated by form feeds, as written by `pdftotext`.
#[derive(Debug, Clone, Default)]
pub struct TextPages {
    pages: Vec<String>,
    /// Indexed like `pages`; missing entries mean no images.
    images: Vec<Vec<PageImage>>,
}

impl TextPages {
    pub fn new(pages: Vec<String>) -> Self {
        Self {
            pages,
            images: Vec::new(),
        }
    }

    /// Attach per-page images, first entry for page 1.
    pub fn with_images(mut self, images: Vec<Vec<PageImage>>) -> Self {
        self.images = images;
        self
    }

    /// Split text on form feeds. A trailing form feed does not open an extra page.
    pub fn from_text(text: &str) -> Self {
        let text = text.strip_suffix('\u{000C}').unwrap_or(text);
        if text.is_empty() {
            return Self::default();
        }
        Self::new(text.split('\u{000C}').map(str::to_string).collect())
    }
}

impl PageTextProvider for TextPages {
    fn page_count(&self) -> Result<usize, BackendError> {
        Ok(self.pages.len())
    }

    fn page_text(&self, page: usize) -> Result<String, BackendError> {
        page.checked_sub(1)
            .and_then(|i| self.pages.get(i))
            .cloned()
            .ok_or(BackendError::PageOutOfRange {
                page,
                count: self.pages.len(),
            })
    }

    fn page_images(&self, page: usize) -> Result<Vec<PageImage>, BackendError> {
        if page == 0 || page > self.pages.len() {
            return Err(BackendError::PageOutOfRange {
                page,
                count: self.pages.len(),
            });
        }
        Ok(self.images.get(page - 1).cloned().unwrap_or_default())
    }
}
