//! Turn per-page text into the single string every category scans.

use folio_core::{PageRange, PageTextProvider};

use crate::InputError;

/// Page text joined with `\n`, plus where each page begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    text: String,
    /// `(page number, byte offset)` in ascending order.
    page_starts: Vec<(usize, usize)>,
}

impl NormalizedText {
    /// Treat `text` as a single page numbered `first_page`.
    pub fn from_raw(text: impl Into<String>, first_page: usize) -> Result<Self, InputError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(InputError::MissingText);
        }
        Ok(Self {
            text,
            page_starts: vec![(first_page, 0)],
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Number of pages that went into the text.
    pub fn page_count(&self) -> usize {
        self.page_starts.len()
    }

    /// Page containing byte `offset`.
    pub fn page_at(&self, offset: usize) -> Option<usize> {
        if offset > self.text.len() {
            return None;
        }
        let idx = self.page_starts.partition_point(|&(_, start)| start <= offset);
        idx.checked_sub(1).map(|i| self.page_starts[i].0)
    }
}

/// Reject ranges that are invalid regardless of the document: a zero start
/// page or an end before the start.
fn check_bounds(range: PageRange) -> Result<(), InputError> {
    if range.start == 0 {
        return Err(InputError::ZeroStartPage);
    }
    match range.end {
        Some(end) if end < range.start => Err(InputError::EndBeforeStart {
            start: range.start,
            end,
        }),
        _ => Ok(()),
    }
}

/// Check `range` against a document of `count` pages and return the
/// inclusive page bounds to read. An end past the last page is clamped.
pub fn resolve_range(range: PageRange, count: usize) -> Result<(usize, usize), InputError> {
    check_bounds(range)?;
    if count == 0 {
        return Err(InputError::NoPages);
    }
    if range.start > count {
        return Err(InputError::StartBeyondDocument {
            start: range.start,
            count,
        });
    }
    let end = range.end.map_or(count, |e| e.min(count));
    Ok((range.start, end))
}

/// Read the pages in `range` from `provider` and join them.
pub fn normalize(
    provider: &dyn PageTextProvider,
    range: PageRange,
) -> Result<NormalizedText, InputError> {
    let count = provider.page_count()?;
    let (first, last) = resolve_range(range, count)?;

    let mut text = String::new();
    let mut page_starts = Vec::with_capacity(last - first + 1);
    for page in first..=last {
        if page > first {
            text.push('\n');
        }
        page_starts.push((page, text.len()));
        text.push_str(&provider.page_text(page)?);
    }

    if text.trim().is_empty() {
        return Err(InputError::MissingText);
    }
    tracing::debug!(
        pages = page_starts.len(),
        chars = text.len(),
        "normalized page text"
    );
    Ok(NormalizedText { text, page_starts })
}

/// Validate `range` for text that was already assembled upstream. The text
/// is labelled as starting on `range.start`.
pub fn normalize_text(text: &str, range: PageRange) -> Result<NormalizedText, InputError> {
    check_bounds(range)?;
    NormalizedText::from_raw(text, range.start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::TextPages;

    fn pages(texts: &[&str]) -> TextPages {
        TextPages::new(texts.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn joins_pages_with_single_newline() {
        let provider = pages(&["Goblin", "AC 15", "HP 7"]);
        let text = normalize(&provider, PageRange::default()).unwrap();
        assert_eq!(text.as_str(), "Goblin\nAC 15\nHP 7");
        assert_eq!(text.page_count(), 3);
    }

    #[test]
    fn page_at_maps_offsets_back() {
        let provider = pages(&["abc", "def", "ghi"]);
        let text = normalize(&provider, PageRange::new(2, None)).unwrap();
        assert_eq!(text.as_str(), "def\nghi");
        assert_eq!(text.page_at(0), Some(2));
        assert_eq!(text.page_at(3), Some(2));
        assert_eq!(text.page_at(4), Some(3));
        assert_eq!(text.page_at(100), None);
    }

    #[test]
    fn end_page_is_clamped() {
        let provider = pages(&["one", "two"]);
        let text = normalize(&provider, PageRange::new(1, Some(50))).unwrap();
        assert_eq!(text.as_str(), "one\ntwo");
    }

    #[test]
    fn rejects_zero_start() {
        let provider = pages(&["one"]);
        let err = normalize(&provider, PageRange::new(0, None)).unwrap_err();
        assert!(matches!(err, InputError::ZeroStartPage));
    }

    #[test]
    fn rejects_end_before_start() {
        let provider = pages(&["one", "two", "three"]);
        let err = normalize(&provider, PageRange::new(3, Some(2))).unwrap_err();
        assert!(matches!(err, InputError::EndBeforeStart { start: 3, end: 2 }));
    }

    #[test]
    fn rejects_start_beyond_document() {
        let provider = pages(&["one"]);
        let err = normalize(&provider, PageRange::new(5, None)).unwrap_err();
        assert!(matches!(
            err,
            InputError::StartBeyondDocument { start: 5, count: 1 }
        ));
    }

    #[test]
    fn rejects_empty_document_and_blank_text() {
        let err = normalize(&pages(&[]), PageRange::default()).unwrap_err();
        assert!(matches!(err, InputError::NoPages));

        let err = normalize(&pages(&["  ", "\n"]), PageRange::default()).unwrap_err();
        assert!(matches!(err, InputError::MissingText));
    }

    #[test]
    fn raw_text_checks_the_same_bounds() {
        assert!(matches!(
            normalize_text("Goblin", PageRange::new(0, None)),
            Err(InputError::ZeroStartPage)
        ));
        assert!(matches!(
            normalize_text("Goblin", PageRange::new(4, Some(3))),
            Err(InputError::EndBeforeStart { start: 4, end: 3 })
        ));
    }

    #[test]
    fn raw_text_keeps_bytes_unchanged() {
        let raw = "  Goblin\r\n\tAC 15  ";
        let text = normalize_text(raw, PageRange::new(12, None)).unwrap();
        assert_eq!(text.as_str(), raw);
        assert_eq!(text.page_at(5), Some(12));
    }
}
