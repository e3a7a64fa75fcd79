//! Carve normalized text into candidate blocks for one category.

use regex::Regex;

use crate::profile::{CompiledCategory, CompiledSection};

/// A contiguous slice of the normalized text that may hold one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateBlock<'a> {
    pub category: &'a str,
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
    pub text: &'a str,
}

/// Locate every candidate block for `category` in `text`, earliest first.
///
/// When the category is scoped to a section and the section heading is
/// missing, nothing is located.
pub fn locate_blocks<'a>(text: &'a str, category: &'a CompiledCategory) -> Vec<CandidateBlock<'a>> {
    let (from, to) = match &category.section {
        Some(section) => match section_bounds(text, section) {
            Some(bounds) => bounds,
            None => {
                tracing::debug!(category = %category.id, "section heading not found");
                return Vec::new();
            }
        },
        None => (0, text.len()),
    };

    locate_spans(
        &text[..to],
        from,
        &category.start,
        category.end.as_ref(),
        category.max_span,
    )
    .into_iter()
    .map(|(start, end)| CandidateBlock {
        category: &category.id,
        start,
        end,
        text: &text[start..end],
    })
    .collect()
}

/// Byte range of the section body: after the first header match, up to the
/// first end match after it.
fn section_bounds(text: &str, section: &CompiledSection) -> Option<(usize, usize)> {
    let header = section.header.find(text)?;
    let from = header.end();
    let to = section
        .end
        .as_ref()
        .and_then(|re| re.find_at(text, from))
        .map_or(text.len(), |m| m.start());
    Some((from, to))
}

/// Disjoint `[start, end)` spans in ascending order, scanning from `from`.
///
/// A block starts at each start match. It ends where the first end match
/// after the start match begins, or `max_span` bytes later when there is no
/// end pattern or it never matches. Scanning resumes at the block end.
pub fn locate_spans(
    text: &str,
    from: usize,
    start_re: &Regex,
    end_re: Option<&Regex>,
    max_span: usize,
) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut pos = from;

    while pos <= text.len() {
        let Some(m) = start_re.find_at(text, pos) else {
            break;
        };
        let s = m.start();
        let e = end_re
            .and_then(|re| re.find_at(text, m.end()))
            .map(|em| em.start())
            .unwrap_or_else(|| floor_char_boundary(text, s.saturating_add(max_span)).max(m.end()));

        if e > s {
            spans.push((s, e));
            pos = e;
        } else {
            // Empty start match with nothing after it: step past one character.
            match text[s..].chars().next() {
                Some(c) => pos = s + c.len_utf8(),
                None => break,
            }
        }
    }

    spans
}

/// Largest char boundary `<= idx`, clamped to the text length.
fn floor_char_boundary(text: &str, idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    let mut i = idx;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}
