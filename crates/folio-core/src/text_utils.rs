use once_cell::sync::Lazy;
use regex::Regex;

/// Expand common typographic ligatures found in PDFs.
pub fn expand_ligatures(text: &str) -> String {
    text.replace('\u{FB00}', "ff")
        .replace('\u{FB01}', "fi")
        .replace('\u{FB02}', "fl")
        .replace('\u{FB03}', "ffi")
        .replace('\u{FB04}', "ffl")
        .replace(['\u{FB05}', '\u{FB06}'], "st")
}

/// Collapse every whitespace run (including newlines) to one space and trim.
pub fn collapse_whitespace(text: &str) -> String {
    static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
    WS_RE.replace_all(text, " ").trim().to_string()
}

/// Replace characters that are invalid in file names with `-`.
pub fn sanitize_file_name(name: &str) -> String {
    static INVALID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[\\/:*?"<>|\n\r\t]"#).unwrap());
    INVALID_RE.replace_all(name.trim(), "-").to_string()
}
