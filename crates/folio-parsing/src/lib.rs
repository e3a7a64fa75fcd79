use thiserror::Error;

pub mod extractor;
pub mod locate;
pub mod normalize;
pub mod parse;
pub mod profile;
pub mod registry;
pub mod table;

pub use extractor::{CategoryError, ContentExtractor, IdGenerator};
pub use locate::CandidateBlock;
pub use normalize::NormalizedText;
pub use parse::{ParsedBlock, ParsedFields, RejectReason};
pub use profile::{CategoryDescriptor, CompiledCategory, SystemProfile};
pub use registry::{ProfileLookup, ProfileRegistry};
// Re-export domain types from core (canonical definitions live there)
pub use folio_core::{
    CategoryOutcome, Config, ExtractedRecord, ExtractionResult, PageRange, PageTextProvider,
};

/// Fatal problems with the input itself. Nothing is extracted.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("invalid page range: pages are numbered from 1")]
    ZeroStartPage,
    #[error("invalid page range: end page {end} is before start page {start}")]
    EndBeforeStart { start: usize, end: usize },
    #[error("page range starts at {start} but the document has {count} pages")]
    StartBeyondDocument { start: usize, count: usize },
    #[error("document has no pages")]
    NoPages,
    #[error("no source text in the requested pages")]
    MissingText,
    #[error("backend error: {0}")]
    Backend(#[from] folio_core::BackendError),
}

/// A category's patterns failed to compile.
#[derive(Error, Debug)]
pub enum PatternError {
    #[error("category '{category}': invalid {what} pattern: {source}")]
    Invalid {
        category: String,
        what: String,
        source: regex::Error,
    },
    #[error("category '{category}': default for slot '{slot}' does not match its kind")]
    DefaultKind { category: String, slot: String },
}

/// Problems assembling the profile registry.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("profile '{0}' is defined more than once")]
    DuplicateProfile(String),
    #[error("profile '{profile}' defines category '{category}' more than once")]
    DuplicateCategory { profile: String, category: String },
    #[error("profile '{profile}' extends unknown profile '{base}'")]
    UnknownBase { profile: String, base: String },
    #[error("profile '{0}' has no categories")]
    Empty(String),
    #[error("built-in profile {name} is malformed: {source}")]
    Builtin {
        name: &'static str,
        source: toml::de::Error,
    },
}

/// Extract every requested category from a page source using the globally
/// installed profile registry.
///
/// Pipeline:
/// 1. Read the requested pages and normalize them into one text
/// 2. Resolve the game-system profile (falling back to `generic`)
/// 3. For each category, locate candidate blocks and parse them into records
/// 4. Collect records, stats and diagnostics per category
pub fn extract_from_provider(
    provider: &dyn PageTextProvider,
    config: &Config,
) -> Result<ExtractionResult, InputError> {
    let text = normalize::normalize(provider, config.pages)?;
    Ok(extract_normalized(&text, config))
}

/// Like [`extract_from_provider`] for text that is already assembled.
/// `config.pages` only labels where the text starts.
pub fn extract_from_text(text: &str, config: &Config) -> Result<ExtractionResult, InputError> {
    let text = normalize::normalize_text(text, config.pages)?;
    Ok(extract_normalized(&text, config))
}

fn extract_normalized(text: &NormalizedText, config: &Config) -> ExtractionResult {
    let lookup = registry::global().get_profile(&config.system);
    ContentExtractor::for_lookup(&lookup).extract(
        text,
        &config.categories,
        &config.source_name,
        &IdGenerator::new(),
    )
}
