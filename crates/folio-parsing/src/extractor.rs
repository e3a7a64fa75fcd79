use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use folio_core::{
    CategoryOutcome, CategoryStats, CategoryStatus, Diagnostic, DiagnosticKind, ExtractedRecord,
    ExtractionResult,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::locate::{self, CandidateBlock};
use crate::normalize::NormalizedText;
use crate::parse::{self, ParsedBlock, RejectReason};
use crate::profile::{CompiledCategory, SystemProfile};
use crate::registry::ProfileLookup;
use crate::PatternError;

/// Why a category produced nothing.
#[derive(Error, Debug)]
pub enum CategoryError {
    #[error("category '{category}' is not defined by profile '{profile}'")]
    Unsupported { category: String, profile: String },
    #[error(transparent)]
    Pattern(#[from] PatternError),
}

const ID_LEN: usize = 16;
const SEQ_LEN: usize = 8;
const BASE62: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Hands out 16-character alphanumeric record identifiers, unique within a run.
///
/// Each id is random characters followed by the run's sequence number in
/// base 62 (offset by a random start), so two calls never collide.
#[derive(Debug)]
pub struct IdGenerator {
    offset: u64,
    next: AtomicU64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            offset: fastrand::u64(..62u64.pow(SEQ_LEN as u32)),
            next: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> String {
        let modulus = 62u64.pow(SEQ_LEN as u32);
        let seq = (self.next.fetch_add(1, Ordering::Relaxed) + self.offset) % modulus;

        let mut id: String = (0..ID_LEN - SEQ_LEN)
            .map(|_| fastrand::alphanumeric())
            .collect();
        let mut digits = [b'0'; SEQ_LEN];
        let mut n = seq;
        for slot in digits.iter_mut().rev() {
            *slot = BASE62[(n % 62) as usize];
            n /= 62;
        }
        id.extend(digits.iter().map(|&b| b as char));
        id
    }
}

/// Outcome for a category that failed to locate or parse.
pub fn failed_outcome(category: &str, message: impl Into<String>) -> CategoryOutcome {
    let message = message.into();
    warn!(category, error = %message, "category failed");
    CategoryOutcome::empty(
        CategoryStatus::Failed,
        Diagnostic::new(Some(category), DiagnosticKind::CategoryFailure, message),
    )
}

/// Outcome for a category that was still running when the run was stopped.
pub fn abandoned_outcome(category: &str, reason: &str) -> CategoryOutcome {
    CategoryOutcome::empty(
        CategoryStatus::Abandoned,
        Diagnostic::new(
            Some(category),
            DiagnosticKind::Abandoned,
            format!("abandoned: {}", reason),
        ),
    )
}

/// Best-effort message from a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Profile-driven extraction pipeline.
///
/// Holds the active [`SystemProfile`] and exposes each pipeline step as a
/// method. [`ContentExtractor::extract`] runs every category in turn; the
/// concurrent orchestrator in `folio-ingest` calls
/// [`ContentExtractor::run_category`] from worker tasks instead.
#[derive(Debug, Clone)]
pub struct ContentExtractor<'p> {
    profile: &'p SystemProfile,
    /// The system id that was asked for, when the profile is a fallback.
    fallback_from: Option<String>,
}

impl<'p> ContentExtractor<'p> {
    pub fn new(profile: &'p SystemProfile) -> Self {
        Self {
            profile,
            fallback_from: None,
        }
    }

    /// Create an extractor for a registry lookup, remembering whether it fell back.
    pub fn for_lookup(lookup: &ProfileLookup<'p>) -> Self {
        Self {
            profile: lookup.profile,
            fallback_from: lookup.used_fallback.then(|| lookup.requested.clone()),
        }
    }

    pub fn profile(&self) -> &'p SystemProfile {
        self.profile
    }

    /// Requested ids in order without repeats; the profile defaults when empty.
    pub fn resolve_categories(&self, requested: &[String]) -> Vec<String> {
        if requested.is_empty() {
            return self.profile.default_categories();
        }
        let mut seen = std::collections::HashSet::new();
        requested
            .iter()
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect()
    }

    /// Compile one category's patterns (step 1).
    pub fn compile(&self, category: &str) -> Result<CompiledCategory, CategoryError> {
        self.profile
            .compile(category)
            .ok_or_else(|| CategoryError::Unsupported {
                category: category.to_string(),
                profile: self.profile.id().to_string(),
            })?
            .map_err(CategoryError::from)
    }

    /// Carve the text into candidate blocks (step 2).
    pub fn locate_blocks<'a>(
        &self,
        text: &'a str,
        compiled: &'a CompiledCategory,
    ) -> Vec<CandidateBlock<'a>> {
        locate::locate_blocks(text, compiled)
    }

    /// Parse one block (step 3).
    pub fn parse_block(&self, block: &CandidateBlock<'_>, compiled: &CompiledCategory) -> ParsedBlock {
        parse::parse_block(block.text, compiled)
    }

    /// Locate and parse every block of one category.
    pub fn extract_category(
        &self,
        text: &NormalizedText,
        category: &str,
        source_name: &str,
        ids: &IdGenerator,
    ) -> Result<CategoryOutcome, CategoryError> {
        let compiled = self.compile(category)?;

        debug!(category, state = "locating", "scanning for blocks");
        let blocks = self.locate_blocks(text.as_str(), &compiled);

        debug!(category, state = "parsing", blocks = blocks.len(), "parsing blocks");
        let mut stats = CategoryStats {
            candidates: blocks.len(),
            ..Default::default()
        };
        let mut records = Vec::new();

        for block in &blocks {
            match self.parse_block(block, &compiled) {
                ParsedBlock::Parsed(parsed) => {
                    let page = text.page_at(block.start);
                    stats.accepted += 1;
                    records.push(ExtractedRecord {
                        category: category.to_string(),
                        name: parsed.name,
                        subcategory: parsed.subcategory,
                        fields: parsed.fields,
                        raw_text: block.text.to_string(),
                        source_label: source_label(source_name, page),
                        page,
                        identifier: ids.next_id(),
                        table: parsed.table,
                    });
                }
                ParsedBlock::Rejected(reason) => {
                    debug!(category, offset = block.start, ?reason, "block rejected");
                    match reason {
                        RejectReason::TooShort => stats.too_short += 1,
                        RejectReason::MissingRequired(_) => stats.missing_required += 1,
                        RejectReason::EmptyName => stats.empty_name += 1,
                    }
                }
            }
        }

        info!(
            category,
            candidates = stats.candidates,
            accepted = stats.accepted,
            rejected = stats.rejected(),
            "category extracted"
        );
        Ok(CategoryOutcome::completed(records, stats))
    }

    /// [`Self::extract_category`] with failures and panics turned into an
    /// outcome, so one category can never take down the others.
    pub fn run_category(
        &self,
        text: &NormalizedText,
        category: &str,
        source_name: &str,
        ids: &IdGenerator,
    ) -> CategoryOutcome {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.extract_category(text, category, source_name, ids)
        }));
        match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e @ CategoryError::Unsupported { .. })) => {
                warn!(category, profile = self.profile.id(), "unsupported category");
                CategoryOutcome::empty(
                    CategoryStatus::Unsupported,
                    Diagnostic::new(
                        Some(category),
                        DiagnosticKind::UnsupportedCategory,
                        e.to_string(),
                    ),
                )
            }
            Ok(Err(e)) => failed_outcome(category, e.to_string()),
            Err(payload) => failed_outcome(category, panic_message(payload.as_ref())),
        }
    }

    /// Empty result for this profile, with the fallback diagnostic if needed.
    pub fn start_result(&self) -> ExtractionResult {
        let mut result = ExtractionResult::new(self.profile.id(), self.fallback_from.is_some());
        if let Some(requested) = &self.fallback_from {
            warn!(
                requested = %requested,
                using = self.profile.id(),
                "unknown game system, using fallback profile"
            );
            result.diagnostics.push(Diagnostic::new(
                None,
                DiagnosticKind::FallbackProfile,
                format!(
                    "unknown game system '{}', using '{}'",
                    requested,
                    self.profile.id()
                ),
            ));
        }
        result
    }

    /// Run the full pipeline over normalized text, one category after another.
    pub fn extract(
        &self,
        text: &NormalizedText,
        categories: &[String],
        source_name: &str,
        ids: &IdGenerator,
    ) -> ExtractionResult {
        let mut result = self.start_result();
        for category in self.resolve_categories(categories) {
            let outcome = self.run_category(text, &category, source_name, ids);
            result.insert_outcome(&category, outcome);
        }
        debug!(
            profile = self.profile.id(),
            records = result.total_records(),
            state = "done",
            "extraction finished"
        );
        result
    }
}

fn source_label(source_name: &str, page: Option<usize>) -> String {
    match (source_name.is_empty(), page) {
        (false, Some(p)) => format!("{}, p. {}", source_name, p),
        (false, None) => source_name.to_string(),
        (true, Some(p)) => format!("p. {}", p),
        (true, None) => String::new(),
    }
}
