use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use folio_core::{
    CategoryOutcome, CategoryStatus, Config, ExtractionResult, PageTextProvider, ProgressEvent,
};
use folio_parsing::extractor::{abandoned_outcome, failed_outcome};
use folio_parsing::normalize::normalize;
use folio_parsing::{ContentExtractor, IdGenerator, InputError, NormalizedText, registry};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Progress = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Normalize a document and extract every requested category concurrently,
/// using the globally installed profile registry.
///
/// Input errors are returned before any category work starts. Cancellation
/// and `config.timeout` never fail the run; they produce a partial result
/// with `complete = false`.
pub async fn extract_document(
    provider: &dyn PageTextProvider,
    config: &Config,
    progress: impl Fn(ProgressEvent) + Send + Sync + 'static,
    cancel: CancellationToken,
) -> Result<ExtractionResult, InputError> {
    let text = normalize(provider, config.pages)?;
    progress(ProgressEvent::Normalized {
        pages: text.page_count(),
        chars: text.len(),
    });

    let lookup = registry::global().get_profile(&config.system);
    let extractor = ContentExtractor::for_lookup(&lookup);
    Ok(extract_categories(Arc::new(text), extractor, config, progress, cancel).await)
}

/// Run every requested category of `extractor` as its own blocking task.
///
/// At most `config.num_workers` categories run at once. Categories still
/// running when `cancel` fires or the timeout expires are reported as
/// abandoned; finished ones are kept.
pub async fn extract_categories(
    text: Arc<NormalizedText>,
    extractor: ContentExtractor<'static>,
    config: &Config,
    progress: impl Fn(ProgressEvent) + Send + Sync + 'static,
    cancel: CancellationToken,
) -> ExtractionResult {
    let progress: Progress = Arc::new(progress);
    let categories = extractor.resolve_categories(&config.categories);
    let mut result = extractor.start_result();

    let permits = Arc::new(Semaphore::new(config.num_workers.max(1)));
    let ids = Arc::new(IdGenerator::new());
    let source_name: Arc<str> = Arc::from(config.source_name.as_str());

    let mut join_set = JoinSet::new();
    for category in &categories {
        let category = category.clone();
        let text = Arc::clone(&text);
        let extractor = extractor.clone();
        let permits = Arc::clone(&permits);
        let ids = Arc::clone(&ids);
        let source_name = Arc::clone(&source_name);
        let progress = Arc::clone(&progress);

        join_set.spawn(async move {
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await;
            progress(ProgressEvent::CategoryStarted {
                category: category.clone(),
            });
            let start = Instant::now();
            let name = category.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                extractor.run_category(&text, &name, &source_name, &ids)
            })
            .await
            .unwrap_or_else(|e| failed_outcome(&category, format!("worker task failed: {}", e)));
            (category, outcome, start.elapsed())
        });
    }

    let deadline = async {
        match config.timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut finished: HashMap<String, CategoryOutcome> = HashMap::new();
    let abandon_reason = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Some("cancelled"),
            _ = &mut deadline => break Some("timed out"),
            joined = join_set.join_next() => match joined {
                None => break None,
                Some(Ok((category, outcome, elapsed))) => {
                    report(&progress, &category, &outcome, elapsed);
                    finished.insert(category, outcome);
                }
                Some(Err(e)) => warn!(error = %e, "category task ended without a result"),
            },
        }
    };

    if let Some(reason) = abandon_reason {
        // Tasks that finished before the stop was noticed still count.
        while let Some(joined) = join_set.try_join_next() {
            if let Ok((category, outcome, elapsed)) = joined {
                report(&progress, &category, &outcome, elapsed);
                finished.insert(category, outcome);
            }
        }
        // Blocking workers cannot be interrupted; their results are discarded.
        join_set.abort_all();
        let abandoned: Vec<String> = categories
            .iter()
            .filter(|c| !finished.contains_key(*c))
            .cloned()
            .collect();
        if !abandoned.is_empty() {
            warn!(reason, categories = ?abandoned, "abandoning unfinished categories");
            for category in &abandoned {
                finished.insert(category.clone(), abandoned_outcome(category, reason));
            }
            progress(ProgressEvent::Abandoned {
                categories: abandoned,
            });
        }
    }

    for category in &categories {
        let outcome = finished
            .remove(category)
            .unwrap_or_else(|| failed_outcome(category, "category task ended without a result"));
        result.insert_outcome(category, outcome);
    }

    info!(
        profile = %result.system,
        records = result.total_records(),
        complete = result.complete,
        "extraction finished"
    );
    result
}

fn report(progress: &Progress, category: &str, outcome: &CategoryOutcome, elapsed: Duration) {
    debug!(category, status = ?outcome.status, ?elapsed, "category finished");
    if outcome.status == CategoryStatus::Failed {
        let message = outcome
            .diagnostic
            .as_ref()
            .map(|d| d.message.clone())
            .unwrap_or_default();
        progress(ProgressEvent::CategoryFailed {
            category: category.to_string(),
            message,
        });
    } else {
        progress(ProgressEvent::CategoryFinished {
            category: category.to_string(),
            accepted: outcome.stats.accepted,
            candidates: outcome.stats.candidates,
            elapsed,
        });
    }
}
