use std::sync::{Arc, Mutex};
use std::time::Duration;

use folio_core::{CategoryStatus, Config, PageRange, ProgressEvent, TextPages};
use folio_ingest::{extract_categories, extract_document};
use folio_parsing::{
    ContentExtractor, ExtractionResult, IdGenerator, InputError, NormalizedText, registry,
};
use tokio_util::sync::CancellationToken;

const BOOK: &str = "\
Goblin
Small humanoid (goblinoid), neutral evil
Armor Class 15 (leather armor, shield)
Hit Points 7 (2d6)
Speed 30 ft.
Challenge 1/4 (50 XP)

Bag of Holding
Wondrous item, uncommon
This bag has an interior space considerably larger than its outside dimensions.

Fireball
3rd-level evocation
Casting Time: 1 action
Range: 150 feet
Components: V, S, M
Duration: Instantaneous
A bright streak flashes from your pointing finger.

Wandering Monsters
d4
1-2 Goblin
3-4 Wolf

";

fn dnd5e() -> ContentExtractor<'static> {
    ContentExtractor::new(registry::global().find("dnd5e").unwrap())
}

fn text() -> Arc<NormalizedText> {
    Arc::new(NormalizedText::from_raw(BOOK, 1).unwrap())
}

type Events = Arc<Mutex<Vec<ProgressEvent>>>;

fn recorder() -> (Events, impl Fn(ProgressEvent) + Send + Sync + 'static) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    (events, move |e| sink.lock().unwrap().push(e))
}

fn without_ids(mut result: ExtractionResult) -> ExtractionResult {
    for record in result.records.values_mut().flatten() {
        record.identifier.clear();
    }
    result
}

#[tokio::test]
async fn concurrent_matches_sequential() {
    let config = Config {
        num_workers: 2,
        source_name: "Book".into(),
        ..Config::default()
    };
    let (events, progress) = recorder();
    let concurrent =
        extract_categories(text(), dnd5e(), &config, progress, CancellationToken::new()).await;
    let sequential = dnd5e().extract(&text(), &[], "Book", &IdGenerator::new());

    assert!(concurrent.complete);
    assert_eq!(concurrent.total_records(), 4);
    assert_eq!(without_ids(concurrent), without_ids(sequential));

    let events = events.lock().unwrap();
    let started = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::CategoryStarted { .. }))
        .count();
    let finished = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::CategoryFinished { .. }))
        .count();
    assert_eq!(started, 4);
    assert_eq!(finished, 4);
}

#[tokio::test]
async fn identifiers_are_unique_across_workers() {
    let config = Config {
        num_workers: 4,
        ..Config::default()
    };
    let result =
        extract_categories(text(), dnd5e(), &config, |_| {}, CancellationToken::new()).await;
    let mut ids: Vec<_> = result
        .records
        .values()
        .flatten()
        .map(|r| r.identifier.clone())
        .collect();
    let total = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), total);
    assert!(ids.iter().all(|id| id.len() == 16));
}

#[tokio::test]
async fn cancelled_before_start_abandons_everything() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let (events, progress) = recorder();
    let result = extract_categories(text(), dnd5e(), &Config::default(), progress, cancel).await;

    assert!(!result.complete);
    assert_eq!(result.total_records(), 0);
    assert!(result.status.values().all(|s| *s == CategoryStatus::Abandoned));
    assert_eq!(result.status.len(), 4);

    let events = events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::Abandoned { categories } if categories.len() == 4
    )));
}

#[tokio::test]
async fn cancelling_mid_run_keeps_finished_categories() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let config = Config {
        num_workers: 1,
        ..Config::default()
    };
    let progress = move |e: ProgressEvent| {
        if matches!(e, ProgressEvent::CategoryFinished { .. }) {
            trigger.cancel();
        }
    };
    let result = extract_categories(text(), dnd5e(), &config, progress, cancel).await;

    assert!(!result.complete);
    let completed = result
        .status
        .values()
        .filter(|s| **s == CategoryStatus::Completed)
        .count();
    let abandoned = result
        .status
        .values()
        .filter(|s| **s == CategoryStatus::Abandoned)
        .count();
    assert_eq!(completed, 1);
    assert_eq!(abandoned, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn categories_finished_before_cancel_are_kept() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let config = Config {
        num_workers: 4,
        ..Config::default()
    };
    let progress = move |e: ProgressEvent| {
        if matches!(e, ProgressEvent::CategoryFinished { .. }) && !trigger.is_cancelled() {
            // Give the other workers time to finish before the stop is seen.
            std::thread::sleep(Duration::from_millis(300));
            trigger.cancel();
        }
    };
    let result = extract_categories(text(), dnd5e(), &config, progress, cancel).await;

    assert!(result.complete);
    assert_eq!(result.total_records(), 4);
    assert!(result.status.values().all(|s| *s == CategoryStatus::Completed));
    assert!(result.diagnostics.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timeout_abandons_unfinished_categories() {
    let config = Config {
        categories: vec!["monsters".into(), "spells".into()],
        num_workers: 2,
        timeout: Some(Duration::from_millis(100)),
        ..Config::default()
    };
    let (events, record) = recorder();
    let progress = move |e: ProgressEvent| {
        if matches!(&e, ProgressEvent::CategoryStarted { category } if category == "spells") {
            // Holds this worker well past the deadline.
            std::thread::sleep(Duration::from_millis(1000));
        }
        record(e);
    };
    let result =
        extract_categories(text(), dnd5e(), &config, progress, CancellationToken::new()).await;

    assert!(!result.complete);
    assert_eq!(result.status["monsters"], CategoryStatus::Completed);
    assert_eq!(result.records_for("monsters").len(), 1);
    assert_eq!(result.status["spells"], CategoryStatus::Abandoned);
    assert!(result.records_for("spells").is_empty());

    let diagnostic = &result.diagnostics[0];
    assert_eq!(diagnostic.category.as_deref(), Some("spells"));
    assert_eq!(diagnostic.message, "abandoned: timed out");

    assert!(events.lock().unwrap().iter().any(|e| matches!(
        e,
        ProgressEvent::Abandoned { categories } if categories == &["spells".to_string()]
    )));
}

#[tokio::test]
async fn generous_timeout_does_not_interfere() {
    let config = Config {
        timeout: Some(Duration::from_secs(60)),
        ..Config::default()
    };
    let result =
        extract_categories(text(), dnd5e(), &config, |_| {}, CancellationToken::new()).await;
    assert!(result.complete);
    assert_eq!(result.total_records(), 4);
}

#[tokio::test]
async fn unknown_category_is_reported_not_fatal() {
    let config = Config {
        categories: vec!["monsters".into(), "vehicles".into()],
        ..Config::default()
    };
    let result =
        extract_categories(text(), dnd5e(), &config, |_| {}, CancellationToken::new()).await;
    assert!(result.complete);
    assert_eq!(result.status["vehicles"], CategoryStatus::Unsupported);
    assert_eq!(result.records_for("monsters").len(), 1);
}

#[tokio::test]
async fn document_run_normalizes_and_falls_back() {
    let pages = TextPages::from_text(&format!("Front matter\u{000C}{}", BOOK));
    let config = Config {
        system: "nonexistent-system".into(),
        pages: PageRange::new(2, None),
        ..Config::default()
    };
    let (events, progress) = recorder();
    let result = extract_document(&pages, &config, progress, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.used_fallback);
    assert_eq!(result.system, "generic");
    assert_eq!(result.records_for("monsters")[0].page, Some(2));
    assert!(matches!(
        events.lock().unwrap().first(),
        Some(ProgressEvent::Normalized { pages: 1, .. })
    ));
}

#[tokio::test]
async fn bad_page_range_fails_before_dispatch() {
    let pages = TextPages::from_text(BOOK);
    let config = Config {
        pages: PageRange::new(5, None),
        ..Config::default()
    };
    let err = extract_document(&pages, &config, |_| {}, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, InputError::StartBeyondDocument { start: 5, count: 1 }));
}
