//! Filesystem persistence of extracted records, token art and map images.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use folio_core::text_utils::sanitize_file_name;
use folio_core::{
    AssetSink, Diagnostic, DiagnosticKind, EntityKind, ExtractedRecord, ExtractionResult,
    FieldValue, PageImage, PageRange, PageTextProvider, PersistenceSink, SinkError,
};
use folio_parsing::{IdGenerator, SystemProfile};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

/// Subfolder for records whose category has no subcategory rule.
const DEFAULT_SUBCATEGORY: &str = "general";

/// Title-page metadata category; folded into the adventure document.
const ADVENTURE_CATEGORY: &str = "adventure";
/// Categories whose saved records the adventure document links to.
const ADVENTURE_PARTS: [&str; 4] = ["chapters", "locations", "npcs", "encounters"];
const MAP_CATEGORY: &str = "maps";
/// Page images larger than this on both sides are maps, not tokens.
const MAP_MIN_SIDE: u32 = 500;

/// Writes Foundry-style entity JSON and images under one root.
///
/// Records go to `packs/_source/<category>/<subcategory>/<name>.json`,
/// tokens to `tokens/<category>/<name>.<ext>` and maps to
/// `assets/maps/<name>.<ext>`. A name already written by this sink gets a
/// `-2`, `-3`, ... suffix.
#[derive(Debug)]
pub struct FsSink {
    root: PathBuf,
    /// Lowercased paths handed out so far.
    claimed: Mutex<HashSet<String>>,
}

impl FsSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            claimed: Mutex::new(HashSet::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// First free `<stem>.<ext>`, `<stem>-2.<ext>`, ... in `dir`.
    fn claim(&self, dir: &Path, stem: &str, ext: &str) -> PathBuf {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        let mut n = 1;
        loop {
            let file = if n == 1 {
                format!("{}.{}", stem, ext)
            } else {
                format!("{}-{}.{}", stem, n, ext)
            };
            let path = dir.join(file);
            // Case-insensitive filesystems would fold Goblin and goblin together.
            if claimed.insert(path.to_string_lossy().to_lowercase()) {
                if n > 1 {
                    debug!(path = %path.display(), "name taken, using suffix");
                }
                return path;
            }
            n += 1;
        }
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<String, SinkError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    Ok(path.display().to_string())
}

fn file_stem(name: &str) -> Result<String, SinkError> {
    let stem = sanitize_file_name(name);
    if stem.is_empty() || stem.chars().all(|c| c == '.' || c == '-') {
        return Err(SinkError::Rejected {
            name: name.to_string(),
            reason: "name is empty after sanitizing".into(),
        });
    }
    Ok(stem)
}

impl PersistenceSink for FsSink {
    fn save(
        &self,
        record: &ExtractedRecord,
        kind: EntityKind,
        category: &str,
        subcategory: &str,
        name: &str,
    ) -> Result<String, SinkError> {
        let stem = file_stem(name)?;
        let dir = self
            .root
            .join("packs")
            .join("_source")
            .join(sanitize_file_name(category))
            .join(sanitize_file_name(subcategory));

        let document = foundry_document(record, kind);
        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| SinkError::Serialize(e.to_string()))?;
        write_file(&self.claim(&dir, &stem, "json"), &bytes)
    }
}

impl AssetSink for FsSink {
    fn save_asset(
        &self,
        bytes: &[u8],
        extension: &str,
        category: &str,
        name: &str,
    ) -> Result<String, SinkError> {
        let stem = file_stem(name)?;
        let dir = if category == MAP_CATEGORY {
            self.root.join("assets").join(MAP_CATEGORY)
        } else {
            self.root.join("tokens").join(sanitize_file_name(category))
        };
        write_file(&self.claim(&dir, &stem, &sanitize_file_name(extension)), bytes)
    }
}

/// Foundry document type for an entity kind.
fn foundry_type(kind: EntityKind, category: &str) -> &'static str {
    match kind {
        EntityKind::Creature => "npc",
        EntityKind::Item if category.contains("spell") => "spell",
        EntityKind::Item => "loot",
        EntityKind::Document if category == "adventures" => "adventure",
        EntityKind::Document => "journal",
        EntityKind::Table => "table",
    }
}

fn field_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Integer(n) => json!(n),
        FieldValue::Text(s) => json!(s),
        FieldValue::List(items) => json!(items),
    }
}

/// `{_id, name, type, system: {...}, flags: {folio: {...}}}`.
pub fn foundry_document(record: &ExtractedRecord, kind: EntityKind) -> Value {
    let mut system: Map<String, Value> = record
        .fields
        .iter()
        .map(|(slot, value)| (slot.clone(), field_json(value)))
        .collect();
    system.insert("source".into(), json!(record.source_label));

    let mut document = json!({
        "_id": record.identifier,
        "name": record.name,
        "type": foundry_type(kind, &record.category),
        "system": system,
        "flags": {
            "folio": {
                "category": record.category,
                "subcategory": record.subcategory,
                "page": record.page,
                "raw_text": record.raw_text,
            }
        }
    });

    if let Some(table) = &record.table {
        document["formula"] = json!(table.formula);
        document["results"] = table
            .results
            .iter()
            .map(|r| json!({ "range": [r.range_start, r.range_end], "text": r.text }))
            .collect();
    }
    document
}

/// Where page images come from and where they go.
pub struct AssetSource<'a> {
    pub provider: &'a dyn PageTextProvider,
    pub sink: &'a dyn AssetSink,
    /// Pages scanned for maps; matches the extraction range.
    pub pages: PageRange,
}

/// Totals from [`persist_result`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub saved: usize,
    pub failed: usize,
    pub assets: usize,
}

/// Save every record in `result`, recording sink failures as diagnostics.
///
/// Creature records take the first non-map image on their page as token art
/// when `assets` is given. An asset failure leaves the record without a
/// token reference; a persistence failure drops only that record.
///
/// Afterwards one reference journal is written per glossary and index run,
/// and, when the adventure category ran, one adventure document linking the
/// saved chapters, locations, NPCs, encounters and maps.
pub fn persist_result(
    result: &mut ExtractionResult,
    profile: &SystemProfile,
    sink: &dyn PersistenceSink,
    assets: Option<&AssetSource<'_>>,
) -> PersistStats {
    let mut stats = PersistStats::default();
    let mut diagnostics = Vec::new();
    let mut saved_ids: BTreeMap<&str, Vec<String>> = BTreeMap::new();

    for (category, records) in &result.records {
        if category == ADVENTURE_CATEGORY {
            continue;
        }
        let kind = profile.entity_kind(category).unwrap_or(EntityKind::Document);

        for record in records {
            let mut record = record.clone();
            let subcategory = record
                .subcategory
                .clone()
                .unwrap_or_else(|| DEFAULT_SUBCATEGORY.to_string());

            if kind == EntityKind::Creature {
                if let Some(assets) = assets {
                    match save_token(&record, assets) {
                        Ok(Some(location)) => {
                            stats.assets += 1;
                            record
                                .fields
                                .insert("token".into(), FieldValue::Text(location));
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(
                                category = %category,
                                name = %record.name,
                                error = %e,
                                "token not saved"
                            );
                            diagnostics.push(Diagnostic::new(
                                Some(category),
                                DiagnosticKind::AssetFailure,
                                format!("{}: {}", record.name, e),
                            ));
                        }
                    }
                }
            }

            if save_record(sink, &record, kind, &subcategory, &mut stats, &mut diagnostics) {
                saved_ids
                    .entry(category.as_str())
                    .or_default()
                    .push(record.identifier.clone());
            }
        }
    }

    let ids = IdGenerator::new();
    let mut aggregates = reference_documents(result, &ids);
    if result.status.contains_key(ADVENTURE_CATEGORY) {
        let maps = match assets {
            Some(assets) => save_maps(assets, &mut stats, &mut diagnostics),
            None => Vec::new(),
        };
        aggregates.push(adventure_document(result, &saved_ids, maps, &ids));
    }
    for (record, subcategory) in &aggregates {
        save_record(
            sink,
            record,
            EntityKind::Document,
            subcategory,
            &mut stats,
            &mut diagnostics,
        );
    }

    result.diagnostics.extend(diagnostics);
    stats
}

/// Hand one record to the sink. Returns whether it was saved.
fn save_record(
    sink: &dyn PersistenceSink,
    record: &ExtractedRecord,
    kind: EntityKind,
    subcategory: &str,
    stats: &mut PersistStats,
    diagnostics: &mut Vec<Diagnostic>,
) -> bool {
    let category = record.category.as_str();
    match sink.save(record, kind, category, subcategory, &record.name) {
        Ok(location) => {
            debug!(category, location = %location, "saved record");
            stats.saved += 1;
            true
        }
        Err(e) => {
            warn!(category, name = %record.name, error = %e, "record not saved");
            stats.failed += 1;
            diagnostics.push(Diagnostic::new(
                Some(category),
                DiagnosticKind::PersistenceFailure,
                format!("{}: {}", record.name, e),
            ));
            false
        }
    }
}

fn is_map(image: &PageImage) -> bool {
    image.width > MAP_MIN_SIDE && image.height > MAP_MIN_SIDE
}

fn save_token(
    record: &ExtractedRecord,
    assets: &AssetSource<'_>,
) -> Result<Option<String>, SinkError> {
    let Some(page) = record.page else {
        return Ok(None);
    };
    let images = assets
        .provider
        .page_images(page)
        .map_err(|e| SinkError::Rejected {
            name: record.name.clone(),
            reason: e.to_string(),
        })?;
    match images.iter().find(|image| !is_map(image)) {
        Some(image) => assets
            .sink
            .save_asset(&image.data, &image.ext, &record.category, &record.name)
            .map(Some),
        None => Ok(None),
    }
}

/// Save every map-sized image in the asset range as `map_<n>`.
fn save_maps(
    assets: &AssetSource<'_>,
    stats: &mut PersistStats,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<String> {
    let mut fail = |message: String| {
        warn!(error = %message, "map not saved");
        diagnostics.push(Diagnostic::new(
            Some(MAP_CATEGORY),
            DiagnosticKind::AssetFailure,
            message,
        ));
    };

    let count = match assets.provider.page_count() {
        Ok(count) => count,
        Err(e) => {
            fail(e.to_string());
            return Vec::new();
        }
    };
    let last = assets.pages.end.map_or(count, |end| end.min(count));

    let mut locations = Vec::new();
    for page in assets.pages.start.max(1)..=last {
        let images = match assets.provider.page_images(page) {
            Ok(images) => images,
            Err(e) => {
                fail(format!("page {}: {}", page, e));
                continue;
            }
        };
        for image in images.iter().filter(|image| is_map(image)) {
            let name = format!("map_{}", locations.len() + 1);
            match assets
                .sink
                .save_asset(&image.data, &image.ext, MAP_CATEGORY, &name)
            {
                Ok(location) => {
                    stats.assets += 1;
                    locations.push(location);
                }
                Err(e) => fail(format!("{} (page {}): {}", name, page, e)),
            }
        }
    }
    info!(maps = locations.len(), "map images saved");
    locations
}

/// Record not backed by a single text block.
fn synthetic_record(
    category: &str,
    name: &str,
    fields: BTreeMap<String, FieldValue>,
    source_label: String,
    identifier: String,
) -> ExtractedRecord {
    ExtractedRecord {
        category: category.to_string(),
        name: name.to_string(),
        subcategory: None,
        fields,
        raw_text: String::new(),
        source_label,
        page: None,
        identifier,
        table: None,
    }
}

/// `"Monster Manual, p. 12"` -> `"Monster Manual"`.
fn book_label(records: &[ExtractedRecord]) -> String {
    records
        .first()
        .map(|r| match r.source_label.rsplit_once(", p. ") {
            Some((book, _)) => book.to_string(),
            None if r.source_label.starts_with("p. ") => String::new(),
            None => r.source_label.clone(),
        })
        .unwrap_or_default()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// One journal per non-empty glossary or index run, with the entries as HTML.
fn reference_documents(
    result: &ExtractionResult,
    ids: &IdGenerator,
) -> Vec<(ExtractedRecord, String)> {
    let mut documents = Vec::new();
    for (category, title) in [("glossary", "Glossary"), ("index", "Index")] {
        let records = result.records_for(category);
        if records.is_empty() {
            continue;
        }
        let content: String = records
            .iter()
            .map(|r| {
                let term = escape_html(&r.name);
                match category {
                    "glossary" => format!(
                        "<h2>{}</h2><p>{}</p>",
                        term,
                        escape_html(r.text("definition").unwrap_or_default())
                    ),
                    _ => format!(
                        "<p><strong>{}</strong>: {}</p>",
                        term,
                        escape_html(&r.field("pages").map(|v| v.to_string()).unwrap_or_default())
                    ),
                }
            })
            .collect();
        let fields = BTreeMap::from([
            ("content".to_string(), FieldValue::Text(content)),
            ("entries".to_string(), FieldValue::Integer(records.len() as i64)),
        ]);
        documents.push((
            synthetic_record("journal", title, fields, book_label(records), ids.next_id()),
            "reference".to_string(),
        ));
    }
    documents
}

/// The adventure as a whole: title-page metadata plus links to its parts.
fn adventure_document(
    result: &ExtractionResult,
    saved_ids: &BTreeMap<&str, Vec<String>>,
    maps: Vec<String>,
    ids: &IdGenerator,
) -> (ExtractedRecord, String) {
    let meta = result.records_for(ADVENTURE_CATEGORY).first();
    let text = |slot: &str, default: &str| {
        let value = meta.and_then(|m| m.text(slot)).unwrap_or(default);
        FieldValue::Text(value.to_string())
    };

    let mut fields = BTreeMap::from([
        ("author".to_string(), text("author", "Unknown")),
        ("level_range".to_string(), text("level_range", "1-20")),
        ("description".to_string(), text("description", "")),
        ("maps".to_string(), FieldValue::List(maps)),
    ]);
    for part in ADVENTURE_PARTS {
        let linked = saved_ids.get(part).cloned().unwrap_or_default();
        fields.insert(part.to_string(), FieldValue::List(linked));
    }

    let mut record = synthetic_record(
        "adventures",
        meta.map_or("Unknown Adventure", |m| m.name.as_str()),
        fields,
        meta.map(|m| m.source_label.clone()).unwrap_or_default(),
        meta.map_or_else(|| ids.next_id(), |m| m.identifier.clone()),
    );
    if let Some(meta) = meta {
        record.raw_text = meta.raw_text.clone();
        record.page = meta.page;
    }
    (record, DEFAULT_SUBCATEGORY.to_string())
}
