//! Turn one candidate block into record fields, or reject it.

use std::collections::BTreeMap;

use folio_core::text_utils::collapse_whitespace;
use folio_core::{FieldKind, FieldValue, RollTable, Subcategory};
use regex::{Captures, Regex};

use crate::profile::{CompiledCategory, CompiledField, CompiledLayout};
use crate::table::TableRejection;

/// Result of parsing a single block.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBlock {
    Parsed(ParsedFields),
    Rejected(RejectReason),
}

/// Reason a block was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Fewer non-empty lines than the category minimum.
    TooShort,
    /// A required slot (or the table header/body) did not match.
    MissingRequired(String),
    EmptyName,
}

/// Everything a record needs except provenance and identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFields {
    pub name: String,
    pub subcategory: Option<String>,
    /// Every declared slot except `name`, filled or defaulted.
    pub fields: BTreeMap<String, FieldValue>,
    pub table: Option<RollTable>,
}

/// Parse `text` with the rules of `category`.
pub fn parse_block(text: &str, category: &CompiledCategory) -> ParsedBlock {
    let line_count = text.lines().filter(|l| !l.trim().is_empty()).count();
    if line_count < category.min_lines {
        return ParsedBlock::Rejected(RejectReason::TooShort);
    }

    let mut fields = BTreeMap::new();
    for field in &category.fields {
        match extract_field(field, text) {
            Some(value) => {
                fields.insert(field.slot.clone(), value);
            }
            None if field.required => {
                return ParsedBlock::Rejected(RejectReason::MissingRequired(field.slot.clone()));
            }
            None => {
                fields.insert(field.slot.clone(), field.fallback());
            }
        }
    }

    let mut table_name = None;
    let table = match &category.layout {
        CompiledLayout::Fields => None,
        CompiledLayout::RollTable(patterns) => match patterns.parse(text) {
            Ok(parsed) => {
                fields
                    .entry("formula".to_string())
                    .or_insert_with(|| FieldValue::Text(parsed.table.formula.clone()));
                table_name = Some(parsed.name);
                Some(parsed.table)
            }
            Err(TableRejection::EmptyName) => {
                return ParsedBlock::Rejected(RejectReason::EmptyName);
            }
            Err(TableRejection::NoDie) => {
                return ParsedBlock::Rejected(RejectReason::MissingRequired("die".into()));
            }
            Err(TableRejection::NoEntries) => {
                return ParsedBlock::Rejected(RejectReason::MissingRequired("entries".into()));
            }
        },
    };

    let name = match fields.remove("name") {
        Some(value) => value.to_string(),
        None if category.has_slot("name") => String::new(),
        None => table_name.unwrap_or_else(|| first_line(text)),
    };
    let name = collapse_whitespace(&name);
    if name.is_empty() {
        return ParsedBlock::Rejected(RejectReason::EmptyName);
    }

    let subcategory = resolve_subcategory(&category.subcategory, &fields);
    ParsedBlock::Parsed(ParsedFields {
        name,
        subcategory,
        fields,
        table,
    })
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// The `value` group, else the first group that took part in the match,
/// else the whole match.
fn captured_value<'t>(caps: &Captures<'t>) -> Option<&'t str> {
    caps.name("value")
        .or_else(|| caps.iter().skip(1).flatten().next())
        .or_else(|| caps.get(0))
        .map(|m| m.as_str())
}

fn first_value<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text).as_ref().and_then(captured_value)
}

fn parse_integer(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',')
        .map(|c| if c == '\u{2212}' || c == '\u{2013}' { '-' } else { c })
        .collect();
    cleaned.parse().ok()
}

fn extract_field(field: &CompiledField, text: &str) -> Option<FieldValue> {
    match field.kind {
        FieldKind::Text => first_value(&field.regex, text)
            .map(collapse_whitespace)
            .filter(|s| !s.is_empty())
            .map(FieldValue::Text),
        FieldKind::Integer => first_value(&field.regex, text)
            .and_then(parse_integer)
            .map(FieldValue::Integer),
        FieldKind::List => {
            let items: Vec<String> = field
                .regex
                .captures_iter(text)
                .filter_map(|caps| captured_value(&caps).map(collapse_whitespace))
                .filter(|s| !s.is_empty())
                .collect();
            (!items.is_empty()).then_some(FieldValue::List(items))
        }
    }
}

fn resolve_subcategory(rule: &Subcategory, fields: &BTreeMap<String, FieldValue>) -> Option<String> {
    match rule {
        Subcategory::None => None,
        Subcategory::Slot { slot } => fields
            .get(slot)
            .map(|v| v.to_string().to_lowercase())
            .filter(|s| !s.is_empty()),
        Subcategory::Level { slot } => fields.get(slot).and_then(FieldValue::as_integer).map(|n| {
            if n > 0 {
                format!("{}-level", n)
            } else {
                "cantrip".to_string()
            }
        }),
        Subcategory::Fixed { name } => Some(name.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{CategoryDef, EntityKind, FieldDef, Layout};

    const NAME: &str = r"(?m)\A[ \t]*([^\s\d][^\n]*?)[ \t]*$";

    fn monsters() -> CompiledCategory {
        let def = CategoryDef::new("monsters", EntityKind::Creature, "x")
            .min_lines(2)
            .field(FieldDef::required("name", NAME))
            .field(
                FieldDef::optional("type", r"(?m)^(?:Small|Medium|Large)\s+([a-z]+)")
                    .with_default(FieldValue::Text("unknown".into())),
            )
            .field(
                FieldDef::optional("ac", r"\bAC\s+(\d+)")
                    .integer()
                    .with_default(FieldValue::Integer(10)),
            )
            .field(FieldDef::optional("hp", r"\bHP\s+(?P<value>[\d,]+)").integer())
            .subcategory(Subcategory::Slot {
                slot: "type".into(),
            });
        CompiledCategory::compile(&def).unwrap()
    }

    fn parsed(block: ParsedBlock) -> ParsedFields {
        match block {
            ParsedBlock::Parsed(p) => p,
            ParsedBlock::Rejected(r) => panic!("expected a record, got {:?}", r),
        }
    }

    #[test]
    fn parses_monster_fields() {
        let p = parsed(parse_block(
            "Goblin\nSmall humanoid (goblinoid), neutral evil\nAC 15\nHP 1,200",
            &monsters(),
        ));
        assert_eq!(p.name, "Goblin");
        assert_eq!(p.fields["type"], FieldValue::Text("humanoid".into()));
        assert_eq!(p.fields["ac"], FieldValue::Integer(15));
        assert_eq!(p.fields["hp"], FieldValue::Integer(1200));
        assert!(!p.fields.contains_key("name"));
        assert_eq!(p.subcategory.as_deref(), Some("humanoid"));
    }

    #[test]
    fn defaults_fill_missing_optional_slots() {
        let p = parsed(parse_block("Shadow\nsomething dark", &monsters()));
        assert_eq!(p.fields["type"], FieldValue::Text("unknown".into()));
        assert_eq!(p.fields["ac"], FieldValue::Integer(10));
        assert_eq!(p.fields["hp"], FieldValue::Integer(0));
    }

    #[test]
    fn missing_name_rejects() {
        let block = parse_block("\nAC 15\nHP 20", &monsters());
        assert_eq!(
            block,
            ParsedBlock::Rejected(RejectReason::MissingRequired("name".into()))
        );
    }

    #[test]
    fn too_few_lines_rejects() {
        let block = parse_block("Goblin\n\n   \n", &monsters());
        assert_eq!(block, ParsedBlock::Rejected(RejectReason::TooShort));
    }

    #[test]
    fn unparseable_integer_counts_as_unmatched() {
        let def = CategoryDef::new("m", EntityKind::Creature, "x")
            .field(FieldDef::required("cr", r"CR (\S+)").integer());
        let compiled = CompiledCategory::compile(&def).unwrap();
        assert_eq!(
            parse_block("Imp\nCR 1/4", &compiled),
            ParsedBlock::Rejected(RejectReason::MissingRequired("cr".into()))
        );
    }

    #[test]
    fn text_values_are_collapsed() {
        let def = CategoryDef::new("spells", EntityKind::Item, "x")
            .field(FieldDef::required("range", r"Range:\s*(?s)(.+?)\n\n"));
        let compiled = CompiledCategory::compile(&def).unwrap();
        let p = parsed(parse_block("Fireball\nRange:   150\n   feet\n\n", &compiled));
        assert_eq!(p.fields["range"], FieldValue::Text("150 feet".into()));
        assert_eq!(p.name, "Fireball");
    }

    #[test]
    fn first_participating_group_wins() {
        let def = CategoryDef::new("spells", EntityKind::Item, "x").field(FieldDef::required(
            "school",
            r"(?i)\d(?:st|nd|rd|th)-level ([a-z]+)|([a-z]+) cantrip",
        ));
        let compiled = CompiledCategory::compile(&def).unwrap();
        let p = parsed(parse_block("Light\nEvocation cantrip", &compiled));
        assert_eq!(p.fields["school"], FieldValue::Text("Evocation".into()));
    }

    #[test]
    fn list_fields_collect_all_matches() {
        let def = CategoryDef::new("index", EntityKind::Document, "x")
            .field(FieldDef::required("name", r"\A([^,]+),"))
            .field(FieldDef::optional("pages", r"(?P<value>\d+(?:-\d+)?)\s*(?:,|$)").list());
        let compiled = CompiledCategory::compile(&def).unwrap();
        let p = parsed(parse_block("Goblin, 12, 40-41", &compiled));
        assert_eq!(p.name, "Goblin");
        assert_eq!(
            p.fields["pages"],
            FieldValue::List(vec!["12".into(), "40-41".into()])
        );
    }

    #[test]
    fn level_subcategory() {
        let def = CategoryDef::new("spells", EntityKind::Item, "x")
            .field(
                FieldDef::optional("level", r"(\d)(?:st|nd|rd|th)-level")
                    .integer()
                    .with_default(FieldValue::Integer(0)),
            )
            .subcategory(Subcategory::Level {
                slot: "level".into(),
            });
        let compiled = CompiledCategory::compile(&def).unwrap();
        let p = parsed(parse_block("Fireball\n3rd-level evocation", &compiled));
        assert_eq!(p.subcategory.as_deref(), Some("3-level"));
        let p = parsed(parse_block("Light\nEvocation cantrip", &compiled));
        assert_eq!(p.subcategory.as_deref(), Some("cantrip"));
    }

    #[test]
    fn roll_table_layout_uses_header_name() {
        let def = CategoryDef::new("tables", EntityKind::Table, "x")
            .min_lines(3)
            .layout(Layout::RollTable {
                die_pattern: None,
                range_pattern: None,
            });
        let compiled = CompiledCategory::compile(&def).unwrap();
        let p = parsed(parse_block(
            "Wandering Monsters Table\nd6\n1-2 Goblin scout\n3 Ogre\n4-6 Nothing",
            &compiled,
        ));
        assert_eq!(p.name, "Wandering Monsters Table");
        assert_eq!(p.fields["formula"], FieldValue::Text("d6".into()));
        assert_eq!(p.table.unwrap().results.len(), 6);

        assert_eq!(
            parse_block("Omens\nno dice here\n1 crow", &compiled),
            ParsedBlock::Rejected(RejectReason::MissingRequired("die".into()))
        );
    }

    #[test]
    fn negative_integers_with_unicode_minus() {
        let def = CategoryDef::new("creatures", EntityKind::Creature, "x")
            .field(FieldDef::required("level", r"CREATURE\s+(\S+)").integer());
        let compiled = CompiledCategory::compile(&def).unwrap();
        let p = parsed(parse_block("RAT CREATURE \u{2212}1", &compiled));
        assert_eq!(p.fields["level"], FieldValue::Integer(-1));
    }
}
