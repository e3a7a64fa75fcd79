//! Declarative profile definitions.
//!
//! A profile is plain data: category descriptors plus the pattern strings used
//! to locate and parse blocks. Built-in profiles and `[[profiles]]` entries in
//! the config file share this schema. Patterns are kept as strings here and
//! compiled per category at extraction time, so one bad pattern only affects
//! the category that owns it.

use serde::{Deserialize, Serialize};

use crate::FieldValue;

/// Host entity kind a category maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Creature,
    Item,
    Document,
    Table,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Creature => "creature",
            EntityKind::Item => "item",
            EntityKind::Document => "document",
            EntityKind::Table => "table",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Text,
    Integer,
    /// All matches of the pattern, collected into a list.
    List,
}

/// One slot of a record and the rule that fills it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub slot: String,
    /// Regex searched anywhere in the block. The value is the `value` named
    /// group if present, else group 1, else the whole match.
    pub pattern: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub kind: FieldKind,
    /// Substituted when an optional slot does not match.
    #[serde(default)]
    pub default: Option<FieldValue>,
}

impl FieldDef {
    pub fn required(slot: &str, pattern: &str) -> Self {
        Self {
            slot: slot.to_string(),
            pattern: pattern.to_string(),
            required: true,
            kind: FieldKind::Text,
            default: None,
        }
    }

    pub fn optional(slot: &str, pattern: &str) -> Self {
        Self {
            required: false,
            ..Self::required(slot, pattern)
        }
    }

    pub fn integer(mut self) -> Self {
        self.kind = FieldKind::Integer;
        self
    }

    pub fn list(mut self) -> Self {
        self.kind = FieldKind::List;
        self
    }

    pub fn with_default(mut self, value: FieldValue) -> Self {
        self.default = Some(value);
        self
    }
}

/// Restricts a category to one section of the document, e.g. the glossary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDef {
    /// Section heading regex. Scanning begins after its first match.
    pub header: String,
    /// Where the section stops. Without it the section runs to the end of the text.
    #[serde(default)]
    pub end: Option<String>,
}

/// How a block's body is interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Layout {
    /// Apply the category's field patterns.
    #[default]
    Fields,
    /// Header line(s) with a die expression, then `start[-end] text` lines.
    RollTable {
        #[serde(default)]
        die_pattern: Option<String>,
        #[serde(default)]
        range_pattern: Option<String>,
    },
}

/// Rule for the folder a persisted record is filed under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Subcategory {
    #[default]
    None,
    /// Lower-cased value of a text slot (e.g. creature type).
    Slot { slot: String },
    /// Integer slot rendered as `N-level`, or `cantrip` for 0.
    Level { slot: String },
    Fixed { name: String },
}

/// Definition of one content category within a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDef {
    pub id: String,
    pub label: String,
    #[serde(default = "default_enabled")]
    pub enabled_by_default: bool,
    pub entity: EntityKind,
    /// Start-boundary regex. A block begins at the start of each match.
    pub start: String,
    /// End-boundary regex, searched after the start match.
    #[serde(default)]
    pub end: Option<String>,
    /// Block length in bytes when no end boundary is found.
    #[serde(default = "default_max_span")]
    pub max_span: usize,
    /// Blocks with fewer non-empty lines are rejected.
    #[serde(default = "default_min_lines")]
    pub min_lines: usize,
    /// Only scan inside this section.
    #[serde(default)]
    pub section: Option<SectionDef>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default)]
    pub subcategory: Subcategory,
}

fn default_enabled() -> bool {
    true
}

fn default_max_span() -> usize {
    1000
}

fn default_min_lines() -> usize {
    1
}

impl CategoryDef {
    pub fn new(id: &str, entity: EntityKind, start: &str) -> Self {
        Self {
            id: id.to_string(),
            label: id.to_string(),
            enabled_by_default: true,
            entity,
            start: start.to_string(),
            end: None,
            max_span: default_max_span(),
            min_lines: default_min_lines(),
            section: None,
            fields: Vec::new(),
            layout: Layout::Fields,
            subcategory: Subcategory::None,
        }
    }

    pub fn end(mut self, pattern: &str) -> Self {
        self.end = Some(pattern.to_string());
        self
    }

    pub fn max_span(mut self, span: usize) -> Self {
        self.max_span = span;
        self
    }

    pub fn min_lines(mut self, n: usize) -> Self {
        self.min_lines = n;
        self
    }

    pub fn within(mut self, header: &str, end: Option<&str>) -> Self {
        self.section = Some(SectionDef {
            header: header.to_string(),
            end: end.map(str::to_string),
        });
        self
    }

    pub fn subcategory(mut self, rule: Subcategory) -> Self {
        self.subcategory = rule;
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }
}

/// Definition of a game-system profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDef {
    pub id: String,
    pub label: String,
    /// Inherit the categories of another profile; same-id categories are replaced.
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub categories: Vec<CategoryDef>,
}
