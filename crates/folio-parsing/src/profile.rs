use std::collections::HashMap;

use folio_core::{
    CategoryDef, EntityKind, FieldKind, FieldValue, Layout, ProfileDef, SectionDef, Subcategory,
};
use regex::Regex;

use crate::table::TablePatterns;
use crate::{PatternError, ProfileError};

/// Public face of a category: what it is called and whether it runs when the
/// caller does not ask for specific categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryDescriptor {
    pub id: String,
    pub label: String,
    pub enabled_by_default: bool,
}

/// Configuration for one game system.
///
/// Built once from a [`ProfileDef`] when the registry loads and never mutated
/// afterwards. Patterns stay uncompiled until a category is extracted.
#[derive(Debug, Clone)]
pub struct SystemProfile {
    id: String,
    label: String,
    categories: Vec<CategoryDescriptor>,
    patterns: HashMap<String, CategoryDef>,
    entity_mapping: HashMap<String, EntityKind>,
}

impl SystemProfile {
    pub fn from_def(def: &ProfileDef) -> Result<Self, ProfileError> {
        if def.categories.is_empty() {
            return Err(ProfileError::Empty(def.id.clone()));
        }

        let mut categories = Vec::with_capacity(def.categories.len());
        let mut patterns = HashMap::with_capacity(def.categories.len());
        let mut entity_mapping = HashMap::with_capacity(def.categories.len());
        for cat in &def.categories {
            if patterns.contains_key(&cat.id) {
                return Err(ProfileError::DuplicateCategory {
                    profile: def.id.clone(),
                    category: cat.id.clone(),
                });
            }
            categories.push(CategoryDescriptor {
                id: cat.id.clone(),
                label: cat.label.clone(),
                enabled_by_default: cat.enabled_by_default,
            });
            entity_mapping.insert(cat.id.clone(), cat.entity);
            patterns.insert(cat.id.clone(), cat.clone());
        }

        Ok(Self {
            id: def.id.clone(),
            label: def.label.clone(),
            categories,
            patterns,
            entity_mapping,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Category descriptors in declaration order.
    pub fn categories(&self) -> &[CategoryDescriptor] {
        &self.categories
    }

    pub fn supports(&self, category: &str) -> bool {
        self.patterns.contains_key(category)
    }

    pub fn patterns(&self, category: &str) -> Option<&CategoryDef> {
        self.patterns.get(category)
    }

    pub fn entity_kind(&self, category: &str) -> Option<EntityKind> {
        self.entity_mapping.get(category).copied()
    }

    /// Ids of the categories that run when none are requested.
    pub fn default_categories(&self) -> Vec<String> {
        self.categories
            .iter()
            .filter(|c| c.enabled_by_default)
            .map(|c| c.id.clone())
            .collect()
    }

    /// Convert back to the declarative form, categories in declaration order.
    pub fn to_def(&self) -> ProfileDef {
        ProfileDef {
            id: self.id.clone(),
            label: self.label.clone(),
            extends: None,
            categories: self
                .categories
                .iter()
                .filter_map(|c| self.patterns.get(&c.id).cloned())
                .collect(),
        }
    }

    /// Compile the patterns of one category. `None` if the profile does not
    /// define it.
    pub fn compile(&self, category: &str) -> Option<Result<CompiledCategory, PatternError>> {
        self.patterns.get(category).map(CompiledCategory::compile)
    }

    /// Compile every category and collect the failures.
    pub fn validate(&self) -> Vec<PatternError> {
        self.categories
            .iter()
            .filter_map(|c| self.compile(&c.id))
            .filter_map(Result::err)
            .collect()
    }
}

/// A field rule ready to run.
#[derive(Debug, Clone)]
pub struct CompiledField {
    pub slot: String,
    pub regex: Regex,
    pub required: bool,
    pub kind: FieldKind,
    pub default: Option<FieldValue>,
}

impl CompiledField {
    /// Value used when an optional slot does not match.
    pub fn fallback(&self) -> FieldValue {
        self.default.clone().unwrap_or_else(|| match self.kind {
            FieldKind::Text => FieldValue::Text(String::new()),
            FieldKind::Integer => FieldValue::Integer(0),
            FieldKind::List => FieldValue::List(Vec::new()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompiledSection {
    pub header: Regex,
    pub end: Option<Regex>,
}

#[derive(Debug, Clone)]
pub enum CompiledLayout {
    Fields,
    RollTable(TablePatterns),
}

/// All patterns of one category, compiled.
#[derive(Debug, Clone)]
pub struct CompiledCategory {
    pub id: String,
    pub entity: EntityKind,
    pub start: Regex,
    pub end: Option<Regex>,
    pub max_span: usize,
    pub min_lines: usize,
    pub section: Option<CompiledSection>,
    pub fields: Vec<CompiledField>,
    pub layout: CompiledLayout,
    pub subcategory: Subcategory,
}

impl CompiledCategory {
    pub fn compile(def: &CategoryDef) -> Result<Self, PatternError> {
        let compile = |what: &str, pattern: &str| -> Result<Regex, PatternError> {
            Regex::new(pattern).map_err(|source| PatternError::Invalid {
                category: def.id.clone(),
                what: what.to_string(),
                source,
            })
        };

        let start = compile("start", &def.start)?;
        let end = def.end.as_deref().map(|p| compile("end", p)).transpose()?;
        let section = def
            .section
            .as_ref()
            .map(|SectionDef { header, end }| {
                Ok::<_, PatternError>(CompiledSection {
                    header: compile("section header", header)?,
                    end: end
                        .as_deref()
                        .map(|p| compile("section end", p))
                        .transpose()?,
                })
            })
            .transpose()?;

        let mut fields = Vec::with_capacity(def.fields.len());
        for field in &def.fields {
            if let Some(default) = &field.default {
                let matches_kind = matches!(
                    (field.kind, default),
                    (FieldKind::Text, FieldValue::Text(_))
                        | (FieldKind::Integer, FieldValue::Integer(_))
                        | (FieldKind::List, FieldValue::List(_))
                );
                if !matches_kind {
                    return Err(PatternError::DefaultKind {
                        category: def.id.clone(),
                        slot: field.slot.clone(),
                    });
                }
            }
            fields.push(CompiledField {
                slot: field.slot.clone(),
                regex: compile(&format!("'{}' field", field.slot), &field.pattern)?,
                required: field.required,
                kind: field.kind,
                default: field.default.clone(),
            });
        }

        let layout = match &def.layout {
            Layout::Fields => CompiledLayout::Fields,
            Layout::RollTable {
                die_pattern,
                range_pattern,
            } => CompiledLayout::RollTable(
                TablePatterns::compile(die_pattern.as_deref(), range_pattern.as_deref()).map_err(
                    |source| PatternError::Invalid {
                        category: def.id.clone(),
                        what: "roll table".to_string(),
                        source,
                    },
                )?,
            ),
        };

        Ok(Self {
            id: def.id.clone(),
            entity: def.entity,
            start,
            end,
            max_span: def.max_span,
            min_lines: def.min_lines,
            section,
            fields,
            layout,
            subcategory: def.subcategory.clone(),
        })
    }

    pub fn has_slot(&self, slot: &str) -> bool {
        self.fields.iter().any(|f| f.slot == slot)
    }
}
