//! Game-system id → [`SystemProfile`].

use std::collections::HashSet;

use folio_core::ProfileDef;
use once_cell::sync::{Lazy, OnceCell};

use crate::profile::SystemProfile;
use crate::ProfileError;

/// Profile used when the requested system is unknown.
pub const FALLBACK_PROFILE: &str = "generic";

const BUILTIN_SOURCES: [(&str, &str); 3] = [
    ("generic", include_str!("../profiles/generic.toml")),
    ("dnd5e", include_str!("../profiles/dnd5e.toml")),
    ("pf2e", include_str!("../profiles/pf2e.toml")),
];

static BUILTINS: Lazy<ProfileRegistry> = Lazy::new(|| {
    ProfileRegistry::try_builtin().expect("built-in profiles are valid")
});

static GLOBAL: OnceCell<ProfileRegistry> = OnceCell::new();

/// Install the process-wide registry. Fails (returning it) if one is already
/// installed or [`global`] has already been read.
pub fn install(registry: ProfileRegistry) -> Result<(), ProfileRegistry> {
    GLOBAL.set(registry)
}

/// The process-wide registry; the built-ins unless [`install`] ran first.
pub fn global() -> &'static ProfileRegistry {
    GLOBAL.get_or_init(ProfileRegistry::builtin)
}

/// Result of [`ProfileRegistry::get_profile`].
#[derive(Debug, Clone)]
pub struct ProfileLookup<'a> {
    pub profile: &'a SystemProfile,
    /// True when `requested` was unknown and the fallback profile was returned.
    pub used_fallback: bool,
    pub requested: String,
}

/// Ordered, read-only set of profiles: built-ins first, then custom ones in
/// registration order.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: Vec<SystemProfile>,
}

impl ProfileRegistry {
    /// Parse the embedded built-in profile definitions.
    pub fn try_builtin() -> Result<Self, ProfileError> {
        let mut registry = Self {
            profiles: Vec::with_capacity(BUILTIN_SOURCES.len()),
        };
        for (name, source) in BUILTIN_SOURCES {
            let def: ProfileDef =
                toml::from_str(source).map_err(|source| ProfileError::Builtin { name, source })?;
            registry.register(&def)?;
        }
        Ok(registry)
    }

    /// The built-in profiles.
    pub fn builtin() -> Self {
        BUILTINS.clone()
    }

    /// Built-ins plus custom definitions, registered in order.
    pub fn with_custom(defs: &[ProfileDef]) -> Result<Self, ProfileError> {
        let mut registry = Self::builtin();
        for def in defs {
            registry.register(def)?;
        }
        Ok(registry)
    }

    /// Add a profile. With `extends`, the base profile's categories are
    /// inherited and same-id categories replaced.
    pub fn register(&mut self, def: &ProfileDef) -> Result<(), ProfileError> {
        if self.find(&def.id).is_some() {
            return Err(ProfileError::DuplicateProfile(def.id.clone()));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = def.categories.iter().find(|c| !seen.insert(c.id.as_str())) {
            return Err(ProfileError::DuplicateCategory {
                profile: def.id.clone(),
                category: dup.id.clone(),
            });
        }

        let resolved = match &def.extends {
            None => def.clone(),
            Some(base) => {
                let base_profile = self.find(base).ok_or_else(|| ProfileError::UnknownBase {
                    profile: def.id.clone(),
                    base: base.clone(),
                })?;
                let mut merged = base_profile.to_def();
                merged.id = def.id.clone();
                merged.label = def.label.clone();
                for cat in &def.categories {
                    match merged.categories.iter_mut().find(|c| c.id == cat.id) {
                        Some(existing) => *existing = cat.clone(),
                        None => merged.categories.push(cat.clone()),
                    }
                }
                merged
            }
        };

        let profile = SystemProfile::from_def(&resolved)?;
        tracing::debug!(
            profile = profile.id(),
            categories = profile.categories().len(),
            extends = ?def.extends,
            "registered profile"
        );
        self.profiles.push(profile);
        Ok(())
    }

    pub fn list_profiles(&self) -> &[SystemProfile] {
        &self.profiles
    }

    pub fn find(&self, id: &str) -> Option<&SystemProfile> {
        self.profiles.iter().find(|p| p.id() == id)
    }

    /// The generic profile.
    pub fn fallback(&self) -> &SystemProfile {
        // Every registry starts from the built-ins, so the fallback is present.
        self.find(FALLBACK_PROFILE).unwrap_or(&self.profiles[0])
    }

    /// Look up a profile, falling back to the generic one for unknown ids.
    pub fn get_profile(&self, id: &str) -> ProfileLookup<'_> {
        match self.find(id) {
            Some(profile) => ProfileLookup {
                profile,
                used_fallback: false,
                requested: id.to_string(),
            },
            None => ProfileLookup {
                profile: self.fallback(),
                used_fallback: true,
                requested: id.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{CategoryDef, EntityKind};

    fn custom(id: &str, extends: Option<&str>, categories: Vec<CategoryDef>) -> ProfileDef {
        ProfileDef {
            id: id.into(),
            label: id.to_uppercase(),
            extends: extends.map(str::to_string),
            categories,
        }
    }

    #[test]
    fn builtins_parse_and_compile() {
        let registry = ProfileRegistry::try_builtin().unwrap();
        let ids: Vec<_> = registry.list_profiles().iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["generic", "dnd5e", "pf2e"]);
        for profile in registry.list_profiles() {
            let errors = profile.validate();
            assert!(errors.is_empty(), "{}: {:?}", profile.id(), errors);
        }
    }

    #[test]
    fn generic_covers_core_categories() {
        let registry = ProfileRegistry::builtin();
        let generic = registry.fallback();
        assert_eq!(generic.id(), "generic");
        assert_eq!(generic.entity_kind("monsters"), Some(EntityKind::Creature));
        assert_eq!(generic.entity_kind("items"), Some(EntityKind::Item));
        assert_eq!(generic.entity_kind("journal"), Some(EntityKind::Document));
    }

    #[test]
    fn dnd5e_categories() {
        let registry = ProfileRegistry::builtin();
        let dnd = registry.find("dnd5e").unwrap();
        for id in [
            "monsters", "spells", "items", "traits", "tables", "adventure", "chapters", "locations",
            "encounters", "npcs", "glossary", "index",
        ] {
            assert!(dnd.supports(id), "missing {}", id);
        }
    }

    #[test]
    fn unknown_id_falls_back() {
        let registry = ProfileRegistry::builtin();
        let lookup = registry.get_profile("nonexistent-system");
        assert!(lookup.used_fallback);
        assert_eq!(lookup.profile.id(), "generic");
        assert_eq!(lookup.requested, "nonexistent-system");

        let lookup = registry.get_profile("pf2e");
        assert!(!lookup.used_fallback);
        assert_eq!(lookup.profile.id(), "pf2e");
    }

    #[test]
    fn custom_profile_extends_base() {
        let hazards = CategoryDef::new("hazards", EntityKind::Document, "(?m)^HAZARD");
        let spells = CategoryDef::new("spells", EntityKind::Item, "(?m)^SPELL");
        let registry = ProfileRegistry::with_custom(&[custom(
            "homebrew",
            Some("dnd5e"),
            vec![spells.clone(), hazards],
        )])
        .unwrap();

        let ids: Vec<_> = registry.list_profiles().iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["generic", "dnd5e", "pf2e", "homebrew"]);

        let homebrew = registry.find("homebrew").unwrap();
        assert!(homebrew.supports("monsters"));
        assert!(homebrew.supports("hazards"));
        assert_eq!(homebrew.patterns("spells").unwrap().start, spells.start);
        assert_eq!(homebrew.label(), "HOMEBREW");
    }

    #[test]
    fn duplicate_profile_id_is_an_error() {
        let cat = CategoryDef::new("hazards", EntityKind::Document, "x");
        let err = ProfileRegistry::with_custom(&[custom("dnd5e", None, vec![cat])]).unwrap_err();
        assert!(matches!(err, ProfileError::DuplicateProfile(id) if id == "dnd5e"));
    }

    #[test]
    fn duplicate_category_in_custom_profile_is_an_error() {
        let cat = CategoryDef::new("hazards", EntityKind::Document, "x");
        let err = ProfileRegistry::with_custom(&[custom(
            "homebrew",
            Some("dnd5e"),
            vec![cat.clone(), cat],
        )])
        .unwrap_err();
        assert!(matches!(err, ProfileError::DuplicateCategory { .. }));
    }

    #[test]
    fn unknown_base_is_an_error() {
        let cat = CategoryDef::new("hazards", EntityKind::Document, "x");
        let err = ProfileRegistry::with_custom(&[custom("homebrew", Some("gurps"), vec![cat])])
            .unwrap_err();
        assert!(matches!(err, ProfileError::UnknownBase { .. }));
    }
}
