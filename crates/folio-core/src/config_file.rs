use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile_def::ProfileDef;
use crate::Config;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("failed to write config: {0}")]
    Write(String),
}

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub extraction: Option<ExtractionConfig>,
    pub output: Option<OutputConfig>,
    /// Custom game-system profiles, registered after the built-ins.
    pub profiles: Option<Vec<ProfileDef>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub system: Option<String>,
    pub categories: Option<Vec<String>>,
    pub num_workers: Option<usize>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    pub dir: Option<String>,
    pub write_assets: Option<bool>,
}

impl ConfigFile {
    /// Apply file values on top of `config`. Fields absent from the file keep
    /// their current value.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(ext) = &self.extraction {
            if let Some(system) = &ext.system {
                config.system = system.clone();
            }
            if let Some(categories) = &ext.categories {
                config.categories = categories.clone();
            }
            if let Some(n) = ext.num_workers {
                config.num_workers = n.max(1);
            }
            if let Some(secs) = ext.timeout_secs {
                config.timeout = Some(Duration::from_secs(secs));
            }
        }
        if let Some(out) = &self.output {
            if let Some(dir) = &out.dir {
                config.output_dir = Some(PathBuf::from(dir));
            }
            if let Some(write_assets) = out.write_assets {
                config.write_assets = write_assets;
            }
        }
    }

    pub fn profiles(&self) -> &[ProfileDef] {
        self.profiles.as_deref().unwrap_or(&[])
    }
}

/// Platform config directory path: `<config_dir>/folio/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("folio").join("config.toml"))
}

/// Load config by cascading CWD `.folio.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".folio.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed; parse failures are logged.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    match try_load_from_path(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config file");
            None
        }
    }
}

/// Like [`load_from_path`] but surfaces parse errors. A missing file is `Ok(None)`.
pub fn try_load_from_path(path: &Path) -> Result<Option<ConfigFile>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    toml::from_str(&content)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Merge two configs: `overlay` values take precedence over `base`.
///
/// Profiles are merged by id: an overlay profile replaces a base profile with
/// the same id, other overlay profiles are appended.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        extraction: Some(ExtractionConfig {
            system: overlay
                .extraction
                .as_ref()
                .and_then(|e| e.system.clone())
                .or_else(|| base.extraction.as_ref().and_then(|e| e.system.clone())),
            categories: overlay
                .extraction
                .as_ref()
                .and_then(|e| e.categories.clone())
                .or_else(|| base.extraction.as_ref().and_then(|e| e.categories.clone())),
            num_workers: overlay
                .extraction
                .as_ref()
                .and_then(|e| e.num_workers)
                .or_else(|| base.extraction.as_ref().and_then(|e| e.num_workers)),
            timeout_secs: overlay
                .extraction
                .as_ref()
                .and_then(|e| e.timeout_secs)
                .or_else(|| base.extraction.as_ref().and_then(|e| e.timeout_secs)),
        }),
        output: Some(OutputConfig {
            dir: overlay
                .output
                .as_ref()
                .and_then(|o| o.dir.clone())
                .or_else(|| base.output.as_ref().and_then(|o| o.dir.clone())),
            write_assets: overlay
                .output
                .as_ref()
                .and_then(|o| o.write_assets)
                .or_else(|| base.output.as_ref().and_then(|o| o.write_assets)),
        }),
        profiles: merge_profiles(base.profiles, overlay.profiles),
    }
}

fn merge_profiles(
    base: Option<Vec<ProfileDef>>,
    overlay: Option<Vec<ProfileDef>>,
) -> Option<Vec<ProfileDef>> {
    match (base, overlay) {
        (None, None) => None,
        (Some(b), None) => Some(b),
        (None, Some(o)) => Some(o),
        (Some(mut merged), Some(o)) => {
            for profile in o {
                match merged.iter_mut().find(|p| p.id == profile.id) {
                    Some(existing) => *existing = profile,
                    None => merged.push(profile),
                }
            }
            Some(merged)
        }
    }
}

/// Save the current config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Write(format!("failed to create config directory: {}", e)))?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| ConfigError::Write(format!("failed to serialize config: {}", e)))?;
    std::fs::write(&path, content).map_err(|e| ConfigError::Write(e.to_string()))?;
    Ok(path)
}
