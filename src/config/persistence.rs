// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration persistence (settings file and instrument definitions).

use crate::config::{AppConfig, InstrumentDefinition};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Instrument definition {path}: {source}")]
    InstrumentParse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Manages configuration file persistence.
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Create a config manager rooted at the XDG config directory.
    pub fn new() -> Result<Self, ConfigError> {
        let project_dirs =
            ProjectDirs::from("", "", "pushpin").ok_or(ConfigError::NoConfigDir)?;
        Self::with_dir(project_dirs.config_dir())
    }

    /// Create a config manager rooted at an explicit directory.
    pub fn with_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config_dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&config_dir)?;
        debug!("Config directory: {:?}", config_dir);
        Ok(Self { config_dir })
    }

    /// Get the path to the main config file.
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("settings.toml")
    }

    /// Default folder for instrument definitions.
    pub fn default_instruments_dir(&self) -> PathBuf {
        self.config_dir.join("instruments")
    }

    /// Load the application config. A missing file is created with the defaults.
    pub fn load_config(&self) -> Result<AppConfig, ConfigError> {
        let path = self.config_path();
        if !path.exists() {
            let config = AppConfig::default();
            match self.save_config(&config) {
                Ok(()) => info!("Wrote default settings to {:?}", path),
                Err(e) => warn!("Could not write default settings to {:?}: {}", path, e),
            }
            return Ok(config);
        }

        let content = fs::read_to_string(&path)?;
        let config = AppConfig::from_toml(&content)?;
        info!("Loaded settings from {:?}", path);
        Ok(config)
    }

    /// Save the application config.
    pub fn save_config(&self, config: &AppConfig) -> Result<(), ConfigError> {
        let content = config.to_toml()?;
        fs::write(self.config_path(), content)?;
        Ok(())
    }

    /// Load instrument definitions from `folder`.
    ///
    /// With a non-empty `enabled` list, exactly those `<short_name>.json` files
    /// are read and a missing one is skipped with a warning. Otherwise every
    /// `.json` file in the folder is loaded, sorted by file name.
    pub fn load_instruments(
        &self,
        folder: &Path,
        enabled: &[String],
    ) -> Result<Vec<InstrumentDefinition>, ConfigError> {
        let paths: Vec<PathBuf> = if enabled.is_empty() {
            if !folder.exists() {
                warn!("Instrument folder {:?} does not exist", folder);
                return Ok(Vec::new());
            }
            WalkDir::new(folder)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .map(|e| e.into_path())
                .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
                .collect()
        } else {
            enabled
                .iter()
                .map(|name| folder.join(format!("{}.json", name)))
                .collect()
        };

        let mut definitions = Vec::new();
        for path in paths {
            if !path.exists() {
                warn!("Instrument definition {:?} not found, skipping", path);
                continue;
            }
            let content = fs::read_to_string(&path)?;
            let mut definition: InstrumentDefinition = serde_json::from_str(&content)
                .map_err(|source| ConfigError::InstrumentParse {
                    path: path.clone(),
                    source,
                })?;
            if definition.instrument_short_name.is_empty() {
                if let Some(stem) = path.file_stem() {
                    definition.instrument_short_name = stem.to_string_lossy().to_string();
                }
            }
            info!(
                "Loaded instrument '{}' ({} devices, {} clip sections)",
                definition.instrument_name,
                definition.devices.len(),
                definition.clip.as_ref().map(|c| c.len()).unwrap_or(0)
            );
            definitions.push(definition);
        }

        Ok(definitions)
    }
}
