//! Configuration loading, defaults and persistence

mod paths;

pub use paths::*;

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing::warn;

use crate::error::{Error, Result};
use crate::mirror::LinkMethod;

/// Default mod-loading directory, relative to the game directory
pub const DEFAULT_TARGET_DIRECTORY: &str = "Project_Plague/Content/Paks/~mods";

/// Keys accepted by [`Config::set`], in display order
pub const CONFIG_KEYS: &[&str] = &[
    "language",
    "modmanager_path",
    "game_directory",
    "target_directory",
    "link_method",
    "auto_start_modmanager",
    "monitor_enabled",
    "log_level",
];

/// Configuration for paklink
///
/// Missing keys in the persisted file are filled from [`Config::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// UI language code
    pub language: String,
    /// Path to the external mod-manager executable (empty when unset)
    pub modmanager_path: PathBuf,
    /// Directory watched for package files
    pub game_directory: PathBuf,
    /// Mod-loading directory, relative to `game_directory`
    pub target_directory: PathBuf,
    /// Requested link method
    pub link_method: LinkMethod,
    /// Launch the mod manager when monitoring starts
    pub auto_start_modmanager: bool,
    /// Whether monitoring is enabled at all
    pub monitor_enabled: bool,
    /// Log level name (TRACE, DEBUG, INFO, WARN, ERROR)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            modmanager_path: PathBuf::new(),
            game_directory: default_game_directory(),
            target_directory: PathBuf::from(DEFAULT_TARGET_DIRECTORY),
            link_method: LinkMethod::Hardlink,
            auto_start_modmanager: true,
            monitor_enabled: true,
            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&default_config_path())
    }

    /// Load config from `path`, falling back to defaults if the file is
    /// missing, unreadable or malformed.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        let loaded = std::fs::read_to_string(path)
            .map_err(Error::from)
            .and_then(|content| serde_json::from_str::<Self>(&content).map_err(Error::from));

        match loaded {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}, using defaults: {}",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&default_config_path())
    }

    /// Save config to `path`, creating parent directories as needed
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Full path of the mod-loading directory
    pub fn target_dir(&self) -> PathBuf {
        self.game_directory.join(&self.target_directory)
    }

    /// The mod-manager executable, if one is configured
    pub fn modmanager(&self) -> Option<&Path> {
        if self.modmanager_path.as_os_str().is_empty() {
            None
        } else {
            Some(&self.modmanager_path)
        }
    }

    /// Parsed log level, `INFO` when the configured name is not recognized
    pub fn log_level_filter(&self) -> LevelFilter {
        self.log_level.trim().parse().unwrap_or(LevelFilter::INFO)
    }

    /// Check that the watched directory is usable
    pub fn validate(&self) -> Result<()> {
        if !self.game_directory.is_dir() {
            return Err(Error::Config(format!(
                "Game directory does not exist or is not a directory: {}",
                self.game_directory.display()
            )));
        }
        if self.target_directory.is_absolute() {
            return Err(Error::Config(format!(
                "Target directory must be relative to the game directory: {}",
                self.target_directory.display()
            )));
        }
        if self.target_is_game_directory() {
            return Err(Error::Config(format!(
                "Target directory must differ from the game directory: '{}'",
                self.target_directory.display()
            )));
        }
        Ok(())
    }

    fn target_is_game_directory(&self) -> bool {
        let mut depth = 0i32;
        let mut escaped = false;
        for component in self.target_directory.components() {
            match component {
                Component::Normal(_) => depth += 1,
                Component::ParentDir => {
                    depth -= 1;
                    escaped |= depth < 0;
                }
                _ => {}
            }
        }
        if !escaped && depth == 0 {
            return true;
        }

        // Paths leaving the game directory may still lead back into it
        match (self.target_dir().canonicalize(), self.game_directory.canonicalize()) {
            (Ok(target), Ok(game)) => target == game,
            _ => false,
        }
    }

    /// Update a single key from its string form
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "language" => self.language = value.trim().to_string(),
            "modmanager_path" => self.modmanager_path = PathBuf::from(value.trim().trim_matches('"')),
            "game_directory" => self.game_directory = PathBuf::from(value.trim().trim_matches('"')),
            "target_directory" => self.target_directory = PathBuf::from(value.trim()),
            "link_method" => self.link_method = LinkMethod::from(value),
            "auto_start_modmanager" => self.auto_start_modmanager = parse_bool(key, value)?,
            "monitor_enabled" => self.monitor_enabled = parse_bool(key, value)?,
            "log_level" => self.log_level = value.trim().to_uppercase(),
            _ => {
                return Err(Error::Config(format!(
                    "Unknown config key '{}'. Known keys: {}",
                    key,
                    CONFIG_KEYS.join(", ")
                )))
            }
        }
        Ok(())
    }

    /// All keys with their display values, in [`CONFIG_KEYS`] order
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("language", self.language.clone()),
            ("modmanager_path", self.modmanager_path.display().to_string()),
            ("game_directory", self.game_directory.display().to_string()),
            ("target_directory", self.target_directory.display().to_string()),
            ("link_method", self.link_method.to_string()),
            ("auto_start_modmanager", self.auto_start_modmanager.to_string()),
            ("monitor_enabled", self.monitor_enabled.to_string()),
            ("log_level", self.log_level.clone()),
        ]
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Ok(true),
        "false" | "no" | "n" | "0" => Ok(false),
        other => Err(Error::Config(format!(
            "Invalid boolean '{}' for {}",
            other, key
        ))),
    }
}
