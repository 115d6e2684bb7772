//! Default on-disk locations for configuration and link state

use std::path::PathBuf;

/// Application directory name under the platform config directory
const APP_DIR_NAME: &str = "paklink";

/// Configuration filename
pub const CONFIG_FILENAME: &str = "config.json";

/// Link registry filename
pub const REGISTRY_FILENAME: &str = "links-registry.json";

/// Directory holding the config and registry files.
///
/// - Windows: `%APPDATA%\paklink`
/// - Linux: `~/.config/paklink`
/// - macOS: `~/Library/Application Support/paklink`
///
/// Falls back to `./.paklink` when the platform has no config directory.
pub fn app_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(format!(".{}", APP_DIR_NAME)))
}

/// Default path of the configuration file
pub fn default_config_path() -> PathBuf {
    app_dir().join(CONFIG_FILENAME)
}

/// Default path of the link registry file
pub fn default_registry_path() -> PathBuf {
    app_dir().join(REGISTRY_FILENAME)
}

/// The game directory assumed when none is configured: the working directory,
/// since the tool is meant to be dropped into the game root.
pub fn default_game_directory() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
