//! XDG Base Directory paths for tablewatch.
//!
//! The monitor keeps its learned state next to the game server it watches,
//! so paths follow XDG on every platform rather than platform-native dirs.

use std::path::PathBuf;

/// Name of the directory created under the XDG roots.
pub const APP_DIR: &str = "tablewatch";

/// Get the tablewatch config directory.
///
/// Returns `$XDG_CONFIG_HOME/tablewatch` if set, otherwise `~/.config/tablewatch`.
///
/// # Examples
///
/// ```
/// use tablewatch_paths::config_dir;
///
/// let config = config_dir();
/// let file = config.join("config.toml");
/// ```
pub fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

/// Get the tablewatch data directory.
///
/// Returns `$XDG_DATA_HOME/tablewatch` if set, otherwise `~/.local/share/tablewatch`.
/// Persisted knowledge (fix attempts, patterns, confidence history) lives here.
pub fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
}

/// Path of the user-level config file.
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Directory holding the persisted knowledge store.
pub fn store_dir() -> PathBuf {
    data_dir().join("store")
}

fn xdg_dir(env_var: &str, home_fallback: &str) -> PathBuf {
    if let Ok(root) = std::env::var(env_var) {
        PathBuf::from(root).join(APP_DIR)
    } else if let Some(home) = dirs::home_dir() {
        home.join(home_fallback).join(APP_DIR)
    } else {
        PathBuf::from(home_fallback).join(APP_DIR)
    }
}
