//! Path resolution for tessera
//!
//! # Environment Variables
//!
//! - `TESSERA_CONFIG` - Path to `tessera.toml`
//! - `TESSERA_STATE_DIR` - Override state directory (checkpoint store, locks)
//!
//! # Path Resolution Priority
//!
//! For config_file():
//! 1. `--config` flag
//! 2. `TESSERA_CONFIG` environment variable
//! 3. `XDG_CONFIG_HOME/tessera/tessera.toml` (if set)
//! 4. `~/.config/tessera/tessera.toml`
//!
//! For state_dir():
//! 1. `TESSERA_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/tessera` (if set)
//! 3. `~/.local/state/tessera`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const ENV_CONFIG: &str = "TESSERA_CONFIG";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "TESSERA_STATE_DIR";

pub const CONFIG_FILE_NAME: &str = "tessera.toml";

/// Resolve the config file path.
pub fn config_file(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path.to_path_buf());
    }

    if let Ok(file) = std::env::var(ENV_CONFIG) {
        let path = expand(&file);
        log::debug!("Using config file from {}: {}", ENV_CONFIG, path.display());
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config)
            .join("tessera")
            .join(CONFIG_FILE_NAME);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("tessera").join(CONFIG_FILE_NAME))
}

/// Get the tessera state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("tessera");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("tessera");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Default SQLite checkpoint store location.
pub fn default_store_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("checkpoints.db"))
}

/// Directory holding per-instance lock files.
pub fn lock_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("locks"))
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
