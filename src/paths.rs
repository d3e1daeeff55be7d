//! Filesystem layout.
//!
//! ```text
//! ~/.remora/
//! ├── config.toml   # Global config
//! └── history.db    # Command history + embeddings + cache snapshot
//! ```

use std::path::PathBuf;

/// User's remora home directory: `~/.remora/`
pub fn remora_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".remora")
}

/// Global config file: `~/.remora/config.toml`
pub fn config_path() -> PathBuf {
    remora_home().join("config.toml")
}

/// History database: `~/.remora/history.db`
pub fn history_db_path() -> PathBuf {
    remora_home().join("history.db")
}
