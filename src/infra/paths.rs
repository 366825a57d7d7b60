// src/infra/paths.rs — Path management
//
// All paths respect the CRUCIBLE_HOME environment variable for isolation.
// When CRUCIBLE_HOME is set, all config and data live under that directory.
// When unset, state lives under ~/.crucible/.
//
// ADAPTIVE_HISTORY_PATH and OUTCOMES_DB_PATH override the two individual
// state files.

use std::path::PathBuf;

/// Returns the CRUCIBLE_HOME override, if set.
fn crucible_home() -> Option<PathBuf> {
    std::env::var_os("CRUCIBLE_HOME").map(PathBuf::from)
}

/// Home directory
pub fn dirs_home() -> PathBuf {
    directories::BaseDirs::new()
        .map(|b| b.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// State directory: $CRUCIBLE_HOME/ or ~/.crucible/
pub fn state_dir() -> PathBuf {
    if let Some(home) = crucible_home() {
        return home;
    }
    dirs_home().join(".crucible")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    state_dir().join("config.toml")
}

/// Outcomes database path (OUTCOMES_DB_PATH overrides).
pub fn outcomes_db_path() -> PathBuf {
    if let Some(p) = std::env::var_os("OUTCOMES_DB_PATH") {
        return PathBuf::from(p);
    }
    state_dir().join("outcomes.sqlite")
}

/// Adaptive strategy history path (ADAPTIVE_HISTORY_PATH overrides).
pub fn adaptive_history_path() -> PathBuf {
    if let Some(p) = std::env::var_os("ADAPTIVE_HISTORY_PATH") {
        return PathBuf::from(p);
    }
    state_dir().join("adaptive_history.json")
}

/// Neural router learning database path
pub fn neural_learning_db_path() -> PathBuf {
    state_dir().join("neural_learning.sqlite")
}

/// OSS pattern store path
pub fn oss_patterns_db_path() -> PathBuf {
    state_dir().join("oss_patterns.sqlite")
}

/// Ensure all required directories exist
pub fn ensure_dirs() -> anyhow::Result<()> {
    std::fs::create_dir_all(state_dir())?;
    for file_path in [outcomes_db_path(), adaptive_history_path()] {
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
