//! Shared helpers for locating the store file and parsing keyword input.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::LOCAL_DB_PATH;

/// Default location of the store file: `notesync/notes.db` under the
/// platform data directory (`~/.local/share` on Linux, `~/Library/Application
/// Support` on macOS, `%APPDATA%` on Windows).
pub fn get_database_path() -> Result<PathBuf> {
    let base = dirs::data_dir().context("no platform data directory for the default store path")?;
    Ok(base.join("notesync").join("notes.db"))
}

/// Resolves the store path for commands that never talk to the remote.
///
/// Uses `LOCAL_DB_PATH` when set and non-empty, the default path otherwise.
pub fn resolve_database_path() -> Result<PathBuf> {
    match std::env::var(LOCAL_DB_PATH) {
        Ok(path) if !path.trim().is_empty() => Ok(PathBuf::from(path)),
        _ => get_database_path(),
    }
}

/// Creates the directory that will hold `db_path`, parents included.
pub fn ensure_database_directory(db_path: &Path) -> Result<()> {
    let Some(dir) = db_path.parent().filter(|dir| !dir.as_os_str().is_empty()) else {
        return Ok(());
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create store directory {}", dir.display()))
}

/// Parses comma-separated keywords.
///
/// Accepts ASCII `,` and full-width `，` separators, trims whitespace from
/// each keyword and drops empty entries.
///
/// # Examples
///
/// ```
/// use notesync::utils::parse_keywords;
///
/// assert_eq!(parse_keywords("rust, 数据库，sqlite,"), vec!["rust", "数据库", "sqlite"]);
/// ```
pub fn parse_keywords(input: &str) -> Vec<String> {
    input
        .split([',', '，'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
