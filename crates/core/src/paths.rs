//! Centralized path functions for app storage locations.

use std::path::PathBuf;

/// App cache root: `~/Library/Caches/bizdiag/` (macOS) or `~/.cache/bizdiag/` (Linux).
pub fn app_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("bizdiag"))
}

/// SQLite database file: `<app_cache_dir>/bizdiag.db`.
pub fn db_path() -> Option<PathBuf> {
    app_cache_dir().map(|d| d.join("bizdiag.db"))
}
