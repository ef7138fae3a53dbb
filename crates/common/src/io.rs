//! Data-directory helpers.
//!
//! The engine persists its configuration, per-VM state files, and state
//! databases under a single data directory. The default is `./data`
//! relative to the working directory; callers that need isolation (tests,
//! embedders) pass an explicit directory instead.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default data directory: `./data`.
pub fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

/// Configuration directory under a data directory.
pub fn config_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("config")
}

/// Create `dir` (and any missing parents) if it does not already exist.
pub fn create_dir_if_missing(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}
