//! Data directory layout.
//!
//! Resolved once at startup from `--data-dir` / `WABRIDGE_DATA_DIR`, falling
//! back to `~/.wabridge`.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::anyhow;

/// Resolve the data directory, preferring an explicit path.
pub fn resolve_data_dir(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    dirs::home_dir()
        .map(|home| home.join(".wabridge"))
        .ok_or_else(|| anyhow!("HOME directory not found; pass --data-dir"))
}

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Create the data directory and its subdirectories.
pub fn ensure_dirs(data_dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(data_dir)?;
    std::fs::create_dir_all(log_dir(data_dir))?;
    Ok(())
}
