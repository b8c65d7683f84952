use anyhow::Result;
use std::path::Path;

/// Parent directory of a log file must exist; the file itself is created on demand.
pub fn check_log_path(key: &str, path: &Path) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    anyhow::ensure!(parent.is_dir(), "{}: directory {} missing", key, parent.display());
    anyhow::ensure!(!path.is_dir(), "{}: {} is a directory", key, path.display());
    Ok(())
}
