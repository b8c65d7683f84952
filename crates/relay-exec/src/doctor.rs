use anyhow::Result;
use tracing::warn;

use crate::DispatchConfig;

pub fn check_dispatch(cfg: &DispatchConfig) -> Result<()> {
    anyhow::ensure!(!cfg.search_dirs.is_empty(), "commands.search_dirs is empty");
    anyhow::ensure!(!cfg.interpreter.trim().is_empty(), "commands.interpreter is empty");
    if let Some(t) = cfg.timeout_s {
        anyhow::ensure!(t >= 1, "commands.timeout_s must be >= 1");
    }
    for dir in &cfg.search_dirs {
        if !dir.is_dir() {
            warn!("doctor: commands.search_dirs entry missing: {}", dir.display());
        }
    }
    Ok(())
}
