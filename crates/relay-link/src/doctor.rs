use anyhow::Result;
use std::path::Path;
use tracing::warn;

use crate::LinkConfig;

pub fn check_link(cfg: &LinkConfig) -> Result<()> {
    anyhow::ensure!(!cfg.device.is_empty(), "link.device missing");
    anyhow::ensure!(cfg.baud >= 1200 && cfg.baud <= 115_200, "link.baud should be 1200..115200");
    anyhow::ensure!(cfg.pace_ms <= 60_000, "link.pace_ms above 60s");
    anyhow::ensure!(cfg.max_line_len >= 256, "link.max_line_len too small");
    if !Path::new(&cfg.device).exists() {
        warn!("doctor: link.device {} not present", cfg.device);
    }
    Ok(())
}
