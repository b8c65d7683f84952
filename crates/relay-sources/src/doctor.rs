use anyhow::Result;

use crate::{DetectionConfig, SensorConfig};

pub fn check_sensor(cfg: &SensorConfig) -> Result<()> {
    match cfg.source.as_str() {
        "none" => return Ok(()),
        "iio" => {}
        other => anyhow::bail!("unknown sensor.source: {}", other),
    }
    anyhow::ensure!(cfg.interval_s >= 1, "sensor.interval_s must be >= 1");
    anyhow::ensure!(cfg.sea_level_hpa > 800.0 && cfg.sea_level_hpa < 1100.0, "sensor.sea_level_hpa out of range");
    anyhow::ensure!(!cfg.sensor_id.is_empty(), "sensor.sensor_id empty");
    if let Some(dir) = &cfg.iio_dir {
        anyhow::ensure!(dir.join("in_temp_input").exists(), "sensor.iio_dir has no in_temp_input: {}", dir.display());
    }
    Ok(())
}

pub fn check_detections(cfg: &DetectionConfig) -> Result<()> {
    if !cfg.enable {
        return Ok(());
    }
    if cfg.image_dir.exists() {
        anyhow::ensure!(cfg.image_dir.is_dir(), "detections.image_dir is not a dir: {}", cfg.image_dir.display());
    }
    anyhow::ensure!(cfg.poll_ms >= 50, "detections.poll_ms too small");
    Ok(())
}
