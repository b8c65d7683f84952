//! Producers feeding the multiplexer on the platform side: the BME280
//! acquisition loop and the watcher that picks up saved detection images.

pub mod acquisition;
pub mod detections;
pub mod doctor;

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// "iio" | "none"
    pub source: String,
    /// IIO device directory; discovered by driver name when unset.
    pub iio_dir: Option<PathBuf>,
    pub sensor_id: String,
    pub interval_s: u64,
    pub sea_level_hpa: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            source: "iio".into(),
            iio_dir: None,
            sensor_id: "BME280-01".into(),
            interval_s: 10,
            sea_level_hpa: acquisition::SEA_LEVEL_HPA,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub enable: bool,
    /// Where the vision pipeline saves `detected_*.jpg` files.
    pub image_dir: PathBuf,
    pub poll_ms: u64,
    /// Also send images already present at start-up.
    pub send_existing: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enable: true,
            image_dir: PathBuf::from("detected_images"),
            poll_ms: 1000,
            send_existing: false,
        }
    }
}
