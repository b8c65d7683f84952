use anyhow::{Context, Result};
use relay_link::{Multiplexer, Shutdown};
use relay_proto::{OutboundMessage, SensorReading};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::SensorConfig;

/// Standard sea level pressure in hPa.
pub const SEA_LEVEL_HPA: f64 = 1013.25;

const IIO_DEVICES: &str = "/sys/bus/iio/devices";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub temperature_c: f64,
    pub pressure_hpa: f64,
    pub humidity_pct: f64,
}

pub trait SensorSource: Send {
    fn read(&mut self) -> Result<RawSample>;
}

/// The sensor sits on a bus that must not see concurrent transactions.
pub type SharedSensor = Arc<Mutex<Box<dyn SensorSource>>>;

pub fn shared(sensor: impl SensorSource + 'static) -> SharedSensor {
    Arc::new(Mutex::new(Box::new(sensor) as Box<dyn SensorSource>))
}

/// Barometric altitude in metres from pressure in hPa.
pub fn altitude_m(pressure_hpa: f64, sea_level_hpa: f64) -> f64 {
    (1.0 - (pressure_hpa / sea_level_hpa).powf(1.0 / 5.257)) * 44330.0
}

/// BME280 through the kernel's IIO driver (`bme280` on I2C).
/// Calibration is done by the driver.
#[derive(Debug, Clone)]
pub struct IioBme280 {
    dir: PathBuf,
}

impl IioBme280 {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        anyhow::ensure!(
            dir.join("in_temp_input").exists(),
            "{} is not a BME280 IIO device (no in_temp_input)",
            dir.display()
        );
        Ok(Self { dir })
    }

    /// First IIO device whose `name` is bme280.
    pub fn discover() -> Result<Self> {
        let entries = std::fs::read_dir(IIO_DEVICES).with_context(|| format!("list {}", IIO_DEVICES))?;
        for ent in entries.flatten() {
            let name = std::fs::read_to_string(ent.path().join("name")).unwrap_or_default();
            if name.trim() == "bme280" {
                info!("sensor: found bme280 at {}", ent.path().display());
                return Self::open(ent.path());
            }
        }
        anyhow::bail!("no bme280 under {}", IIO_DEVICES)
    }
}

impl SensorSource for IioBme280 {
    fn read(&mut self) -> Result<RawSample> {
        // milli-degC, kPa, milli-percent
        let temp = read_attr(&self.dir.join("in_temp_input"))?;
        let pressure = read_attr(&self.dir.join("in_pressure_input"))?;
        let humidity = read_attr(&self.dir.join("in_humidityrelative_input"))?;
        Ok(RawSample {
            temperature_c: temp / 1000.0,
            pressure_hpa: pressure * 10.0,
            humidity_pct: humidity / 1000.0,
        })
    }
}

fn read_attr(path: &Path) -> Result<f64> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    content.trim().parse().with_context(|| format!("parse {} ({:?})", path.display(), content.trim()))
}

/// Sample every `interval_s` and queue the reading as telemetry until shutdown.
/// A failed read skips that cycle.
pub async fn run_acquisition(sensor: SharedSensor, cfg: SensorConfig, mux: Arc<Multiplexer>, shutdown: Shutdown) {
    let mut listener = shutdown.listener();
    let interval = Duration::from_secs(cfg.interval_s.max(1));
    info!("sensor: sampling every {:?}", interval);

    while !listener.is_triggered() {
        let sample = sensor.lock().unwrap().read();
        match sample {
            Ok(raw) => {
                let reading = SensorReading {
                    timestamp: OffsetDateTime::now_utc(),
                    temperature_c: raw.temperature_c,
                    humidity_pct: raw.humidity_pct,
                    pressure_hpa: raw.pressure_hpa,
                    altitude_m: altitude_m(raw.pressure_hpa, cfg.sea_level_hpa),
                    sensor_id: cfg.sensor_id.clone(),
                };
                info!(
                    "sensor: {} T={:.2}°C P={:.2}hPa H={:.2}% A={:.2}m",
                    reading.sensor_id, reading.temperature_c, reading.pressure_hpa, reading.humidity_pct, reading.altitude_m
                );
                if !mux.enqueue(OutboundMessage::Telemetry(reading)) {
                    break;
                }
            }
            Err(e) => warn!("sensor: read failed: {:#}", e),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = listener.triggered() => break,
        }
    }
    info!("sensor: stopped");
}
