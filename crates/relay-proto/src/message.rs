use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::codec::command_remainder;
use crate::error::DecodeError;
use crate::naming::{basename, parse_detection_name};

/// One BME280 sample as produced by the acquisition loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub timestamp: OffsetDateTime,
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub pressure_hpa: f64,
    pub altitude_m: f64,
    pub sensor_id: String,
}

impl SensorReading {
    /// The four values that actually travel over the link.
    pub fn fields(&self) -> TelemetryFields {
        TelemetryFields {
            temperature_c: self.temperature_c,
            pressure_hpa: self.pressure_hpa,
            humidity_pct: self.humidity_pct,
            altitude_m: self.altitude_m,
        }
    }
}

/// Telemetry as recovered from a received line. Timestamp and sensor id do
/// not cross the link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFields {
    pub temperature_c: f64,
    pub pressure_hpa: f64,
    pub humidity_pct: f64,
    pub altitude_m: f64,
}

/// A saved vision hit. The image path is the wire payload, so every field is
/// derived from the file name and the event can only be built from a path the
/// receiver is able to parse back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionEvent {
    image_path: String,
    category: String,
    confidence: f32,
    produced_at: OffsetDateTime,
}

impl DetectionEvent {
    pub fn from_path(image_path: &str) -> Result<Self, DecodeError> {
        if image_path.contains(&['\n', '\r'][..]) {
            return Err(DecodeError::EmbeddedNewline);
        }
        // the receiver trims lines and tries the command rule first
        let reject = |reason: &'static str| DecodeError::DetectionName { name: image_path.to_string(), reason };
        if image_path.trim() != image_path {
            return Err(reject("surrounding whitespace"));
        }
        if command_remainder(image_path).is_some() {
            return Err(reject("reads as a command"));
        }
        let name = parse_detection_name(basename(image_path))?;
        let produced_at = OffsetDateTime::from_unix_timestamp(name.epoch_s).map_err(|_| {
            DecodeError::DetectionName {
                name: basename(image_path).to_string(),
                reason: "timestamp out of range",
            }
        })?;
        Ok(Self {
            image_path: image_path.to_string(),
            category: name.category,
            confidence: name.confidence_x100 as f32 / 100.0,
            produced_at,
        })
    }

    pub fn image_path(&self) -> &str {
        &self.image_path
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// 0.0..=1.0, two decimals of precision.
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn produced_at(&self) -> OffsetDateTime {
        self.produced_at
    }
}

/// Remote request to run a script on the receiving node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    script_name: String,
}

impl Command {
    pub fn new(script_name: &str) -> Result<Self, DecodeError> {
        let script_name = script_name.trim();
        if script_name.contains(&['\n', '\r'][..]) {
            return Err(DecodeError::EmbeddedNewline);
        }
        if script_name.is_empty() {
            return Err(DecodeError::EmptyCommand);
        }
        Ok(Self { script_name: script_name.to_string() })
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }
}

/// Everything the transmitter can put on the air.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Telemetry(SensorReading),
    Detection(DetectionEvent),
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Telemetry(_) => "telemetry",
            OutboundMessage::Detection(_) => "detection",
        }
    }
}

/// A decoded message stamped with its arrival time on the ground station.
#[derive(Debug, Clone, PartialEq)]
pub struct Received<T> {
    pub at: OffsetDateTime,
    pub msg: T,
}
