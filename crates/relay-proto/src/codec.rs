use crate::error::DecodeError;
use crate::message::{Command, DetectionEvent, OutboundMessage, TelemetryFields};
use crate::naming::{DETECTION_EXT, DETECTION_PREFIX};

pub const COMMAND_TOKEN: &str = "run";
pub const TELEMETRY_PREFIX: &str = "Temperature:";

/// Label and unit of each telemetry field, in wire order.
const TELEMETRY_FIELDS: [(&str, &str); 4] = [
    ("Temperature", "°C"),
    ("Pressure", "hPa"),
    ("Humidity", "%"),
    ("Altitude", "m"),
];

/// How a received line was classified.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedMessage {
    Command(Command),
    Detection(DetectionEvent),
    Telemetry(TelemetryFields),
    Unrecognized { line: String, reason: DecodeError },
}

/// Encode a message as exactly one `\n` terminated line.
pub fn encode(msg: &OutboundMessage) -> String {
    let mut line = match msg {
        OutboundMessage::Telemetry(reading) => encode_telemetry(&reading.fields()),
        // the path is the payload
        OutboundMessage::Detection(ev) => ev.image_path().to_string(),
    };
    line.push('\n');
    line
}

pub fn encode_command(cmd: &Command) -> String {
    format!("{} {}\n", COMMAND_TOKEN, cmd.script_name())
}

pub fn encode_telemetry(f: &TelemetryFields) -> String {
    format!(
        "Temperature: {:.2}°C, Pressure: {:.2} hPa, Humidity: {:.2}%, Altitude: {:.2} m",
        f.temperature_c, f.pressure_hpa, f.humidity_pct, f.altitude_m
    )
}

/// Classify one line (with or without its terminator). Never fails.
pub fn decode(line: &str) -> ClassifiedMessage {
    let text = line.trim_end_matches(&['\r', '\n'][..]);

    let classified = if let Some(rest) = command_remainder(text) {
        Command::new(rest).map(ClassifiedMessage::Command)
    } else if is_detection_line(text) {
        DetectionEvent::from_path(text.trim()).map(ClassifiedMessage::Detection)
    } else if text.starts_with(TELEMETRY_PREFIX) {
        decode_telemetry(text).map(ClassifiedMessage::Telemetry)
    } else {
        Err(DecodeError::NoMatchingRule)
    };

    classified.unwrap_or_else(|reason| ClassifiedMessage::Unrecognized { line: text.to_string(), reason })
}

// `run` must be followed by whitespace; `runner.py` is not a command.
pub(crate) fn command_remainder(text: &str) -> Option<&str> {
    let rest = text.strip_prefix(COMMAND_TOKEN)?;
    rest.starts_with(char::is_whitespace).then_some(rest)
}

fn is_detection_line(text: &str) -> bool {
    let t = text.trim();
    let slash_prefix = format!("/{}", DETECTION_PREFIX);
    t.ends_with(DETECTION_EXT) && (t.contains(&slash_prefix) || t.starts_with(DETECTION_PREFIX))
}

fn decode_telemetry(text: &str) -> Result<TelemetryFields, DecodeError> {
    let parts: Vec<&str> = text.split(',').collect();
    if parts.len() != TELEMETRY_FIELDS.len() {
        return Err(DecodeError::FieldCount { expected: TELEMETRY_FIELDS.len(), found: parts.len() });
    }

    let mut values = [0.0f64; 4];
    for (slot, (part, (label, unit))) in values.iter_mut().zip(parts.iter().zip(TELEMETRY_FIELDS)) {
        let (name, raw) = part
            .split_once(':')
            .ok_or_else(|| DecodeError::MissingColon { field: part.trim().to_string() })?;
        if name.trim() != label {
            return Err(DecodeError::UnexpectedLabel { expected: label, found: name.trim().to_string() });
        }
        let raw = raw.trim();
        let number = raw.strip_suffix(unit).unwrap_or(raw).trim();
        *slot = number
            .parse()
            .map_err(|_| DecodeError::BadNumber { label, value: raw.to_string() })?;
    }

    Ok(TelemetryFields {
        temperature_c: values[0],
        pressure_hpa: values[1],
        humidity_pct: values[2],
        altitude_m: values[3],
    })
}
