//! Message types and the line protocol spoken over the LoRa UART link.
//!
//! One message per line, UTF-8, `\n` terminated. The receiving side never
//! fails to classify a line: anything it cannot make sense of comes back as
//! [`ClassifiedMessage::Unrecognized`] with the reason attached.

pub mod codec;
pub mod error;
pub mod message;
pub mod naming;

pub use codec::{decode, encode, encode_command, ClassifiedMessage};
pub use error::DecodeError;
pub use message::{Command, DetectionEvent, OutboundMessage, Received, SensorReading, TelemetryFields};
