use thiserror::Error;

/// Why a received line could not be turned into a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("no classification rule matched")]
    NoMatchingRule,

    #[error("command has no script name")]
    EmptyCommand,

    #[error("embedded line break")]
    EmbeddedNewline,

    #[error("bad detection file name {name:?}: {reason}")]
    DetectionName { name: String, reason: &'static str },

    #[error("expected {expected} telemetry fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("telemetry field {field:?} has no ':'")]
    MissingColon { field: String },

    #[error("expected label {expected}, found {found:?}")]
    UnexpectedLabel { expected: &'static str, found: String },

    #[error("bad {label} value {value:?}")]
    BadNumber { label: &'static str, value: String },
}
