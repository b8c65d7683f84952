pub mod doctor;
pub mod error;
pub mod mux;
pub mod receiver;
pub mod shutdown;
pub mod transmitter;

use serde::Deserialize;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};

pub use error::LinkError;
pub use mux::Multiplexer;
pub use receiver::{LineReassembler, Receiver, Router};
pub use shutdown::{Shutdown, ShutdownListener};
pub use transmitter::Transmitter;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// UART the LoRa module hangs off (/dev/ttyS0 on a Pi 4, /dev/ttyAMA0 on a Pi 5).
    pub device: String,
    pub baud: u32,

    /// Minimum gap after each transmitted line.
    pub pace_ms: u64,

    /// Consecutive detections allowed while telemetry waits. 0 = strict priority.
    pub detection_burst_limit: u32,

    /// Keep transmitting queued items (without pacing) after shutdown.
    pub drain_on_shutdown: bool,

    /// Partial lines longer than this are discarded.
    pub max_line_len: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyS0".into(),
            baud: 9600,
            pace_ms: 1000,
            detection_burst_limit: 8,
            drain_on_shutdown: false,
            max_line_len: 16 * 1024,
        }
    }
}

/// Open the radio UART at 8N1.
pub fn open_serial(cfg: &LinkConfig) -> Result<SerialStream, LinkError> {
    tokio_serial::new(&cfg.device, cfg.baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .open_native_async()
        .map_err(|source| LinkError::Open { device: cfg.device.clone(), source })
}
