use std::sync::Arc;
use std::time::Duration;

use relay_proto::encode;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{error, info, warn};

use crate::error::LinkError;
use crate::mux::Multiplexer;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxStats {
    pub sent: u64,
    /// Left in the queues when the loop ended.
    pub unsent: usize,
}

/// Drains the multiplexer onto the write half of the link.
///
/// Writes are fire-and-forget: a failed write ends the loop and sets the
/// shutdown signal, nothing is retried.
pub struct Transmitter<W> {
    writer: W,
    mux: Arc<Multiplexer>,
    pace: Duration,
    shutdown: Shutdown,
}

impl<W: AsyncWrite + Unpin> Transmitter<W> {
    pub fn new(writer: W, mux: Arc<Multiplexer>, pace: Duration, shutdown: Shutdown) -> Self {
        Self { writer, mux, pace, shutdown }
    }

    pub async fn run(mut self) -> Result<TxStats, LinkError> {
        let mut listener = self.shutdown.listener();
        let mut stats = TxStats::default();
        info!("tx: started (pace {:?})", self.pace);

        while let Some(msg) = self.mux.next().await {
            let line = encode(&msg);
            if let Err(e) = self.write_line(&line).await {
                error!("tx: write failed, {} lost: {}", msg.kind(), e);
                self.shutdown.trigger("transmitter lost the link");
                return Err(LinkError::Transport(e));
            }
            stats.sent += 1;
            info!("tx: sent {} {}", msg.kind(), line.trim_end());

            // Only after a successful write; an empty queue parks in next() instead.
            if !self.pace.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.pace) => {}
                    _ = listener.triggered() => {}
                }
            }
        }

        let (detections, telemetry) = self.mux.pending();
        stats.unsent = detections + telemetry;
        if stats.unsent > 0 {
            warn!("tx: stopping with {} detections and {} telemetry unsent", detections, telemetry);
        }
        info!("tx: stopped after {} lines", stats.sent);
        Ok(stats)
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await
    }
}
