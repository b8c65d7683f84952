//! Process-wide stop signal.
//!
//! Set once, observed by every worker. Waiting on [`ShutdownListener::triggered`]
//! is cancel-safe, so workers put it in a `select!` next to whatever they block on.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Returns true only for the call that actually set the signal.
    pub fn trigger(&self, reason: &str) -> bool {
        let first = self.tx.send_if_modified(|set| {
            if *set {
                false
            } else {
                *set = true;
                true
            }
        });
        if first {
            info!("shutdown: {}", reason);
        }
        first
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener { rx: self.tx.subscribe() }
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal is set (or every [`Shutdown`] handle is gone).
    pub async fn triggered(&mut self) {
        let _ = self.rx.wait_for(|set| *set).await;
    }
}
