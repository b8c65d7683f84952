//! Merges the detection and telemetry queues into the single transmit stream.
//!
//! Detections go first. To keep telemetry alive under a detection storm, after
//! `burst_limit` detections in a row have been taken while telemetry was
//! waiting, one telemetry message is let through.

use std::collections::VecDeque;
use std::sync::Mutex;

use relay_proto::{DetectionEvent, OutboundMessage, SensorReading};
use tokio::sync::Notify;
use tracing::debug;

use crate::shutdown::ShutdownListener;

#[derive(Debug, Default)]
struct Queues {
    detections: VecDeque<DetectionEvent>,
    telemetry: VecDeque<SensorReading>,
    // detections taken in a row while telemetry was queued
    streak: u32,
}

impl Queues {
    fn pop(&mut self, burst_limit: u32) -> Option<OutboundMessage> {
        let telemetry_due = burst_limit > 0 && self.streak >= burst_limit && !self.telemetry.is_empty();
        if !telemetry_due {
            if let Some(ev) = self.detections.pop_front() {
                if self.telemetry.is_empty() {
                    self.streak = 0;
                } else {
                    self.streak += 1;
                }
                return Some(OutboundMessage::Detection(ev));
            }
        }
        let reading = self.telemetry.pop_front()?;
        self.streak = 0;
        Some(OutboundMessage::Telemetry(reading))
    }
}

/// Shared by every producer and exactly one consumer (the transmitter).
#[derive(Debug)]
pub struct Multiplexer {
    queues: Mutex<Queues>,
    notify: Notify,
    burst_limit: u32,
    drain_on_shutdown: bool,
    shutdown: ShutdownListener,
}

impl Multiplexer {
    pub fn new(burst_limit: u32, drain_on_shutdown: bool, shutdown: ShutdownListener) -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            notify: Notify::new(),
            burst_limit,
            drain_on_shutdown,
            shutdown,
        }
    }

    /// Route by variant. Refused (returns false) once shutdown is set.
    ///
    /// The signal is checked under the queue lock, so an accepted message was
    /// queued before any consumer can see the signal and `pending()` stops
    /// growing as soon as `trigger` returns.
    pub fn enqueue(&self, msg: OutboundMessage) -> bool {
        {
            let mut q = self.queues.lock().unwrap();
            if self.shutdown.is_triggered() {
                debug!("mux: {} refused after shutdown", msg.kind());
                return false;
            }
            match msg {
                OutboundMessage::Detection(ev) => q.detections.push_back(ev),
                OutboundMessage::Telemetry(r) => q.telemetry.push_back(r),
            }
        }
        self.notify.notify_one();
        true
    }

    /// Next message by priority without waiting.
    pub fn try_next(&self) -> Option<OutboundMessage> {
        self.queues.lock().unwrap().pop(self.burst_limit)
    }

    /// Next message by priority, waiting while both queues are empty.
    /// `None` means end of stream: shutdown was set (and, when draining,
    /// the queues have run dry).
    pub async fn next(&self) -> Option<OutboundMessage> {
        let mut shutdown = self.shutdown.clone();
        loop {
            if shutdown.is_triggered() {
                return if self.drain_on_shutdown { self.try_next() } else { None };
            }
            if let Some(msg) = self.try_next() {
                return Some(msg);
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = shutdown.triggered() => {}
            }
        }
    }

    /// (detections, telemetry) currently queued.
    pub fn pending(&self) -> (usize, usize) {
        let q = self.queues.lock().unwrap();
        (q.detections.len(), q.telemetry.len())
    }
}
