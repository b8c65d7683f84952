//! Append-only CSV logs for what the ground station receives.

pub mod doctor;

use relay_link::Shutdown;
use relay_proto::{DetectionEvent, Received, TelemetryFields};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::macros::format_description;
use time::OffsetDateTime;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("append to {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("format timestamp: {0}")]
    Format(#[from] time::error::Format),
}

/// One CSV row per value.
pub trait CsvRecord {
    const HEADER: &'static str;
    fn row(&self) -> Result<String, PersistenceError>;
}

impl CsvRecord for Received<TelemetryFields> {
    const HEADER: &'static str = "Timestamp,Temperature (°C),Humidity (%),Pressure (hPa),Altitude (m)";

    fn row(&self) -> Result<String, PersistenceError> {
        let f = &self.msg;
        Ok(format!(
            "{},{:.2},{:.2},{:.2},{:.2}",
            timestamp(self.at)?,
            f.temperature_c,
            f.humidity_pct,
            f.pressure_hpa,
            f.altitude_m
        ))
    }
}

impl CsvRecord for Received<DetectionEvent> {
    const HEADER: &'static str = "Timestamp,Category,Confidence,Image";

    fn row(&self) -> Result<String, PersistenceError> {
        let ev = &self.msg;
        Ok(format!(
            "{},{},{:.2},{}",
            timestamp(self.at)?,
            csv_field(ev.category()),
            ev.confidence(),
            csv_field(ev.image_path())
        ))
    }
}

/// UTC, second resolution.
fn timestamp(at: OffsetDateTime) -> Result<String, time::error::Format> {
    at.format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
}

fn csv_field(s: &str) -> String {
    if s.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// File opened per append so every call lands on disk on its own.
#[derive(Debug)]
pub struct CsvLog<R> {
    path: PathBuf,
    _record: PhantomData<fn(&R)>,
}

impl<R: CsvRecord> CsvLog<R> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), _record: PhantomData }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the header first when the file is new or empty.
    pub async fn append(&self, rec: &R) -> Result<(), PersistenceError> {
        let row = rec.row()?;
        let io = |source| PersistenceError::Io { path: self.path.clone(), source };

        let mut f = OpenOptions::new().create(true).append(true).open(&self.path).await.map_err(io)?;
        let fresh = f.metadata().await.map_err(io)?.len() == 0;

        let mut out = String::with_capacity(row.len() + R::HEADER.len() + 2);
        if fresh {
            out.push_str(R::HEADER);
            out.push('\n');
        }
        out.push_str(&row);
        out.push('\n');
        f.write_all(out.as_bytes()).await.map_err(io)?;
        f.flush().await.map_err(io)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub written: u64,
    pub failed: u64,
}

/// Consume one receiver queue into its log. A failed append is logged and
/// the record counted as delivered. On shutdown whatever is already queued
/// is still written.
pub async fn run_sink<R: CsvRecord>(
    mut rx: mpsc::UnboundedReceiver<R>,
    log: CsvLog<R>,
    shutdown: Shutdown,
) -> SinkStats {
    let mut listener = shutdown.listener();
    let mut stats = SinkStats::default();
    info!("sink: logging to {}", log.path().display());

    loop {
        tokio::select! {
            rec = rx.recv() => match rec {
                Some(rec) => write(&log, &rec, &mut stats).await,
                None => break,
            },
            _ = listener.triggered() => {
                while let Ok(rec) = rx.try_recv() {
                    write(&log, &rec, &mut stats).await;
                }
                break;
            }
        }
    }

    info!("sink: {} closed ({} written, {} failed)", log.path().display(), stats.written, stats.failed);
    stats
}

async fn write<R: CsvRecord>(log: &CsvLog<R>, rec: &R, stats: &mut SinkStats) {
    match log.append(rec).await {
        Ok(()) => {
            stats.written += 1;
            debug!("sink: appended to {}", log.path().display());
        }
        Err(e) => {
            stats.failed += 1;
            warn!("sink: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn scratch_file(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("relay-store-{}", rand::random::<u64>()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn telemetry(t: f64) -> Received<TelemetryFields> {
        Received {
            at: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            msg: TelemetryFields { temperature_c: t, pressure_hpa: 1009.8, humidity_pct: 46.2, altitude_m: 96.4 },
        }
    }

    #[tokio::test]
    async fn header_once_then_rows() {
        let path = scratch_file("telemetry.csv");
        let log = CsvLog::new(&path);
        log.append(&telemetry(24.561)).await.unwrap();
        log.append(&telemetry(25.0)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            [
                "Timestamp,Temperature (°C),Humidity (%),Pressure (hPa),Altitude (m)",
                "2023-11-14 22:13:20,24.56,46.20,1009.80,96.40",
                "2023-11-14 22:13:20,25.00,46.20,1009.80,96.40",
            ]
        );
    }

    #[tokio::test]
    async fn detection_rows_quote_odd_paths() {
        let path = scratch_file("detections.csv");
        let log = CsvLog::new(&path);
        let ev = DetectionEvent::from_path("imgs, day 1/detected_bird_1700000000_87.jpg").unwrap();
        log.append(&Received { at: ev.produced_at(), msg: ev }).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "Timestamp,Category,Confidence,Image\n2023-11-14 22:13:20,bird,0.87,\"imgs, day 1/detected_bird_1700000000_87.jpg\"\n"
        );
    }

    #[tokio::test]
    async fn append_failure_is_reported() {
        let path = std::env::temp_dir().join(format!("relay-store-missing-{}", rand::random::<u64>())).join("x.csv");
        let err = CsvLog::new(&path).append(&telemetry(1.0)).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));
    }

    #[tokio::test]
    async fn sink_drains_queue_on_shutdown() {
        let path = scratch_file("drain.csv");
        let (tx, rx) = mpsc::unbounded_channel();
        for t in 0..5 {
            tx.send(telemetry(t as f64)).unwrap();
        }
        let s = Shutdown::new();
        s.trigger("test");
        let stats = tokio::time::timeout(Duration::from_secs(1), run_sink(rx, CsvLog::new(&path), s))
            .await
            .unwrap();
        assert_eq!(stats.written + stats.failed, 5);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 6);
    }

    #[tokio::test]
    async fn sink_survives_write_failures() {
        let path = std::env::temp_dir().join(format!("relay-store-gone-{}", rand::random::<u64>())).join("x.csv");
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(telemetry(1.0)).unwrap();
        tx.send(telemetry(2.0)).unwrap();
        drop(tx);
        let stats = run_sink(rx, CsvLog::new(&path), Shutdown::new()).await;
        assert_eq!(stats, SinkStats { written: 0, failed: 2 });
    }
}
