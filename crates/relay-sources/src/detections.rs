use anyhow::{Context, Result};
use relay_link::{Multiplexer, Shutdown};
use relay_proto::naming::DETECTION_EXT;
use relay_proto::{DetectionEvent, OutboundMessage};
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::DetectionConfig;

/// Picks up images the vision pipeline drops into `image_dir`. Each file is
/// reported at most once.
#[derive(Debug)]
pub struct DetectionWatcher {
    dir: PathBuf,
    seen: HashSet<OsString>,
}

impl DetectionWatcher {
    pub async fn new(dir: PathBuf, send_existing: bool) -> Result<Self> {
        let mut watcher = Self { dir, seen: HashSet::new() };
        if !send_existing {
            for name in watcher.list().await? {
                watcher.seen.insert(name);
            }
            debug!("detections: skipping {} existing files", watcher.seen.len());
        }
        Ok(watcher)
    }

    /// New detection events, oldest first.
    pub async fn scan(&mut self) -> Result<Vec<DetectionEvent>> {
        let names = self.list().await?;
        // forget files that were removed so `seen` tracks the directory
        self.seen.retain(|n| names.contains(n));

        let mut events = Vec::new();
        for name in names {
            if !self.seen.insert(name.clone()) {
                continue;
            }
            let path = self.dir.join(&name);
            let Some(wire) = path.to_str() else {
                warn!("detections: non UTF-8 path ignored: {}", path.display());
                continue;
            };
            match DetectionEvent::from_path(wire) {
                Ok(ev) => events.push(ev),
                Err(e) => warn!("detections: ignoring {}: {}", wire, e),
            }
        }
        events.sort_by(|a, b| a.produced_at().cmp(&b.produced_at()).then_with(|| a.image_path().cmp(b.image_path())));
        Ok(events)
    }

    async fn list(&self) -> Result<HashSet<OsString>> {
        if !fs::try_exists(&self.dir).await.unwrap_or(false) {
            return Ok(HashSet::new());
        }
        let mut names = HashSet::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("read dir {}", self.dir.display()))?;
        while let Some(ent) = entries.next_entry().await? {
            let name = ent.file_name();
            let is_jpg = name.to_str().map(|n| n.ends_with(DETECTION_EXT)).unwrap_or(true);
            if is_jpg && ent.file_type().await?.is_file() {
                names.insert(name);
            }
        }
        Ok(names)
    }
}

/// Poll the image directory and queue every new detection until shutdown.
pub async fn run_detection_watcher(cfg: DetectionConfig, mux: Arc<Multiplexer>, shutdown: Shutdown) -> Result<()> {
    let mut listener = shutdown.listener();
    let mut watcher = DetectionWatcher::new(cfg.image_dir.clone(), cfg.send_existing).await?;
    let poll = Duration::from_millis(cfg.poll_ms.max(50));
    info!("detections: watching {}", cfg.image_dir.display());

    while !listener.is_triggered() {
        match watcher.scan().await {
            Ok(events) => {
                for ev in events {
                    info!("detections: {} conf={:.2} {}", ev.category(), ev.confidence(), ev.image_path());
                    if !mux.enqueue(OutboundMessage::Detection(ev)) {
                        return Ok(());
                    }
                }
            }
            Err(e) => warn!("detections: scan failed: {:#}", e),
        }

        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = listener.triggered() => break,
        }
    }
    info!("detections: stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_proto::naming::detection_file_name;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("relay-det-{}", rand::random::<u64>()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn reports_each_new_image_once() {
        let dir = scratch_dir();
        std::fs::write(dir.join(detection_file_name("cat", 100, 0.8)), b"jpg").unwrap();

        let mut w = DetectionWatcher::new(dir.clone(), false).await.unwrap();
        assert!(w.scan().await.unwrap().is_empty());

        std::fs::write(dir.join(detection_file_name("dog", 300, 0.75)), b"jpg").unwrap();
        std::fs::write(dir.join(detection_file_name("bird", 200, 0.9)), b"jpg").unwrap();
        std::fs::write(dir.join("detected_bad.jpg"), b"jpg").unwrap();
        std::fs::write(dir.join("notes.txt"), b"x").unwrap();

        let evs = w.scan().await.unwrap();
        let cats: Vec<&str> = evs.iter().map(|e| e.category()).collect();
        assert_eq!(cats, ["bird", "dog"]);
        assert!(evs[0].image_path().ends_with("/detected_bird_200_90.jpg"));

        assert!(w.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removed_images_are_forgotten() {
        let dir = scratch_dir();
        let mut w = DetectionWatcher::new(dir.clone(), false).await.unwrap();
        let name = detection_file_name("fox", 400, 0.6);

        std::fs::write(dir.join(&name), b"jpg").unwrap();
        assert_eq!(w.scan().await.unwrap().len(), 1);
        assert_eq!(w.seen.len(), 1);

        std::fs::remove_file(dir.join(&name)).unwrap();
        assert!(w.scan().await.unwrap().is_empty());
        assert!(w.seen.is_empty());

        std::fs::write(dir.join(&name), b"jpg").unwrap();
        assert_eq!(w.scan().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn existing_images_sent_when_asked() {
        let dir = scratch_dir();
        std::fs::write(dir.join(detection_file_name("cat", 100, 0.8)), b"jpg").unwrap();
        let mut w = DetectionWatcher::new(dir, true).await.unwrap();
        assert_eq!(w.scan().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = std::env::temp_dir().join(format!("relay-det-missing-{}", rand::random::<u64>()));
        let mut w = DetectionWatcher::new(dir, false).await.unwrap();
        assert!(w.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn watcher_feeds_the_multiplexer() {
        let dir = scratch_dir();
        let s = Shutdown::new();
        let mux = Arc::new(Multiplexer::new(8, false, s.listener()));
        let cfg = DetectionConfig { image_dir: dir.clone(), poll_ms: 50, ..Default::default() };
        let task = tokio::spawn(run_detection_watcher(cfg, mux.clone(), s.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(dir.join(detection_file_name("person", 1_700_000_000, 0.93)), b"jpg").unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), mux.next()).await.unwrap().unwrap();
        match msg {
            OutboundMessage::Detection(ev) => {
                assert_eq!(ev.category(), "person");
                assert_eq!(ev.confidence(), 0.93);
            }
            other => panic!("unexpected {other:?}"),
        }

        s.trigger("test");
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap().unwrap();
    }
}
