//! Read side of the link: rebuild lines from arbitrary read chunks, classify
//! each one and hand it to whoever consumes that kind.

use bytes::{Bytes, BytesMut};
use relay_exec::CommandDispatcher;
use relay_proto::{decode, ClassifiedMessage, DetectionEvent, Received, TelemetryFields};
use time::OffsetDateTime;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::LinkError;
use crate::shutdown::Shutdown;

const READ_CHUNK: usize = 1024;
const LOG_PREVIEW: usize = 120;

/// Splits a byte stream into `\n`-terminated lines regardless of how reads
/// are chunked. Lines come out without their terminator.
#[derive(Debug)]
pub struct LineReassembler {
    buf: BytesMut,
    max_line_len: usize,
    // inside a line that already overflowed; skip to its end
    discarding: bool,
}

impl LineReassembler {
    pub fn new(max_line_len: usize) -> Self {
        Self { buf: BytesMut::with_capacity(READ_CHUNK), max_line_len, discarding: false }
    }

    /// Complete lines in `chunk`. A line longer than `max_line_len` is
    /// dropped whole, however it was split across reads.
    pub fn push(&mut self, mut chunk: &[u8]) -> Vec<Bytes> {
        let mut lines = Vec::new();
        loop {
            let newline = chunk.iter().position(|b| *b == b'\n');

            if self.discarding {
                let Some(pos) = newline else { return lines };
                self.discarding = false;
                debug!("rx: end of overlong line");
                chunk = &chunk[pos + 1..];
                continue;
            }

            match newline {
                Some(pos) => {
                    let len = self.buf.len() + pos;
                    if len > self.max_line_len {
                        warn!("rx: dropped overlong line ({} bytes)", len);
                        self.buf.clear();
                    } else {
                        self.buf.extend_from_slice(&chunk[..pos]);
                        lines.push(self.buf.split().freeze());
                    }
                    chunk = &chunk[pos + 1..];
                }
                None => {
                    let len = self.buf.len() + chunk.len();
                    if len > self.max_line_len {
                        warn!("rx: no line break within {} bytes, dropping the line", len);
                        self.buf.clear();
                        self.discarding = true;
                    } else {
                        self.buf.extend_from_slice(chunk);
                    }
                    return lines;
                }
            }
        }
    }

    /// Bytes received after the last line break.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }
}

/// Where classified lines go. Commands run in place; detections and
/// telemetry are queued to their log sinks.
pub struct Router {
    dispatcher: CommandDispatcher,
    detections: mpsc::UnboundedSender<Received<DetectionEvent>>,
    telemetry: mpsc::UnboundedSender<Received<TelemetryFields>>,
}

impl Router {
    pub fn new(
        dispatcher: CommandDispatcher,
        detections: mpsc::UnboundedSender<Received<DetectionEvent>>,
        telemetry: mpsc::UnboundedSender<Received<TelemetryFields>>,
    ) -> Self {
        Self { dispatcher, detections, telemetry }
    }

    pub async fn route(&self, msg: ClassifiedMessage) {
        let at = OffsetDateTime::now_utc();
        match msg {
            ClassifiedMessage::Command(cmd) => {
                info!("rx: command run {}", cmd.script_name());
                if let Err(e) = self.dispatcher.dispatch(&cmd).await {
                    warn!("rx: command {:?} not run: {}", cmd.script_name(), e);
                }
            }
            ClassifiedMessage::Detection(ev) => {
                info!("rx: detection {} conf={:.2} {}", ev.category(), ev.confidence(), ev.image_path());
                if self.detections.send(Received { at, msg: ev }).is_err() {
                    warn!("rx: detection log is gone, record dropped");
                }
            }
            ClassifiedMessage::Telemetry(f) => {
                info!(
                    "rx: telemetry T={:.2}°C P={:.2}hPa H={:.2}% A={:.2}m",
                    f.temperature_c, f.pressure_hpa, f.humidity_pct, f.altitude_m
                );
                if self.telemetry.send(Received { at, msg: f }).is_err() {
                    warn!("rx: telemetry log is gone, record dropped");
                }
            }
            ClassifiedMessage::Unrecognized { line, reason } => {
                warn!("rx: unrecognized line ({}): {:?}", reason, preview(&line));
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RxStats {
    pub lines: u64,
    pub unrecognized: u64,
}

pub struct Receiver<R> {
    reader: R,
    lines: LineReassembler,
    router: Router,
    shutdown: Shutdown,
    stats: RxStats,
}

impl<R: AsyncRead + Unpin> Receiver<R> {
    pub fn new(reader: R, max_line_len: usize, router: Router, shutdown: Shutdown) -> Self {
        Self { reader, lines: LineReassembler::new(max_line_len), router, shutdown, stats: RxStats::default() }
    }

    /// Runs until shutdown (`Ok`) or until the link fails or closes (`Err`,
    /// after setting the shutdown signal for everyone else).
    pub async fn run(mut self) -> Result<RxStats, LinkError> {
        let mut listener = self.shutdown.listener();
        let mut buf = vec![0u8; READ_CHUNK];
        info!("rx: started");

        loop {
            let read = tokio::select! {
                r = self.reader.read(&mut buf) => r,
                _ = listener.triggered() => break,
            };
            let n = match read {
                Ok(0) => return Err(self.fail(LinkError::Closed)),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.fail(LinkError::Transport(e))),
            };
            debug!("rx: {} bytes", n);
            for line in self.lines.push(&buf[..n]) {
                self.handle_line(&line).await;
            }
        }

        info!("rx: stopped after {} lines ({} unrecognized)", self.stats.lines, self.stats.unrecognized);
        Ok(self.stats)
    }

    async fn handle_line(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let msg = decode(&text);
        self.stats.lines += 1;
        if matches!(msg, ClassifiedMessage::Unrecognized { .. }) {
            self.stats.unrecognized += 1;
        }
        self.router.route(msg).await;
    }

    fn fail(&self, err: LinkError) -> LinkError {
        let pending = self.lines.pending();
        if !pending.is_empty() {
            warn!("rx: partial line dropped: {:?}", preview(&String::from_utf8_lossy(pending)));
        }
        error!("rx: {}", err);
        self.shutdown.trigger("receiver lost the link");
        err
    }
}

fn preview(line: &str) -> String {
    if line.chars().count() <= LOG_PREVIEW {
        line.to_string()
    } else {
        let head: String = line.chars().take(LOG_PREVIEW).collect();
        format!("{}... ({} bytes)", head, line.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use relay_exec::DispatchConfig;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    const STREAM: &str = concat!(
        "Temperature: 21.50°C, Pressure: 1002.10 hPa, Humidity: 40.00%, Altitude: 94.20 m\n",
        "detected_images/detected_bird_1700000000_87.jpg\n",
        "garbage without structure\n",
        "\n",
        "run missing.py\n",
        "Temperature: 21.60°C, Pressure: 1002.00 hPa, Humidity: 40.50%, Altitude: 95.00 m\r\n",
        "detected_images/detected_traffic_light_1700000005_71.jpg\n",
        "trailing partial",
    );

    fn chunked<'a>(stream: &'a [u8], rng: &mut impl Rng) -> Vec<&'a [u8]> {
        let mut chunks = Vec::new();
        let mut rest = stream;
        while !rest.is_empty() {
            let n = rng.gen_range(1..=rest.len().min(17));
            let (head, tail) = rest.split_at(n);
            chunks.push(head);
            rest = tail;
        }
        chunks
    }

    fn classify_all(lines: Vec<Bytes>) -> Vec<ClassifiedMessage> {
        lines.iter().map(|l| decode(&String::from_utf8_lossy(l))).collect()
    }

    #[test]
    fn lines_survive_any_chunking() {
        let stream = STREAM.as_bytes();
        let mut whole = LineReassembler::new(4096);
        let reference = whole.push(stream);
        assert_eq!(reference.len(), 7);
        assert_eq!(whole.pending(), b"trailing partial");

        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let mut r = LineReassembler::new(4096);
            let mut lines = Vec::new();
            for chunk in chunked(stream, &mut rng) {
                lines.extend(r.push(chunk));
            }
            assert_eq!(lines, reference);
            assert_eq!(r.pending(), b"trailing partial");
            assert_eq!(classify_all(lines), classify_all(reference.clone()));
        }
    }

    #[test]
    fn byte_at_a_time_and_coalesced() {
        let mut r = LineReassembler::new(4096);
        let mut lines = Vec::new();
        for b in b"a\nbc\n\nd" {
            lines.extend(r.push(std::slice::from_ref(b)));
        }
        assert_eq!(lines, [Bytes::from_static(b"a"), Bytes::from_static(b"bc"), Bytes::new()]);
        assert_eq!(r.push(b"\n"), [Bytes::from_static(b"d")]);
    }

    #[test]
    fn overlong_line_is_skipped_entirely() {
        let mut r = LineReassembler::new(8);
        assert!(r.push(b"0123456789").is_empty());
        assert!(r.pending().is_empty());
        assert!(r.push(b"abc").is_empty());
        assert_eq!(r.push(b"def\nok\n"), [Bytes::from_static(b"ok")]);
    }

    #[test]
    fn overlong_line_is_dropped_however_it_is_split() {
        let stream = b"0123456789\nok\n12345678\nabcdefghijk";
        let mut whole = LineReassembler::new(8);
        let reference = whole.push(stream);
        assert_eq!(reference, [Bytes::from_static(b"ok"), Bytes::from_static(b"12345678")]);

        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let mut r = LineReassembler::new(8);
            let mut lines = Vec::new();
            for chunk in chunked(stream, &mut rng) {
                lines.extend(r.push(chunk));
            }
            assert_eq!(lines, reference);
        }

        let mut split = LineReassembler::new(8);
        assert!(split.push(b"0123456789").is_empty());
        assert_eq!(split.push(b"\nok\n"), [Bytes::from_static(b"ok")]);
    }

    fn router() -> (
        Router,
        mpsc::UnboundedReceiver<Received<DetectionEvent>>,
        mpsc::UnboundedReceiver<Received<TelemetryFields>>,
    ) {
        let empty = std::env::temp_dir().join(format!("relay-rx-{}", rand::random::<u64>()));
        std::fs::create_dir_all(&empty).unwrap();
        let dispatcher = CommandDispatcher::new(DispatchConfig { search_dirs: vec![empty], ..Default::default() });
        let (dtx, drx) = mpsc::unbounded_channel();
        let (ttx, trx) = mpsc::unbounded_channel();
        (Router::new(dispatcher, dtx, ttx), drx, trx)
    }

    #[tokio::test]
    async fn routes_lines_and_reports_closed_link() {
        let (router, mut detections, mut telemetry) = router();
        let (mut ours, theirs) = tokio::io::duplex(64);
        let s = Shutdown::new();
        let rx = tokio::spawn(Receiver::new(theirs, 4096, router, s.clone()).run());

        let mut rng = rand::thread_rng();
        for chunk in chunked(STREAM.as_bytes(), &mut rng) {
            ours.write_all(chunk).await.unwrap();
        }
        drop(ours);

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, LinkError::Closed));
        assert!(s.is_triggered());

        let cats: Vec<String> = std::iter::from_fn(|| detections.try_recv().ok())
            .map(|r| r.msg.category().to_string())
            .collect();
        assert_eq!(cats, ["bird", "traffic_light"]);

        let temps: Vec<f64> = std::iter::from_fn(|| telemetry.try_recv().ok()).map(|r| r.msg.temperature_c).collect();
        assert_eq!(temps, [21.5, 21.6]);
    }

    #[tokio::test]
    async fn stops_on_shutdown_while_idle() {
        let (router, _d, _t) = router();
        let (_ours, theirs) = tokio::io::duplex(64);
        let s = Shutdown::new();
        let rx = tokio::spawn(Receiver::new(theirs, 4096, router, s.clone()).run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        s.trigger("test");
        let stats = tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap().unwrap();
        assert_eq!(stats, RxStats::default());
    }

    #[test]
    fn preview_truncates_long_lines() {
        let long = "x".repeat(500);
        assert!(preview(&long).ends_with("... (500 bytes)"));
        assert_eq!(preview("short"), "short");
    }
}
