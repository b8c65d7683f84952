use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use relay_exec::{doctor as exec_doctor, CommandDispatcher, DispatchConfig};
use relay_link::{doctor as link_doctor, open_serial, LinkConfig, Multiplexer, Receiver, Router, Shutdown, Transmitter};
use relay_proto::{decode, encode_command, Command as RemoteCommand};
use relay_sources::acquisition::{self, IioBme280};
use relay_sources::{detections, doctor as sources_doctor, DetectionConfig, SensorConfig};
use relay_store::{doctor as store_doctor, run_sink, CsvLog};

#[derive(Debug, Parser)]
#[command(name = "relay", version, about = "WES relay - LoRa telemetry & detection store-and-forward")]
struct Cli {
    #[arg(long, default_value = "relay.toml")]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check the configuration without touching the radio.
    Doctor,
    /// Platform side: sample the sensor, watch for detections, transmit.
    Tx {
        /// Also read the link and act on incoming lines (remote commands).
        #[arg(long)]
        listen: bool,
    },
    /// Ground side: receive, run commands, log telemetry and detections.
    Rx,
    /// Send one `run <script>` request over the link.
    SendCommand { script: String },
    /// Show how a line would be classified.
    Classify { line: String },
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct Config {
    link: LinkConfig,
    sensor: SensorConfig,
    detections: DetectionConfig,
    commands: DispatchConfig,
    logs: LogsCfg,
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct LogsCfg {
    telemetry_csv: PathBuf,
    detection_csv: PathBuf,
}

impl Default for LogsCfg {
    fn default() -> Self {
        Self {
            telemetry_csv: PathBuf::from("bme280_data_log.csv"),
            detection_csv: PathBuf::from("detections_log.csv"),
        }
    }
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Command::Classify { line } = &cli.cmd {
        println!("{:?}", decode(line));
        return Ok(());
    }
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg),
        Command::Tx { listen } => tx(&cfg, listen).await,
        Command::Rx => rx(&cfg).await,
        Command::SendCommand { script } => send_command(&cfg, &script).await,
        Command::Classify { .. } => Ok(()),
    }
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    link_doctor::check_link(&cfg.link)?;
    sources_doctor::check_sensor(&cfg.sensor)?;
    sources_doctor::check_detections(&cfg.detections)?;
    exec_doctor::check_dispatch(&cfg.commands)?;
    store_doctor::check_log_path("logs.telemetry_csv", &cfg.logs.telemetry_csv)?;
    store_doctor::check_log_path("logs.detection_csv", &cfg.logs.detection_csv)?;
    info!("doctor: OK");
    Ok(())
}

struct Worker {
    name: &'static str,
    handle: JoinHandle<Result<()>>,
}

/// A worker that fails takes the rest of the process down with it.
fn spawn_worker<F>(name: &'static str, shutdown: &Shutdown, fut: F) -> Worker
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let shutdown = shutdown.clone();
    let handle = tokio::spawn(async move {
        let res = fut.await;
        if let Err(e) = &res {
            error!("{}: {:#}", name, e);
            shutdown.trigger(&format!("{} failed", name));
        }
        res
    });
    Worker { name, handle }
}

fn watch_ctrl_c(shutdown: &Shutdown) {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut listener = shutdown.listener();
        tokio::select! {
            r = tokio::signal::ctrl_c() => match r {
                Ok(()) => { shutdown.trigger("interrupted"); }
                Err(e) => warn!("cannot listen for ctrl-c: {}", e),
            },
            _ = listener.triggered() => {}
        }
    });
}

/// Wait for every worker; the first failure becomes the process result.
async fn join_all(workers: Vec<Worker>) -> Result<()> {
    let mut failure = None;
    for w in workers {
        match w.handle.await {
            Ok(Ok(())) => info!("{}: done", w.name),
            Ok(Err(e)) => {
                failure.get_or_insert(e);
            }
            Err(e) => {
                error!("{}: task panicked: {}", w.name, e);
                failure.get_or_insert_with(|| anyhow::anyhow!("{} panicked", w.name));
            }
        }
    }
    match failure {
        Some(e) => Err(e),
        None => {
            info!("shutdown complete");
            Ok(())
        }
    }
}

async fn tx(cfg: &Config, listen: bool) -> Result<()> {
    info!("tx: starting on {} @ {}", cfg.link.device, cfg.link.baud);
    let sensor = match cfg.sensor.source.as_str() {
        "iio" => Some(match &cfg.sensor.iio_dir {
            Some(dir) => IioBme280::open(dir)?,
            None => IioBme280::discover()?,
        }),
        "none" => None,
        other => anyhow::bail!("unknown sensor.source: {}", other),
    };

    let shutdown = Shutdown::new();
    let port = open_serial(&cfg.link)?;
    let (reader, writer) = tokio::io::split(port);

    let mux = Arc::new(Multiplexer::new(
        cfg.link.detection_burst_limit,
        cfg.link.drain_on_shutdown,
        shutdown.listener(),
    ));
    let mut workers = Vec::new();

    let transmitter = Transmitter::new(writer, mux.clone(), Duration::from_millis(cfg.link.pace_ms), shutdown.clone());
    workers.push(spawn_worker("transmitter", &shutdown, async move {
        transmitter.run().await?;
        Ok(())
    }));

    match sensor {
        Some(sensor) => {
            let sensor = acquisition::shared(sensor);
            let (sensor_cfg, mux, sd) = (cfg.sensor.clone(), mux.clone(), shutdown.clone());
            workers.push(spawn_worker("acquisition", &shutdown, async move {
                acquisition::run_acquisition(sensor, sensor_cfg, mux, sd).await;
                Ok(())
            }));
        }
        None => info!("tx: no sensor configured"),
    }

    if cfg.detections.enable {
        let (det_cfg, mux, sd) = (cfg.detections.clone(), mux.clone(), shutdown.clone());
        workers.push(spawn_worker("detections", &shutdown, detections::run_detection_watcher(det_cfg, mux, sd)));
    }

    if listen {
        spawn_receive_side(cfg, reader, &shutdown, &mut workers);
    }

    watch_ctrl_c(&shutdown);
    join_all(workers).await
}

async fn rx(cfg: &Config) -> Result<()> {
    info!("rx: starting on {} @ {}", cfg.link.device, cfg.link.baud);
    let shutdown = Shutdown::new();
    let port = open_serial(&cfg.link)?;

    let mut workers = Vec::new();
    spawn_receive_side(cfg, port, &shutdown, &mut workers);

    watch_ctrl_c(&shutdown);
    join_all(workers).await
}

/// Receiver plus the two log sinks it feeds.
fn spawn_receive_side<R>(cfg: &Config, reader: R, shutdown: &Shutdown, workers: &mut Vec<Worker>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (det_tx, det_rx) = mpsc::unbounded_channel();
    let (tel_tx, tel_rx) = mpsc::unbounded_channel();
    let router = Router::new(CommandDispatcher::new(cfg.commands.clone()), det_tx, tel_tx);

    let receiver = Receiver::new(reader, cfg.link.max_line_len, router, shutdown.clone());
    workers.push(spawn_worker("receiver", shutdown, async move {
        receiver.run().await?;
        Ok(())
    }));

    let (log, sd) = (CsvLog::new(&cfg.logs.telemetry_csv), shutdown.clone());
    workers.push(spawn_worker("telemetry-log", shutdown, async move {
        run_sink(tel_rx, log, sd).await;
        Ok(())
    }));

    let (log, sd) = (CsvLog::new(&cfg.logs.detection_csv), shutdown.clone());
    workers.push(spawn_worker("detection-log", shutdown, async move {
        run_sink(det_rx, log, sd).await;
        Ok(())
    }));
}

async fn send_command(cfg: &Config, script: &str) -> Result<()> {
    let line = encode_command(&RemoteCommand::new(script)?);
    let mut port = open_serial(&cfg.link)?;
    port.write_all(line.as_bytes()).await.context("write command")?;
    port.flush().await.context("flush command")?;
    info!("sent: {}", line.trim_end());
    Ok(())
}
