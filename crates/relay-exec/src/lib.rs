pub mod doctor;

use relay_proto::Command;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Searched in order; the first directory holding the script wins.
    pub search_dirs: Vec<PathBuf>,
    pub interpreter: String,
    /// Kill the script if it runs longer than this.
    pub timeout_s: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            search_dirs: vec![PathBuf::from(".")],
            interpreter: "python3".into(),
            timeout_s: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("script not found: {0}")]
    NotFound(String),

    #[error("refusing script name {0:?}")]
    InvalidName(String),

    #[error("spawn {interpreter} {}: {source}", .script.display())]
    Spawn {
        interpreter: String,
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} still running after {secs}s, killed", .script.display())]
    TimedOut { script: PathBuf, secs: u64 },
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub script: PathBuf,
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Runs `run <script>` requests as child processes under a fixed interpreter.
///
/// Execution is awaited in place, so a slow script holds up whoever called
/// [`CommandDispatcher::dispatch`].
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    cfg: DispatchConfig,
}

impl CommandDispatcher {
    pub fn new(cfg: DispatchConfig) -> Self {
        Self { cfg }
    }

    pub fn resolve(&self, script_name: &str) -> Result<PathBuf, DispatchError> {
        if !is_plain_file_name(script_name) {
            return Err(DispatchError::InvalidName(script_name.to_string()));
        }
        self.cfg
            .search_dirs
            .iter()
            .map(|dir| dir.join(script_name))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| DispatchError::NotFound(script_name.to_string()))
    }

    pub async fn execute(&self, script: &Path) -> Result<CommandOutcome, DispatchError> {
        let mut cmd = tokio::process::Command::new(&self.cfg.interpreter);
        cmd.arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("exec: {} {}", self.cfg.interpreter, script.display());
        let output = match self.cfg.timeout_s {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), cmd.output())
                .await
                .map_err(|_| DispatchError::TimedOut { script: script.to_path_buf(), secs })?,
            None => cmd.output().await,
        }
        .map_err(|source| DispatchError::Spawn {
            interpreter: self.cfg.interpreter.clone(),
            script: script.to_path_buf(),
            source,
        })?;

        Ok(CommandOutcome {
            script: script.to_path_buf(),
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Resolve, run and log one command. Failures are returned for the caller
    /// to report; none of them are fatal to the receive loop.
    pub async fn dispatch(&self, cmd: &Command) -> Result<CommandOutcome, DispatchError> {
        let script = self.resolve(cmd.script_name())?;
        info!("exec: running {}", script.display());

        let outcome = self.execute(&script).await?;
        for line in outcome.stdout.lines() {
            info!("exec: [{}] {}", cmd.script_name(), line);
        }
        if outcome.success() {
            info!("exec: {} finished ({})", cmd.script_name(), outcome.status);
        } else {
            for line in outcome.stderr.lines() {
                warn!("exec: [{}] stderr: {}", cmd.script_name(), line);
            }
            warn!("exec: {} failed ({})", cmd.script_name(), outcome.status);
        }
        Ok(outcome)
    }
}

// A bare file name: no separators, no `.`/`..`.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(&['/', '\\'][..]) && name != "." && name != ".."
}
