//! Encoder subprocess lifecycle
//!
//! Starts the external encoder, keeps its diagnostic output, and stops it
//! with an interrupt first and a kill if it does not exit in time.

use super::command::EncoderCommand;
use crate::utils::error::{CaptureError, CaptureResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Anything smaller is not a usable recording
pub const MIN_OUTPUT_BYTES: u64 = 1024;

/// Per-stream cap on retained diagnostic output
const OUTPUT_BUFFER_LIMIT: usize = 64 * 1024;

/// How long to wait for the output readers to reach EOF after exit
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Lines of encoder stderr kept in a [`StopReport`]
const DIAGNOSTIC_LINES: usize = 10;

/// How the encoder went away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// Exited with status 0
    Clean,
    /// Terminated by the interrupt (signal, or FFmpeg's 255 exit code)
    Interrupted,
    /// Had to be killed
    ForceKilled,
    /// Exited some other way; the output file decides whether it worked
    Abnormal { code: Option<i32> },
    /// Ignored the interrupt for the whole grace period and was killed
    TimedOut,
}

/// What stopping the encoder produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    pub outcome: StopOutcome,
    /// Last lines the encoder wrote to stderr
    pub stderr_tail: String,
}

/// Accumulates the lines of one output stream
#[derive(Debug, Clone, Default)]
struct OutputBuffer(Arc<Mutex<String>>);

impl OutputBuffer {
    fn push_line(&self, line: &str) {
        let mut text = self.0.lock();
        text.push_str(line);
        text.push('\n');
        if text.len() > OUTPUT_BUFFER_LIMIT {
            let mut cut = text.len() - OUTPUT_BUFFER_LIMIT;
            while !text.is_char_boundary(cut) {
                cut += 1;
            }
            text.drain(..cut);
        }
    }

    fn contents(&self) -> String {
        self.0.lock().clone()
    }
}

/// A running encoder
pub struct EncoderProcess {
    child: Child,
    command_line: String,
    stderr: OutputBuffer,
    readers: Vec<JoinHandle<()>>,
}

impl EncoderProcess {
    /// Spawn the encoder. Must be called from within a tokio runtime.
    pub fn start(command: &EncoderCommand) -> CaptureResult<Self> {
        let command_line = command.display();
        tracing::info!("Starting encoder: {}", command_line);

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CaptureError::EncoderStart(format!("failed to start {}: {}", command.program, e))
            })?;

        let stderr = OutputBuffer::default();
        let mut readers = Vec::with_capacity(2);

        // stdout is only logged; diagnostics come from stderr
        if let Some(pipe) = child.stdout.take() {
            readers.push(spawn_reader(pipe, None, "stdout"));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(spawn_reader(pipe, Some(stderr.clone()), "stderr"));
        }

        tracing::debug!("Encoder running with pid {:?}", child.id());

        Ok(Self {
            child,
            command_line,
            stderr,
            readers,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn stderr_output(&self) -> String {
        self.stderr.contents()
    }

    /// Interrupt, wait up to `grace`, then kill.
    ///
    /// Only a failure to observe the process exit is an error; every exit
    /// path is reported through [`StopOutcome`], together with the tail of
    /// stderr for diagnosing an unusable output file.
    pub async fn stop(mut self, grace: Duration) -> CaptureResult<StopReport> {
        tracing::debug!("Interrupting encoder: {}", self.command_line);
        if !self.interrupt() {
            tracing::debug!("Interrupt not delivered, falling back to kill");
            if let Err(e) = self.child.start_kill() {
                tracing::debug!("Kill fallback failed: {}", e);
            }
        }

        let outcome = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.drain_readers().await;
                let outcome = classify_exit(status);
                match outcome {
                    StopOutcome::Abnormal { code } => {
                        tracing::warn!(
                            "Encoder exited abnormally (code {:?}): {}",
                            code,
                            tail(&self.stderr_output(), DIAGNOSTIC_LINES)
                        );
                    }
                    _ => tracing::debug!("Encoder stopped: {:?}", outcome),
                }
                outcome
            }
            Ok(Err(e)) => {
                return Err(CaptureError::EncoderStop(format!(
                    "failed to wait for encoder: {}",
                    e
                )))
            }
            Err(_) => {
                tracing::warn!(
                    "Encoder did not exit within {:?}, force killing",
                    grace
                );
                if let Err(e) = self.child.kill().await {
                    tracing::warn!("Failed to kill encoder: {}", e);
                }
                self.drain_readers().await;
                StopOutcome::TimedOut
            }
        };

        Ok(StopReport {
            outcome,
            stderr_tail: tail(&self.stderr_output(), DIAGNOSTIC_LINES),
        })
    }

    /// Immediate kill, used on shutdown
    pub async fn kill(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!("Encoder kill on shutdown failed: {}", e);
        }
        self.drain_readers().await;
    }

    #[cfg(unix)]
    fn interrupt(&self) -> bool {
        let Some(pid) = self.child.id() else {
            return false;
        };
        // SAFETY: kill(2) on our own child, which has not been reaped yet
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
        rc == 0
    }

    #[cfg(not(unix))]
    fn interrupt(&self) -> bool {
        false
    }

    async fn drain_readers(&mut self) {
        for reader in self.readers.drain(..) {
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
                tracing::debug!("Encoder output reader still open after exit");
            }
        }
    }
}

fn spawn_reader<R>(pipe: R, buffer: Option<OutputBuffer>, label: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::debug!("encoder {}: {}", label, line);
                    if let Some(buffer) = &buffer {
                        buffer.push_line(&line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("encoder {} read error: {}", label, e);
                    break;
                }
            }
        }
    })
}

fn classify_exit(status: ExitStatus) -> StopOutcome {
    if status.success() {
        return StopOutcome::Clean;
    }

    // FFmpeg exits with 255 when it shuts down on SIGINT
    if status.code() == Some(255) {
        return StopOutcome::Interrupted;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        match status.signal() {
            Some(libc::SIGINT) | Some(libc::SIGTERM) => return StopOutcome::Interrupted,
            Some(libc::SIGKILL) => return StopOutcome::ForceKilled,
            _ => {}
        }
    }

    StopOutcome::Abnormal {
        code: status.code(),
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Check the recording on disk; returns its size
pub async fn validate_output(path: &Path) -> CaptureResult<u64> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CaptureError::OutputMissing(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    let size = metadata.len();
    if size < MIN_OUTPUT_BYTES {
        return Err(CaptureError::OutputTooSmall {
            path: path.to_path_buf(),
            size,
        });
    }

    tracing::debug!("Output file validated: {} bytes", size);
    Ok(size)
}
