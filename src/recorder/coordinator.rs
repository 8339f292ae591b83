//! Capture coordinator
//!
//! Owns the capture status and session and drives the monitor, the encoder
//! and the port connector through the recording lifecycle.
//!
//! Two locks are involved. `shared` is a short-lived read/write lock around
//! the status tuple and is never held across an await. `gate` serializes
//! every mutating operation end to end (including encoder start and stop), so
//! a transition in progress is never interleaved with another.

use super::connector::{self, plan_links};
use super::monitor::{self, assess, Assessment, MonitorAction, MonitorTarget};
use super::state::{
    output_path, scan_channels, unknown_channels, CaptureStatus, ChannelStatusCache,
    ChannelStatusMap, ErrorCause, RecordingSummary, Session,
};
use super::task::BackgroundTask;
use crate::config::CaptureConfig;
use crate::encoder::{validate_output, EncoderCommand, EncoderProcess};
use crate::routing::{ConnectionManager, PortDirectory, PortGraph};
use crate::utils::error::{CaptureError, CaptureResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Deadlines used by the coordinator and its background tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Source monitor poll interval
    pub poll_interval: Duration,
    /// How long a prepared session waits for its sources
    pub ready_window: Duration,
    /// Delay before linking, while the encoder registers its inputs
    pub encoder_settle: Duration,
    /// Bound on waiting for each encoder input port
    pub encoder_port_timeout: Duration,
    /// Poll interval while waiting for an encoder input port
    pub port_poll: Duration,
    /// Grace period between interrupt and kill
    pub stop_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            ready_window: Duration::from_secs(30),
            encoder_settle: Duration::from_secs(1),
            encoder_port_timeout: Duration::from_secs(5),
            port_poll: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct SharedState {
    status: CaptureStatus,
    session: Option<Session>,
    channel_cache: ChannelStatusCache,
    last_error: Option<String>,
    error_cause: Option<ErrorCause>,
}

/// Resources owned by the current session; guarded by the gate
#[derive(Default)]
struct Tasks {
    monitor: Option<BackgroundTask>,
    connector: Option<BackgroundTask>,
    encoder: Option<EncoderProcess>,
    recording_started: Option<Instant>,
}

struct Inner {
    config: CaptureConfig,
    directory: PortDirectory,
    connections: ConnectionManager,
    timings: Timings,
    shared: RwLock<SharedState>,
    gate: Mutex<Tasks>,
}

/// The capture state machine
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct CaptureCoordinator {
    inner: Arc<Inner>,
}

impl CaptureCoordinator {
    pub fn new(config: CaptureConfig, graph: Arc<dyn PortGraph>) -> Self {
        Self::with_timings(config, graph, Timings::default())
    }

    pub fn with_timings(config: CaptureConfig, graph: Arc<dyn PortGraph>, timings: Timings) -> Self {
        let directory = PortDirectory::new(graph);
        Self {
            inner: Arc::new(Inner {
                config,
                connections: ConnectionManager::new(directory.clone()),
                directory,
                timings,
                shared: RwLock::new(SharedState::default()),
                gate: Mutex::new(Tasks::default()),
            }),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.inner.config
    }

    pub fn status(&self) -> CaptureStatus {
        self.inner.shared.read().status
    }

    /// Status plus a copy of the session
    pub fn get_status(&self) -> (CaptureStatus, Option<Session>) {
        let shared = self.inner.shared.read();
        (shared.status, shared.session.clone())
    }

    /// Message of the most recent failure, cleared by a successful prepare
    pub fn last_error(&self) -> Option<String> {
        self.inner.shared.read().last_error.clone()
    }

    /// Per-channel availability
    ///
    /// While recording this is the scan taken at encoder start. Otherwise a
    /// scan younger than one poll interval is reused and the graph is scanned
    /// again after that.
    pub async fn get_channel_status(&self) -> ChannelStatusMap {
        let channels = &self.inner.config.channels;

        {
            let shared = self.inner.shared.read();
            if shared.status == CaptureStatus::Recording {
                return match shared.channel_cache.frozen() {
                    Some(map) => map.clone(),
                    None => unknown_channels(channels),
                };
            }
            if let Some(map) = shared.channel_cache.fresh(self.inner.timings.poll_interval) {
                return map.clone();
            }
        }

        let map = match self.inner.directory.snapshot().await {
            Ok(snapshot) => scan_channels(channels, &snapshot),
            Err(e) => {
                tracing::warn!("Failed to scan channel status: {}", e);
                return unknown_channels(channels);
            }
        };

        let mut shared = self.inner.shared.write();
        if shared.status != CaptureStatus::Recording {
            shared.channel_cache = ChannelStatusCache::Fresh {
                map: map.clone(),
                taken: Instant::now(),
            };
        }
        map
    }

    /// Prepare a session and start watching for its sources
    pub async fn prepare(&self, song_name: &str) -> CaptureResult<Session> {
        let mut tasks = self.inner.gate.lock().await;

        let status = self.status();
        if !matches!(status, CaptureStatus::Standby | CaptureStatus::Error) {
            return Err(CaptureError::InvalidState {
                operation: "prepare",
                status,
            });
        }

        let song_name = song_name.trim();
        if song_name.is_empty() {
            return Err(CaptureError::EmptySongName);
        }

        let directory = &self.inner.config.output.directory;
        if let Err(e) = tokio::fs::create_dir_all(directory).await {
            let err = CaptureError::Io(e);
            self.fail(&err);
            return Err(err);
        }

        // a monitor left by a failed session keeps running until this succeeds
        let snapshot = self.inner.directory.snapshot().await?;
        let assessment = assess(&self.inner.config.channels, &snapshot);

        if let Some(monitor) = tasks.monitor.take() {
            monitor.shutdown().await;
        }
        if let Some(connector) = tasks.connector.take() {
            connector.shutdown().await;
        }

        if !assessment.duplicates.is_empty() {
            let err = CaptureError::DuplicateSources(assessment.duplicates);
            {
                let mut shared = self.inner.shared.write();
                shared.session = None;
                shared.channel_cache = ChannelStatusCache::Stale;
            }
            self.fail(&err);
            tasks.monitor = Some(self.spawn_monitor());
            return Err(err);
        }

        let session = Session::new(
            song_name,
            output_path(directory, song_name),
            self.inner.config.channel_names(),
        );

        {
            let mut shared = self.inner.shared.write();
            shared.status = CaptureStatus::Ready;
            shared.session = Some(session.clone());
            shared.channel_cache = ChannelStatusCache::Stale;
            shared.last_error = None;
            shared.error_cause = None;
        }
        tasks.monitor = Some(self.spawn_monitor());

        tracing::info!(
            "Session ready: {} -> {}",
            session.song_name,
            session.output_file.display()
        );
        Ok(session)
    }

    /// Abandon a prepared session
    pub async fn cancel(&self) -> CaptureResult<()> {
        let mut tasks = self.inner.gate.lock().await;

        let status = self.status();
        if status != CaptureStatus::Ready {
            return Err(CaptureError::InvalidState {
                operation: "cancel",
                status,
            });
        }

        if let Some(monitor) = tasks.monitor.take() {
            monitor.shutdown().await;
        }

        self.reset_to_standby();
        tracing::info!("Session cancelled");
        Ok(())
    }

    /// Stop the encoder and check what it wrote
    pub async fn stop(&self) -> CaptureResult<RecordingSummary> {
        let mut tasks = self.inner.gate.lock().await;

        let (status, session) = self.get_status();
        let session = match (status, session) {
            (CaptureStatus::Recording, Some(session)) => session,
            (status, _) => {
                return Err(CaptureError::InvalidState {
                    operation: "stop",
                    status,
                })
            }
        };

        tracing::info!("Stopping recording: {}", session.song_name);

        if let Some(monitor) = tasks.monitor.take() {
            monitor.shutdown().await;
        }
        if let Some(connector) = tasks.connector.take() {
            connector.shutdown().await;
        }

        let duration_ms = tasks
            .recording_started
            .take()
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or(0);

        // failures carry the encoder's last stderr lines, if any
        let result = match tasks.encoder.take() {
            Some(encoder) => match encoder.stop(self.inner.timings.stop_timeout).await {
                Ok(report) => match validate_output(&session.output_file).await {
                    Ok(size) => Ok((report.outcome, size)),
                    Err(e) => Err((e, report.stderr_tail)),
                },
                Err(e) => Err((e, String::new())),
            },
            None => Err((
                CaptureError::EncoderStop("no encoder running".to_string()),
                String::new(),
            )),
        };

        match result {
            Ok((outcome, size_bytes)) => {
                self.reset_to_standby();
                tracing::info!(
                    "Recording saved: {} ({} bytes, {}ms)",
                    session.output_file.display(),
                    size_bytes,
                    duration_ms
                );
                Ok(RecordingSummary {
                    song_name: session.song_name,
                    output_file: session.output_file,
                    size_bytes,
                    channel_count: session.channel_count,
                    duration_ms,
                    outcome,
                })
            }
            Err((err, stderr_tail)) => {
                let message = if stderr_tail.is_empty() {
                    err.to_string()
                } else {
                    format!("{}; encoder stderr: {}", err, stderr_tail.replace('\n', " | "))
                };
                self.record_failure(&err, message);
                Err(err)
            }
        }
    }

    /// Stop background work and kill any running encoder
    pub async fn shutdown(&self) {
        let mut tasks = self.inner.gate.lock().await;

        if let Some(monitor) = tasks.monitor.take() {
            monitor.shutdown().await;
        }
        if let Some(connector) = tasks.connector.take() {
            connector.shutdown().await;
        }
        if let Some(encoder) = tasks.encoder.take() {
            tracing::warn!("Killing encoder on shutdown");
            encoder.kill().await;
        }
        tasks.recording_started = None;

        if matches!(self.status(), CaptureStatus::Ready | CaptureStatus::Recording) {
            self.reset_to_standby();
        }
    }

    fn reset_to_standby(&self) {
        let mut shared = self.inner.shared.write();
        shared.status = CaptureStatus::Standby;
        shared.session = None;
        shared.channel_cache = ChannelStatusCache::Stale;
        shared.error_cause = None;
    }

    fn fail(&self, err: &CaptureError) {
        self.record_failure(err, err.to_string());
    }

    fn record_failure(&self, err: &CaptureError, message: String) {
        tracing::error!("Capture error: {}", message);
        let mut shared = self.inner.shared.write();
        shared.status = CaptureStatus::Error;
        shared.error_cause = Some(ErrorCause::of(err));
        shared.last_error = Some(message);
        if shared.channel_cache.is_frozen() {
            shared.channel_cache = ChannelStatusCache::Stale;
        }
    }

    fn spawn_monitor(&self) -> BackgroundTask {
        let target = SessionMonitor {
            coordinator: self.clone(),
        };
        let poll = self.inner.timings.poll_interval;
        let window = self.inner.timings.ready_window;
        BackgroundTask::spawn("source monitor", move |stop| {
            monitor::run(target, poll, window, stop)
        })
    }

    fn spawn_connector(&self) -> BackgroundTask {
        let manager = self.inner.connections.clone();
        let plan = plan_links(&self.inner.config.channels);
        let timings = self.inner.timings.clone();
        BackgroundTask::spawn("port connector", move |stop| {
            connector::run(manager, plan, timings, stop)
        })
    }

    /// Apply a monitor decision, re-checking state under the gate
    async fn apply_monitor_action(&self, action: MonitorAction) {
        let mut tasks = self.inner.gate.lock().await;
        let (status, cause) = {
            let shared = self.inner.shared.read();
            (shared.status, shared.error_cause)
        };

        match action {
            MonitorAction::Promote if status == CaptureStatus::Ready => {
                self.promote(&mut tasks).await;
            }
            MonitorAction::DropToStandby { duplicates } if status == CaptureStatus::Ready => {
                let err = CaptureError::DuplicateSources(duplicates);
                tracing::warn!("Session dropped: {}", err);
                self.reset_to_standby();
                self.inner.shared.write().last_error = Some(err.to_string());
            }
            MonitorAction::RecoverToStandby
                if status == CaptureStatus::Error && cause == Some(ErrorCause::Duplicates) =>
            {
                tracing::info!("Duplicate sources resolved, back to standby");
                self.reset_to_standby();
            }
            MonitorAction::Expire
                if matches!(status, CaptureStatus::Ready | CaptureStatus::Error) =>
            {
                tracing::info!("Ready window expired, back to standby");
                self.reset_to_standby();
            }
            other => {
                tracing::debug!("Ignoring monitor action {:?} while {}", other, status);
            }
        }
    }

    /// Start the encoder for the prepared session
    async fn promote(&self, tasks: &mut Tasks) {
        let Some(session) = self.inner.shared.read().session.clone() else {
            return;
        };
        let config = &self.inner.config;

        let channel_map = match self.inner.directory.snapshot().await {
            Ok(snapshot) => scan_channels(&config.channels, &snapshot),
            Err(e) => {
                tracing::warn!("Failed to scan channel status: {}", e);
                unknown_channels(&config.channels)
            }
        };

        remove_previous_output(&session.output_file).await;

        let started = EncoderCommand::build(config, &session.output_file)
            .and_then(|command| EncoderProcess::start(&command));
        let encoder = match started {
            Ok(encoder) => encoder,
            Err(err) => {
                self.fail(&err);
                return;
            }
        };
        tracing::debug!("Encoder started (pid {:?})", encoder.id());

        tasks.encoder = Some(encoder);
        tasks.recording_started = Some(Instant::now());
        tasks.connector = Some(self.spawn_connector());

        {
            let mut shared = self.inner.shared.write();
            shared.status = CaptureStatus::Recording;
            shared.channel_cache = ChannelStatusCache::Frozen(channel_map);
        }

        tracing::info!(
            "Recording started: {} ({} channels)",
            session.output_file.display(),
            session.channel_count
        );
    }
}

async fn remove_previous_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed previous recording: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
    }
}

/// The monitor's handle on the coordinator
struct SessionMonitor {
    coordinator: CaptureCoordinator,
}

#[async_trait]
impl MonitorTarget for SessionMonitor {
    fn status(&self) -> (CaptureStatus, Option<ErrorCause>) {
        let shared = self.coordinator.inner.shared.read();
        (shared.status, shared.error_cause)
    }

    async fn assess(&self) -> CaptureResult<Assessment> {
        let snapshot = self.coordinator.inner.directory.snapshot().await?;
        Ok(assess(&self.coordinator.inner.config.channels, &snapshot))
    }

    async fn transition(&self, action: MonitorAction) {
        self.coordinator.apply_monitor_action(action).await;
    }
}
