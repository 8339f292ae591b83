//! Source availability monitor
//!
//! Polls the routing graph while a session is prepared. Each tick is assessed
//! against the configured channels and turned into at most one state
//! transition; the monitor ends after any transition, on its deadline, or when
//! told to stop.

use super::state::{CaptureStatus, ErrorCause};
use crate::config::Channel;
use crate::routing::{PortSnapshot, SourceState};
use crate::utils::error::CaptureResult;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};

/// What one poll found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assessment {
    /// Configured sources registered more than once
    pub duplicates: Vec<String>,
    /// Every channel with routed sources has all of them present, and at
    /// least one such channel exists
    pub all_connectable: bool,
}

pub fn assess(channels: &[Channel], snapshot: &PortSnapshot) -> Assessment {
    let mut duplicates = Vec::new();
    let mut any_routed = false;
    let mut all_connectable = true;

    for channel in channels {
        if !channel.has_active_sources() {
            continue;
        }
        any_routed = true;

        for source in channel.active_sources() {
            match snapshot.source_state(source) {
                SourceState::Present => {}
                SourceState::Missing => all_connectable = false,
                SourceState::Duplicated(_) => {
                    all_connectable = false;
                    if !duplicates.iter().any(|d| d == source) {
                        duplicates.push(source.to_string());
                    }
                }
            }
        }
    }

    Assessment {
        duplicates,
        all_connectable: any_routed && all_connectable,
    }
}

/// Transition requested by the monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorAction {
    /// Keep polling
    Continue,
    /// Nothing left to watch
    Exit,
    /// A duplicate showed up while prepared
    DropToStandby { duplicates: Vec<String> },
    /// Duplicates that failed Prepare are gone
    RecoverToStandby,
    /// All sources are present; start the encoder
    Promote,
    /// The ready window elapsed
    Expire,
}

impl MonitorAction {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MonitorAction::Continue)
    }
}

pub fn decide(
    status: CaptureStatus,
    cause: Option<ErrorCause>,
    assessment: &Assessment,
) -> MonitorAction {
    match status {
        CaptureStatus::Ready if !assessment.duplicates.is_empty() => MonitorAction::DropToStandby {
            duplicates: assessment.duplicates.clone(),
        },
        CaptureStatus::Ready if assessment.all_connectable => MonitorAction::Promote,
        CaptureStatus::Ready => MonitorAction::Continue,
        CaptureStatus::Error if cause == Some(ErrorCause::Duplicates) => {
            if assessment.duplicates.is_empty() {
                MonitorAction::RecoverToStandby
            } else {
                MonitorAction::Continue
            }
        }
        CaptureStatus::Error => MonitorAction::Continue,
        CaptureStatus::Standby | CaptureStatus::Recording => MonitorAction::Exit,
    }
}

/// The state machine as seen from the monitor
#[async_trait]
pub trait MonitorTarget: Send + Sync {
    fn status(&self) -> (CaptureStatus, Option<ErrorCause>);

    async fn assess(&self) -> CaptureResult<Assessment>;

    /// Apply a terminal action; re-checks state before acting
    async fn transition(&self, action: MonitorAction);
}

/// Poll every `poll` until a terminal action, `window` elapses, or `stop` fires
pub async fn run<T: MonitorTarget>(
    target: T,
    poll: Duration,
    window: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let start = Instant::now();
    let mut ticker = interval_at(start + poll, poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let expiry = sleep_until(start + window);
    tokio::pin!(expiry);

    tracing::debug!("Source monitor started ({:?} window)", window);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => {
                tracing::debug!("Source monitor stopped");
                return;
            }
            _ = &mut expiry => {
                tracing::info!("No recording started within {:?}, returning to standby", window);
                tokio::select! {
                    biased;
                    _ = &mut stop => {}
                    _ = target.transition(MonitorAction::Expire) => {}
                }
                return;
            }
            _ = ticker.tick() => {}
        }

        let (status, cause) = target.status();
        let assessment = tokio::select! {
            biased;
            _ = &mut stop => return,
            result = target.assess() => result,
        };

        let assessment = match assessment {
            Ok(assessment) => assessment,
            Err(e) => {
                tracing::warn!("Source check failed: {}", e);
                continue;
            }
        };

        let action = decide(status, cause, &assessment);
        if !action.is_terminal() {
            continue;
        }

        tracing::debug!("Source monitor action: {:?}", action);
        tokio::select! {
            biased;
            _ = &mut stop => {}
            _ = target.transition(action) => {}
        }
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::task::BackgroundTask;
    use crate::utils::error::CaptureError;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn snapshot(ports: &[&str]) -> PortSnapshot {
        PortSnapshot::new(ports.iter().map(|p| p.to_string()).collect())
    }

    #[test]
    fn test_assess_requires_every_source() {
        let channels = vec![
            Channel::new("guitar", &["dev:1"]),
            Channel::new("backing", &["app:FL", "app:FR"]),
        ];

        let partial = assess(&channels, &snapshot(&["dev:1", "app:FL"]));
        assert!(!partial.all_connectable);
        assert!(partial.duplicates.is_empty());

        let full = assess(&channels, &snapshot(&["dev:1", "app:FL", "app:FR"]));
        assert!(full.all_connectable);
    }

    #[test]
    fn test_assess_ignores_unrouted_channels() {
        let channels = vec![
            Channel::new("guitar", &["dev:1"]),
            Channel::new("spare", &[]),
            Channel::new("off", &["disabled", ""]),
        ];
        assert!(assess(&channels, &snapshot(&["dev:1"])).all_connectable);

        // nothing routed at all never counts as ready
        assert!(!assess(&channels[1..], &snapshot(&["dev:1"])).all_connectable);
    }

    #[test]
    fn test_assess_reports_duplicates_once() {
        let channels = vec![
            Channel::new("left", &["app:FL"]),
            Channel::new("also_left", &["app:FL"]),
        ];
        let result = assess(&channels, &snapshot(&["app:FL", "app:FL"]));
        assert_eq!(result.duplicates, vec!["app:FL".to_string()]);
        assert!(!result.all_connectable);
    }

    #[test]
    fn test_decide() {
        let dup = Assessment {
            duplicates: vec!["a:1".into()],
            all_connectable: false,
        };
        let ready = Assessment {
            duplicates: vec![],
            all_connectable: true,
        };
        let waiting = Assessment::default();

        assert_eq!(
            decide(CaptureStatus::Ready, None, &dup),
            MonitorAction::DropToStandby {
                duplicates: vec!["a:1".into()]
            }
        );
        assert_eq!(decide(CaptureStatus::Ready, None, &ready), MonitorAction::Promote);
        assert_eq!(decide(CaptureStatus::Ready, None, &waiting), MonitorAction::Continue);

        let dup_cause = Some(ErrorCause::Duplicates);
        assert_eq!(decide(CaptureStatus::Error, dup_cause, &dup), MonitorAction::Continue);
        assert_eq!(
            decide(CaptureStatus::Error, dup_cause, &waiting),
            MonitorAction::RecoverToStandby
        );
        // recovery goes to standby, never straight to recording
        assert_eq!(
            decide(CaptureStatus::Error, dup_cause, &ready),
            MonitorAction::RecoverToStandby
        );
        assert_eq!(
            decide(CaptureStatus::Error, Some(ErrorCause::Subprocess), &waiting),
            MonitorAction::Continue
        );

        assert_eq!(decide(CaptureStatus::Standby, None, &ready), MonitorAction::Exit);
        assert_eq!(decide(CaptureStatus::Recording, None, &ready), MonitorAction::Exit);
    }

    #[derive(Default)]
    struct FakeState {
        status: Mutex<(CaptureStatus, Option<ErrorCause>)>,
        assessment: Mutex<Assessment>,
        fail_assess: Mutex<bool>,
        assess_calls: Mutex<usize>,
        actions: Mutex<Vec<MonitorAction>>,
    }

    #[derive(Clone, Default)]
    struct FakeTarget(Arc<FakeState>);

    impl FakeTarget {
        fn ready() -> Self {
            let target = Self::default();
            *target.0.status.lock() = (CaptureStatus::Ready, None);
            target
        }

        fn actions(&self) -> Vec<MonitorAction> {
            self.0.actions.lock().clone()
        }
    }

    #[async_trait]
    impl MonitorTarget for FakeTarget {
        fn status(&self) -> (CaptureStatus, Option<ErrorCause>) {
            *self.0.status.lock()
        }

        async fn assess(&self) -> CaptureResult<Assessment> {
            *self.0.assess_calls.lock() += 1;
            if *self.0.fail_assess.lock() {
                return Err(CaptureError::Routing("graph unavailable".into()));
            }
            Ok(self.0.assessment.lock().clone())
        }

        async fn transition(&self, action: MonitorAction) {
            self.0.actions.lock().push(action);
        }
    }

    const POLL: Duration = Duration::from_millis(500);
    const WINDOW: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_window() {
        let target = FakeTarget::ready();
        let (_stop_tx, stop_rx) = oneshot::channel();

        let start = Instant::now();
        run(target.clone(), POLL, WINDOW, stop_rx).await;

        assert_eq!(start.elapsed(), WINDOW);
        assert_eq!(target.actions(), vec![MonitorAction::Expire]);
        assert!(*target.0.assess_calls.lock() >= 59);
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotes_on_first_good_tick() {
        let target = FakeTarget::ready();
        target.0.assessment.lock().all_connectable = true;
        let (_stop_tx, stop_rx) = oneshot::channel();

        let start = Instant::now();
        run(target.clone(), POLL, WINDOW, stop_rx).await;

        assert_eq!(start.elapsed(), POLL);
        assert_eq!(target.actions(), vec![MonitorAction::Promote]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_polling_through_errors() {
        let target = FakeTarget::ready();
        *target.0.fail_assess.lock() = true;

        let flip = target.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2200)).await;
            *flip.0.fail_assess.lock() = false;
            flip.0.assessment.lock().all_connectable = true;
        });

        let (_stop_tx, stop_rx) = oneshot::channel();
        let start = Instant::now();
        run(target.clone(), POLL, WINDOW, stop_rx).await;

        assert_eq!(start.elapsed(), Duration::from_millis(2500));
        assert_eq!(target.actions(), vec![MonitorAction::Promote]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_ends_monitor() {
        let target = FakeTarget::ready();
        let runner = target.clone();
        let task = BackgroundTask::spawn("monitor", move |stop| run(runner, POLL, WINDOW, stop));

        tokio::time::sleep(Duration::from_secs(3)).await;
        task.shutdown().await;

        assert!(target.actions().is_empty());
    }
}
