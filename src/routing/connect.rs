//! Port connection with retries
//!
//! Interactive applications (browsers, players, chat clients) register their
//! ports lazily and sometimes re-create them, so their sources get a longer
//! retry budget than hardware interfaces.

use super::directory::PortDirectory;
use crate::utils::error::{CaptureError, CaptureResult};
use std::time::Duration;

/// Substrings identifying interactive applications
const EPHEMERAL_APPS: &[&str] = &[
    "chrome", "firefox", "spotify", "discord", "steam", "vlc", "mpv", "zoom", "teams", "slack",
    "wire",
];

/// Whether a source belongs to an application that may come and go
pub fn is_ephemeral_port(name: &str) -> bool {
    let lower = name.to_lowercase();
    EPHEMERAL_APPS.iter().any(|app| lower.contains(app))
}

/// How hard to try before giving up on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const EPHEMERAL: RetryPolicy = RetryPolicy {
        attempts: 15,
        interval: Duration::from_secs(1),
    };

    pub const STABLE: RetryPolicy = RetryPolicy {
        attempts: 5,
        interval: Duration::from_millis(500),
    };

    pub fn for_source(name: &str) -> Self {
        if is_ephemeral_port(name) {
            Self::EPHEMERAL
        } else {
            Self::STABLE
        }
    }
}

/// Links named sources to named destinations on the routing graph
#[derive(Clone)]
pub struct ConnectionManager {
    directory: PortDirectory,
}

impl ConnectionManager {
    pub fn new(directory: PortDirectory) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &PortDirectory {
        &self.directory
    }

    /// Connect using the policy matching the source's class.
    /// Returns the attempt number that succeeded.
    pub async fn connect(&self, source: &str, dest: &str) -> CaptureResult<u32> {
        let policy = RetryPolicy::for_source(source);
        tracing::debug!(
            "Connecting {} -> {} ({} attempts every {:?})",
            source,
            dest,
            policy.attempts,
            policy.interval
        );
        self.connect_with_policy(source, dest, policy).await
    }

    pub async fn connect_with_policy(
        &self,
        source: &str,
        dest: &str,
        policy: RetryPolicy,
    ) -> CaptureResult<u32> {
        for attempt in 1..=policy.attempts {
            if self.directory.port_exists(source).await {
                match self.directory.graph().connect(source, dest).await {
                    Ok(()) => {
                        tracing::debug!(
                            "Connected {} -> {} on attempt {}",
                            source,
                            dest,
                            attempt
                        );
                        return Ok(attempt);
                    }
                    Err(e) => {
                        tracing::debug!(
                            "Connection attempt {} for {} -> {} failed: {}",
                            attempt,
                            source,
                            dest,
                            e
                        );
                    }
                }
            } else {
                tracing::debug!("Source port {} not yet available (attempt {})", source, attempt);
            }

            if attempt < policy.attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        Err(CaptureError::ConnectFailed {
            source_port: source.to_string(),
            dest_port: dest.to_string(),
            attempts: policy.attempts,
        })
    }

    pub async fn disconnect(&self, source: &str, dest: &str) -> CaptureResult<()> {
        self.directory.graph().disconnect(source, dest).await
    }
}
