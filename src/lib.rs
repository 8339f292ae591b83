//! JamCapture - multi-channel live recording.
//!
//! This is the library crate behind the `jamcapture` command. It drives the
//! PipeWire port graph and an external multi-track encoder through a small
//! capture state machine.

pub mod config;
pub mod encoder;
pub mod recorder;
pub mod routing;
pub mod utils;

pub use config::{CaptureConfig, Channel, ChannelRole, Source};
pub use recorder::{CaptureCoordinator, CaptureStatus, RecordingSummary, Session};
pub use utils::{CaptureError, CaptureResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging on stderr
///
/// `RUST_LOG` wins; otherwise each `-v` raises the crate's level.
pub fn init_tracing(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "jamcapture=info",
        1 => "jamcapture=debug",
        _ => "jamcapture=trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
