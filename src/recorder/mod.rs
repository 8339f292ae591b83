//! Recording system module
//!
//! This module implements the capture lifecycle:
//! - CaptureCoordinator state machine (prepare / cancel / stop)
//! - Source availability monitor that starts the recording
//! - Port connector linking sources to the running encoder

pub mod connector;
pub mod coordinator;
pub mod monitor;
pub mod state;
pub mod task;

pub use coordinator::{CaptureCoordinator, Timings};
pub use state::{
    CaptureStatus, ChannelStatus, ChannelStatusCache, ChannelStatusMap, ErrorCause,
    RecordingSummary, Session,
};
