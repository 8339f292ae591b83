//! External encoder
//!
//! Command construction and subprocess lifecycle for the multi-track encoder.

pub mod command;
pub mod process;

pub use command::{encoder_args, EncoderCommand, ROUTING_ENV};
pub use process::{validate_output, EncoderProcess, StopOutcome, StopReport, MIN_OUTPUT_BYTES};
