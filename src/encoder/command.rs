//! Encoder command line construction
//!
//! One JACK input per channel, each mapped to its own audio track titled
//! with the channel name, all written to a single multi-track container.

use crate::config::{CaptureConfig, Channel};
use crate::utils::error::{CaptureError, CaptureResult};
use std::path::Path;

/// Graph scheduling hints for the encoder's JACK clients
pub const ROUTING_ENV: &[(&str, &str)] = &[
    ("PIPEWIRE_QUANTUM", "256/48000"),
    ("PIPEWIRE_LATENCY", "256/48000"),
];

/// A fully resolved encoder invocation
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl EncoderCommand {
    /// Build the invocation recording every configured channel to `output`
    pub fn build(config: &CaptureConfig, output: &Path) -> CaptureResult<Self> {
        let (program, prefix) = config
            .encoder
            .command
            .split_first()
            .ok_or_else(|| CaptureError::EncoderStart("encoder command is empty".to_string()))?;

        if config.channels.is_empty() {
            return Err(CaptureError::EncoderStart(
                "no channels configured".to_string(),
            ));
        }

        let mut args = prefix.to_vec();
        args.extend(encoder_args(
            &config.channels,
            config.audio.sample_rate,
            &config.output.format,
            output,
        ));

        Ok(Self {
            program: program.clone(),
            args,
            env: ROUTING_ENV
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
    }

    /// Shell-like rendering for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// FFmpeg arguments for the given channel manifest
pub fn encoder_args(
    channels: &[Channel],
    sample_rate: u32,
    codec: &str,
    output: &Path,
) -> Vec<String> {
    let mut args = Vec::new();

    // Inputs, one JACK client per channel
    for channel in channels {
        args.extend([
            "-f".to_string(),
            "jack".to_string(),
            "-channels".to_string(),
            channel.encoder_channels().to_string(),
            "-i".to_string(),
            channel.encoder_client(),
        ]);
    }

    args.extend(["-ar".to_string(), sample_rate.to_string()]);

    // One track per input, in configuration order
    for (index, channel) in channels.iter().enumerate() {
        args.extend([
            "-map".to_string(),
            format!("{}:0", index),
            format!("-metadata:s:a:{}", index),
            format!("title={}", channel.name),
        ]);
    }

    args.extend([
        "-c:a".to_string(),
        codec.to_string(),
        "-y".to_string(),
        output.to_string_lossy().to_string(),
    ]);

    args
}
