//! Capture configuration
//!
//! Resolved runtime settings consumed by the capture engine: the ordered
//! channel manifest, sample rate, output location and the commands used to
//! reach the external routing and encoding tools.

use crate::utils::error::{CaptureError, CaptureResult};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// File name looked up in the user's config directory
pub const DEFAULT_CONFIG_FILE: &str = "jamcapture.toml";

/// Encoders address at most a stereo pair per channel
pub const MAX_SOURCES_PER_CHANNEL: usize = 2;

/// One entry of a channel's source list
///
/// Configuration files use the empty string or `"disabled"` to keep a slot
/// without routing anything into it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Source {
    /// A `device:port` name on the routing graph
    Active(String),
    /// Placeholder slot, never connected
    Disabled,
}

impl Source {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("disabled") {
            Source::Disabled
        } else {
            Source::Active(trimmed.to_string())
        }
    }

    /// Port name, if this source is routed
    pub fn port(&self) -> Option<&str> {
        match self {
            Source::Active(name) => Some(name),
            Source::Disabled => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Source::Active(_))
    }
}

impl From<String> for Source {
    fn from(raw: String) -> Self {
        Source::parse(&raw)
    }
}

impl From<&str> for Source {
    fn from(raw: &str) -> Self {
        Source::parse(raw)
    }
}

impl From<Source> for String {
    fn from(source: Source) -> Self {
        match source {
            Source::Active(name) => name,
            Source::Disabled => "disabled".to_string(),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Active(name) => f.write_str(name),
            Source::Disabled => f.write_str("disabled"),
        }
    }
}

/// What a channel carries in the final mix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    #[default]
    Input,
    Monitor,
}

/// A logical input of the recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Unique name, also used as the encoder track title
    pub name: String,

    /// Ordered sources: one entry is mono, two entries are left/right
    #[serde(default)]
    pub sources: Vec<Source>,

    #[serde(default)]
    pub role: ChannelRole,

    /// Linear gain applied by the mixer
    #[serde(default = "default_gain")]
    pub gain: f64,

    /// Delay compensation applied by the mixer
    #[serde(default)]
    pub delay_ms: i32,
}

fn default_gain() -> f64 {
    1.0
}

impl Channel {
    pub fn new(name: impl Into<String>, sources: &[&str]) -> Self {
        Self {
            name: name.into(),
            sources: sources.iter().map(|s| Source::parse(s)).collect(),
            role: ChannelRole::Input,
            gain: default_gain(),
            delay_ms: 0,
        }
    }

    pub fn with_role(mut self, role: ChannelRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    /// Port names of the routed sources, in order
    pub fn active_sources(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().filter_map(Source::port)
    }

    /// A channel with nothing routed never blocks the start of a recording
    pub fn has_active_sources(&self) -> bool {
        self.sources.iter().any(Source::is_active)
    }

    /// Number of encoder input channels: mono unless two sources are listed
    pub fn encoder_channels(&self) -> usize {
        self.sources.len().clamp(1, MAX_SOURCES_PER_CHANNEL)
    }

    /// Client name the encoder registers on the routing graph for this channel
    pub fn encoder_client(&self) -> String {
        format!("jamcapture_{}", self.name)
    }

    /// Encoder input port fed by the source at `index`
    pub fn encoder_port(&self, index: usize) -> String {
        format!("{}:input_{}", self.encoder_client(), index + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { sample_rate: 48_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Where recordings are written
    pub directory: PathBuf,
    /// Audio codec handed to the encoder
    pub format: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        let directory = BaseDirs::new()
            .map(|dirs| dirs.home_dir().join("Audio").join("JamCapture"))
            .unwrap_or_else(|| PathBuf::from("JamCapture"));
        Self {
            directory,
            format: "flac".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Program and leading arguments; the generated arguments are appended
    pub command: Vec<String>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            command: vec!["pw-jack".to_string(), "ffmpeg".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Utility used to list, link and unlink ports
    pub link_command: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            link_command: "pw-link".to_string(),
        }
    }
}

/// Resolved configuration for one capture engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub audio: AudioConfig,
    pub output: OutputConfig,
    pub encoder: EncoderConfig,
    pub routing: RoutingConfig,
    pub channels: Vec<Channel>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            output: OutputConfig::default(),
            encoder: EncoderConfig::default(),
            routing: RoutingConfig::default(),
            channels: vec![
                Channel::new("guitar", &["system:capture_1"]).with_gain(4.0),
                Channel::new("monitor_left", &["system:monitor_FL"])
                    .with_role(ChannelRole::Monitor)
                    .with_gain(0.8),
                Channel::new("monitor_right", &["system:monitor_FR"])
                    .with_role(ChannelRole::Monitor)
                    .with_gain(0.8),
            ],
        }
    }
}

impl CaptureConfig {
    /// `~/.config/jamcapture.toml` on Linux
    pub fn default_path() -> Option<PathBuf> {
        BaseDirs::new().map(|dirs| dirs.config_dir().join(DEFAULT_CONFIG_FILE))
    }

    /// Read, expand and validate a TOML configuration file
    pub fn load(path: &Path) -> CaptureResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CaptureError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(
            "Loaded config from {:?}: {} channels",
            path,
            config.channels.len()
        );
        Ok(config)
    }

    pub fn from_toml(content: &str) -> CaptureResult<Self> {
        let mut config: CaptureConfig = toml::from_str(content)?;
        config.output.directory = expand_home(&config.output.directory);
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> CaptureResult<String> {
        toml::to_string_pretty(self).map_err(|e| CaptureError::Config(e.to_string()))
    }

    pub fn validate(&self) -> CaptureResult<()> {
        if self.audio.sample_rate == 0 {
            return Err(CaptureError::Config("audio.sample_rate must be positive".into()));
        }
        if self.encoder.command.is_empty() {
            return Err(CaptureError::Config("encoder.command must name a program".into()));
        }
        if self.routing.link_command.trim().is_empty() {
            return Err(CaptureError::Config("routing.link_command must name a program".into()));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if channel.name.is_empty() {
                return Err(CaptureError::Config("channel name cannot be empty".into()));
            }
            if !channel
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(CaptureError::Config(format!(
                    "channel '{}': name may only contain letters, digits, '_' and '-'",
                    channel.name
                )));
            }
            if !seen.insert(channel.name.as_str()) {
                return Err(CaptureError::Config(format!(
                    "duplicate channel name '{}'",
                    channel.name
                )));
            }
            if channel.sources.len() > MAX_SOURCES_PER_CHANNEL {
                return Err(CaptureError::Config(format!(
                    "channel '{}': at most {} sources (mono or stereo), got {}",
                    channel.name,
                    MAX_SOURCES_PER_CHANNEL,
                    channel.sources.len()
                )));
            }
        }

        Ok(())
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[audio]
sample_rate = 44100

[output]
directory = "/tmp/jams"
format = "pcm_s24le"

[[channels]]
name = "guitar"
sources = ["Scarlett 2i2 USB:capture_FL"]
gain = 4.0

[[channels]]
name = "backing"
sources = ["Firefox:output_FL", "Firefox:output_FR"]
role = "monitor"
delay_ms = 120

[[channels]]
name = "spare"
sources = ["disabled"]
"#;

    #[test]
    fn test_parse_sample() {
        let config = CaptureConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.audio.sample_rate, 44100);
        assert_eq!(config.output.directory, PathBuf::from("/tmp/jams"));
        assert_eq!(config.channels.len(), 3);

        let backing = &config.channels[1];
        assert_eq!(backing.role, ChannelRole::Monitor);
        assert_eq!(backing.delay_ms, 120);
        assert_eq!(backing.encoder_channels(), 2);
        assert_eq!(backing.gain, 1.0);

        let spare = &config.channels[2];
        assert_eq!(spare.sources, vec![Source::Disabled]);
        assert!(!spare.has_active_sources());

        // untouched sections fall back to defaults
        assert_eq!(config.encoder.command, vec!["pw-jack", "ffmpeg"]);
        assert_eq!(config.routing.link_command, "pw-link");
    }

    #[test]
    fn test_source_sentinels() {
        assert_eq!(Source::parse(""), Source::Disabled);
        assert_eq!(Source::parse("disabled"), Source::Disabled);
        assert_eq!(Source::parse("dev:1"), Source::Active("dev:1".into()));
        assert_eq!(String::from(Source::Disabled), "disabled");
    }

    #[test]
    fn test_encoder_ports() {
        let channel = Channel::new("keys", &["a:1", "a:2"]);
        assert_eq!(channel.encoder_client(), "jamcapture_keys");
        assert_eq!(channel.encoder_port(1), "jamcapture_keys:input_2");
        assert_eq!(Channel::new("mute", &[]).encoder_channels(), 1);
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let mut config = CaptureConfig::default();
        config.channels.push(Channel::new("guitar", &["x:1"]));
        assert!(matches!(config.validate(), Err(CaptureError::Config(_))));
    }

    #[test]
    fn test_rejects_three_sources() {
        let mut config = CaptureConfig::default();
        config.channels = vec![Channel::new("wide", &["a:1", "a:2", "a:3"])];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_channel_name() {
        let mut config = CaptureConfig::default();
        config.channels = vec![Channel::new("lead vox", &["a:1"])];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, SAMPLE).unwrap();

        let config = CaptureConfig::load(&path).unwrap();
        assert_eq!(config.channel_names(), vec!["guitar", "backing", "spare"]);
    }

    #[test]
    fn test_default_roundtrips_through_toml() {
        let config = CaptureConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = CaptureConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.channels, config.channels);
    }
}
