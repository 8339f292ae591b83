//! Recording state management
//!
//! Defines the capture state machine's states, the session record and the
//! per-channel availability cache.

use crate::config::Channel;
use crate::encoder::StopOutcome;
use crate::routing::{PortSnapshot, SourceState};
use crate::utils::error::{CaptureError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Container extension of every recording
pub const OUTPUT_EXTENSION: &str = "mkv";

/// Current state of the capture engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStatus {
    /// Nothing prepared
    Standby,
    /// Session prepared, waiting for every source to show up
    Ready,
    /// Encoder running
    Recording,
    /// Last operation failed; see `last_error`
    Error,
}

impl Default for CaptureStatus {
    fn default() -> Self {
        Self::Standby
    }
}

impl CaptureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureStatus::Standby => "STANDBY",
            CaptureStatus::Ready => "READY",
            CaptureStatus::Recording => "RECORDING",
            CaptureStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the engine is in `Error`; decides whether the monitor may recover it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCause {
    /// A configured source is registered more than once
    Duplicates,
    /// Routing graph unreachable or a port missing
    Routing,
    /// Encoder failed to start, stop, or produce a usable file
    Subprocess,
    /// Output directory could not be created
    Setup,
}

impl ErrorCause {
    pub fn of(error: &CaptureError) -> Self {
        match (error, error.kind()) {
            (CaptureError::DuplicateSources(_), _) => ErrorCause::Duplicates,
            (_, ErrorKind::Source) => ErrorCause::Routing,
            (_, ErrorKind::Subprocess) => ErrorCause::Subprocess,
            (_, ErrorKind::Validation | ErrorKind::Setup) => ErrorCause::Setup,
        }
    }
}

/// A prepared or running capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub song_name: String,

    /// When the session was prepared
    pub start_time: DateTime<Utc>,

    pub output_file: PathBuf,

    /// Channel names in track order
    pub channel_names: Vec<String>,

    pub channel_count: usize,
}

impl Session {
    pub fn new(song_name: impl Into<String>, output_file: PathBuf, channel_names: Vec<String>) -> Self {
        Self {
            song_name: song_name.into(),
            start_time: Utc::now(),
            output_file,
            channel_count: channel_names.len(),
            channel_names,
        }
    }
}

/// Availability of one configured channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Available,
    Unavailable,
    Duplicate,
    Unknown,
}

pub type ChannelStatusMap = BTreeMap<String, ChannelStatus>;

/// Channel status cache
///
/// `Fresh` is a recent scan served for one poll interval. `Frozen` holds the
/// scan taken when recording began; while recording, the routing graph is
/// never re-scanned for status queries.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelStatusCache {
    Stale,
    Fresh { map: ChannelStatusMap, taken: Instant },
    Frozen(ChannelStatusMap),
}

impl Default for ChannelStatusCache {
    fn default() -> Self {
        Self::Stale
    }
}

impl ChannelStatusCache {
    pub fn frozen(&self) -> Option<&ChannelStatusMap> {
        match self {
            ChannelStatusCache::Frozen(map) => Some(map),
            _ => None,
        }
    }

    /// The last scan, if it is younger than `max_age`
    pub fn fresh(&self, max_age: Duration) -> Option<&ChannelStatusMap> {
        match self {
            ChannelStatusCache::Fresh { map, taken } if taken.elapsed() < max_age => Some(map),
            _ => None,
        }
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self, ChannelStatusCache::Frozen(_))
    }
}

/// Status of one channel against a port snapshot
pub fn channel_status(channel: &Channel, snapshot: &PortSnapshot) -> ChannelStatus {
    if !channel.has_active_sources() {
        return ChannelStatus::Unknown;
    }

    let mut all_present = true;
    for source in channel.active_sources() {
        match snapshot.source_state(source) {
            SourceState::Duplicated(_) => return ChannelStatus::Duplicate,
            SourceState::Missing => all_present = false,
            SourceState::Present => {}
        }
    }

    if all_present {
        ChannelStatus::Available
    } else {
        ChannelStatus::Unavailable
    }
}

pub fn scan_channels(channels: &[Channel], snapshot: &PortSnapshot) -> ChannelStatusMap {
    channels
        .iter()
        .map(|channel| (channel.name.clone(), channel_status(channel, snapshot)))
        .collect()
}

/// Every channel marked unknown, for when the graph cannot be read
pub fn unknown_channels(channels: &[Channel]) -> ChannelStatusMap {
    channels
        .iter()
        .map(|channel| (channel.name.clone(), ChannelStatus::Unknown))
        .collect()
}

/// Result of a completed recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    pub song_name: String,

    pub output_file: PathBuf,

    /// Size of the output file in bytes
    pub size_bytes: u64,

    pub channel_count: usize,

    /// Time between encoder start and stop in milliseconds
    pub duration_ms: u64,

    pub outcome: StopOutcome,
}

/// Reduce a song name to something safe for a file name
///
/// Keeps ASCII letters, digits, spaces, `-` and `_`; spaces become `_`.
pub fn clean_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .trim()
        .replace(' ', "_")
}

/// Where the recording of `song_name` goes
pub fn output_path(directory: &Path, song_name: &str) -> PathBuf {
    let mut stem = clean_file_name(song_name);
    if stem.is_empty() {
        stem = "recording".to_string();
    }
    directory.join(format!("{}.{}", stem, OUTPUT_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(ports: &[&str]) -> PortSnapshot {
        PortSnapshot::new(ports.iter().map(|p| p.to_string()).collect())
    }

    #[test]
    fn test_status_display() {
        assert_eq!(CaptureStatus::default(), CaptureStatus::Standby);
        assert_eq!(CaptureStatus::Recording.to_string(), "RECORDING");
        assert_eq!(
            serde_json::to_string(&CaptureStatus::Ready).unwrap(),
            "\"ready\""
        );
    }

    #[test]
    fn test_error_cause_follows_error_kind() {
        assert_eq!(
            ErrorCause::of(&CaptureError::DuplicateSources(vec!["a:1".into()])),
            ErrorCause::Duplicates
        );
        assert_eq!(
            ErrorCause::of(&CaptureError::Routing("pw-link missing".into())),
            ErrorCause::Routing
        );
        assert_eq!(
            ErrorCause::of(&CaptureError::EncoderStart("no such file".into())),
            ErrorCause::Subprocess
        );
        assert_eq!(
            ErrorCause::of(&CaptureError::OutputMissing(PathBuf::from("a.mkv"))),
            ErrorCause::Subprocess
        );
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(ErrorCause::of(&CaptureError::Io(io)), ErrorCause::Setup);
    }

    #[test]
    fn test_clean_file_name() {
        assert_eq!(clean_file_name("My Song #1!"), "My_Song_1");
        assert_eq!(clean_file_name("  take-2_final  "), "take-2_final");
        assert_eq!(clean_file_name("../../etc/passwd"), "etcpasswd");
    }

    #[test]
    fn test_output_path() {
        let dir = Path::new("/rec");
        assert_eq!(output_path(dir, "Blue in Green"), PathBuf::from("/rec/Blue_in_Green.mkv"));
        assert_eq!(output_path(dir, "???"), PathBuf::from("/rec/recording.mkv"));
    }

    #[test]
    fn test_channel_status() {
        let ports = snapshot(&["dev:1", "app:FL", "app:FL", "app:FR"]);

        assert_eq!(
            channel_status(&Channel::new("guitar", &["dev:1"]), &ports),
            ChannelStatus::Available
        );
        assert_eq!(
            channel_status(&Channel::new("mic", &["dev:2"]), &ports),
            ChannelStatus::Unavailable
        );
        assert_eq!(
            channel_status(&Channel::new("backing", &["app:FL", "app:FR"]), &ports),
            ChannelStatus::Duplicate
        );
        assert_eq!(
            channel_status(&Channel::new("spare", &["disabled"]), &ports),
            ChannelStatus::Unknown
        );
    }

    #[test]
    fn test_partial_stereo_is_unavailable() {
        let ports = snapshot(&["app:FL"]);
        let channel = Channel::new("backing", &["app:FL", "app:FR"]);
        assert_eq!(channel_status(&channel, &ports), ChannelStatus::Unavailable);
    }

    #[test]
    fn test_scan_and_cache() {
        let channels = vec![Channel::new("a", &["x:1"]), Channel::new("b", &["y:1"])];
        let map = scan_channels(&channels, &snapshot(&["x:1"]));
        assert_eq!(map["a"], ChannelStatus::Available);
        assert_eq!(map["b"], ChannelStatus::Unavailable);

        let cache = ChannelStatusCache::Frozen(map.clone());
        assert!(cache.is_frozen());
        assert_eq!(cache.frozen(), Some(&map));
        assert!(ChannelStatusCache::default().frozen().is_none());

        let cache = ChannelStatusCache::Fresh {
            map: map.clone(),
            taken: Instant::now(),
        };
        assert_eq!(cache.fresh(Duration::from_secs(60)), Some(&map));
        assert!(cache.fresh(Duration::ZERO).is_none());
        assert!(cache.frozen().is_none());

        assert!(unknown_channels(&channels)
            .values()
            .all(|s| *s == ChannelStatus::Unknown));
    }

    #[test]
    fn test_session_counts_channels() {
        let session = Session::new(
            "song",
            PathBuf::from("/rec/song.mkv"),
            vec!["guitar".into(), "vocals".into()],
        );
        assert_eq!(session.channel_count, 2);
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["songName"], "song");
        assert_eq!(json["channelCount"], 2);
    }
}
