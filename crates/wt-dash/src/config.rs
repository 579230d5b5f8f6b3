use std::{path::PathBuf, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:71.0) Gecko/20100101 Firefox/71.0";

/// Number of attempts a downloader makes before giving up on a segment.
pub const DEFAULT_RETRIES: u32 = 5;

/// HTTP settings shared by manifest and segment requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub user_agent: String,
    /// Upper bound for a single request, so that a hung connection can never
    /// block cancellation indefinitely.
    #[serde(with = "secs")]
    pub request_timeout: Duration,
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Settings of the external player, the recorder and the muxer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub player_binary: PathBuf,
    /// Extra arguments passed to the player before the generated ones.
    pub player_args: Vec<String>,
    /// Directory where named pipes for playback are created.
    pub fifo_dir: PathBuf,
    pub record_dir: PathBuf,
    /// File stem of recordings. Defaults to `<channel>-<YYYYmmddHHMMSS>`.
    pub show_name: Option<String>,
    pub muxer_binary: PathBuf,
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    pub retries: u32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            player_binary: PathBuf::from("mpv"),
            player_args: Vec::new(),
            fifo_dir: std::env::temp_dir(),
            record_dir: PathBuf::from("."),
            show_name: None,
            muxer_binary: PathBuf::from("ffmpeg"),
            poll_interval: Duration::from_millis(100),
            retries: DEFAULT_RETRIES,
        }
    }
}

/// Parameters of one playback or recording, already validated by the caller.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Used as window title and as part of the recording name.
    pub channel: Option<String>,
    pub audio_language: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    /// Resolved against `start_time` (or the live edge) when `stop_time` is not set.
    pub duration: Option<chrono::TimeDelta>,
    /// Upper bound for the video variant bandwidth in bits per second.
    pub max_bitrate: Option<u64>,
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
