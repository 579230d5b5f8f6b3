//! Live MPEG-DASH playback and recording.
//!
//! ```text
//! ┌────────────────┐  fetch_manifest  ┌──────────────────┐
//! │    Manifest    ├──────────────────►  PlaybackSession │
//! └────────────────┘                  │                  │
//!                                     │  CancellationToken
//!        ┌────────────────────────────┤    (shared)      ├───────────────────────┐
//!        │                            └────────┬─────────┘                       │
//!        │                                     │                                 │
//! ┌──────▼───────────┐                ┌────────▼─────────┐               ┌───────▼───────┐
//! │ StreamDownloader │                │ StreamDownloader │               │  mpv / ffmpeg │
//! │     (video)      │                │     (audio)      │               │               │
//! └──────┬───────────┘                └────────┬─────────┘               └───────▲───────┘
//!        │ init, t, t + d, ...                 │ init, t, t + d, ...             │
//!        └──────────────► Sink (FIFO / file) ◄─┴─────────────────────────────────┘
//! ```

pub mod config;
pub mod dash;
pub mod download;
pub mod error;
pub mod fetch;
pub mod muxer;
pub mod provider;
pub mod session;
pub mod sink;
pub mod util;

pub use config::{ClientConfig, PlayerConfig, SessionOptions};
pub use download::{DownloadHandle, DownloadState, StopReason, StreamDownloader};
pub use error::{WtError, WtResult};
pub use fetch::SegmentFetcher;
pub use muxer::{FfmpegMuxer, Muxer};
pub use provider::{StaticStreamUrl, StreamUrlProvider};
pub use session::{PlaybackSession, SessionOutcome};
pub use sink::Sink;
pub use util::http::HttpClient;

pub use reqwest;
