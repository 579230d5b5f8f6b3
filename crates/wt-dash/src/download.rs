use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    config::DEFAULT_RETRIES,
    dash::{
        manifest::{AdaptationSet, ContentType, ManifestModel, Variant},
        template::{build_init_url, build_segment_url},
    },
    error::{WtError, WtResult},
    fetch::SegmentFetcher,
    sink::{is_closed_error, Sink},
    util::http::HttpClient,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Idle,
    Initializing,
    Streaming,
    Stopped(StopReason),
    Failed,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped(_) | Self::Failed)
    }
}

/// Why a download ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shared cancellation token was triggered.
    Cancelled,
    /// The cursor reached the stop timestamp.
    EndOfWindow,
    /// A segment older than the live edge is gone from the server cache.
    ExpiredSegment,
    /// The consumer closed its end of the sink.
    SinkClosed,
}

/// Downloads one adaptation set: the initialization segment once, then media
/// segments in timestamp order until cancelled or the stop timestamp is reached.
#[derive(Clone)]
pub struct StreamDownloader<F = HttpClient> {
    fetcher: F,
    base_url: Url,
    adaptation: Arc<AdaptationSet>,
    selected: Variant,

    cursor: u64,
    stop: Option<u64>,

    retries: u32,
    retries_left: u32,
    state: DownloadState,
}

impl StreamDownloader<HttpClient> {
    pub fn from_manifest(
        client: HttpClient,
        manifest: &ManifestModel,
        adaptation: &Arc<AdaptationSet>,
    ) -> WtResult<Self> {
        Self::new(client, manifest.base_url.clone(), adaptation.clone())
    }
}

impl<F> StreamDownloader<F>
where
    F: SegmentFetcher,
{
    pub fn new(fetcher: F, base_url: Url, adaptation: Arc<AdaptationSet>) -> WtResult<Self> {
        let selected = adaptation.lowest_variant().cloned().ok_or_else(|| {
            WtError::InvalidManifest(format!("AdaptationSet {} has no variant", adaptation.id))
        })?;
        let cursor = adaptation.segment_timeline.start;

        Ok(Self {
            fetcher,
            base_url,
            adaptation,
            selected,
            cursor,
            stop: None,
            retries: DEFAULT_RETRIES,
            retries_left: DEFAULT_RETRIES,
            state: DownloadState::Idle,
        })
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self.retries_left = self.retries;
        self
    }

    pub fn id(&self) -> &str {
        &self.adaptation.id
    }

    pub fn content_type(&self) -> ContentType {
        self.adaptation.content_type
    }

    pub fn language(&self) -> Option<&str> {
        self.adaptation.language.as_deref()
    }

    pub fn adaptation(&self) -> &Arc<AdaptationSet> {
        &self.adaptation
    }

    pub fn variants(&self) -> impl Iterator<Item = &Variant> {
        self.adaptation.variants.values()
    }

    pub fn selected_variant(&self) -> &Variant {
        &self.selected
    }

    pub fn select_variant(&mut self, id: u64) -> WtResult<&Variant> {
        let variant = self
            .adaptation
            .variant(id)
            .ok_or(WtError::NoVariantFound(id))?;
        self.selected = variant.clone();
        Ok(&self.selected)
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn stop_timestamp(&self) -> Option<u64> {
        self.stop
    }

    /// Start of the newest segment announced by the manifest.
    pub fn live_edge(&self) -> u64 {
        self.adaptation.segment_timeline.start
    }

    pub fn timescale(&self) -> u64 {
        self.adaptation.segment_template.timescale
    }

    pub fn segment_duration(&self) -> u64 {
        self.adaptation.segment_timeline.duration
    }

    /// Cursor position in seconds.
    pub fn cursor_seconds(&self) -> f64 {
        self.cursor as f64 / self.timescale() as f64
    }

    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    /// Rounds `t` down to a segment boundary of the timeline.
    fn quantize(&self, t: u64) -> Option<u64> {
        let start = self.live_edge();
        let duration = self.segment_duration();
        if t >= start {
            Some(start + (t - start) / duration * duration)
        } else {
            let steps = (start - t).div_ceil(duration);
            start.checked_sub(steps.checked_mul(duration)?)
        }
    }

    /// Moves the cursor to the segment containing `t` (ticks).
    pub fn set_start_time(&mut self, t: u64) -> WtResult<u64> {
        let start = self
            .quantize(t)
            .ok_or_else(|| WtError::range(format!("start time {t} precedes the timeline")))?;
        if start > self.live_edge() {
            return Err(WtError::range("cannot watch content from the future"));
        }
        if self.stop.is_some_and(|stop| stop <= start) {
            return Err(WtError::range("start time must be before the stop time"));
        }

        tracing::debug!(stream = self.id(), start, "Start time set");
        self.cursor = start;
        Ok(start)
    }

    /// Ends the download at the segment boundary at or before `t` (ticks).
    pub fn set_stop_time(&mut self, t: u64) -> WtResult<u64> {
        let stop = self
            .quantize(t)
            .ok_or_else(|| WtError::range(format!("stop time {t} precedes the timeline")))?;
        if stop <= self.cursor {
            return Err(WtError::range("stop time must be after the start time"));
        }

        tracing::debug!(stream = self.id(), stop, "Stop time set");
        self.stop = Some(stop);
        Ok(stop)
    }

    /// Converts a wall-clock time into ticks of this stream.
    pub fn ticks_at(&self, time: DateTime<Utc>) -> WtResult<u64> {
        let ticks = i128::from(time.timestamp_millis()) * i128::from(self.timescale()) / 1000;
        u64::try_from(ticks).map_err(|_| WtError::range(format!("{time} is out of range")))
    }

    pub fn set_start_at(&mut self, time: DateTime<Utc>) -> WtResult<u64> {
        let ticks = self.ticks_at(time)?;
        self.set_start_time(ticks)
    }

    pub fn set_stop_at(&mut self, time: DateTime<Utc>) -> WtResult<u64> {
        let ticks = self.ticks_at(time)?;
        self.set_stop_time(ticks)
    }

    /// Stops after `duration` from the current cursor.
    pub fn set_stop_after(&mut self, duration: TimeDelta) -> WtResult<u64> {
        let ticks = i128::from(duration.num_milliseconds()) * i128::from(self.timescale()) / 1000;
        let stop = i128::from(self.cursor) + ticks;
        let stop = u64::try_from(stop)
            .map_err(|_| WtError::range(format!("duration {duration} is out of range")))?;
        self.set_stop_time(stop)
    }

    /// Opens `sink` and downloads into it.
    pub async fn run(&mut self, sink: &Sink, cancel: &CancellationToken) -> WtResult<StopReason> {
        let writer = match sink.open_writer(cancel).await {
            Ok(Some(writer)) => writer,
            Ok(None) => {
                tracing::info!(stream = self.id(), "Cancelled before {} was opened", sink.path().display());
                self.state = DownloadState::Stopped(StopReason::Cancelled);
                return Ok(StopReason::Cancelled);
            }
            Err(e) => {
                tracing::error!(stream = self.id(), "Failed to open {}: {e}", sink.path().display());
                self.state = DownloadState::Failed;
                return Err(e);
            }
        };
        self.download(writer, cancel).await
    }

    /// Downloads into `writer`, closing it exactly once when the download ends.
    pub async fn download<W>(&mut self, mut writer: W, cancel: &CancellationToken) -> WtResult<StopReason>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut result = self.download_inner(&mut writer, cancel).await;

        if let Err(e) = writer.shutdown().await {
            if result.is_ok() && !is_closed_error(&e) {
                result = Err(e.into());
            }
        }
        drop(writer);

        match &result {
            Ok(reason) => {
                tracing::info!(stream = self.id(), cursor = self.cursor, ?reason, "Download stopped");
                self.state = DownloadState::Stopped(*reason);
            }
            Err(e) => {
                tracing::error!(stream = self.id(), cursor = self.cursor, "Download failed: {e}");
                self.state = DownloadState::Failed;
            }
        }
        result
    }

    async fn download_inner<W>(&mut self, writer: &mut W, cancel: &CancellationToken) -> WtResult<StopReason>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.state = DownloadState::Initializing;
        let template = &self.adaptation.segment_template;
        let init_url = build_init_url(&self.base_url, &template.initialization, self.selected.bandwidth)?;

        let mut attempts = self.retries;
        let init = loop {
            if cancel.is_cancelled() {
                return Ok(StopReason::Cancelled);
            }
            match self.fetcher.fetch(&init_url).await {
                Ok(bytes) => break bytes,
                Err(e) => {
                    attempts -= 1;
                    tracing::warn!(stream = self.id(), attempts, "Failed to fetch initialization segment: {e}");
                    if attempts == 0 {
                        return Err(self.failed(format!("initialization segment {init_url}: {e}")));
                    }
                }
            }
        };
        if let Some(reason) = self.write_segment(writer, &init, cancel).await? {
            return Ok(reason);
        }
        tracing::debug!(stream = self.id(), bandwidth = self.selected.bandwidth, "Initialization segment written");

        self.state = DownloadState::Streaming;
        self.retries_left = self.retries;
        let duration = self.segment_duration();
        let backoff = Duration::from_secs_f64(duration as f64 / self.timescale() as f64);

        loop {
            if cancel.is_cancelled() {
                return Ok(StopReason::Cancelled);
            }
            if self.stop.is_some_and(|stop| self.cursor >= stop) {
                return Ok(StopReason::EndOfWindow);
            }

            let timestamp = self.cursor;
            let url = build_segment_url(
                &self.base_url,
                &self.adaptation.segment_template.media,
                self.selected.bandwidth,
                timestamp,
            )?;

            match self.fetcher.fetch(&url).await {
                Ok(bytes) => {
                    if let Some(reason) = self.write_segment(writer, &bytes, cancel).await? {
                        return Ok(reason);
                    }
                    self.cursor += duration;
                    self.retries_left = self.retries;
                    tracing::debug!(stream = self.id(), timestamp, size = bytes.len(), "Segment appended");
                }
                // 404 on a segment from the past means the server cache expired
                Err(e) if e.is_not_found() && timestamp < self.live_edge() => {
                    tracing::warn!(stream = self.id(), timestamp, "Segment not available. Maybe too old?");
                    return Ok(StopReason::ExpiredSegment);
                }
                Err(e) => {
                    tracing::warn!(
                        stream = self.id(),
                        timestamp,
                        retries_left = self.retries_left - 1,
                        "Failed to fetch segment, retry later. {e}"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => return Ok(StopReason::Cancelled),
                    }
                    self.retries_left -= 1;
                    if self.retries_left == 0 {
                        return Err(self.failed(format!("segment {timestamp}: {e}")));
                    }
                }
            }
        }
    }

    /// Appends `data` to the sink. A vanished consumer cancels the whole session.
    async fn write_segment<W>(
        &self,
        writer: &mut W,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> WtResult<Option<StopReason>>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let result = match writer.write_all(data).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(None),
            Err(e) if is_closed_error(&e) => {
                tracing::info!(stream = self.id(), "Consumer closed the sink");
                cancel.cancel();
                Ok(Some(StopReason::SinkClosed))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn failed(&self, reason: String) -> WtError {
        WtError::DownloadFailed {
            stream: format!("{}-{}", self.content_type(), self.id()),
            reason,
        }
    }

    /// Runs [`Self::run`] on its own task. The downloader is handed back on completion.
    pub fn start(self, sink: Sink, cancel: CancellationToken) -> DownloadHandle<F> {
        let handle = tokio::spawn(async move {
            let mut downloader = self;
            let result = downloader.run(&sink, &cancel).await;
            (downloader, result)
        });
        DownloadHandle { handle }
    }
}

pub struct DownloadHandle<F = HttpClient> {
    handle: JoinHandle<(StreamDownloader<F>, WtResult<StopReason>)>,
}

impl<F> DownloadHandle<F> {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the download to reach a terminal state.
    pub async fn wait(self) -> WtResult<(StreamDownloader<F>, WtResult<StopReason>)> {
        Ok(self.handle.await?)
    }
}
