use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};

use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use tokio::{process::Command, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    config::{PlayerConfig, SessionOptions},
    dash::manifest::{fetch_manifest, AdaptationSet, ContentType, ManifestModel, Variant},
    download::{DownloadHandle, StopReason, StreamDownloader},
    error::{WtError, WtResult},
    muxer::{FfmpegMuxer, Muxer},
    provider::StreamUrlProvider,
    sink::{create_fifo, Sink},
    util::http::HttpClient,
};

/// How a playback or recording ended.
#[derive(Debug)]
pub struct SessionOutcome {
    pub audio: WtResult<StopReason>,
    pub video: WtResult<StopReason>,
    /// Exit of the player. `None` for recordings.
    pub player: Option<WtResult<()>>,
    /// Path of the merged recording. `None` when playing or when merging was skipped.
    pub muxer: Option<WtResult<PathBuf>>,
}

impl SessionOutcome {
    pub fn is_clean(&self) -> bool {
        self.audio.is_ok()
            && self.video.is_ok()
            && !matches!(self.player, Some(Err(_)))
            && !matches!(self.muxer, Some(Err(_)))
    }

    /// The first failure, in the order video, audio, player, muxer.
    pub fn into_result(self) -> WtResult<()> {
        self.video?;
        self.audio?;
        if let Some(player) = self.player {
            player?;
        }
        if let Some(muxer) = self.muxer {
            muxer?;
        }
        Ok(())
    }
}

struct Streams {
    audio: StreamDownloader,
    video: StreamDownloader,
}

type Worker = JoinHandle<(Option<Streams>, SessionOutcome)>;

/// Plays or records the audio and video of one live stream.
///
/// Both streams download concurrently and share a single cancellation token.
/// Playing feeds two named pipes read by an external player, recording writes
/// two files that are merged by a [`Muxer`] afterwards.
pub struct PlaybackSession<M = FfmpegMuxer> {
    client: HttpClient,
    config: PlayerConfig,
    muxer: Arc<M>,
    instance: String,

    manifest: Option<ManifestModel>,
    options: SessionOptions,
    streams: Option<Streams>,
    cancel: CancellationToken,
    worker: Option<Worker>,
}

impl PlaybackSession<FfmpegMuxer> {
    pub fn new(client: HttpClient, config: PlayerConfig) -> Self {
        let muxer = FfmpegMuxer::new(config.muxer_binary.clone());
        Self::with_muxer(client, config, muxer)
    }
}

impl<M> PlaybackSession<M>
where
    M: Muxer,
{
    pub fn with_muxer(client: HttpClient, config: PlayerConfig, muxer: M) -> Self {
        let instance = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();

        Self {
            client,
            config,
            muxer: Arc::new(muxer),
            instance,
            manifest: None,
            options: SessionOptions::default(),
            streams: None,
            cancel: CancellationToken::new(),
            worker: None,
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn manifest(&self) -> Option<&ManifestModel> {
        self.manifest.as_ref()
    }

    pub fn audio(&self) -> Option<&StreamDownloader> {
        self.streams.as_ref().map(|s| &s.audio)
    }

    pub fn video(&self) -> Option<&StreamDownloader> {
        self.streams.as_ref().map(|s| &s.video)
    }

    /// Token shared by both downloads. Cancelling it stops the session.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    fn ensure_idle(&self) -> WtResult<()> {
        if self.is_active() {
            return Err(WtError::SessionActive);
        }
        Ok(())
    }

    fn streams_mut(&mut self) -> WtResult<&mut Streams> {
        self.ensure_idle()?;
        self.streams.as_mut().ok_or(WtError::NotConfigured)
    }

    /// Fetches the manifest and prepares both streams.
    pub async fn configure(&mut self, manifest_url: &Url, options: SessionOptions) -> WtResult<()> {
        self.ensure_idle()?;
        let manifest = fetch_manifest(&self.client, manifest_url).await?;
        self.configure_manifest(manifest, options)
    }

    /// Asks `provider` for the stream of `channel` and configures it.
    pub async fn configure_channel<P>(
        &mut self,
        provider: &P,
        channel: &str,
        mut options: SessionOptions,
    ) -> WtResult<()>
    where
        P: StreamUrlProvider,
    {
        self.ensure_idle()?;
        let url = provider.stream_url(channel).await?;
        options.channel.get_or_insert_with(|| channel.to_string());
        self.configure(&url, options).await
    }

    /// Prepares both streams from an already parsed manifest.
    pub fn configure_manifest(&mut self, manifest: ManifestModel, options: SessionOptions) -> WtResult<()> {
        self.ensure_idle()?;

        let video_set = manifest.video().ok_or(WtError::NoAdaptationSetFound)?;
        let mut video = self.downloader(&manifest, video_set)?;
        if let Some(max_bitrate) = options.max_bitrate {
            let id = video_set
                .variant_within_bitrate(max_bitrate)
                .map(|v| v.id)
                .ok_or(WtError::NoAdaptationSetFound)?;
            let variant = video.select_variant(id)?;
            tracing::info!(
                id = variant.id,
                bandwidth = variant.bandwidth,
                "Selected video variant within {max_bitrate} bps"
            );
        }
        apply_window(&mut video, &options)?;

        let audio = self.audio_downloader(&manifest, &options)?;

        self.manifest = Some(manifest);
        self.options = options;
        self.streams = Some(Streams { audio, video });
        self.cancel = CancellationToken::new();
        Ok(())
    }

    fn downloader(&self, manifest: &ManifestModel, set: &Arc<AdaptationSet>) -> WtResult<StreamDownloader> {
        Ok(StreamDownloader::from_manifest(self.client.clone(), manifest, set)?
            .with_retries(self.config.retries))
    }

    fn audio_downloader(&self, manifest: &ManifestModel, options: &SessionOptions) -> WtResult<StreamDownloader> {
        let language = options.audio_language.as_deref();
        let set = manifest.audio(language).ok_or(WtError::NoAdaptationSetFound)?;
        tracing::info!(id = %set.id, language = ?set.language, "Selected audio track");

        let mut audio = self.downloader(manifest, set)?;
        apply_window(&mut audio, options)?;
        Ok(audio)
    }

    /// Languages of the audio tracks, in manifest order.
    pub fn audio_languages(&self) -> Vec<&str> {
        self.manifest
            .as_ref()
            .map(|m| m.list_languages(ContentType::Audio))
            .unwrap_or_default()
    }

    pub fn video_variants(&self) -> Vec<&Variant> {
        self.video().map(|v| v.variants().collect()).unwrap_or_default()
    }

    pub fn set_video_variant(&mut self, id: u64) -> WtResult<()> {
        let variant = self.streams_mut()?.video.select_variant(id)?;
        tracing::info!(id, bandwidth = variant.bandwidth, "Selected video variant");
        Ok(())
    }

    /// Switches to another audio track. The playback window is kept.
    pub fn set_audio_language(&mut self, language: &str) -> WtResult<()> {
        self.streams_mut()?;
        let manifest = self.manifest.as_ref().ok_or(WtError::NotConfigured)?;

        let mut options = self.options.clone();
        options.audio_language = Some(language.to_string());
        let audio = self.audio_downloader(manifest, &options)?;

        if let Some(streams) = self.streams.as_mut() {
            streams.audio = audio;
        }
        self.options = options;
        Ok(())
    }

    /// Moves both streams to the segment containing `time`.
    pub fn set_start_time(&mut self, time: chrono::DateTime<Utc>) -> WtResult<()> {
        let streams = self.streams_mut()?;
        let mut video = streams.video.clone();
        let mut audio = streams.audio.clone();
        video.set_start_at(time)?;
        audio.set_start_at(time)?;
        streams.video = video;
        streams.audio = audio;
        self.options.start_time = Some(time);
        Ok(())
    }

    fn take_streams(&mut self) -> WtResult<Streams> {
        self.ensure_idle()?;
        let streams = self.streams.take().ok_or(WtError::NotConfigured)?;
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        Ok(streams)
    }

    fn title(&self) -> &str {
        self.options.channel.as_deref().unwrap_or("watchteleboy")
    }

    fn fifo_path(&self, downloader: &StreamDownloader) -> PathBuf {
        self.config.fifo_dir.join(format!(
            "wt-{}-{}-{}.fifo",
            self.instance,
            downloader.content_type(),
            downloader.id()
        ))
    }

    /// Starts playback in the configured player.
    ///
    /// Returns once everything is started. The session ends when the player
    /// exits or the cancellation token fires, see [`Self::wait`].
    pub fn play(&mut self) -> WtResult<()> {
        self.ensure_idle()?;
        let (audio_path, video_path) = match (self.audio(), self.video()) {
            (Some(audio), Some(video)) => (self.fifo_path(audio), self.fifo_path(video)),
            _ => return Err(WtError::NotConfigured),
        };

        let player = which::which(&self.config.player_binary).map_err(|e| {
            WtError::MissingExecutable(self.config.player_binary.display().to_string(), e)
        })?;
        create_fifo(&audio_path)?;
        if let Err(e) = create_fifo(&video_path) {
            _ = std::fs::remove_file(&audio_path);
            return Err(e);
        }

        let mut command = Command::new(&player);
        command
            .args(&self.config.player_args)
            .arg(format!("--title={}", self.title()))
            .arg(format!("--audio-file={}", audio_path.display()))
            .arg(&video_path)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let Streams { audio, video } = self.take_streams()?;
        let cancel = self.cancel.clone();
        let audio = audio.start(Sink::pipe(&audio_path), cancel.clone());
        let video = video.start(Sink::pipe(&video_path), cancel.clone());
        let poll_interval = self.config.poll_interval;

        self.worker = Some(tokio::spawn(async move {
            let player = run_player(command, &cancel, poll_interval).await;
            // Downloads end with the player
            cancel.cancel();

            let (streams, mut outcome) = join_downloads(audio, video).await;
            for path in [&audio_path, &video_path] {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    tracing::warn!("Failed to remove {}: {e}", path.display());
                }
            }
            outcome.player = Some(player);
            (streams, outcome)
        }));
        Ok(())
    }

    /// Starts recording into `<record_dir>/<show>.mkv`.
    ///
    /// Requires a stop time. Both streams are merged once they reach it.
    pub async fn record(&mut self) -> WtResult<()> {
        self.ensure_idle()?;
        let (audio, video) = match (self.audio(), self.video()) {
            (Some(audio), Some(video)) => (audio, video),
            _ => return Err(WtError::NotConfigured),
        };
        if audio.stop_timestamp().is_none() || video.stop_timestamp().is_none() {
            return Err(WtError::range("recording requires a stop time"));
        }
        self.muxer.ensure_available()?;

        let show = self.config.show_name.clone().unwrap_or_else(|| {
            format!("{}-{}", self.title(), Utc::now().format("%Y%m%d%H%M%S"))
        });
        let dir = self.config.record_dir.clone();
        tokio::fs::create_dir_all(&dir).await?;
        let audio_path = dir.join(format!("{show}.m4a"));
        let video_path = dir.join(format!("{show}.mp4"));
        let output = dir.join(format!("{show}.mkv"));

        // Both cursors point at the first segment to download
        let audio_offset = audio.cursor_seconds() - video.cursor_seconds();
        tracing::info!(show = %show, audio_offset, "Recording into {}", dir.display());

        let Streams { audio, video } = self.take_streams()?;
        let cancel = self.cancel.clone();
        let audio = audio.start(Sink::file(&audio_path), cancel.clone());
        let video = video.start(Sink::file(&video_path), cancel);
        let muxer = self.muxer.clone();

        self.worker = Some(tokio::spawn(async move {
            let (streams, mut outcome) = join_downloads(audio, video).await;
            if outcome.audio.is_ok() && outcome.video.is_ok() {
                let merged = merge(&*muxer, &video_path, &audio_path, audio_offset, &output).await;
                outcome.muxer = Some(merged.map(|()| output));
            } else {
                tracing::warn!(
                    "Recording incomplete, merging skipped. Downloaded files are kept at {} and {}",
                    video_path.display(),
                    audio_path.display()
                );
            }
            (streams, outcome)
        }));
        Ok(())
    }

    /// Waits until the running playback or recording ends.
    ///
    /// Returns `None` when nothing was running.
    pub async fn wait(&mut self) -> WtResult<Option<SessionOutcome>> {
        let Some(worker) = self.worker.take() else {
            return Ok(None);
        };
        let (streams, outcome) = match worker.await {
            Ok(finished) => finished,
            Err(e) => {
                self.manifest = None;
                return Err(e.into());
            }
        };

        if streams.is_none() {
            self.manifest = None;
        }
        self.streams = streams;
        tracing::info!(clean = outcome.is_clean(), "Session finished");
        Ok(Some(outcome))
    }

    /// Cancels the session and waits for it to wind down. Calling it again is harmless.
    pub async fn stop(&mut self) -> WtResult<Option<SessionOutcome>> {
        self.cancel.cancel();
        self.wait().await
    }
}

impl<M> Drop for PlaybackSession<M> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.cancel.cancel();
        }
    }
}

fn apply_window(downloader: &mut StreamDownloader, options: &SessionOptions) -> WtResult<()> {
    if let Some(start) = options.start_time {
        downloader.set_start_at(start)?;
    }

    match (options.stop_time, options.duration, options.start_time) {
        (Some(stop), _, _) => {
            downloader.set_stop_at(stop)?;
        }
        (None, Some(duration), Some(start)) => {
            let stop = start
                .checked_add_signed(duration)
                .ok_or_else(|| WtError::range(format!("{start} + {duration} is out of range")))?;
            downloader.set_stop_at(stop)?;
        }
        (None, Some(duration), None) => {
            downloader.set_stop_after(duration)?;
        }
        (None, None, _) => {}
    }
    Ok(())
}

async fn run_player(
    mut command: Command,
    cancel: &CancellationToken,
    poll_interval: std::time::Duration,
) -> WtResult<()> {
    let program = command.as_std().get_program().to_string_lossy().to_string();
    let mut child = command.spawn()?;
    tracing::info!(pid = child.id(), "Player started");

    let mut interval = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stopping player");
                child.kill().await?;
                return Ok(());
            }
            _ = interval.tick() => {
                if let Some(status) = child.try_wait()? {
                    tracing::info!(%status, "Player exited");
                    if !status.success() {
                        return Err(WtError::ProcessFailed { program, status });
                    }
                    return Ok(());
                }
            }
        }
    }
}

async fn join_downloads(audio: DownloadHandle, video: DownloadHandle) -> (Option<Streams>, SessionOutcome) {
    let (audio, video) = tokio::join!(audio.wait(), video.wait());

    let mut outcome = SessionOutcome {
        audio: Ok(StopReason::Cancelled),
        video: Ok(StopReason::Cancelled),
        player: None,
        muxer: None,
    };
    let mut streams = (None, None);
    match audio {
        Ok((downloader, result)) => {
            streams.0 = Some(downloader);
            outcome.audio = result;
        }
        Err(e) => outcome.audio = Err(e),
    }
    match video {
        Ok((downloader, result)) => {
            streams.1 = Some(downloader);
            outcome.video = result;
        }
        Err(e) => outcome.video = Err(e),
    }

    let streams = match streams {
        (Some(audio), Some(video)) => Some(Streams { audio, video }),
        _ => None,
    };
    (streams, outcome)
}

async fn merge<M: Muxer>(
    muxer: &M,
    video: &Path,
    audio: &Path,
    audio_offset: f64,
    output: &Path,
) -> WtResult<()> {
    muxer.mux(video, audio, audio_offset, output).await?;
    tracing::info!("Recording saved to {}", output.display());

    for path in [video, audio] {
        tokio::fs::remove_file(path).await?;
    }
    Ok(())
}
