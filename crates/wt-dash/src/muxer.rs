use std::{
    future::Future,
    path::{Path, PathBuf},
    process::Stdio,
};

use tokio::process::Command;

use crate::error::{WtError, WtResult};

/// Merges a recorded video file and audio file into one container.
pub trait Muxer: Send + Sync + 'static {
    /// Checks that the muxer can run, before anything is recorded.
    fn ensure_available(&self) -> WtResult<()> {
        Ok(())
    }

    /// `audio_offset` is the start of the audio relative to the video in seconds.
    fn mux(
        &self,
        video: &Path,
        audio: &Path,
        audio_offset: f64,
        output: &Path,
    ) -> impl Future<Output = WtResult<()>> + Send;
}

/// Remuxes with the ffmpeg CLI, copying both streams.
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    binary: PathBuf,
}

impl FfmpegMuxer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn locate(&self) -> WtResult<PathBuf> {
        which::which(&self.binary)
            .map_err(|e| WtError::MissingExecutable(self.binary.display().to_string(), e))
    }
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Muxer for FfmpegMuxer {
    fn ensure_available(&self) -> WtResult<()> {
        self.locate().map(drop)
    }

    async fn mux(&self, video: &Path, audio: &Path, audio_offset: f64, output: &Path) -> WtResult<()> {
        let ffmpeg = self.locate()?;
        tracing::info!(
            video = %video.display(),
            audio = %audio.display(),
            audio_offset,
            "Merging with ffmpeg into {}",
            output.display()
        );

        let status = Command::new(&ffmpeg)
            .args(["-hide_banner", "-loglevel", "warning", "-n"])
            .arg("-i")
            .arg(video)
            .arg("-itsoffset")
            .arg(audio_offset.to_string())
            .arg("-i")
            .arg(audio)
            .args(["-c", "copy", "-map", "0:v:0", "-map", "1:a:0"])
            .arg(output)
            .stdin(Stdio::null())
            .status()
            .await?;

        if !status.success() {
            return Err(WtError::ProcessFailed {
                program: ffmpeg.display().to_string(),
                status,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_ffmpeg() {
        let muxer = FfmpegMuxer::new("wt-dash-no-such-muxer");
        assert!(matches!(
            muxer.ensure_available(),
            Err(WtError::MissingExecutable(name, _)) if name == "wt-dash-no-such-muxer"
        ));
    }

    #[test]
    fn test_ffmpeg_available() {
        // Only meaningful where ffmpeg is installed
        match which::which("ffmpeg") {
            Ok(_) => assert!(FfmpegMuxer::default().ensure_available().is_ok()),
            Err(_) => println!("ffmpeg not available in PATH, skipping test"),
        }
    }
}
