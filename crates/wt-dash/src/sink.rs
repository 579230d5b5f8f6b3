use std::{
    io,
    path::{Path, PathBuf},
    pin::Pin,
    time::Duration,
};

use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use crate::error::WtResult;

pub type SinkWriter = Pin<Box<dyn AsyncWrite + Send + Sync + 'static>>;

/// How often a pipe sink checks whether its reader has attached.
const PIPE_OPEN_INTERVAL: Duration = Duration::from_millis(100);

/// Destination of one downloaded stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sink {
    /// A regular file, truncated on open.
    File(PathBuf),
    /// An existing named pipe, read by another process.
    Pipe(PathBuf),
}

impl Sink {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn pipe(path: impl Into<PathBuf>) -> Self {
        Self::Pipe(path.into())
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::File(path) | Self::Pipe(path) => path,
        }
    }

    /// Opens the sink for writing.
    ///
    /// Returns `None` when `cancel` fires before the sink could be opened, which
    /// happens when the reader of a pipe never shows up.
    pub async fn open_writer(&self, cancel: &CancellationToken) -> WtResult<Option<SinkWriter>> {
        match self {
            Self::File(path) => {
                let file = tokio::fs::File::create(path).await?;
                Ok(Some(Box::pin(file)))
            }
            Self::Pipe(path) => open_pipe_writer(path, cancel).await,
        }
    }
}

/// Whether a write error means the consumer is gone.
pub(crate) fn is_closed_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}

#[cfg(unix)]
async fn open_pipe_writer(path: &Path, cancel: &CancellationToken) -> WtResult<Option<SinkWriter>> {
    use tokio::net::unix::pipe;

    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        // Opening the write end without a reader fails with ENXIO instead of blocking.
        match pipe::OpenOptions::new().open_sender(path) {
            Ok(sender) => return Ok(Some(Box::pin(sender))),
            Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {
                tokio::select! {
                    _ = tokio::time::sleep(PIPE_OPEN_INTERVAL) => {}
                    _ = cancel.cancelled() => return Ok(None),
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(not(unix))]
async fn open_pipe_writer(_path: &Path, _cancel: &CancellationToken) -> WtResult<Option<SinkWriter>> {
    Err(unsupported().into())
}

/// Creates a named pipe readable and writable by the current user.
#[cfg(unix)]
pub fn create_fifo(path: &Path) -> WtResult<()> {
    use std::{ffi::CString, os::unix::ffi::OsStrExt};

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call.
    let ret = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if ret != 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn create_fifo(_path: &Path) -> WtResult<()> {
    Err(unsupported().into())
}

#[cfg(not(unix))]
fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "named pipes are only supported on unix",
    )
}
