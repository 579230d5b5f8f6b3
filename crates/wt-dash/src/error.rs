use thiserror::Error;

#[derive(Error, Debug)]
pub enum WtError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    // MPEG-DASH errors
    #[error(transparent)]
    MpdParse(#[from] dash_mpd::DashMpdError),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("No matching adaptation set found")]
    NoAdaptationSetFound,

    #[error("No variant with id {0}")]
    NoVariantFound(u64),

    #[error("Time out of range: {0}")]
    Range(String),

    #[error("Download of stream {stream} failed: {reason}")]
    DownloadFailed { stream: String, reason: String },

    #[error("{0} was not found, please install it or configure its path")]
    MissingExecutable(String, #[source] which::Error),

    #[error("{program} exited with {status}")]
    ProcessFailed {
        program: String,
        status: std::process::ExitStatus,
    },

    #[error("No stream known for channel {0}")]
    UnknownChannel(String),

    #[error("Session is not configured")]
    NotConfigured,

    #[error("Session is already playing or recording")]
    SessionActive,

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    JoinError(#[from] tokio::task::JoinError),
}

impl WtError {
    pub(crate) fn invalid_manifest(message: impl Into<String>) -> Self {
        Self::InvalidManifest(message.into())
    }

    pub(crate) fn range(message: impl Into<String>) -> Self {
        Self::Range(message.into())
    }

    /// Whether the error is a `404 Not Found` response.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::HttpError(status) if *status == reqwest::StatusCode::NOT_FOUND)
    }
}

pub type WtResult<T> = Result<T, WtError>;
