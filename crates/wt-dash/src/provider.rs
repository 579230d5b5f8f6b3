use std::{collections::HashMap, future::Future};

use url::Url;

use crate::error::{WtError, WtResult};

/// Resolves a channel to the manifest URL of its live stream.
///
/// Implemented by the layer that authenticates against the streaming service.
pub trait StreamUrlProvider: Send + Sync {
    fn stream_url(&self, channel: &str) -> impl Future<Output = WtResult<Url>> + Send;
}

/// Fixed manifest URLs, for streams that need no authentication.
#[derive(Debug, Clone, Default)]
pub struct StaticStreamUrl {
    channels: HashMap<String, Url>,
    fallback: Option<Url>,
}

impl StaticStreamUrl {
    /// Serves `url` for every channel.
    pub fn new(url: Url) -> Self {
        Self {
            channels: HashMap::new(),
            fallback: Some(url),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>, url: Url) -> Self {
        self.channels.insert(channel.into(), url);
        self
    }
}

impl StreamUrlProvider for StaticStreamUrl {
    async fn stream_url(&self, channel: &str) -> WtResult<Url> {
        self.channels
            .get(channel)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| WtError::UnknownChannel(channel.to_string()))
    }
}
