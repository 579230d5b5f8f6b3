use std::future::Future;

use bytes::Bytes;
use url::Url;

use crate::{
    error::{WtError, WtResult},
    util::http::HttpClient,
};

/// Fetches the body of a segment.
///
/// Any non-success status must be reported as [`WtError::HttpError`] so the
/// downloader can tell an expired segment (`404`) apart from other failures.
pub trait SegmentFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &Url) -> impl Future<Output = WtResult<Bytes>> + Send;
}

impl SegmentFetcher for HttpClient {
    fn fetch(&self, url: &Url) -> impl Future<Output = WtResult<Bytes>> + Send {
        let request = self.get(url.clone());
        async move {
            let response = request.send().await?;
            if !response.status().is_success() {
                let status = response.status();
                if let Ok(body) = response.text().await {
                    tracing::debug!("Error body: {body}");
                }
                return Err(WtError::HttpError(status));
            }

            let bytes = response.bytes().await?;
            Ok(bytes)
        }
    }
}
