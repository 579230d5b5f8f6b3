use std::{
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
};

use bytes::Bytes;
use tokio::io::AsyncWrite;
use url::Url;
use wt_dash::{
    dash::{parse_manifest, ManifestModel},
    reqwest::StatusCode,
    SegmentFetcher, WtError, WtResult,
};

pub const LIVE_EDGE: u64 = 1_000_000_000_000;
pub const SEGMENT_DURATION: u64 = 4000;

pub fn fixture_manifest() -> ManifestModel {
    let base = Url::parse("https://cdn.example.com/live/ch1/").unwrap();
    parse_manifest(include_bytes!("fixtures/teleboy.mpd"), base).unwrap()
}

type Respond = dyn Fn(&str, usize) -> WtResult<Bytes> + Send + Sync;

/// Fetcher answering from a closure that receives the request path and how
/// often the same path was requested before.
#[derive(Clone)]
pub struct TestFetcher {
    respond: Arc<Respond>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl TestFetcher {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&str, usize) -> WtResult<Bytes> + Send + Sync + 'static,
    {
        Self {
            respond: Arc::new(respond),
            requests: Default::default(),
        }
    }

    /// Every segment is served, its body is the request path.
    pub fn echo() -> Self {
        Self::new(|path, _| Ok(Bytes::from(path.to_string())))
    }

    /// Media segments fail with `status` the first `times` times they are requested.
    pub fn failing_media(times: usize, status: StatusCode) -> Self {
        Self::new(move |path, seen| {
            if path.contains("/t_") && seen < times {
                Err(WtError::HttpError(status))
            } else {
                Ok(Bytes::from(path.to_string()))
            }
        })
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn media_requests(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|path| path.contains("/t_"))
            .collect()
    }
}

impl SegmentFetcher for TestFetcher {
    async fn fetch(&self, url: &Url) -> WtResult<Bytes> {
        let path = url.path().to_string();
        let seen = {
            let mut requests = self.requests.lock().unwrap();
            let seen = requests.iter().filter(|p| **p == path).count();
            requests.push(path.clone());
            seen
        };
        (self.respond)(&path, seen)
    }
}

/// In-memory sink whose consumer disconnects after `accepted_writes` writes.
pub struct ClosingWriter {
    accepted_writes: usize,
    writes: usize,
    pub data: Vec<u8>,
    shutdowns: Arc<AtomicUsize>,
}

impl ClosingWriter {
    pub fn new(accepted_writes: usize) -> (Self, Arc<AtomicUsize>) {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let writer = Self {
            accepted_writes,
            writes: 0,
            data: Vec::new(),
            shutdowns: shutdowns.clone(),
        };
        (writer, shutdowns)
    }
}

impl AsyncWrite for ClosingWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.writes += 1;
        if this.writes > this.accepted_writes {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        this.data.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}
