use std::{ops::Deref, sync::Arc};

use reqwest::{Client, IntoUrl};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};

use crate::{config::ClientConfig, error::WtResult};

/// A reqwest client with a shared cookie store.
///
/// The session layer in front of this crate authenticates against the origin
/// and hands its cookies over with [`HttpClient::add_cookies`].
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    cookies_store: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(config: &ClientConfig) -> WtResult<Self> {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .cookie_provider(cookies_store.clone())
            .build()?;

        Ok(Self {
            client,
            cookies_store,
        })
    }

    pub fn add_cookies(&self, cookies: Vec<String>, url: impl IntoUrl) -> WtResult<()> {
        let url = url.into_url()?;
        let mut lock = match self.cookies_store.lock() {
            Ok(lock) => lock,
            Err(poisoned) => poisoned.into_inner(),
        };
        for cookie in cookies {
            _ = lock.parse(&cookie, &url);
        }
        Ok(())
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
