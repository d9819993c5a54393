use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use thiserror::Error;

const BROWSER_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("invalid header {0:?}")]
    Header(String),
}

/// Anything that can turn a URL into a body. Every error is a skip for the caller.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str, headers: &[(&str, &str)]) -> Result<String, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let mut defaults = HeaderMap::new();
        defaults.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
        defaults.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/json"),
        );
        defaults.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = reqwest::Client::builder()
            .default_headers(defaults)
            .timeout(timeout)
            .build()?;
        Ok(HttpFetcher { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str, headers: &[(&str, &str)]) -> Result<String, FetchError> {
        let mut req = self.client.get(url);
        for (name, value) in headers {
            let value =
                HeaderValue::from_str(value).map_err(|_| FetchError::Header(name.to_string()))?;
            req = req.header(*name, value);
        }

        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };

        let resp = req.send().await.map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.text().await.map_err(transport)
    }
}

// ── Tests ──
