use crate::config::{Config, MAX_RETRIES};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
    /// Shown in logs and soft-failure annotations, e.g. "Downloading m3u8 manifest".
    pub note: Option<String>,
    /// When false a failure becomes a soft failure instead of an error.
    pub fatal: bool,
}

impl FetchRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
            note: None,
            fatal: true,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn fatal(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self
    }

    /// Label used when reporting this request.
    pub fn label(&self) -> String {
        self.note.clone().unwrap_or_else(|| self.url.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Final URL after redirects.
    pub url: Url,
    pub status: u16,
    pub body: String,
}

/// Transport collaborator used by extractors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}

/// `Fetcher` backed by a shared reqwest client.
pub struct HttpFetcher {
    client: reqwest::Client,
    retries: u32,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout))
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            retries: config.retries.clamp(1, MAX_RETRIES),
        })
    }

    fn is_retryable(status: reqwest::StatusCode) -> bool {
        status.as_u16() == 403 || status.as_u16() == 429 || status.is_server_error()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!("{} (attempt {})", request.label(), attempt);

            let mut builder = self.client.get(request.url.clone());
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    if attempt >= self.retries {
                        return Err(e.into());
                    }
                    warn!("Request failed (attempt {}): {}", attempt, e);
                    tokio::time::sleep(Duration::from_secs(2_u64.pow(attempt))).await;
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let url = response.url().clone();
                let body = response.text().await?;
                return Ok(FetchResponse {
                    url,
                    status: status.as_u16(),
                    body,
                });
            }

            if Self::is_retryable(status) && attempt < self.retries {
                warn!(
                    "HTTP {} (attempt {}), retrying in {} seconds...",
                    status,
                    attempt,
                    2_u64.pow(attempt)
                );
                tokio::time::sleep(Duration::from_secs(2_u64.pow(attempt))).await;
                continue;
            }

            anyhow::bail!("HTTP {} after {} attempt(s): {}", status, attempt, request.url);
        }
    }
}
