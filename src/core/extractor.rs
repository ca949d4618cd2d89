use crate::core::error::Cancelled;
use crate::core::fetcher::{FetchRequest, FetchResponse, Fetcher};
use crate::core::result::{ExtractionResult, SoftFailure};
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use url::Url;

#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> Option<String> {
        None
    }

    /// URLs this extractor is expected to handle, used by self-tests.
    fn test_cases(&self) -> Vec<TestCase> {
        Vec::new()
    }

    async fn extract(&self, target: &Target, ctx: &ExtractContext) -> Result<ExtractionResult>;
}

/// What an extractor is asked to extract: a page URL, or a bare id handed
/// over together with an explicit extractor name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Url(Url),
    Id(String),
}

impl Target {
    /// Anything that parses as an absolute URL is a URL; the rest is an id.
    pub fn parse(raw: &str) -> Self {
        match Url::parse(raw) {
            Ok(url) => Target::Url(url),
            Err(_) => Target::Id(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Target::Url(url) => url.as_str(),
            Target::Id(id) => id,
        }
    }

    pub fn url(&self) -> Option<&Url> {
        match self {
            Target::Url(url) => Some(url),
            Target::Id(_) => None,
        }
    }

    /// For extractors that cannot work from a bare id.
    pub fn require_url(&self) -> Result<&Url> {
        self.url()
            .with_context(|| format!("expected a URL, got the id {:?}", self.as_str()))
    }
}

impl From<Url> for Target {
    fn from(url: Url) -> Self {
        Target::Url(url)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub url: String,
    pub id: Option<String>,
    pub title: Option<String>,
    /// Only check that the URL is matched, never extract it.
    #[serde(default)]
    pub only_matching: bool,
}

impl TestCase {
    pub fn matching(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            id: None,
            title: None,
            only_matching: true,
        }
    }
}

pub(crate) type SoftFailureSink = Arc<Mutex<Vec<SoftFailure>>>;

/// Per-call handle an extractor uses to reach the network and report
/// non-fatal problems.
pub struct ExtractContext {
    extractor: String,
    fetcher: Arc<dyn Fetcher>,
    cancel: CancellationToken,
    soft_failures: SoftFailureSink,
    concurrency_limit: usize,
}

impl ExtractContext {
    pub fn new(extractor: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            extractor: extractor.into(),
            fetcher,
            cancel: CancellationToken::new(),
            soft_failures: Arc::default(),
            concurrency_limit: 1,
        }
    }

    pub(crate) fn for_request(
        extractor: impl Into<String>,
        fetcher: Arc<dyn Fetcher>,
        cancel: CancellationToken,
        soft_failures: SoftFailureSink,
    ) -> Self {
        Self {
            extractor: extractor.into(),
            fetcher,
            cancel,
            soft_failures,
            concurrency_limit: 1,
        }
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    pub fn extractor(&self) -> &str {
        &self.extractor
    }

    /// How many independent fetches an extractor may run at once.
    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn report_soft_failure(&self, source: impl Into<String>, reason: impl Into<String>) {
        let failure = SoftFailure {
            extractor: self.extractor.clone(),
            source: source.into(),
            reason: reason.into(),
        };
        warn!(
            "[{}] {}: {} (continuing)",
            failure.extractor, failure.source, failure.reason
        );
        self.soft_failures.lock().push(failure);
    }

    pub fn extend_soft_failures(&self, failures: impl IntoIterator<Item = SoftFailure>) {
        let failures: Vec<_> = failures.into_iter().collect();
        for failure in &failures {
            warn!(
                "[{}] {}: {} (continuing)",
                failure.extractor, failure.source, failure.reason
            );
        }
        self.soft_failures.lock().extend(failures);
    }

    /// Soft failures recorded so far for this request.
    pub fn soft_failures(&self) -> Vec<SoftFailure> {
        self.soft_failures.lock().clone()
    }

    pub async fn fetch(&self, request: &FetchRequest) -> Result<Option<FetchResponse>> {
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Cancelled.into()),
            outcome = self.fetcher.fetch(request) => outcome,
        };

        match outcome {
            Ok(response) => Ok(Some(response)),
            Err(e) if request.fatal => Err(e.context(request.label())),
            Err(e) => {
                self.report_soft_failure(request.label(), format!("{:#}", e));
                Ok(None)
            }
        }
    }

    pub async fn download_webpage(&self, request: &FetchRequest) -> Result<Option<String>> {
        Ok(self.fetch(request).await?.map(|response| response.body))
    }

    pub async fn download_json<T: DeserializeOwned>(
        &self,
        request: &FetchRequest,
    ) -> Result<Option<T>> {
        let Some(body) = self.download_webpage(request).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&body) {
            Ok(value) => Ok(Some(value)),
            Err(e) if request.fatal => {
                Err(e).with_context(|| format!("{}: failed to parse JSON", request.label()))
            }
            Err(e) => {
                self.report_soft_failure(request.label(), format!("failed to parse JSON: {}", e));
                Ok(None)
            }
        }
    }
}
