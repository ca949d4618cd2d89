use crate::core::error::{Cancelled, CollectError};
use crate::core::extractor::ExtractContext;
use crate::core::fetcher::FetchRequest;
use crate::core::metadata::{MediaFormat, Subtitle};
use crate::core::result::SoftFailure;
use anyhow::Result;
use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt};
use std::collections::BTreeMap;
use std::future::Future;
use tracing::debug;
use url::Url;

/// Candidates produced by one manifest or API probe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceOutput {
    pub formats: Vec<MediaFormat>,
    pub subtitles: BTreeMap<String, Vec<Subtitle>>,
}

impl SourceOutput {
    pub fn from_formats(formats: Vec<MediaFormat>) -> Self {
        Self {
            formats,
            subtitles: BTreeMap::new(),
        }
    }

    pub fn add_subtitle(&mut self, language: impl Into<String>, subtitle: Subtitle) {
        self.subtitles.entry(language.into()).or_default().push(subtitle);
    }
}

/// Turns manifest text into candidates.
pub trait ManifestParser: Send + Sync {
    fn parse(&self, manifest: &str, manifest_url: &Url) -> Result<SourceOutput>;
}

pub struct Source<'a> {
    id: String,
    fatal: bool,
    probe: BoxFuture<'a, Result<SourceOutput>>,
}

impl<'a> Source<'a> {
    pub fn new<F>(id: impl Into<String>, fatal: bool, probe: F) -> Self
    where
        F: Future<Output = Result<SourceOutput>> + Send + 'a,
    {
        Self {
            id: id.into(),
            fatal,
            probe: probe.boxed(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }
}

/// Fetch a manifest through `ctx` and parse it. The request's `fatal` flag
/// becomes the source's.
pub fn manifest_source<'a, P>(
    ctx: &'a ExtractContext,
    id: impl Into<String>,
    request: FetchRequest,
    parser: P,
) -> Source<'a>
where
    P: ManifestParser + 'a,
{
    let fatal = request.fatal;
    Source::new(id, fatal, async move {
        let request = request.fatal(true);
        let response = ctx
            .fetch(&request)
            .await?
            .ok_or_else(|| anyhow::anyhow!("{}: no response", request.label()))?;
        parser.parse(&response.body, &response.url)
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collected {
    pub formats: Vec<MediaFormat>,
    pub subtitles: BTreeMap<String, Vec<Subtitle>>,
    pub soft_failures: Vec<SoftFailure>,
}

impl Collected {
    fn absorb(&mut self, output: SourceOutput) {
        self.formats.extend(output.formats);
        for (language, subtitles) in output.subtitles {
            self.subtitles.entry(language).or_default().extend(subtitles);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty() && self.subtitles.is_empty()
    }
}

/// Runs a list of format sources and concatenates what they find, in
/// declared source order. No deduplication happens here.
pub struct FormatCollector<'a> {
    extractor: String,
    concurrency: usize,
    sources: Vec<Source<'a>>,
}

impl<'a> FormatCollector<'a> {
    pub fn new(extractor: impl Into<String>, concurrency: usize) -> Self {
        Self {
            extractor: extractor.into(),
            concurrency: concurrency.max(1),
            sources: Vec::new(),
        }
    }

    pub fn for_context(ctx: &ExtractContext) -> Self {
        Self::new(ctx.extractor(), ctx.concurrency_limit())
    }

    pub fn source(mut self, source: Source<'a>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn push(&mut self, source: Source<'a>) {
        self.sources.push(source);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// A failing fatal source aborts the collection and drops the sources
    /// still in flight; a failing non-fatal source becomes a soft failure.
    /// Cancellation always aborts.
    pub async fn collect(self) -> Result<Collected, CollectError> {
        let extractor = self.extractor;
        let probes: Vec<BoxFuture<'a, (String, bool, Result<SourceOutput>)>> = self
            .sources
            .into_iter()
            .map(|source| {
                async move {
                    let Source { id, fatal, probe } = source;
                    (id, fatal, probe.await)
                }
                .boxed()
            })
            .collect();
        let mut outcomes = stream::iter(probes).buffered(self.concurrency);

        let mut collected = Collected::default();
        while let Some((id, fatal, outcome)) = outcomes.next().await {
            match outcome {
                Ok(output) => {
                    debug!(
                        "[{}] {}: {} format(s), {} subtitle language(s)",
                        extractor,
                        id,
                        output.formats.len(),
                        output.subtitles.len()
                    );
                    collected.absorb(output);
                }
                Err(source) if fatal || source.is::<Cancelled>() => {
                    return Err(CollectError {
                        source_id: id,
                        source,
                    });
                }
                Err(e) => {
                    debug!("[{}] {} failed, continuing: {:#}", extractor, id, e);
                    collected.soft_failures.push(SoftFailure {
                        extractor: extractor.clone(),
                        source: id,
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metadata::Protocol;
    use std::time::Duration;

    fn format(id: &str) -> MediaFormat {
        MediaFormat::new(id, format!("https://cdn.example/{}.mp4", id), "mp4", Protocol::Https)
    }

    fn ok_source(id: &'static str, formats: &[&'static str], delay_ms: u64) -> Source<'static> {
        let formats: Vec<_> = formats.iter().map(|f| format(f)).collect();
        Source::new(id, true, async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(SourceOutput::from_formats(formats))
        })
    }

    fn failing_source(id: &'static str, fatal: bool) -> Source<'static> {
        Source::new(id, fatal, async move {
            Err::<SourceOutput, _>(anyhow::anyhow!("HTTP 404"))
        })
    }

    fn ids(collected: &Collected) -> Vec<&str> {
        collected.formats.iter().map(|f| f.format_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_fatal_failure_aborts_collection() {
        let err = FormatCollector::new("Test", 2)
            .source(ok_source("hls", &["a"], 0))
            .source(failing_source("dash", true))
            .collect()
            .await
            .unwrap_err();

        assert_eq!(err.source_id, "dash");
        assert!(err.to_string().contains("HTTP 404"));
    }

    #[tokio::test]
    async fn test_non_fatal_failure_is_recorded() {
        let collected = FormatCollector::new("Test", 2)
            .source(ok_source("hls", &["a", "b"], 0))
            .source(failing_source("dash", false))
            .collect()
            .await
            .unwrap();

        assert_eq!(ids(&collected), vec!["a", "b"]);
        assert_eq!(collected.soft_failures.len(), 1);
        assert_eq!(collected.soft_failures[0].source, "dash");
        assert_eq!(collected.soft_failures[0].extractor, "Test");
    }

    #[tokio::test]
    async fn test_source_order_survives_completion_order() {
        let collected = FormatCollector::new("Test", 3)
            .source(ok_source("slow", &["1", "2"], 50))
            .source(ok_source("medium", &["3"], 20))
            .source(ok_source("fast", &["4", "5"], 0))
            .collect()
            .await
            .unwrap();

        assert_eq!(ids(&collected), vec!["1", "2", "3", "4", "5"]);
    }

    #[tokio::test]
    async fn test_duplicates_across_sources_are_kept() {
        let collected = FormatCollector::new("Test", 1)
            .source(ok_source("one", &["same"], 0))
            .source(ok_source("two", &["same"], 0))
            .collect()
            .await
            .unwrap();

        assert_eq!(ids(&collected), vec!["same", "same"]);
    }

    #[tokio::test]
    async fn test_empty_collection_is_not_an_error() {
        let collected = FormatCollector::new("Test", 1).collect().await.unwrap();
        assert!(collected.is_empty());
        assert!(collected.soft_failures.is_empty());
    }

    #[tokio::test]
    async fn test_subtitles_concatenate_per_language() {
        let first = Source::new("first", true, async {
            let mut output = SourceOutput::default();
            output.add_subtitle("en", Subtitle::from_url("https://a/en.vtt", "vtt"));
            Ok(output)
        });
        let second = Source::new("second", true, async {
            let mut output = SourceOutput::default();
            output.add_subtitle("en", Subtitle::from_url("https://b/en.vtt", "vtt"));
            output.add_subtitle("de", Subtitle::from_url("https://b/de.vtt", "vtt"));
            Ok(output)
        });

        let collected = FormatCollector::new("Test", 2)
            .source(first)
            .source(second)
            .collect()
            .await
            .unwrap();

        let english: Vec<_> = collected.subtitles["en"]
            .iter()
            .map(|s| s.url.as_deref().unwrap())
            .collect();
        assert_eq!(english, vec!["https://a/en.vtt", "https://b/en.vtt"]);
        assert_eq!(collected.subtitles["de"].len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_even_non_fatal_sources() {
        let source = Source::new("hls", false, async {
            Err::<SourceOutput, anyhow::Error>(Cancelled.into())
        });
        let err = FormatCollector::new("Test", 1)
            .source(source)
            .collect()
            .await
            .unwrap_err();
        assert!(err.source.is::<Cancelled>());
    }
}
