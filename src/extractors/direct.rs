use crate::core::collector::{manifest_source, FormatCollector};
use crate::core::error::RegistryError;
use crate::core::extractor::{ExtractContext, Extractor, Target, TestCase};
use crate::core::fetcher::FetchRequest;
use crate::core::metadata::{MediaFormat, MediaRecord, Protocol};
use crate::core::registry::{Capability, ExtractorDescriptor};
use crate::core::result::ExtractionResult;
use crate::extractors::hls::HlsParser;
use crate::utils::{determine_ext, strip_ext, url_basename};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub const NAME: &str = "DirectLink";

const PATTERN: &str = r"(?i)^https?://[^?#]+\.(?:mp4|m4a|m4v|mov|webm|mkv|flv|ogg|ogv|oga|opus|mp3|aac|flac|wav|m3u8|mpd)(?:[?#].*)?$";

/// Generic fallback for URLs that point straight at a media file or manifest.
pub struct DirectLinkExtractor;

impl DirectLinkExtractor {
    pub fn descriptor() -> Result<ExtractorDescriptor, RegistryError> {
        Ok(ExtractorDescriptor::new(NAME, PATTERN, "builtin::direct", || {
            Ok(Arc::new(DirectLinkExtractor) as Arc<dyn Extractor>)
        })?
        .with_capability(Capability::Generic)
        .with_description("Direct links to media files and HLS/DASH manifests")
        .with_test_cases(Self::declared_test_cases()))
    }

    fn declared_test_cases() -> Vec<TestCase> {
        vec![
            TestCase {
                url: "https://cdn.example/media/Big%20Buck%20Bunny.mp4".to_string(),
                id: Some("Big Buck Bunny".to_string()),
                title: Some("Big Buck Bunny".to_string()),
                only_matching: false,
            },
            TestCase::matching("https://cdn.example/live/master.M3U8?token=1"),
            TestCase::matching("http://cdn.example/vod/manifest.mpd"),
        ]
    }

    async fn hls_record(&self, url: &Url, ctx: &ExtractContext, record: &mut MediaRecord) -> Result<()> {
        let request = FetchRequest::new(url.clone())
            .note("Downloading m3u8 manifest")
            .fatal(false);
        let collected = FormatCollector::for_context(ctx)
            .source(manifest_source(ctx, "hls", request, HlsParser::new()))
            .collect()
            .await?;
        ctx.extend_soft_failures(collected.soft_failures);

        record.formats = collected.formats;
        record.subtitles = collected.subtitles;
        if record.formats.is_empty() {
            debug!("[{}] No variants found, using the manifest itself", NAME);
            let mut format = MediaFormat::new("hls", url.as_str(), "mp4", Protocol::Hls);
            format.manifest_url = Some(url.to_string());
            record.formats.push(format);
        }
        Ok(())
    }
}

#[async_trait]
impl Extractor for DirectLinkExtractor {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> Option<String> {
        Some("Direct links to media files and HLS/DASH manifests".to_string())
    }

    fn test_cases(&self) -> Vec<TestCase> {
        Self::declared_test_cases()
    }

    async fn extract(&self, target: &Target, ctx: &ExtractContext) -> Result<ExtractionResult> {
        let url = target.require_url()?;
        let basename = url_basename(url)
            .ok_or_else(|| anyhow::anyhow!("{} has no file name", url))?;
        let id = strip_ext(&basename).to_string();
        let ext = determine_ext(url).unwrap_or_else(|| "mp4".to_string());
        debug!("[{}] {}: direct {} link", NAME, id, ext);

        let mut record = MediaRecord::new(id.clone(), id);
        match ext.as_str() {
            "m3u8" => self.hls_record(url, ctx, &mut record).await?,
            "mpd" => {
                let mut format = MediaFormat::new("dash", url.as_str(), "mp4", Protocol::Dash);
                format.manifest_url = Some(url.to_string());
                record.formats.push(format);
            }
            _ => {
                let protocol = Protocol::from_scheme(url.scheme());
                record
                    .formats
                    .push(MediaFormat::new(ext.as_str(), url.as_str(), ext.as_str(), protocol));
            }
        }

        Ok(ExtractionResult::Record(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fetcher::{FetchResponse, Fetcher};

    struct OneBody(Option<&'static str>);

    #[async_trait]
    impl Fetcher for OneBody {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
            match self.0 {
                Some(body) => Ok(FetchResponse {
                    url: request.url.clone(),
                    status: 200,
                    body: body.to_string(),
                }),
                None => anyhow::bail!("HTTP 500"),
            }
        }
    }

    async fn extract(url: &str, body: Option<&'static str>) -> (MediaRecord, ExtractContext) {
        let ctx = ExtractContext::new(NAME, Arc::new(OneBody(body)));
        let result = DirectLinkExtractor
            .extract(&Target::parse(url), &ctx)
            .await
            .unwrap();
        match result {
            ExtractionResult::Record(record) => (record, ctx),
            other => panic!("expected a record, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bare_id_is_rejected() {
        let ctx = ExtractContext::new(NAME, Arc::new(OneBody(None)));
        let err = DirectLinkExtractor
            .extract(&Target::parse("clip"), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected a URL"));
    }

    #[test]
    fn test_pattern_matches_media_links_only() {
        let descriptor = DirectLinkExtractor::descriptor().unwrap();
        assert!(descriptor.suitable("https://cdn.example/a/clip.MP4"));
        assert!(descriptor.suitable("https://cdn.example/live/index.m3u8?token=abc"));
        assert!(!descriptor.suitable("https://cdn.example/watch?v=clip.mp4"));
        assert!(!descriptor.suitable("https://cdn.example/page.html"));
        assert!(descriptor.has_capability(Capability::Generic));
    }

    #[tokio::test]
    async fn test_progressive_file() {
        let (record, _) = extract("https://cdn.example/media/Big%20Buck%20Bunny.webm", None).await;
        assert_eq!(record.id, "Big Buck Bunny");
        assert_eq!(record.title, "Big Buck Bunny");
        assert_eq!(record.formats.len(), 1);
        assert_eq!(record.formats[0].ext, "webm");
        assert_eq!(record.formats[0].protocol, Protocol::Https);
    }

    #[tokio::test]
    async fn test_dash_manifest() {
        let (record, _) = extract("http://cdn.example/vod/manifest.mpd", None).await;
        assert_eq!(record.formats[0].protocol, Protocol::Dash);
        assert_eq!(
            record.formats[0].manifest_url.as_deref(),
            Some("http://cdn.example/vod/manifest.mpd")
        );
    }

    #[tokio::test]
    async fn test_hls_variants_are_collected() {
        let master = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nlow.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=2400000\nhigh.m3u8\n";
        let (record, ctx) = extract("https://cdn.example/live/master.m3u8", Some(master)).await;
        let ids: Vec<_> = record.formats.iter().map(|f| f.format_id.as_str()).collect();
        assert_eq!(ids, vec!["hls-800", "hls-2400"]);
        assert!(ctx.soft_failures().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_hls_manifest_is_a_soft_failure() {
        let (record, ctx) = extract("https://cdn.example/live/master.m3u8", None).await;
        assert_eq!(record.formats.len(), 1);
        assert_eq!(record.formats[0].protocol, Protocol::Hls);

        let failures = ctx.soft_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].extractor, NAME);
        assert_eq!(failures[0].source, "hls");
        assert!(failures[0].reason.contains("HTTP 500"));
    }
}
