use crate::core::collector::{ManifestParser, SourceOutput};
use crate::core::metadata::{MediaFormat, Protocol, Subtitle};
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use url::Url;

static ATTRIBUTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([A-Z0-9-]+)=("[^"]*"|[^,]*)"#).unwrap());

const AUDIO_CODEC_PREFIXES: &[&str] = &["mp4a", "opus", "ac-3", "ec-3", "flac", "vorbis", "mp3"];

/// Parser for HLS (`.m3u8`) playlists.
#[derive(Debug, Clone, Default)]
pub struct HlsParser {
    format_prefix: Option<String>,
}

impl HlsParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix for generated format ids, `hls` when unset.
    pub fn with_format_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.format_prefix = Some(prefix.into());
        self
    }

    fn prefix(&self) -> &str {
        self.format_prefix.as_deref().unwrap_or("hls")
    }
}

impl ManifestParser for HlsParser {
    fn parse(&self, manifest: &str, manifest_url: &Url) -> Result<SourceOutput> {
        let mut lines = manifest.lines().map(str::trim).filter(|l| !l.is_empty());
        if lines.next() != Some("#EXTM3U") {
            anyhow::bail!("{} is not an HLS playlist", manifest_url);
        }

        let mut output = SourceOutput::default();
        let mut is_master = false;
        let mut pending_variant: Option<HashMap<String, String>> = None;

        for line in lines {
            if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
                is_master = true;
                pending_variant = Some(parse_attributes(attrs));
            } else if let Some(attrs) = line.strip_prefix("#EXT-X-MEDIA:") {
                let attrs = parse_attributes(attrs);
                if attrs.get("TYPE").map(String::as_str) == Some("SUBTITLES") {
                    is_master = true;
                    if let Some((language, subtitle)) = subtitle_from(&attrs, manifest_url)? {
                        output.add_subtitle(language, subtitle);
                    }
                }
            } else if !line.starts_with('#') {
                if let Some(attrs) = pending_variant.take() {
                    let index = output.formats.len();
                    output
                        .formats
                        .push(self.variant_format(&attrs, line, index, manifest_url)?);
                }
            }
        }

        if !is_master {
            let mut format = MediaFormat::new(
                self.prefix(),
                manifest_url.as_str(),
                "mp4",
                Protocol::Hls,
            );
            format.manifest_url = Some(manifest_url.to_string());
            output.formats.push(format);
        }

        Ok(output)
    }
}

impl HlsParser {
    fn variant_format(
        &self,
        attrs: &HashMap<String, String>,
        uri: &str,
        index: usize,
        manifest_url: &Url,
    ) -> Result<MediaFormat> {
        let url = manifest_url
            .join(uri)
            .with_context(|| format!("invalid variant URI {}", uri))?;
        let tbr = attrs
            .get("BANDWIDTH")
            .and_then(|b| b.parse::<f64>().ok())
            .map(|b| b / 1000.0);
        let format_id = match tbr {
            Some(tbr) => format!("{}-{}", self.prefix(), tbr.round() as u64),
            None => format!("{}-{}", self.prefix(), index),
        };

        let mut format = MediaFormat::new(format_id, url.as_str(), "mp4", Protocol::Hls);
        format.manifest_url = Some(manifest_url.to_string());
        format.tbr = tbr;

        if let Some((width, height)) = attrs.get("RESOLUTION").and_then(|r| r.split_once('x')) {
            format.width = width.parse().ok();
            format.height = height.parse().ok();
        }
        format.fps = attrs.get("FRAME-RATE").and_then(|f| f.parse().ok());

        if let Some(codecs) = attrs.get("CODECS") {
            for codec in codecs.split(',').map(str::trim).filter(|c| !c.is_empty()) {
                let is_audio = AUDIO_CODEC_PREFIXES.iter().any(|p| codec.starts_with(p));
                let slot = if is_audio {
                    &mut format.acodec
                } else {
                    &mut format.vcodec
                };
                slot.get_or_insert_with(|| codec.to_string());
            }
        }

        Ok(format)
    }
}

fn subtitle_from(
    attrs: &HashMap<String, String>,
    manifest_url: &Url,
) -> Result<Option<(String, Subtitle)>> {
    let Some(uri) = attrs.get("URI") else {
        return Ok(None);
    };
    let url = manifest_url
        .join(uri)
        .with_context(|| format!("invalid subtitle URI {}", uri))?;
    let language = attrs
        .get("LANGUAGE")
        .cloned()
        .unwrap_or_else(|| "und".to_string());

    let mut subtitle = Subtitle::from_url(url.as_str(), "vtt");
    subtitle.name = attrs.get("NAME").cloned();
    Ok(Some((language, subtitle)))
}

fn parse_attributes(list: &str) -> HashMap<String, String> {
    ATTRIBUTE_RE
        .captures_iter(list)
        .map(|c| (c[1].to_string(), c[2].trim_matches('"').to_string()))
        .collect()
}
