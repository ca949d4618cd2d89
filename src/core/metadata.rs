use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A fully extracted media item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: String,
    pub title: String,
    /// Name of the extractor this record is attributed to.
    #[serde(default)]
    pub extractor: String,
    pub webpage_url: Option<String>,
    pub description: Option<String>,
    pub duration: Option<u64>,
    pub uploader: Option<String>,
    pub upload_date: Option<String>,
    pub view_count: Option<u64>,
    #[serde(default)]
    pub formats: Vec<MediaFormat>,
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
    #[serde(default)]
    pub subtitles: BTreeMap<String, Vec<Subtitle>>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MediaRecord {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    /// Overwrite every field the override set carries.
    pub fn apply_overrides(&mut self, overrides: &FieldOverrides) {
        if let Some(id) = &overrides.id {
            self.id = id.clone();
        }
        if let Some(title) = &overrides.title {
            self.title = title.clone();
        }
        if let Some(extractor) = &overrides.extractor {
            self.extractor = extractor.clone();
        }
        if let Some(webpage_url) = &overrides.webpage_url {
            self.webpage_url = Some(webpage_url.clone());
        }
        if let Some(description) = &overrides.description {
            self.description = Some(description.clone());
        }
        if let Some(duration) = overrides.duration {
            self.duration = Some(duration);
        }
        if let Some(uploader) = &overrides.uploader {
            self.uploader = Some(uploader.clone());
        }
        if let Some(upload_date) = &overrides.upload_date {
            self.upload_date = Some(upload_date.clone());
        }
        if let Some(view_count) = overrides.view_count {
            self.view_count = Some(view_count);
        }
        if let Some(thumbnails) = &overrides.thumbnails {
            self.thumbnails = thumbnails.clone();
        }
        for (key, value) in &overrides.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }
}

/// Fields a delegating extractor already knows and wants to take precedence
/// over whatever the delegation target produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldOverrides {
    pub id: Option<String>,
    pub title: Option<String>,
    pub extractor: Option<String>,
    pub webpage_url: Option<String>,
    pub description: Option<String>,
    pub duration: Option<u64>,
    pub uploader: Option<String>,
    pub upload_date: Option<String>,
    pub view_count: Option<u64>,
    pub thumbnails: Option<Vec<Thumbnail>>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FieldOverrides {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// How a media stream is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Http,
    Https,
    /// Segmented HLS (`.m3u8`).
    Hls,
    /// Segmented MPEG-DASH (`.mpd`).
    Dash,
}

impl Protocol {
    pub fn from_scheme(scheme: &str) -> Self {
        if scheme.eq_ignore_ascii_case("http") {
            Protocol::Http
        } else {
            Protocol::Https
        }
    }

    pub fn is_segmented(&self) -> bool {
        matches!(self, Protocol::Hls | Protocol::Dash)
    }
}

/// One media-stream candidate. Candidates are not unique; several may
/// describe the same content at different qualities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFormat {
    pub format_id: String,
    pub url: String,
    pub manifest_url: Option<String>,
    pub ext: String,
    pub protocol: Protocol,
    pub quality: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub filesize: Option<u64>,
    pub tbr: Option<f64>, // total bitrate, kbps
}

impl MediaFormat {
    pub fn new(
        format_id: impl Into<String>,
        url: impl Into<String>,
        ext: impl Into<String>,
        protocol: Protocol,
    ) -> Self {
        Self {
            format_id: format_id.into(),
            url: url.into(),
            manifest_url: None,
            ext: ext.into(),
            protocol,
            quality: None,
            width: None,
            height: None,
            fps: None,
            vcodec: None,
            acodec: None,
            filesize: None,
            tbr: None,
        }
    }

    pub fn resolution(&self) -> Option<String> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(format!("{}x{}", w, h)),
            (None, Some(h)) => Some(format!("{}p", h)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// A subtitle candidate; carries either a URL or inline data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtitle {
    pub url: Option<String>,
    pub data: Option<String>,
    pub ext: String,
    pub name: Option<String>,
}

impl Subtitle {
    pub fn from_url(url: impl Into<String>, ext: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            data: None,
            ext: ext.into(),
            name: None,
        }
    }

    pub fn from_data(data: impl Into<String>, ext: impl Into<String>) -> Self {
        Self {
            url: None,
            data: Some(data.into()),
            ext: ext.into(),
            name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_target_fields() {
        let mut record = MediaRecord::new("123", "Y");
        record.uploader = Some("target".to_string());

        record.apply_overrides(&FieldOverrides::default().with_title("X"));

        assert_eq!(record.title, "X");
        assert_eq!(record.id, "123");
        assert_eq!(record.uploader.as_deref(), Some("target"));
    }

    #[test]
    fn test_extra_overrides_are_merged_per_key() {
        let mut record = MediaRecord::new("1", "t");
        record.extra.insert("a".into(), serde_json::json!(1));
        record.extra.insert("b".into(), serde_json::json!(2));

        record.apply_overrides(&FieldOverrides::default().with_extra("b", serde_json::json!(3)));

        assert_eq!(record.extra["a"], serde_json::json!(1));
        assert_eq!(record.extra["b"], serde_json::json!(3));
    }

    #[test]
    fn test_format_resolution() {
        let mut format = MediaFormat::new("18", "https://example.com/v.mp4", "mp4", Protocol::Https);
        assert_eq!(format.resolution(), None);
        format.height = Some(720);
        assert_eq!(format.resolution().as_deref(), Some("720p"));
        format.width = Some(1280);
        assert_eq!(format.resolution().as_deref(), Some("1280x720"));
    }
}
