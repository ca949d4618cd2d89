use url::Url;

const KNOWN_EXTENSIONS: &[&str] = &[
    "mp4", "m4a", "m4v", "mov", "webm", "mkv", "flv", "avi", "ogg", "ogv", "oga", "opus", "mp3",
    "aac", "flac", "wav", "ts", "m3u8", "mpd", "vtt", "srt", "lrc",
];

/// Last path segment of `url`, percent-decoded. Empty segments are skipped.
pub fn url_basename(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    Some(decoded)
}

/// Lower-cased file extension of the URL path, if it is a known media one.
pub fn determine_ext(url: &Url) -> Option<String> {
    let basename = url_basename(url)?;
    let (_, ext) = basename.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    KNOWN_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// `basename` without its extension.
pub fn strip_ext(basename: &str) -> &str {
    match basename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => basename,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_url_basename() {
        assert_eq!(
            url_basename(&url("https://cdn.example/media/My%20Clip.MP4?x=1")).as_deref(),
            Some("My Clip.MP4")
        );
        assert_eq!(
            url_basename(&url("https://cdn.example/media/")).as_deref(),
            Some("media")
        );
        assert_eq!(url_basename(&url("https://cdn.example/")), None);
    }

    #[test]
    fn test_determine_ext() {
        assert_eq!(
            determine_ext(&url("https://cdn.example/a/b.M3U8")).as_deref(),
            Some("m3u8")
        );
        assert_eq!(determine_ext(&url("https://cdn.example/a/page.html")), None);
        assert_eq!(determine_ext(&url("https://cdn.example/a/noext")), None);
    }

    #[test]
    fn test_strip_ext() {
        assert_eq!(strip_ext("clip.mp4"), "clip");
        assert_eq!(strip_ext("archive.tar.gz"), "archive.tar");
        assert_eq!(strip_ext(".hidden"), ".hidden");
        assert_eq!(strip_ext("plain"), "plain");
    }
}
