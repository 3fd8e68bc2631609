//! Media identifier extraction from video URLs.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use tubewiki_shared::{Result, TubeWikiError};

/// Hosts that serve the long-form `/watch` and path-style URL shapes.
const WATCH_HOSTS: &[&str] = &["youtube.com", "www.youtube.com", "m.youtube.com"];

/// Short-link host; the id is the first path segment.
const SHORT_HOST: &str = "youtu.be";

/// Path prefixes on [`WATCH_HOSTS`] that are followed by the id.
const ID_PATH_PREFIXES: &[&str] = &["embed", "v", "shorts", "live"];

static VIDEO_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid regex"));

/// Extract the canonical 11-character video id from a media URL.
///
/// Fails with [`TubeWikiError::InvalidSourceReference`] when the host is not
/// a recognized media domain, no id can be located, or the id has the wrong
/// shape.
pub fn extract_video_id(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TubeWikiError::invalid_source(raw, "URL is empty"));
    }

    let url = Url::parse(trimmed).map_err(|e| TubeWikiError::invalid_source(raw, e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(TubeWikiError::invalid_source(raw, "unsupported scheme"));
    }

    let host = url.host_str().unwrap_or("").to_ascii_lowercase();

    let candidate = if host == SHORT_HOST {
        first_segment(&url)
    } else if WATCH_HOSTS.contains(&host.as_str()) {
        if url.path() == "/watch" {
            url.query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned())
        } else {
            let mut segments = url.path_segments().into_iter().flatten();
            match segments.next() {
                Some(prefix) if ID_PATH_PREFIXES.contains(&prefix) => {
                    segments.next().map(str::to_string)
                }
                _ => None,
            }
        }
    } else {
        return Err(TubeWikiError::invalid_source(raw, "unrecognized media domain"));
    };

    let id = candidate
        .filter(|id| !id.is_empty())
        .ok_or_else(|| TubeWikiError::invalid_source(raw, "could not extract video ID"))?;

    if !VIDEO_ID_RE.is_match(&id) {
        return Err(TubeWikiError::invalid_source(raw, "invalid video ID format"));
    }

    Ok(id)
}

fn first_segment(url: &Url) -> Option<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_watch_url() {
        let id = extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap();
        assert_eq!(id, "dQw4w9WgXcQ");

        let id = extract_video_id("https://m.youtube.com/watch?feature=share&v=dQw4w9WgXcQ").unwrap();
        assert_eq!(id, "dQw4w9WgXcQ");
    }

    #[test]
    fn short_link() {
        assert_eq!(
            extract_video_id("https://youtu.be/abc12345678").unwrap(),
            "abc12345678"
        );
        assert_eq!(
            extract_video_id("https://youtu.be/dQw4w9WgXcQ?t=42").unwrap(),
            "dQw4w9WgXcQ"
        );
    }

    #[test]
    fn path_style_urls() {
        for url in [
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/v/dQw4w9WgXcQ",
            "https://youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/live/dQw4w9WgXcQ?si=x",
        ] {
            assert_eq!(extract_video_id(url).unwrap(), "dQw4w9WgXcQ", "{url}");
        }
    }

    #[test]
    fn rejects_foreign_hosts() {
        let err = extract_video_id("https://example.com/watch?v=dQw4w9WgXcQ").unwrap_err();
        assert!(matches!(err, TubeWikiError::InvalidSourceReference { .. }));
        assert!(err.to_string().contains("unrecognized media domain"));
    }

    #[test]
    fn rejects_malformed_ids() {
        for url in [
            "https://youtu.be/123",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ!!",
            "https://www.youtube.com/watch",
            "https://www.youtube.com/channel/UC1234567890",
            "",
            "not a url",
            "ftp://youtu.be/dQw4w9WgXcQ",
        ] {
            let err = extract_video_id(url).unwrap_err();
            assert!(
                matches!(err, TubeWikiError::InvalidSourceReference { .. }),
                "{url}: {err}"
            );
        }
    }
}
