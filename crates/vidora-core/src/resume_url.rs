//! Resume-URL codec
//!
//! A resume offset travels between the session host and the player as a
//! `startTime=<seconds>` query parameter on the playable URL. The parameter
//! is decoded here and stripped before the manifest reaches the backend.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use url::Url;

/// Query parameter carrying the resume offset
pub const START_TIME_PARAM: &str = "startTime";

static START_TIME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]startTime=([^&#]*)").expect("valid startTime pattern"));

static LEADING_FLOAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").expect("valid float pattern")
});

/// Append a resume offset to a source URL.
///
/// The rest of the URL is kept byte for byte. Offsets that are not
/// strictly positive leave the URL untouched.
pub fn encode(source_url: &str, resume_seconds: f64) -> String {
    if !(resume_seconds.is_finite() && resume_seconds > 0.0) {
        return source_url.to_string();
    }

    let (head, fragment) = split_fragment(source_url);
    let separator = if !head.contains('?') {
        "?"
    } else if head.ends_with('?') || head.ends_with('&') {
        ""
    } else {
        "&"
    };

    let mut out = format!("{}{}{}={}", head, separator, START_TIME_PARAM, resume_seconds);
    push_fragment(&mut out, fragment);
    out
}

/// Extract the resume offset from a URL.
///
/// The last `startTime` occurrence wins. Absent, unparsable, negative or
/// malformed values all decode to `0.0`.
pub fn decode(url: &str) -> f64 {
    let raw = match Url::parse(url) {
        Ok(parsed) => parsed
            .query_pairs()
            .filter(|(key, _)| key == START_TIME_PARAM)
            .last()
            .map(|(_, value)| value.into_owned()),
        Err(err) => {
            debug!(error = %err, "URL not parseable, scanning raw string for startTime");
            START_TIME_PATTERN
                .captures_iter(url)
                .last()
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        }
    };

    raw.map(|value| parse_seconds(&value)).unwrap_or(0.0)
}

/// Remove every query parameter. A `#fragment` is kept, query or not.
pub fn strip_query(url: &str) -> String {
    let (head, fragment) = split_fragment(url);
    let base = head.split_once('?').map_or(head, |(base, _)| base);

    let mut out = base.to_string();
    push_fragment(&mut out, fragment);
    out
}

/// Lenient float parse: takes the longest numeric prefix, like a browser would
fn parse_seconds(value: &str) -> f64 {
    let parsed = LEADING_FLOAT
        .find(value)
        .and_then(|m| m.as_str().trim().parse::<f64>().ok())
        .unwrap_or(0.0);

    if parsed.is_finite() && parsed > 0.0 {
        parsed
    } else {
        0.0
    }
}

fn split_fragment(url: &str) -> (&str, Option<&str>) {
    match url.split_once('#') {
        Some((head, fragment)) => (head, Some(fragment)),
        None => (url, None),
    }
}

fn push_fragment(out: &mut String, fragment: Option<&str>) {
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = "https://cdn.example.com/videos/42/master.m3u8";

    #[test]
    fn test_encode_non_positive_is_identity() {
        for seconds in [0.0, -1.0, -0.001, f64::NAN, f64::NEG_INFINITY] {
            assert_eq!(encode(MANIFEST, seconds), MANIFEST);
        }
    }

    #[test]
    fn test_round_trip() {
        for seconds in [0.25, 1.0, 42.0, 90.5, 3599.999] {
            assert_eq!(decode(&encode(MANIFEST, seconds)), seconds);
        }
    }

    #[test]
    fn test_encode_appends_to_existing_query() {
        let url = encode("https://cdn.example.com/v.m3u8?token=abc", 42.0);
        assert_eq!(url, "https://cdn.example.com/v.m3u8?token=abc&startTime=42");
    }

    #[test]
    fn test_decode_last_occurrence_wins() {
        assert_eq!(decode("https://x.test/v.m3u8?startTime=10&startTime=25.5"), 25.5);
        assert_eq!(decode(&encode("https://x.test/v.m3u8?startTime=3", 7.0)), 7.0);
    }

    #[test]
    fn test_decode_absent_or_garbage() {
        assert_eq!(decode(MANIFEST), 0.0);
        assert_eq!(decode("https://x.test/v.m3u8?startTime=abc"), 0.0);
        assert_eq!(decode("https://x.test/v.m3u8?startTime=-5"), 0.0);
        assert_eq!(decode("https://x.test/v.m3u8?startTime="), 0.0);
        assert_eq!(decode("https://x.test/v.m3u8?startTime=12abc"), 12.0);
    }

    #[test]
    fn test_decode_malformed_falls_back_to_scan() {
        assert_eq!(decode("/videos/1.m3u8?startTime=5&startTime=8"), 8.0);
        assert_eq!(decode("not a url ?startTime=13.5#frag"), 13.5);
        assert_eq!(decode("::::"), 0.0);
    }

    #[test]
    fn test_encode_relative_url() {
        assert_eq!(encode("/videos/1.m3u8", 5.0), "/videos/1.m3u8?startTime=5");
        assert_eq!(encode("/videos/1.m3u8?a=1#t", 5.0), "/videos/1.m3u8?a=1&startTime=5#t");
        assert_eq!(decode(&encode("/videos/1.m3u8", 61.5)), 61.5);
    }

    #[test]
    fn test_strip_query() {
        assert_eq!(strip_query(&encode(MANIFEST, 42.0)), MANIFEST);
        assert_eq!(strip_query("https://x.test/v.m3u8?token=a&startTime=1"), "https://x.test/v.m3u8");
        assert_eq!(strip_query(MANIFEST), MANIFEST);
    }

    #[test]
    fn test_encode_keeps_url_verbatim() {
        assert_eq!(
            encode("https://CDN.Example.com/My Videos/a.m3u8", 12.5),
            "https://CDN.Example.com/My Videos/a.m3u8?startTime=12.5"
        );
        assert_eq!(encode("https://x.test/v.m3u8?", 3.0), "https://x.test/v.m3u8?startTime=3");
        assert_eq!(
            encode("https://x.test/v.m3u8#chapter-2", 3.0),
            "https://x.test/v.m3u8?startTime=3#chapter-2"
        );
    }

    #[test]
    fn test_strip_query_keeps_fragment_either_way() {
        assert_eq!(strip_query("https://x.test/v.m3u8#t=5"), "https://x.test/v.m3u8#t=5");
        assert_eq!(
            strip_query("https://x.test/v.m3u8?startTime=9#t=5"),
            "https://x.test/v.m3u8#t=5"
        );
        assert_eq!(strip_query("/videos/1.m3u8?a=1&b=2"), "/videos/1.m3u8");
    }
}
