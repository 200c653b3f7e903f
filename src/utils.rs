use std::borrow::Cow;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use memchr::memmem;

/// Parse the integer prefix of `text`, the way the OSM tooling coerces numeric attributes.
///
/// Leading whitespace and an optional sign are accepted, parsing stops at the first non-digit.
/// Text without leading digits yields `0`. Values beyond the `i64` range saturate.
pub fn parse_leading_int(text: &str) -> i64 {
    let trimmed = text.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |value, b| {
            let digit = i64::from(b - b'0');
            if negative {
                value.saturating_mul(10).saturating_sub(digit)
            } else {
                value.saturating_mul(10).saturating_add(digit)
            }
        })
}

/// Parse a changeset timestamp.
///
/// The dump uses `2025-05-01T00:00:00Z`, but hand-made test feeds and older exports use a few other
/// spellings. Timestamps without a zone are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S UTC",
    ];
    const ZONED_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S %z", "%Y-%m-%d %H:%M:%S%.f %z"];

    let text = text.trim();

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
        return Some(timestamp.with_timezone(&Utc));
    }
    for format in ZONED_FORMATS {
        if let Ok(timestamp) = DateTime::parse_from_str(text, format) {
            return Some(timestamp.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(text, format) {
            return Some(DateTime::from_naive_utc_and_offset(timestamp, Utc));
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|timestamp| DateTime::from_naive_utc_and_offset(timestamp, Utc))
}

/// Case-insensitive substring search for a fixed marker such as `#qmp`.
#[derive(Debug, Clone)]
pub struct MarkerMatcher {
    marker: String,
    finder: memmem::Finder<'static>,
}

impl MarkerMatcher {
    pub fn new(marker: &str) -> Self {
        let marker = marker.to_lowercase();
        let finder = memmem::Finder::new(marker.as_bytes()).into_owned();
        Self { marker, finder }
    }

    /// The lower-cased marker.
    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        // most comments are plain lower-case ASCII, skip the allocation for those
        let lowered = if haystack.bytes().all(|b| b.is_ascii() && !b.is_ascii_uppercase()) {
            Cow::Borrowed(haystack)
        } else {
            Cow::Owned(haystack.to_lowercase())
        };

        self.finder.find(lowered.as_bytes()).is_some()
    }
}
