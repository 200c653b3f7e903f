//! First pass: stream the changeset dump and keep the `#qmp` changesets.
//!
//! The dump is read with [`ChangesetParser`], every changeset goes through the [`ChangesetFilter`]
//! and the survivors are written as one [`FilteredRecord`] JSON object per line. Progress and the
//! final summary go to a separate diagnostics writer so the JSONL output can be piped safely.

use std::io::{BufRead, BufWriter, Write};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    changeset_parser::{ChangesetParser, ParsingError, RawChangeset, DEFAULT_RECORD_ELEMENT},
    utils::{parse_leading_int, parse_timestamp, MarkerMatcher},
};

/// Start of the Quick Mapping Project, nothing before it is ranked.
pub const DEFAULT_SINCE: &str = "2025-05-01";
pub const DEFAULT_MARKER: &str = "#qmp";
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1000;

/// [`DEFAULT_SINCE`] as a date.
pub fn default_since_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 5, 1).expect("valid calendar date")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorConfig {
    /// Changesets created before this instant are dropped.
    pub since: DateTime<Utc>,
    /// Substring searched (case-insensitively) in the `comment` and `hashtags` tags.
    pub marker: String,
    /// Name of the element wrapping one record.
    pub record_element: String,
    /// Write a progress line every this many records, `0` disables it.
    pub progress_interval: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            since: default_since_date().and_time(chrono::NaiveTime::MIN).and_utc(),
            marker: DEFAULT_MARKER.to_string(),
            record_element: DEFAULT_RECORD_ELEMENT.to_string(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Date and hashtag filter applied to every changeset.
#[derive(Debug, Clone)]
pub struct ChangesetFilter {
    since: DateTime<Utc>,
    matcher: MarkerMatcher,
}

impl ChangesetFilter {
    // tags searched for the marker
    const TAG_KEYS: [&'static str; 2] = ["comment", "hashtags"];

    pub fn new(since: DateTime<Utc>, marker: &str) -> Self {
        Self {
            since,
            matcher: MarkerMatcher::new(marker),
        }
    }

    /// `true` if `created_at` is present, parsable and not before the cutoff.
    pub fn accepts_date(&self, created_at: Option<&str>) -> bool {
        let Some(created_at) = created_at else {
            return false;
        };

        match parse_timestamp(created_at) {
            Some(timestamp) => timestamp >= self.since,
            None => {
                tracing::warn!(message = "Failed to parse changeset date", created_at);
                false
            }
        }
    }

    /// `true` if the `comment` or `hashtags` tag contains the marker.
    pub fn accepts_tags(&self, changeset: &RawChangeset) -> bool {
        Self::TAG_KEYS
            .iter()
            .any(|key| self.matcher.is_match(changeset.tag(key).unwrap_or("")))
    }

    pub fn accepts(&self, changeset: &RawChangeset) -> bool {
        self.accepts_date(changeset.attribute("created_at")) && self.accepts_tags(changeset)
    }
}

/// One line of the intermediate JSONL file.
///
/// Field order is the order on the wire. Missing values are written as `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredRecord {
    pub id: Option<i64>,
    pub user: Option<String>,
    pub uid: Option<i64>,
    pub created_at: String,
    pub closed_at: Option<String>,
    pub open: bool,
    pub min_lat: Option<String>,
    pub min_lon: Option<String>,
    pub max_lat: Option<String>,
    pub max_lon: Option<String>,
    pub changes_count: i64,
    pub comment: Option<String>,
    pub hashtags: Option<String>,
}

impl FilteredRecord {
    /// Flatten a changeset. Returns `None` if it has no `created_at`.
    pub fn from_raw(changeset: &RawChangeset) -> Option<Self> {
        let attribute = |name: &str| changeset.attribute(name).map(str::to_string);

        // older dumps call it `num_changes`
        let changes_count = changeset
            .attribute("changes_count")
            .or_else(|| changeset.attribute("num_changes"))
            .map(parse_leading_int)
            .unwrap_or(0);

        Some(Self {
            id: changeset.attribute("id").map(parse_leading_int),
            user: attribute("user"),
            uid: changeset.attribute("uid").map(parse_leading_int),
            created_at: attribute("created_at")?,
            closed_at: attribute("closed_at"),
            open: changeset.attribute("open") == Some("true"),
            min_lat: attribute("min_lat"),
            min_lon: attribute("min_lon"),
            max_lat: attribute("max_lat"),
            max_lon: attribute("max_lon"),
            changes_count,
            comment: changeset.tag("comment").map(str::to_string),
            hashtags: changeset.tag("hashtags").map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    /// Records read from the feed.
    pub processed: u64,
    /// Records written to the output.
    pub matched: u64,
    /// Malformed or truncated records that were dropped.
    pub skipped: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to parse the changeset feed")]
    Parsing(#[from] ParsingError),
    #[error("failed to serialize changeset")]
    Serialize(#[from] serde_json::Error),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct Extractor {
    config: ExtractorConfig,
    filter: ChangesetFilter,
}

impl Extractor {
    pub fn new(config: ExtractorConfig) -> Self {
        let filter = ChangesetFilter::new(config.since, &config.marker);
        Self { config, filter }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Run the first pass over `input`.
    ///
    /// Matching records go to `output` as JSONL, progress lines and the final summary go to
    /// `diagnostics`. On error the records matched so far are still flushed to `output`.
    pub fn run<R: BufRead, W: Write, D: Write>(
        &self,
        input: R,
        output: W,
        diagnostics: &mut D,
    ) -> Result<ExtractionStats, ExtractError> {
        let mut parser = ChangesetParser::new(input, &self.config.record_element);
        let mut output = BufWriter::new(output);
        let mut stats = ExtractionStats::default();

        let result = self.extract_all(&mut parser, &mut output, diagnostics, &mut stats);
        stats.skipped = parser.skipped();
        let flushed = output.flush();
        if let Err(error) = result {
            // report what stopped the extraction, not the follow-up failure
            if let Err(flush_error) = flushed {
                tracing::error!(message = "Failed to flush records after aborting", %flush_error);
            }
            return Err(error);
        }
        flushed?;

        writeln!(diagnostics)?;
        writeln!(diagnostics, "Processing completed!")?;
        writeln!(diagnostics, "Total changesets processed: {}", stats.processed)?;
        writeln!(diagnostics, "Matching changesets found: {}", stats.matched)?;
        if stats.skipped > 0 {
            writeln!(diagnostics, "Malformed changesets skipped: {}", stats.skipped)?;
        }
        diagnostics.flush()?;

        tracing::debug!(?stats, position = parser.position(), "extraction finished");
        Ok(stats)
    }

    fn extract_all<R: BufRead, W: Write, D: Write>(
        &self,
        parser: &mut ChangesetParser<R>,
        output: &mut W,
        diagnostics: &mut D,
        stats: &mut ExtractionStats,
    ) -> Result<(), ExtractError> {
        let progress_interval = self.config.progress_interval;

        while let Some(changeset) = parser.parse_changeset()? {
            stats.processed += 1;
            if progress_interval != 0 && stats.processed % progress_interval == 0 {
                // carriage return so the next progress line overwrites this one
                write!(
                    diagnostics,
                    "Processed: {} changesets, Found {}: {}\r",
                    stats.processed, self.config.marker, stats.matched
                )?;
                diagnostics.flush()?;
            }

            if !self.filter.accepts(&changeset) {
                continue;
            }
            let Some(record) = FilteredRecord::from_raw(&changeset) else {
                continue;
            };

            serde_json::to_writer(&mut *output, &record)?;
            output.write_all(b"\n")?;
            stats.matched += 1;
        }

        Ok(())
    }
}
