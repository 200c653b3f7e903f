//! Second pass: sum the changeset sizes per contributor.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use compact_str::CompactString;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Deserializer};

use crate::utils::parse_leading_int;

#[derive(Debug, thiserror::Error)]
pub enum RankingError {
    #[error("failed to open `{}`", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read line {line}")]
    Read {
        line: u64,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line} is not a valid changeset record")]
    Json {
        line: u64,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to render JSON report")]
    RenderJson(#[source] serde_json::Error),
    #[error("failed to render CSV report")]
    RenderCsv(#[from] csv::Error),
    #[error("failed to write `{}`", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// the fields of a JSONL line the ranking needs, everything else is ignored
#[derive(Debug, Deserialize)]
struct RankedChangeset {
    #[serde(default)]
    user: Option<CompactString>,
    #[serde(default, deserialize_with = "deserialize_weight")]
    changes_count: i64,
}

// the extractor always writes an integer, but be forgiving about hand-edited files
fn deserialize_weight<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    use serde_json::Value;

    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64))
            .unwrap_or(0),
        Some(Value::String(text)) => parse_leading_int(&text),
        _ => 0,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedEntry {
    /// 1-based position in the ranking.
    pub rank: usize,
    pub user: CompactString,
    pub total: i64,
}

/// Final, sorted ranking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ranking {
    pub entries: Vec<RankedEntry>,
    /// Lines read from the input.
    pub total_processed: u64,
    /// Lines that named a user and were counted.
    pub matched: u64,
}

impl Ranking {
    /// Number of distinct contributors.
    pub fn contributors(&self) -> usize {
        self.entries.len()
    }
}

/// Accumulates per-user totals.
///
/// Memory grows with the number of distinct users, not with the number of lines.
#[derive(Debug, Default)]
pub struct RankAggregator {
    // position of each user in `totals`
    index: FxHashMap<CompactString, usize>,
    // first-seen order, used to break ties
    totals: Vec<(CompactString, i64)>,
    total_processed: u64,
    matched: u64,
}

impl RankAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one record. Records without a user only count as processed.
    pub fn add(&mut self, user: Option<&str>, changes_count: i64) {
        self.total_processed += 1;

        let Some(user) = user.filter(|user| !user.is_empty()) else {
            return;
        };
        self.matched += 1;

        // weights are already saturated when parsed, keep the sum saturating too
        match self.index.get(user) {
            Some(&position) => {
                let total = &mut self.totals[position].1;
                *total = total.saturating_add(changes_count);
            }
            None => {
                let user = CompactString::from(user);
                self.index.insert(user.clone(), self.totals.len());
                self.totals.push((user, changes_count));
            }
        }
    }

    /// Read JSONL records from `reader` until it is exhausted.
    ///
    /// Any line that is not a JSON object aborts with an error naming the line. The input is written
    /// by the extractor, so a broken line means something went wrong upstream.
    pub fn process_reader<R: BufRead>(&mut self, mut reader: R) -> Result<(), RankingError> {
        let mut line = String::new();
        let mut line_number = 0u64;

        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .map_err(|source| RankingError::Read {
                    line: line_number + 1,
                    source,
                })?;
            if read == 0 {
                break;
            }
            line_number += 1;

            let record: RankedChangeset =
                serde_json::from_str(line.trim()).map_err(|source| RankingError::Json {
                    line: line_number,
                    source,
                })?;
            self.add(record.user.as_deref(), record.changes_count);
        }

        tracing::debug!(
            lines = line_number,
            contributors = self.totals.len(),
            "finished reading records"
        );
        Ok(())
    }

    pub fn process_file(&mut self, path: impl AsRef<Path>) -> Result<(), RankingError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| RankingError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        self.process_reader(BufReader::new(file))
    }

    /// Sort by total, descending. Users with equal totals keep the order they were first seen in.
    pub fn finish(self) -> Ranking {
        let mut totals = self.totals;
        // stable sort
        totals.sort_by(|a, b| b.1.cmp(&a.1));

        let entries = totals
            .into_iter()
            .enumerate()
            .map(|(position, (user, total))| RankedEntry {
                rank: position + 1,
                user,
                total,
            })
            .collect();

        Ranking {
            entries,
            total_processed: self.total_processed,
            matched: self.matched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    fn rank(input: &str) -> Ranking {
        let mut aggregator = RankAggregator::new();
        aggregator.process_reader(input.as_bytes()).unwrap();
        aggregator.finish()
    }

    fn entry(rank: usize, user: &str, total: i64) -> RankedEntry {
        RankedEntry {
            rank,
            user: user.into(),
            total,
        }
    }

    #[test]
    fn test_sums_and_sorts() {
        let ranking = rank(
            "{\"user\":\"a\",\"changes_count\":5}\n{\"user\":\"b\",\"changes_count\":10}\n{\"user\":\"a\",\"changes_count\":3}",
        );

        assert_eq!(ranking.entries, vec![entry(1, "b", 10), entry(2, "a", 8)]);
        assert_eq!(ranking.total_processed, 3);
        assert_eq!(ranking.matched, 3);
        assert_eq!(ranking.contributors(), 2);
    }

    #[test]
    fn test_missing_changes_count_still_creates_entry() {
        let ranking = rank("{\"user\":\"a\"}\n{\"user\":\"b\",\"changes_count\":null}\n");
        assert_eq!(ranking.entries, vec![entry(1, "a", 0), entry(2, "b", 0)]);
    }

    #[test]
    fn test_records_without_user() {
        let ranking = rank(
            "{\"changes_count\":99}\n{\"user\":null,\"changes_count\":7}\n{\"user\":\"\",\"changes_count\":3}\n{\"user\":\"c\",\"changes_count\":1}\n",
        );

        assert_eq!(ranking.entries, vec![entry(1, "c", 1)]);
        assert_eq!(ranking.total_processed, 4);
        assert_eq!(ranking.matched, 1);
    }

    #[test]
    fn test_ties_keep_first_seen_order() {
        let ranking = rank(
            "{\"user\":\"z\",\"changes_count\":4}\n{\"user\":\"m\",\"changes_count\":9}\n{\"user\":\"a\",\"changes_count\":4}\n",
        );
        assert_eq!(
            ranking.entries,
            vec![entry(1, "m", 9), entry(2, "z", 4), entry(3, "a", 4)]
        );
    }

    #[test]
    fn test_lenient_weights() {
        let ranking = rank(
            "{\"user\":\"a\",\"changes_count\":\"12\"}\n{\"user\":\"a\",\"changes_count\":2.9}\n{\"user\":\"a\",\"changes_count\":[1]}\n",
        );
        assert_eq!(ranking.entries, vec![entry(1, "a", 14)]);
    }

    #[test]
    fn test_totals_saturate() {
        let ranking = rank(concat!(
            "{\"user\":\"a\",\"changes_count\":\"99999999999999999999\"}\n",
            "{\"user\":\"a\",\"changes_count\":1}\n",
            "{\"user\":\"b\",\"changes_count\":\"-99999999999999999999\"}\n",
            "{\"user\":\"b\",\"changes_count\":-1}\n",
            "{\"user\":\"c\",\"changes_count\":7}\n",
        ));
        assert_eq!(
            ranking.entries,
            vec![
                entry(1, "a", i64::MAX),
                entry(2, "c", 7),
                entry(3, "b", i64::MIN)
            ]
        );
    }

    #[test]
    fn test_extractor_output_is_accepted() {
        let ranking = rank(
            r##"{"id":1,"user":"alice","uid":5,"created_at":"2025-06-01T00:00:00Z","closed_at":null,"open":false,"min_lat":"1","min_lon":"2","max_lat":"3","max_lon":"4","changes_count":21,"comment":"#qmp","hashtags":null}"##,
        );
        assert_eq!(ranking.entries, vec![entry(1, "alice", 21)]);
    }

    #[test]
    fn test_malformed_line_aborts() {
        let mut aggregator = RankAggregator::new();
        let error = aggregator
            .process_reader("{\"user\":\"a\"}\n{\"user\":\n{\"user\":\"b\"}\n".as_bytes())
            .unwrap_err();

        assert!(matches!(error, RankingError::Json { line: 2, .. }));
        assert_eq!(error.to_string(), "line 2 is not a valid changeset record");
    }

    #[test]
    fn test_blank_line_is_malformed() {
        let mut aggregator = RankAggregator::new();
        let error = aggregator
            .process_reader("{\"user\":\"a\"}\n\n".as_bytes())
            .unwrap_err();
        assert!(matches!(error, RankingError::Json { line: 2, .. }));
    }

    #[test]
    fn test_process_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"user\":\"a\",\"changes_count\":2}}").unwrap();
        writeln!(file, "{{\"user\":\"b\",\"changes_count\":1}}").unwrap();

        let mut aggregator = RankAggregator::new();
        aggregator.process_file(file.path()).unwrap();
        assert_eq!(
            aggregator.finish().entries,
            vec![entry(1, "a", 2), entry(2, "b", 1)]
        );
    }

    #[test]
    fn test_process_missing_file() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("missing.jsonl");

        let error = RankAggregator::new().process_file(&path).unwrap_err();
        assert!(matches!(error, RankingError::Open { .. }));
        assert!(error.to_string().contains("missing.jsonl"));
    }

    proptest! {
        #[test]
        fn totals_are_sums_of_weights(records in prop::collection::vec((0usize..6, 0i64..10_000), 0..200)) {
            let users = ["a", "b", "c", "d", "e", "f"];
            let input: String = records
                .iter()
                .map(|(user, weight)| format!("{{\"user\":\"{}\",\"changes_count\":{}}}\n", users[*user], weight))
                .collect();

            let ranking = rank(&input);

            prop_assert_eq!(ranking.total_processed, records.len() as u64);
            for entry in &ranking.entries {
                let expected: i64 = records
                    .iter()
                    .filter(|(user, _)| entry.user == users[*user])
                    .map(|(_, weight)| weight)
                    .sum();
                prop_assert_eq!(entry.total, expected);
            }
            for (position, pair) in ranking.entries.windows(2).enumerate() {
                prop_assert!(pair[0].total >= pair[1].total);
                prop_assert_eq!(pair[0].rank, position + 1);
            }
        }
    }
}
