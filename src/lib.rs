// SPDX-License-Identifier: MPL-2.0
//! # qmp_ranking
//!
//! Ranking of OpenStreetMap contributors taking part in the Quick Mapping Project (`#qmp`).
//!
//! ## Overview
//!
//! The crate works on the weekly changeset dump published at
//! <https://planet.openstreetmap.org/planet/changesets-latest.osm.bz2>. The dump is several
//! gigabytes of XML once decompressed, so it is never loaded into memory. Instead the work is split
//! into two passes connected by a line-delimited JSON (JSONL) file:
//!
//! 1. **Extraction** ([`extractor`]): stream the XML, keep only the changesets created on or after
//!    the project start date whose `comment` or `hashtags` tag mentions `#qmp`, and write one JSON
//!    object per changeset.
//! 2. **Ranking** ([`ranking`], [`report`]): sum `changes_count` per user, sort descending and render
//!    the result as Markdown, JSON or CSV.
//!
//! Both passes ship as binaries (`qmp-collect` and `qmp-ranking`), but they are thin wrappers around
//! the library API.
//!
//! ## Getting Started
//!
//! ```sh
//! bzcat data/changesets-latest.osm.bz2 | qmp-collect > data/changesets.jsonl
//! qmp-ranking data/changesets.jsonl                      # writes docs/index.md
//! qmp-ranking data/changesets.jsonl --format csv         # writes qmp_ranking.csv
//! ```
//!
//! ### Extracting from Rust
//!
//! ```rust
//! use qmp_ranking::extractor::{Extractor, ExtractorConfig};
//!
//! let xml = r#"<osm>
//!   <changeset id="1" user="alice" created_at="2025-06-01T10:00:00Z" changes_count="7" open="false">
//!     <tag k="comment" v="Buildings #QMP"/>
//!   </changeset>
//! </osm>"#;
//!
//! let extractor = Extractor::new(ExtractorConfig::default());
//! let mut jsonl = Vec::new();
//! let stats = extractor
//!     .run(xml.as_bytes(), &mut jsonl, &mut std::io::sink())
//!     .unwrap();
//! assert_eq!(stats.matched, 1);
//! ```
//!
//! ### Ranking from Rust
//!
//! ```rust
//! use qmp_ranking::ranking::RankAggregator;
//!
//! let input = "{\"user\":\"a\",\"changes_count\":5}\n{\"user\":\"b\",\"changes_count\":10}\n";
//! let mut aggregator = RankAggregator::new();
//! aggregator.process_reader(input.as_bytes()).unwrap();
//! let ranking = aggregator.finish();
//! assert_eq!(ranking.entries[0].user, "b");
//! ```
//!
//! ## Memory Usage
//!
//! The parser keeps one reusable event buffer and the changeset currently being read. The
//! aggregator keeps one entry per distinct user. Neither grows with the size of the dump.
//!
//! ## Logging and Error Handling
//!
//! - Uses the `tracing` crate for warnings about skipped or unparsable changesets. The binaries
//!   install a subscriber that writes to stderr, so stdout of `qmp-collect` only ever carries JSONL.
//! - The parser skips malformed changesets and keeps going. Enable the `strict` feature to abort
//!   instead.
//! - The ranking pass is strict: a malformed JSONL line aborts the whole run.
//!
//! ## Licensing
//!
//! This project is licensed under the Mozilla Public License 2.0.

pub mod changeset_parser;
pub mod extractor;
pub mod logging;
pub mod ranking;
pub mod report;
#[cfg(test)]
mod test_support;
pub mod utils;
