use std::io::{BufReader, Write};

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use qmp_ranking::{
    changeset_parser::DEFAULT_RECORD_ELEMENT,
    extractor::{
        Extractor, ExtractorConfig, DEFAULT_MARKER, DEFAULT_PROGRESS_INTERVAL, DEFAULT_SINCE,
    },
    logging, utils,
};

/// Extract #qmp changesets from an OpenStreetMap changeset dump.
///
/// Reads the decompressed dump from stdin and writes one JSON object per matching changeset to
/// stdout, e.g. `bzcat changesets-latest.osm.bz2 | qmp-collect > data/changesets.jsonl`.
#[derive(Debug, clap::Parser)]
#[command(version, about)]
struct CommandLine {
    /// Drop changesets created before this date or timestamp
    #[arg(long, default_value = DEFAULT_SINCE, value_parser = parse_since)]
    since: DateTime<Utc>,
    /// Keep changesets whose comment or hashtags contain this text (case-insensitive)
    #[arg(long, default_value = DEFAULT_MARKER)]
    marker: String,
    /// Name of the element wrapping one changeset
    #[arg(long, default_value = DEFAULT_RECORD_ELEMENT)]
    element: String,
    /// Print progress every this many changesets, 0 to disable
    #[arg(long, default_value_t = DEFAULT_PROGRESS_INTERVAL)]
    progress_interval: u64,
}

fn parse_since(text: &str) -> Result<DateTime<Utc>, String> {
    utils::parse_timestamp(text).ok_or_else(|| format!("invalid date or timestamp: `{text}`"))
}

fn main() -> anyhow::Result<()> {
    let args = match CommandLine::try_parse() {
        Ok(args) => args,
        // --help and --version
        Err(error) if !error.use_stderr() => error.exit(),
        Err(error) => {
            let _ = error.print();
            std::process::exit(1);
        }
    };

    // stderr carries the progress lines, keep the log quiet unless asked for
    logging::init_tracing("warn");

    let extractor = Extractor::new(ExtractorConfig {
        since: args.since,
        marker: args.marker,
        record_element: args.element,
        progress_interval: args.progress_interval,
    });

    let input = BufReader::with_capacity(1024 * 1024, std::io::stdin().lock());
    let output = std::io::stdout().lock();
    let mut diagnostics = std::io::stderr().lock();

    let stats = extractor
        .run(input, output, &mut diagnostics)
        .context("extraction aborted, records written so far are complete")?;
    diagnostics.flush()?;

    tracing::debug!(?stats, "done");
    Ok(())
}
