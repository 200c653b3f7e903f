use std::path::PathBuf;

use anyhow::bail;
use chrono::NaiveDate;
use clap::Parser;
use qmp_ranking::{
    extractor::DEFAULT_SINCE,
    logging,
    ranking::RankAggregator,
    report::{self, OutputFormat, ReportContext},
};

/// Generate the #qmp contributor ranking from changesets extracted by `qmp-collect`.
#[derive(Debug, clap::Parser)]
#[command(version, about)]
struct CommandLine {
    /// JSONL file written by `qmp-collect`
    input_file: PathBuf,
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Markdown)]
    format: OutputFormat,
    /// Output file path [default: docs/index.md, qmp_ranking.json or qmp_ranking.csv]
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Changeset dump whose modification time is shown in the Markdown report
    #[arg(long, default_value = report::DEFAULT_PLANET_FILE)]
    planet_file: PathBuf,
    /// First day of the ranking period, as shown in the reports
    #[arg(long, default_value = DEFAULT_SINCE)]
    since: NaiveDate,
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

    logging::init_tracing("info");

    if !args.input_file.exists() {
        bail!("Input file '{}' not found", args.input_file.display());
    }

    println!("Processing changesets from {}...", args.input_file.display());
    println!("Processing QMP changesets from {} onwards", args.since);

    let mut aggregator = RankAggregator::new();
    aggregator.process_file(&args.input_file)?;
    let ranking = aggregator.finish();

    println!("Processed {} total changesets", ranking.total_processed);
    println!(
        "Found {} QMP changesets since {}",
        ranking.matched, args.since
    );
    println!("Found {} unique contributors", ranking.contributors());

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(args.format.default_output_path()));
    let context = ReportContext::now(args.since, &args.planet_file);
    let content = report::render(args.format, &ranking, &context)?;
    report::write_output(&output, &content)?;

    tracing::info!(format = %args.format, contributors = ranking.contributors(), "ranking rendered");
    println!("Ranking written to {}", output.display());

    Ok(())
}
