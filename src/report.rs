//! Rendering of a [`Ranking`] as Markdown, JSON or CSV.

use std::{
    fmt::{self, Write as _},
    fs,
    path::Path,
};

use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;

use crate::ranking::{Ranking, RankingError};

/// Where the dump is downloaded to, only used to show its age in the Markdown report.
pub const DEFAULT_PLANET_FILE: &str = "data/changesets-latest.osm.bz2";

const PLANET_URL: &str = "https://planet.openstreetmap.org/planet/changesets-latest.osm.bz2";
const REPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
    Csv,
}

impl OutputFormat {
    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        }
    }

    /// Output path used when none is given.
    pub fn default_output_path(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "docs/index.md",
            OutputFormat::Json => "qmp_ranking.json",
            OutputFormat::Csv => "qmp_ranking.csv",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a report shows besides the ranking itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportContext {
    pub generated_at: DateTime<Utc>,
    /// Start of the ranking period.
    pub since: NaiveDate,
    /// Modification time of the changeset dump, if it is around.
    pub source_timestamp: Option<DateTime<Utc>>,
}

impl ReportContext {
    pub fn now(since: NaiveDate, planet_file: &Path) -> Self {
        Self {
            generated_at: Utc::now(),
            since,
            source_timestamp: source_timestamp(planet_file),
        }
    }
}

/// Best-effort modification time of `path`.
pub fn source_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let modified = fs::metadata(path).and_then(|metadata| metadata.modified());
    match modified {
        Ok(modified) => Some(DateTime::<Utc>::from(modified)),
        Err(error) => {
            tracing::debug!(path = %path.display(), %error, "no timestamp for source file");
            None
        }
    }
}

pub fn render(
    format: OutputFormat,
    ranking: &Ranking,
    context: &ReportContext,
) -> Result<String, RankingError> {
    match format {
        OutputFormat::Markdown => Ok(render_markdown(ranking, context)),
        OutputFormat::Json => render_json(ranking, context),
        OutputFormat::Csv => render_csv(ranking),
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    meta: JsonMeta,
    ranking: Vec<JsonEntry<'a>>,
}

#[derive(Serialize)]
struct JsonMeta {
    generated_at: String,
    qmp_start_date: String,
    total_contributors: usize,
    total_changesets: u64,
}

#[derive(Serialize)]
struct JsonEntry<'a> {
    rank: usize,
    user: &'a str,
    changeset_size: i64,
}

pub fn render_json(ranking: &Ranking, context: &ReportContext) -> Result<String, RankingError> {
    let report = JsonReport {
        meta: JsonMeta {
            generated_at: context
                .generated_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            qmp_start_date: context.since.format("%Y-%m-%d").to_string(),
            total_contributors: ranking.contributors(),
            total_changesets: ranking.matched,
        },
        ranking: ranking
            .entries
            .iter()
            .map(|entry| JsonEntry {
                rank: entry.rank,
                user: &entry.user,
                changeset_size: entry.total,
            })
            .collect(),
    };

    let mut content = serde_json::to_string_pretty(&report).map_err(RankingError::RenderJson)?;
    content.push('\n');
    Ok(content)
}

pub fn render_csv(ranking: &Ranking) -> Result<String, RankingError> {
    let mut bytes = Vec::new();
    {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(&mut bytes);

        // written by hand so an empty ranking still gets a header
        writer.write_record(["rank", "user", "changeset_size"])?;
        for entry in &ranking.entries {
            writer.serialize((entry.rank, entry.user.as_str(), entry.total))?;
        }
        writer.flush().map_err(csv::Error::from)?;
    }

    // every field came from a `str`
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

// a `|` in a user name would otherwise split the table cell
fn escape_table_cell(text: &str) -> std::borrow::Cow<'_, str> {
    if text.contains('|') {
        text.replace('|', "\\|").into()
    } else {
        text.into()
    }
}

pub fn render_markdown(ranking: &Ranking, context: &ReportContext) -> String {
    let now = context.generated_at.format(REPORT_TIMESTAMP_FORMAT).to_string();
    let planet_timestamp = context
        .source_timestamp
        .map(|timestamp| timestamp.format(REPORT_TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| "Not available".to_string());
    let since = context.since;
    let since_iso = since.format("%Y-%m-%d");
    let since_ja = format!("{}年{}月{}日", since.year(), since.month(), since.day());

    let mut content = String::new();

    // writing to a String never fails
    let _ = write!(
        content,
        r#"<!--
⚠️ このファイルは自動生成されています。手動で編集しないでください。
DO NOT EDIT THIS FILE BY HAND. IT IS AUTO-GENERATED.
-->

# 🏅 Quick Mapping Project Ranking / QMP ランキング

**Generated on / 生成日時:** {now}  
**Planet file timestamp / Planetファイル日時:** {planet_timestamp}  
**Period / 対象期間:** Since QMP start ({since_iso}) / QMP開始日以降（{since_ja}〜）  
**Total Contributors / 総貢献者数:** {contributors}  
**Total QMP Changesets / 総QMPチェンジセット数:** {matched}

| Rank / 順位 | User / ユーザー | Changeset Size (Objects) / チェンジセットサイズ（編集オブジェクト数） |
|------|------|----------------|
"#,
        contributors = ranking.contributors(),
        matched = ranking.matched,
    );

    for entry in &ranking.entries {
        let _ = writeln!(
            content,
            "| {} | {} | {} |",
            entry.rank,
            escape_table_cell(&entry.user),
            entry.total
        );
    }

    let _ = write!(
        content,
        r#"
---

**Note / 注意:**  
The "Changeset Size" column shows the total number of edited objects (nodes, ways, relations) per user.  
「チェンジセットサイズ」はユーザーごとの編集オブジェクト数（ノード・ウェイ・リレーションの合計）です。

This ranking is automatically generated from [planet/changesets-latest.osm.bz2]({PLANET_URL}) using local Rust tools.  
このランキングは [planet/changesets-latest.osm.bz2]({PLANET_URL}) をローカルでRustツールにより抽出し、定期的に自動生成されています。

- Operation is recommended as a cron job on Raspberry Pi or Linux server.  
  運用はRaspberry PiやLinuxサーバーでのcronジョブ実行を推奨
- All processing is local and Rust-based.  
  すべてローカル処理・Rustベース
- GitHub Actions and CI/CD automation are not supported.  
  GitHub ActionsやCI/CDによる自動化はサポートされません

---

*This ranking is automatically generated from OpenStreetMap changesets containing the #qmp tag.*  
*このランキングは#qmpタグを含むOpenStreetMapチェンジセットから自動生成されています。*

*Data collected locally from [planet/changesets-latest.osm.bz2]({PLANET_URL}) using Rust tools.*  
*データはplanetファイルをローカルでRustツールにより抽出しています*

## About QMP / QMPについて

**English:**  
The Quick Mapping Project (#qmp) encourages rapid, collaborative mapping contributions to OpenStreetMap.  
Join the community and contribute to make our map data better!

**日本語:**  
Quick Mapping Project（#qmp）は、OpenStreetMapへの迅速で協力的なマッピング貢献を奨励します。  
コミュニティに参加して、より良い地図データの作成に貢献しましょう！

**Last updated / 最終更新:** {now}
"#
    );

    content
}

/// Write `content` to `path`, creating missing parent directories. An existing file is replaced.
pub fn write_output(path: &Path, content: &str) -> Result<(), RankingError> {
    let to_error = |source| RankingError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(to_error)?;
    }
    fs::write(path, content).map_err(to_error)
}
