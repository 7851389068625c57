use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::errors::ClusteringError;
use crate::external::universe_source::UniverseSource;
use crate::models::asset::{Asset, Observation, Universe};

/// One row of a long-format series file: `symbol,date,value`.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "Symbol", alias = "ticker", alias = "Ticker")]
    symbol: String,
    #[serde(alias = "Date", alias = "timestamp")]
    date: String,
    #[serde(alias = "Adj_Close", alias = "adj_close", alias = "close", alias = "Close")]
    value: f64,
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse long-format CSV content into a universe.
///
/// Rows that fail to parse are skipped and counted; observations are sorted
/// by timestamp per asset.
pub fn parse_universe(content: &str) -> Result<Universe, ClusteringError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut series: BTreeMap<String, Vec<Observation>> = BTreeMap::new();
    let mut errors = Vec::new();

    for (line_num, result) in reader.deserialize::<CsvRow>().enumerate() {
        // Header is line 1.
        let line = line_num + 2;
        match result {
            Ok(row) => match parse_timestamp(&row.date) {
                Some(timestamp) => series.entry(row.symbol).or_default().push(Observation {
                    timestamp,
                    value: row.value,
                }),
                None => errors.push(format!("line {}: invalid date '{}'", line, row.date)),
            },
            Err(e) => errors.push(format!("line {}: {}", line, e)),
        }
    }

    if !errors.is_empty() {
        warn!("⚠️ Skipped {} malformed rows; first: {}", errors.len(), errors[0]);
    }

    let assets = series
        .into_iter()
        .map(|(symbol, mut observations)| {
            observations.sort_by_key(|o| o.timestamp);
            Asset::new(symbol, observations)
        })
        .collect();
    Universe::new(assets)
}

/// Series loaded from a CSV file on disk.
pub struct CsvUniverseSource {
    path: PathBuf,
}

impl CsvUniverseSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl UniverseSource for CsvUniverseSource {
    async fn load_universe(&self) -> Result<Universe, ClusteringError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let universe = parse_universe(&content)?;
        info!("📥 Loaded {} assets from {}", universe.len(), self.path.display());
        Ok(universe)
    }

    fn describe(&self) -> String {
        format!("csv file {}", self.path.display())
    }
}
