use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::mapping::{Enrichment, RiskLevel};
use crate::error::{ExposureError, Result};
use crate::shodan::types::{parse_timestamp, Match, MatchRow};
use crate::table::{missing, suffix, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Json,
    JsonLines,
}

impl InputFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match suffix(path).as_str() {
            "csv" => Ok(InputFormat::Csv),
            "json" => Ok(InputFormat::Json),
            "jsonl" | "ndjson" => Ok(InputFormat::JsonLines),
            _ => Err(ExposureError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Counts gathered while enriching, for the console summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RiskReport {
    pub rows: usize,
    pub by_level: BTreeMap<RiskLevel, usize>,
    pub by_protocol: BTreeMap<&'static str, usize>,
    pub first_seen: Option<NaiveDateTime>,
    pub last_seen: Option<NaiveDateTime>,
}

impl RiskReport {
    fn record(&mut self, enrichment: &Enrichment, observed: Option<NaiveDateTime>) {
        self.rows += 1;
        *self.by_level.entry(enrichment.risk).or_insert(0) += 1;
        if enrichment.is_known() {
            *self.by_protocol.entry(enrichment.protocol).or_insert(0) += 1;
        }
        if let Some(ts) = observed {
            self.first_seen = Some(self.first_seen.map_or(ts, |f| f.min(ts)));
            self.last_seen = Some(self.last_seen.map_or(ts, |l| l.max(ts)));
        }
    }

    pub fn count(&self, level: RiskLevel) -> usize {
        self.by_level.get(&level).copied().unwrap_or(0)
    }
}

/// Load a collector output as a table. JSON inputs are flattened to the
/// collector's CSV schema.
pub fn load_records(path: &Path) -> Result<Table> {
    let format = InputFormat::from_path(path)?;
    if !path.is_file() {
        return Err(missing(path));
    }

    match format {
        InputFormat::Csv => {
            let table = Table::read_csv(path)?;
            table.require_column("port", path)?;
            Ok(table)
        }
        InputFormat::Json | InputFormat::JsonLines => {
            let matches = load_matches(path)?;
            Ok(flatten_matches(&matches))
        }
    }
}

/// Matches from an API response object, a bare array, or one object per
/// line.
pub fn load_matches(path: &Path) -> Result<Vec<Match>> {
    let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => missing(path),
        _ => ExposureError::Io(e),
    })?;

    if InputFormat::from_path(path)? == InputFormat::JsonLines {
        let mut matches = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Match>(line) {
                Ok(m) => matches.push(m),
                Err(e) => warn!(line = lineno + 1, error = %e, "skipping unreadable JSON line"),
            }
        }
        return Ok(matches);
    }

    let items = match serde_json::from_str::<Value>(&contents)? {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("matches") {
            Some(Value::Array(items)) => items,
            None | Some(Value::Null) => Vec::new(),
            Some(_) => {
                return Err(ExposureError::InvalidArgument(format!(
                    "{}: `matches` is not an array",
                    path.display()
                )))
            }
        },
        _ => {
            return Err(ExposureError::InvalidArgument(format!(
                "{} holds neither a response object nor an array of matches",
                path.display()
            )))
        }
    };
    Ok(decode_matches(items))
}

fn decode_matches(items: Vec<Value>) -> Vec<Match> {
    let mut matches = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<Match>(item) {
            Ok(m) => matches.push(m),
            Err(e) => warn!(index, error = %e, "skipping unreadable match"),
        }
    }
    matches
}

pub fn flatten_matches(matches: &[Match]) -> Table {
    let mut table = Table::new(MatchRow::HEADERS.iter().map(|h| h.to_string()).collect());
    for m in matches {
        table.push_row(MatchRow::from(m).cells());
    }
    table
}

/// Add or overwrite the protocol/risk/cves columns. Only the `port` column
/// is read; every other cell is left untouched.
pub fn enrich_table(table: &mut Table, source: &Path) -> Result<RiskReport> {
    let port_idx = table.require_column("port", source)?;
    let ts_idx = table.column("timestamp");
    let [protocol_idx, risk_idx, cves_idx] = Enrichment::COLUMNS.map(|c| table.ensure_column(c));

    let mut report = RiskReport::default();
    for row in &mut table.rows {
        let enrichment = Enrichment::for_cell(&row[port_idx]);
        let observed = ts_idx.and_then(|i| parse_timestamp(&row[i]));
        report.record(&enrichment, observed);

        let [protocol, risk, cves] = enrichment.cells();
        row[protocol_idx] = protocol;
        row[risk_idx] = risk;
        row[cves_idx] = cves;
    }

    debug!(rows = report.rows, "enriched records");
    Ok(report)
}

pub fn run_risk_analysis(input: &Path, output: &Path) -> Result<RiskReport> {
    let mut table = load_records(input)?;
    info!(input = %input.display(), rows = table.len(), "loaded records");

    let report = enrich_table(&mut table, input)?;
    table.write_csv(output)?;
    info!(output = %output.display(), "wrote enriched records");
    Ok(report)
}
