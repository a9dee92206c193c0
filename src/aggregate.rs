// Group-by/count over matches, facet CSVs and enriched records

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use tracing::warn;

use crate::error::Result;
use crate::shodan::types::{FacetBucket, Match};
use crate::table::Table;

pub const UNKNOWN: &str = "Unknown";
pub const NO_COUNTRY: &str = "NA";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountRow {
    pub value: String,
    pub count: u64,
}

impl CountRow {
    pub fn new(value: impl Into<String>, count: u64) -> Self {
        Self { value: value.into(), count }
    }
}

/// Count occurrences, most frequent first. Blank or absent values land under
/// `missing_label`. Equal counts keep first-seen order.
pub fn count_by<I>(values: I, missing_label: &str) -> Vec<CountRow>
where
    I: IntoIterator<Item = Option<String>>,
{
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, u64> = HashMap::new();

    for value in values {
        let key = value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| missing_label.to_string());
        let slot = counts.entry(key.clone()).or_insert(0);
        if *slot == 0 {
            order.push(key);
        }
        *slot += 1;
    }

    let mut rows: Vec<CountRow> = order
        .into_iter()
        .map(|value| {
            let count = counts[&value];
            CountRow { value, count }
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows
}

pub fn port_counts(matches: &[Match]) -> Vec<CountRow> {
    count_by(matches.iter().map(|m| m.port.map(|p| p.to_string())), UNKNOWN)
}

/// Facet buckets in the order the API reported them.
pub fn facet_rows(buckets: &[FacetBucket]) -> Vec<CountRow> {
    buckets
        .iter()
        .map(|b| {
            let label = b.label();
            let value = if label.trim().is_empty() { UNKNOWN.to_string() } else { label };
            CountRow::new(value, b.count)
        })
        .collect()
}

pub fn counts_table(rows: &[CountRow], key_header: &str) -> Table {
    let mut table = Table::new(vec![key_header.to_string(), "count".to_string()]);
    for row in rows {
        table.push_row(vec![row.value.clone(), row.count.to_string()]);
    }
    table
}

pub fn write_counts(rows: &[CountRow], key_header: &str, path: &Path) -> Result<()> {
    counts_table(rows, key_header).write_csv(path)
}

/// Read a `value,count` CSV in file order. Rows with an unreadable count
/// are skipped.
pub fn read_counts(path: &Path, key_header: &str) -> Result<Vec<CountRow>> {
    let table = Table::read_csv(path)?;
    let key_idx = table.require_column(key_header, path)?;
    let count_idx = table.require_column("count", path)?;

    let mut rows = Vec::with_capacity(table.len());
    for (i, row) in table.rows.iter().enumerate() {
        let raw = row[count_idx].trim();
        let count = raw
            .parse::<u64>()
            .ok()
            .or_else(|| raw.parse::<f64>().ok().filter(|c| *c >= 0.0 && c.fract() == 0.0).map(|c| c as u64));
        match count {
            Some(count) => {
                let value = row[key_idx].trim();
                let value = if value.is_empty() { UNKNOWN } else { value };
                rows.push(CountRow::new(value, count));
            }
            None => warn!(path = %path.display(), row = i + 1, count = raw, "skipping row with bad count"),
        }
    }
    Ok(rows)
}

/// Per-country protocol counts from enriched records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountryProtocolCounts {
    counts: BTreeMap<String, BTreeMap<String, u64>>,
}

impl CountryProtocolCounts {
    pub fn from_table(table: &Table) -> Self {
        let country_idx = table.column("country");
        let protocol_idx = table.column("protocol");
        if country_idx.is_none() {
            warn!("no 'country' column; every row counts as {}", NO_COUNTRY);
        }
        if protocol_idx.is_none() {
            warn!("no 'protocol' column; every row counts as {}", UNKNOWN);
        }

        let mut result = Self::default();
        for row in &table.rows {
            let cell = |idx: Option<usize>, fallback: &str| {
                idx.map(|i| row[i].trim())
                    .filter(|v| !v.is_empty())
                    .unwrap_or(fallback)
                    .to_string()
            };
            result.add(cell(country_idx, NO_COUNTRY), cell(protocol_idx, UNKNOWN));
        }
        result
    }

    pub fn add(&mut self, country: String, protocol: String) {
        *self
            .counts
            .entry(country)
            .or_default()
            .entry(protocol)
            .or_insert(0) += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Countries, alphabetically.
    pub fn countries(&self) -> Vec<String> {
        self.counts.keys().cloned().collect()
    }

    /// Every protocol seen in any country, alphabetically.
    pub fn protocols(&self) -> Vec<String> {
        self.counts
            .values()
            .flat_map(|by_protocol| by_protocol.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn get(&self, country: &str, protocol: &str) -> u64 {
        self.counts
            .get(country)
            .and_then(|p| p.get(protocol))
            .copied()
            .unwrap_or(0)
    }

    /// One value per country for `protocol`, zero where it was not seen.
    pub fn series(&self, protocol: &str) -> Vec<u64> {
        self.counts.keys().map(|c| self.get(c, protocol)).collect()
    }
}
