// Summary CSVs and figures built from collected or enriched data

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::aggregate::{port_counts, read_counts, write_counts, CountRow, CountryProtocolCounts};
use crate::charts::{BarChart, GroupedBarChart};
use crate::config::ProjectPaths;
use crate::error::{ExposureError, Result};
use crate::risk::load_matches;
use crate::table::Table;

pub const DEFAULT_HEAD: usize = 10;

/// A facet CSV and how to chart it.
#[derive(Debug, Clone, Copy)]
pub struct FacetChart {
    pub group: &'static str,
    pub field: &'static str,
    pub title: &'static str,
    pub x_label: &'static str,
    pub png: &'static str,
}

impl FacetChart {
    /// `{country}` in the title is replaced with the country code.
    pub fn title_for(&self, country: &str) -> String {
        self.title.replace("{country}", country)
    }
}

pub const FACET_CHARTS: [FacetChart; 6] = [
    FacetChart {
        group: "global",
        field: "port",
        title: "Top Open Ports in {country} (Shodan)",
        x_label: "Port",
        png: "top_ports.png",
    },
    FacetChart {
        group: "global",
        field: "org",
        title: "Top Organizations (by exposed hosts)",
        x_label: "Organization",
        png: "top_orgs.png",
    },
    FacetChart {
        group: "global",
        field: "asn",
        title: "Top ASNs (by exposed hosts)",
        x_label: "ASN",
        png: "top_asns.png",
    },
    FacetChart {
        group: "global",
        field: "product",
        title: "Top Exposed Products/Services",
        x_label: "Product",
        png: "top_products.png",
    },
    FacetChart {
        group: "vuln",
        field: "vuln",
        title: "Top CVEs observed (presence in banners)",
        x_label: "CVE",
        png: "top_cves.png",
    },
    FacetChart {
        group: "ics",
        field: "product",
        title: "ICS/SCADA Products Exposed (sample)",
        x_label: "Product",
        png: "ics_products.png",
    },
];

#[derive(Debug, Clone)]
pub struct PortSummary {
    pub counts: Vec<CountRow>,
    pub csv: PathBuf,
    pub png: PathBuf,
}

/// Count ports over a raw dump and write the summary CSV and chart.
/// Returns `None` when the dump holds no matches.
pub fn summarize_ports(paths: &ProjectPaths, input: &Path) -> Result<Option<PortSummary>> {
    if !input.is_file() {
        return Err(ExposureError::MissingInput(input.to_path_buf()));
    }

    let matches = load_matches(input)?;
    if matches.is_empty() {
        return Ok(None);
    }

    let counts = port_counts(&matches);
    let csv = paths.port_summary_csv();
    write_counts(&counts, "port", &csv)?;

    let png = paths.figures_dir().join("open_ports_distribution.png");
    BarChart::new("Distribution of Open Ports", "Port", "Hosts Found")
        .with_bars(counts.clone())
        .render_png(&png)?;

    info!(matches = matches.len(), ports = counts.len(), "summarized open ports");
    Ok(Some(PortSummary { counts, csv, png }))
}

/// Chart the first `head` rows of every facet CSV that exists and is
/// non-empty. Missing files are skipped.
pub fn render_facet_charts(paths: &ProjectPaths, country: &str, head: usize) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for chart in FACET_CHARTS.iter() {
        let csv = paths.facet_csv(chart.group, chart.field);
        if !csv.is_file() {
            debug!(path = %csv.display(), "facet CSV not present, skipping");
            continue;
        }

        let rows = read_counts(&csv, "value")?;
        if rows.is_empty() {
            debug!(path = %csv.display(), "facet CSV empty, skipping");
            continue;
        }

        let bars = BarChart::new(chart.title_for(country), chart.x_label, "Count")
            .with_bars(rows)
            .top(Some(head));
        if bars.bars.is_empty() {
            debug!(path = %csv.display(), head, "nothing left to chart");
            continue;
        }

        let png = paths.figures_dir().join(chart.png);
        bars.render_png(&png)?;
        written.push(png);
    }
    Ok(written)
}

/// Country × protocol counts from an enriched CSV, rendered as a grouped
/// bar chart.
pub fn compare_countries(input: &Path, output: &Path) -> Result<CountryProtocolCounts> {
    let table = Table::read_csv(input)?;
    let counts = CountryProtocolCounts::from_table(&table);
    if counts.is_empty() {
        return Err(ExposureError::InvalidArgument(format!(
            "{} has no records to compare",
            input.display()
        )));
    }

    GroupedBarChart::by_country(&counts).render_png(output)?;
    info!(countries = counts.countries().len(), protocols = counts.protocols().len(), "rendered country comparison");
    Ok(counts)
}
