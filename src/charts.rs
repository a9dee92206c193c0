// PNG bar charts rendered with plotters

use std::fmt::Display;
use std::path::Path;

use plotters::coord::ranged1d::SegmentValue;
use plotters::prelude::*;
use tracing::debug;

use crate::aggregate::{CountRow, CountryProtocolCounts};
use crate::error::{ExposureError, Result};
use crate::table::ensure_parent;

const BAR_SIZE: (u32, u32) = (1000, 600);
const GROUPED_SIZE: (u32, u32) = (1100, 600);
const MAX_LABEL_CHARS: usize = 18;
const BAR_COLOR: RGBColor = RGBColor(31, 119, 180);

fn chart_err<E: Display>(e: E) -> ExposureError {
    ExposureError::Chart(e.to_string())
}

fn short_label(label: &str) -> String {
    if label.chars().count() <= MAX_LABEL_CHARS {
        label.to_string()
    } else {
        let cut: String = label.chars().take(MAX_LABEL_CHARS - 1).collect();
        format!("{}…", cut)
    }
}

/// Headroom above the tallest bar so it does not touch the frame.
fn y_ceiling(max: u64) -> u64 {
    max + max / 10 + 1
}

/// One bar per row, drawn left to right in the order given.
#[derive(Debug, Clone, PartialEq)]
pub struct BarChart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub bars: Vec<CountRow>,
}

impl BarChart {
    pub fn new(title: impl Into<String>, x_label: impl Into<String>, y_label: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            x_label: x_label.into(),
            y_label: y_label.into(),
            bars: Vec::new(),
        }
    }

    pub fn with_bars(mut self, bars: Vec<CountRow>) -> Self {
        self.bars = bars;
        self
    }

    /// Keep only the first `n` bars; `None` keeps all.
    pub fn top(mut self, n: Option<usize>) -> Self {
        if let Some(n) = n {
            self.bars.truncate(n);
        }
        self
    }

    pub fn labels(&self) -> Vec<&str> {
        self.bars.iter().map(|b| b.value.as_str()).collect()
    }

    pub fn heights(&self) -> Vec<u64> {
        self.bars.iter().map(|b| b.count).collect()
    }

    pub fn render_png(&self, path: &Path) -> Result<()> {
        if self.bars.is_empty() {
            return Err(ExposureError::Chart(format!("'{}' has no bars to draw", self.title)));
        }
        ensure_parent(path)?;

        let n = self.bars.len();
        let labels: Vec<String> = self.bars.iter().map(|b| short_label(&b.value)).collect();
        let max = self.bars.iter().map(|b| b.count).max().unwrap_or(0);

        let root = BitMapBackend::new(path, BAR_SIZE).into_drawing_area();
        root.fill(&WHITE).map_err(chart_err)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(&self.title, ("sans-serif", 24))
            .margin(15)
            .x_label_area_size(60)
            .y_label_area_size(60)
            .build_cartesian_2d((0..n).into_segmented(), 0u64..y_ceiling(max))
            .map_err(chart_err)?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_desc(self.x_label.as_str())
            .y_desc(self.y_label.as_str())
            .x_labels(n)
            .x_label_formatter(&|v: &SegmentValue<usize>| match v {
                SegmentValue::CenterOf(i) => labels.get(*i).cloned().unwrap_or_default(),
                _ => String::new(),
            })
            .draw()
            .map_err(chart_err)?;

        chart
            .draw_series(
                Histogram::vertical(&chart)
                    .style(BAR_COLOR.filled())
                    .margin(8)
                    .data(self.bars.iter().enumerate().map(|(i, b)| (i, b.count))),
            )
            .map_err(chart_err)?;

        root.present().map_err(chart_err)?;
        debug!(path = %path.display(), bars = n, "rendered bar chart");
        Ok(())
    }
}

/// Clustered bars: one cluster per group, one coloured bar per series.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedBarChart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub legend_title: String,
    pub groups: Vec<String>,
    pub series: Vec<(String, Vec<u64>)>,
}

impl GroupedBarChart {
    /// Countries on the x axis, one series per protocol.
    pub fn by_country(counts: &CountryProtocolCounts) -> Self {
        let series = counts
            .protocols()
            .into_iter()
            .map(|p| {
                let values = counts.series(&p);
                (p, values)
            })
            .collect();
        Self {
            title: "Exposed Services by Country".to_string(),
            x_label: "Country".to_string(),
            y_label: "Number of Exposed Hosts".to_string(),
            legend_title: "Protocol".to_string(),
            groups: counts.countries(),
            series,
        }
    }

    pub fn render_png(&self, path: &Path) -> Result<()> {
        if self.groups.is_empty() || self.series.is_empty() {
            return Err(ExposureError::Chart(format!("'{}' has no data to draw", self.title)));
        }
        ensure_parent(path)?;

        let n = self.groups.len();
        let width = 0.8 / self.series.len() as f64;
        let max = self
            .series
            .iter()
            .flat_map(|(_, values)| values.iter().copied())
            .max()
            .unwrap_or(0);
        let groups: Vec<String> = self.groups.iter().map(|g| short_label(g)).collect();

        let root = BitMapBackend::new(path, GROUPED_SIZE).into_drawing_area();
        root.fill(&WHITE).map_err(chart_err)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(&self.title, ("sans-serif", 24))
            .margin(15)
            .x_label_area_size(60)
            .y_label_area_size(60)
            .build_cartesian_2d(-0.5f64..(n as f64 - 0.5), 0u64..y_ceiling(max))
            .map_err(chart_err)?;

        // Group i is centred on x = i; only label those positions.
        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_desc(self.x_label.as_str())
            .y_desc(self.y_label.as_str())
            .x_labels(n)
            .x_label_formatter(&|x: &f64| {
                let nearest = x.round();
                if (x - nearest).abs() > 1e-6 || nearest < 0.0 {
                    return String::new();
                }
                groups.get(nearest as usize).cloned().unwrap_or_default()
            })
            .draw()
            .map_err(chart_err)?;

        for (j, (name, values)) in self.series.iter().enumerate() {
            let color = Palette99::pick(j).to_rgba();
            let offset = -0.4 + j as f64 * width;
            chart
                .draw_series(values.iter().enumerate().map(move |(i, v)| {
                    let x0 = i as f64 + offset;
                    Rectangle::new([(x0, 0u64), (x0 + width, *v)], color.filled())
                }))
                .map_err(chart_err)?
                .label(name.as_str())
                .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 12, y + 5)], color.filled()));
        }

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(&WHITE.mix(0.85))
            .border_style(&BLACK)
            .draw()
            .map_err(chart_err)?;

        root.draw(&Text::new(
            self.legend_title.clone(),
            (GROUPED_SIZE.0 as i32 - 170, 42),
            ("sans-serif", 16).into_font(),
        ))
        .map_err(chart_err)?;

        root.present().map_err(chart_err)?;
        debug!(path = %path.display(), groups = n, series = self.series.len(), "rendered grouped chart");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;
    use tempfile::tempdir;

    #[test]
    fn test_facet_bars_keep_given_order() {
        let chart = BarChart::new("Top Open Ports", "Port", "Count")
            .with_bars(vec![CountRow::new("22", 5), CountRow::new("80", 3)]);
        assert_eq!(chart.labels(), vec!["22", "80"]);
        assert_eq!(chart.heights(), vec![5, 3]);
    }

    #[test]
    fn test_top_truncates() {
        let bars = (0..15).map(|i| CountRow::new(i.to_string(), 15 - i)).collect();
        let chart = BarChart::new("t", "x", "y").with_bars(bars).top(Some(10));
        assert_eq!(chart.bars.len(), 10);
        assert_eq!(chart.bars[0].value, "0");
        let all = BarChart::new("t", "x", "y")
            .with_bars(vec![CountRow::new("a", 1)])
            .top(None);
        assert_eq!(all.bars.len(), 1);
    }

    #[test]
    fn test_empty_chart_is_an_error() {
        let dir = tempdir().unwrap();
        let err = BarChart::new("empty", "x", "y")
            .render_png(&dir.path().join("empty.png"))
            .unwrap_err();
        assert!(matches!(err, ExposureError::Chart(_)));
        assert!(!dir.path().join("empty.png").exists());
    }

    #[test]
    fn test_by_country_series() {
        let mut table = Table::new(vec!["country".to_string(), "protocol".to_string()]);
        for (c, p) in [("IL", "SSH"), ("DE", "RDP"), ("IL", "RDP")] {
            table.push_row(vec![c.to_string(), p.to_string()]);
        }
        let chart = GroupedBarChart::by_country(&CountryProtocolCounts::from_table(&table));
        assert_eq!(chart.groups, vec!["DE", "IL"]);
        assert_eq!(
            chart.series,
            vec![("RDP".to_string(), vec![1, 1]), ("SSH".to_string(), vec![0, 1])]
        );
        assert_eq!(chart.legend_title, "Protocol");
    }

    #[test]
    fn test_short_label() {
        assert_eq!(short_label("SSH"), "SSH");
        let long = short_label("Some Very Long Organization Name Ltd");
        assert_eq!(long.chars().count(), MAX_LABEL_CHARS);
        assert!(long.ends_with('…'));
    }

    #[test]
    fn test_render_bar_chart_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("figures").join("top_ports.png");
        BarChart::new("Top Open Ports", "Port", "Count")
            .with_bars(vec![CountRow::new("22", 5), CountRow::new("80", 3)])
            .render_png(&path)
            .unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }
}
