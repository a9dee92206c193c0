// Subcommand handlers: resolve paths and settings, run one step, report

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::{ChartsArgs, Cli, CollectArgs, Command, CompareArgs, FacetsArgs, FetchArgs, RiskArgs, SummarizeArgs};
use crate::collector::{self, validate_country};
use crate::config::{self, ProjectPaths};
use crate::output::{self, ReportWriter};
use crate::report;
use crate::risk::run_risk_analysis;
use crate::shodan::ShodanClient;

pub async fn run(cli: Cli) -> Result<()> {
    let paths = ProjectPaths::discover(cli.root);
    config::load_dotenv(&paths);

    match cli.command {
        Command::Collect(args) => collect(&paths, args).await,
        Command::Fetch(args) => fetch(&paths, args).await,
        Command::Facets(args) => facets(&paths, args).await,
        Command::Summarize(args) => summarize(&paths, args),
        Command::Risk(args) => risk(&paths, args),
        Command::Charts(args) => charts(&paths, args),
        Command::Compare(args) => compare(&paths, args),
    }
}

/// The key is checked before any request is built.
fn client() -> Result<ShodanClient> {
    let key = config::api_key()?;
    Ok(ShodanClient::new(key)?)
}

async fn collect(paths: &ProjectPaths, args: CollectArgs) -> Result<()> {
    let country = validate_country(&args.country)?;
    let api = client()?;

    let query = collector::build_query(&country, &args.query, args.net.as_ref());
    let out_csv = args
        .output
        .map(|p| paths.resolve(&p))
        .unwrap_or_else(|| paths.collected_csv());

    println!("[+] Query: {} | limit={}", query, args.limit);
    let response = collector::collect_matches(&api, &query, args.limit, Duration::from_millis(args.page_delay_ms))
        .await
        .with_context(|| format!("search failed for '{}'", query))?;
    println!("[+] Matches: {}", response.matches.len());

    collector::write_matches_csv(&out_csv, &response)
        .with_context(|| format!("writing {}", out_csv.display()))?;
    output::saved(&format!("CSV ({} rows) saved:", response.matches.len()), &out_csv);

    if args.save_json {
        let json_path = paths.raw_json();
        collector::save_json(&json_path, &response)
            .with_context(|| format!("writing {}", json_path.display()))?;
        output::saved("JSON saved:", &json_path);
    }
    Ok(())
}

async fn fetch(paths: &ProjectPaths, args: FetchArgs) -> Result<()> {
    let country = validate_country(&args.country)?;
    let api = client()?;

    let summary = collector::fetch_presets(
        &api,
        paths,
        &country,
        &args.only,
        Duration::from_millis(args.page_delay_ms),
    )
    .await?;

    for (name, path, count) in &summary.saved {
        output::saved(&format!("{} ({} results) saved:", name, count), path);
    }
    for (name, error) in &summary.failed {
        output::warning(&format!("query '{}' failed: {}", name, error));
    }
    info!(saved = summary.saved.len(), failed = summary.failed.len(), "preset queries finished");
    Ok(())
}

async fn facets(paths: &ProjectPaths, args: FacetsArgs) -> Result<()> {
    let country = validate_country(&args.country)?;
    let api = client()?;

    let written = collector::collect_facets(
        &api,
        paths,
        &country,
        args.top,
        Duration::from_millis(args.page_delay_ms),
    )
    .await
    .context("facet query failed")?;

    for path in &written {
        output::saved("facet counts saved:", path);
    }
    Ok(())
}

fn summarize(paths: &ProjectPaths, args: SummarizeArgs) -> Result<()> {
    let input = args
        .input
        .map(|p| paths.resolve(&p))
        .unwrap_or_else(|| paths.raw_json());

    match report::summarize_ports(paths, &input)? {
        Some(summary) => {
            output::saved("port summary saved:", &summary.csv);
            output::saved("chart saved:", &summary.png);
        }
        None => output::warning(&format!("no matches in {}", input.display())),
    }
    Ok(())
}

fn risk(paths: &ProjectPaths, args: RiskArgs) -> Result<()> {
    let input = args
        .input
        .map(|p| paths.resolve(&p))
        .unwrap_or_else(|| paths.collected_csv());
    let out = args
        .output
        .map(|p| paths.resolve(&p))
        .unwrap_or_else(|| paths.risk_csv());

    let report = run_risk_analysis(&input, &out)
        .with_context(|| format!("risk analysis of {}", input.display()))?;
    ReportWriter::new(args.format).write_risk(&report, &out)?;
    Ok(())
}

fn charts(paths: &ProjectPaths, args: ChartsArgs) -> Result<()> {
    let country = validate_country(&args.country)?;
    let written = report::render_facet_charts(paths, &country, args.head)?;
    if written.is_empty() {
        output::warning(&format!("no facet CSVs found in {}", paths.processed_dir().display()));
    }
    for path in &written {
        output::saved("chart saved:", path);
    }
    println!("Charts saved to {}", paths.figures_dir().display());
    Ok(())
}

fn compare(paths: &ProjectPaths, args: CompareArgs) -> Result<()> {
    let input = args
        .input
        .map(|p| paths.resolve(&p))
        .unwrap_or_else(|| paths.risk_csv());
    let out = args
        .output
        .map(|p| paths.resolve(&p))
        .unwrap_or_else(|| paths.figures_dir().join("comparison_by_country.png"));

    report::compare_countries(&input, &out)
        .with_context(|| format!("comparing countries in {}", input.display()))?;
    output::saved("chart saved:", &out);
    Ok(())
}
