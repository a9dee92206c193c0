use clap::{Args, Parser, Subcommand};
use ipnet::IpNet;
use std::path::PathBuf;

use crate::collector::DEFAULT_PAGE_DELAY_MS;
use crate::output::OutputFormat;
use crate::report::DEFAULT_HEAD;

#[derive(Parser, Debug)]
#[command(name = "exposure")]
#[command(author = "exposure-scope")]
#[command(version)]
#[command(about = "Country-level internet exposure collection, risk enrichment and charting over the Shodan API", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(long, global = true, help = "Project root that relative paths resolve against (default: $EXPOSURE_ROOT or the current directory)")]
    pub root: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search one country and write a flattened CSV of matches
    Collect(CollectArgs),
    /// Run the preset exposure queries and save one raw JSON per query
    Fetch(FetchArgs),
    /// Fetch facet counts (ports, orgs, ASNs, products, CVEs, ICS) as CSVs
    Facets(FacetsArgs),
    /// Count open ports in a raw JSON dump and chart the distribution
    Summarize(SummarizeArgs),
    /// Add protocol/risk/cves columns to collected records
    Risk(RiskArgs),
    /// Chart the top rows of every facet CSV
    Charts(ChartsArgs),
    /// Chart exposed protocols per country from enriched records
    Compare(CompareArgs),
}

#[derive(Args, Debug)]
pub struct CollectArgs {
    #[arg(short, long, default_value = "IL", help = "Two-letter country code")]
    pub country: String,

    #[arg(short, long, default_value = "", help = "Extra query filter, e.g. \"port:3389\"")]
    pub query: String,

    #[arg(long, help = "Restrict to a network in CIDR notation")]
    pub net: Option<IpNet>,

    #[arg(short, long, default_value_t = 200, help = "Maximum number of matches to keep")]
    pub limit: usize,

    #[arg(short, long, help = "CSV output path (default: reports/shodan_raw_data.csv)")]
    pub output: Option<PathBuf>,

    #[arg(long, help = "Also save the raw response to data/raw/shodan_data.json")]
    pub save_json: bool,

    #[arg(long, default_value_t = DEFAULT_PAGE_DELAY_MS, help = "Delay between page requests in milliseconds")]
    pub page_delay_ms: u64,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    #[arg(short, long, default_value = "IL", help = "Two-letter country code")]
    pub country: String,

    #[arg(long, value_delimiter = ',', help = "Only run these presets (comma separated)")]
    pub only: Vec<String>,

    #[arg(long, default_value_t = DEFAULT_PAGE_DELAY_MS, help = "Delay between requests in milliseconds")]
    pub page_delay_ms: u64,
}

#[derive(Args, Debug)]
pub struct FacetsArgs {
    #[arg(short, long, default_value = "IL", help = "Two-letter country code")]
    pub country: String,

    #[arg(long, default_value_t = DEFAULT_HEAD, help = "Buckets requested per facet")]
    pub top: usize,

    #[arg(long, default_value_t = DEFAULT_PAGE_DELAY_MS, help = "Delay between requests in milliseconds")]
    pub page_delay_ms: u64,
}

#[derive(Args, Debug)]
pub struct SummarizeArgs {
    #[arg(short, long, help = "Raw JSON dump (default: data/raw/shodan_data.json)")]
    pub input: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RiskArgs {
    #[arg(short, long, help = "CSV, JSON or NDJSON input (default: reports/shodan_raw_data.csv)")]
    pub input: Option<PathBuf>,

    #[arg(short, long, help = "Enriched CSV output (default: reports/risk_data.csv)")]
    pub output: Option<PathBuf>,

    #[arg(short = 'f', long, value_enum, default_value = "human", help = "Summary format")]
    pub format: OutputFormat,
}

#[derive(Args, Debug)]
pub struct ChartsArgs {
    #[arg(short, long, default_value = "IL", help = "Country code used in chart titles")]
    pub country: String,

    #[arg(
        long,
        default_value_t = DEFAULT_HEAD,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..),
        help = "Bars per chart"
    )]
    pub head: usize,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    #[arg(short, long, help = "Enriched CSV (default: reports/risk_data.csv)")]
    pub input: Option<PathBuf>,

    #[arg(short, long, help = "PNG output (default: reports/figures/comparison_by_country.png)")]
    pub output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_defaults() {
        let cli = Cli::parse_from(["exposure", "collect"]);
        match cli.command {
            Command::Collect(args) => {
                assert_eq!(args.country, "IL");
                assert_eq!(args.limit, 200);
                assert!(!args.save_json);
                assert!(args.output.is_none());
                assert_eq!(args.page_delay_ms, 1000);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_collect_flags() {
        let cli = Cli::parse_from([
            "exposure", "-v", "collect", "-c", "DE", "-q", "port:3389", "-l", "50", "--net", "192.0.2.0/24", "--save-json",
        ]);
        assert!(cli.verbose);
        let Command::Collect(args) = cli.command else { panic!("expected collect") };
        assert_eq!(args.country, "DE");
        assert_eq!(args.query, "port:3389");
        assert_eq!(args.limit, 50);
        assert_eq!(args.net.unwrap().to_string(), "192.0.2.0/24");
        assert!(args.save_json);
    }

    #[test]
    fn test_charts_head_must_be_positive() {
        assert!(Cli::try_parse_from(["exposure", "charts", "--head", "0"]).is_err());
        let cli = Cli::parse_from(["exposure", "charts", "--head", "3"]);
        let Command::Charts(args) = cli.command else { panic!("expected charts") };
        assert_eq!(args.head, 3);
    }

    #[test]
    fn test_bad_cidr_rejected() {
        assert!(Cli::try_parse_from(["exposure", "collect", "--net", "not-a-net"]).is_err());
    }

    #[test]
    fn test_fetch_only_list() {
        let cli = Cli::parse_from(["exposure", "fetch", "--only", "rdp,ssh"]);
        let Command::Fetch(args) = cli.command else { panic!("expected fetch") };
        assert_eq!(args.only, vec!["rdp", "ssh"]);
    }

    #[test]
    fn test_risk_format() {
        let cli = Cli::parse_from(["exposure", "risk", "-i", "in.json", "-f", "json"]);
        let Command::Risk(args) = cli.command else { panic!("expected risk") };
        assert_eq!(args.format, OutputFormat::Json);
        assert_eq!(args.input.unwrap(), PathBuf::from("in.json"));
    }
}
