// Query the search API and persist raw JSON, flattened CSV and facet counts

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use ipnet::IpNet;
use regex::Regex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::aggregate::{facet_rows, write_counts};
use crate::config::ProjectPaths;
use crate::error::{ExposureError, Result};
use crate::risk::analysis::flatten_matches;
use crate::shodan::{FacetSpec, HostSearch, SearchResponse, PAGE_SIZE};
use crate::table::ensure_parent;

/// Pause between consecutive API requests.
pub const DEFAULT_PAGE_DELAY_MS: u64 = 1000;

lazy_static::lazy_static! {
    static ref COUNTRY_CODE: Regex = Regex::new(r"^[A-Za-z]{2}$").unwrap();
}

/// A named query run by `fetch`.
#[derive(Debug, Clone, Copy)]
pub struct Preset {
    pub name: &'static str,
    pub filter: &'static str,
}

pub const PRESETS: [Preset; 9] = [
    Preset { name: "rdp", filter: "port:3389" },
    Preset { name: "ftp", filter: "port:21" },
    Preset { name: "smb", filter: "port:445" },
    Preset { name: "ssh", filter: "port:22" },
    Preset { name: "http_index", filter: "http.title:\"index of\"" },
    Preset { name: "rtsp", filter: "port:554" },
    Preset { name: "elasticsearch", filter: "port:9200" },
    Preset { name: "mongodb", filter: "port:27017" },
    Preset { name: "redis", filter: "port:6379" },
];

pub const PRESET_LIMIT: usize = 100;

/// A count query and the facets requested for it.
#[derive(Debug, Clone, Copy)]
pub struct FacetGroup {
    pub name: &'static str,
    pub filter: &'static str,
    pub fields: &'static [&'static str],
}

pub const FACET_GROUPS: [FacetGroup; 3] = [
    FacetGroup { name: "global", filter: "", fields: &["port", "org", "asn", "product"] },
    FacetGroup { name: "vuln", filter: "has_vuln:true", fields: &["vuln"] },
    FacetGroup { name: "ics", filter: "tag:ics", fields: &["product"] },
];

/// Upper-cased two-letter country code.
pub fn validate_country(raw: &str) -> Result<String> {
    let code = raw.trim();
    if COUNTRY_CODE.is_match(code) {
        Ok(code.to_ascii_uppercase())
    } else {
        Err(ExposureError::InvalidArgument(format!(
            "country must be a two-letter code, got '{}'",
            raw
        )))
    }
}

/// `country:<CC> <extra> net:<cidr>`, without stray whitespace.
pub fn build_query(country: &str, extra: &str, net: Option<&IpNet>) -> String {
    let mut parts = vec![format!("country:{}", country)];
    let extra = extra.trim();
    if !extra.is_empty() {
        parts.push(extra.to_string());
    }
    if let Some(net) = net {
        parts.push(format!("net:{}", net));
    }
    parts.join(" ")
}

fn page_bar(pages: u64) -> ProgressBar {
    let pb = ProgressBar::new(pages);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("⟦{spinner:.bright_magenta}⟧ [{elapsed_precise}] ⟨{bar:40.bright_green/bright_black}⟩ page {pos}/{len} ({msg})")
    {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏ "));
    }
    pb
}

/// Page through `query` until `limit` matches are held, the API runs out,
/// or a page comes back empty. `delay` is slept between page requests.
pub async fn collect_matches<S>(api: &S, query: &str, limit: usize, delay: Duration) -> Result<SearchResponse>
where
    S: HostSearch + ?Sized,
{
    let mut combined = SearchResponse::default();
    if limit == 0 {
        return Ok(combined);
    }

    let max_pages = limit.div_ceil(PAGE_SIZE) as u32;
    let pb = page_bar(max_pages as u64);

    for page in 1..=max_pages {
        if page > 1 && !delay.is_zero() {
            sleep(delay).await;
        }

        let response = match api.search(query, page).await {
            Ok(response) => response,
            Err(e) => {
                pb.abandon_with_message("failed");
                return Err(e);
            }
        };
        pb.inc(1);

        let received = response.matches.len();
        debug!(page, received, total = ?response.total, "search page");
        if combined.total.is_none() {
            combined.total = response.total;
        }
        combined.matches.extend(response.matches);
        pb.set_message(format!("{} matches", combined.matches.len()));

        let exhausted = combined
            .total
            .map_or(false, |total| combined.matches.len() as u64 >= total);
        if received == 0 || combined.matches.len() >= limit || exhausted {
            break;
        }
    }

    combined.matches.truncate(limit);
    pb.finish_and_clear();
    Ok(combined)
}

pub fn write_matches_csv(path: &Path, response: &SearchResponse) -> Result<()> {
    flatten_matches(&response.matches).write_csv(path)
}

pub fn save_json(path: &Path, response: &SearchResponse) -> Result<()> {
    ensure_parent(path)?;
    fs::write(path, serde_json::to_string_pretty(response)?)?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct FetchSummary {
    pub saved: Vec<(String, PathBuf, usize)>,
    pub failed: Vec<(String, String)>,
}

/// Run the preset queries for `country`. A failing query is recorded and
/// the remaining ones still run.
pub async fn fetch_presets<S>(
    api: &S,
    paths: &ProjectPaths,
    country: &str,
    only: &[String],
    delay: Duration,
) -> Result<FetchSummary>
where
    S: HostSearch + ?Sized,
{
    let selected: Vec<&Preset> = PRESETS
        .iter()
        .filter(|p| only.is_empty() || only.iter().any(|o| o == p.name))
        .collect();
    if selected.is_empty() {
        let known: Vec<&str> = PRESETS.iter().map(|p| p.name).collect();
        return Err(ExposureError::InvalidArgument(format!(
            "no preset named {:?}; known presets: {}",
            only,
            known.join(", ")
        )));
    }

    let mut summary = FetchSummary::default();
    for (i, preset) in selected.into_iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            sleep(delay).await;
        }

        let query = format!("{} country:\"{}\"", preset.filter, country);
        info!(preset = preset.name, query = %query, "running preset query");

        let outcome = match collect_matches(api, &query, PRESET_LIMIT, delay).await {
            Ok(response) => {
                let path = paths.preset_json(preset.name);
                save_json(&path, &response).map(|_| (path, response.matches.len()))
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok((path, count)) => summary.saved.push((preset.name.to_string(), path, count)),
            Err(e) => {
                warn!(preset = preset.name, error = %e, "preset query failed");
                summary.failed.push((preset.name.to_string(), e.to_string()));
            }
        }
    }
    Ok(summary)
}

/// Issue each facet group's count query and write one `value,count` CSV
/// per facet field.
pub async fn collect_facets<S>(
    api: &S,
    paths: &ProjectPaths,
    country: &str,
    top: usize,
    delay: Duration,
) -> Result<Vec<PathBuf>>
where
    S: HostSearch + ?Sized,
{
    let mut written = Vec::new();
    for (i, group) in FACET_GROUPS.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            sleep(delay).await;
        }

        let query = build_query(country, group.filter, None);
        let facets: Vec<FacetSpec> = group.fields.iter().map(|f| FacetSpec::new(*f, top)).collect();
        let response = api.count(&query, &facets).await?;
        info!(group = group.name, total = ?response.total, "facet counts received");

        for field in group.fields {
            let buckets = response.facets.get(*field).map(Vec::as_slice).unwrap_or(&[]);
            if buckets.is_empty() {
                warn!(group = group.name, field, "API returned no buckets for facet");
            }
            let path = paths.facet_csv(group.name, field);
            write_counts(&facet_rows(buckets), "value", &path)?;
            written.push(path);
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shodan::Match;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Instant;
    use tempfile::tempdir;

    struct FakeSearch {
        pages: Vec<usize>,
        total: u64,
        calls: Mutex<Vec<(String, u32)>>,
        fail_on: Option<&'static str>,
    }

    impl FakeSearch {
        fn new(pages: Vec<usize>, total: u64) -> Self {
            Self { pages, total, calls: Mutex::new(Vec::new()), fail_on: None }
        }
    }

    #[async_trait]
    impl HostSearch for FakeSearch {
        async fn search(&self, query: &str, page: u32) -> Result<SearchResponse> {
            self.calls.lock().unwrap().push((query.to_string(), page));
            if self.fail_on.map_or(false, |f| query.contains(f)) {
                return Err(ExposureError::Api { status: 500, message: "boom".to_string() });
            }
            let n = self.pages.get(page as usize - 1).copied().unwrap_or(0);
            let matches = (0..n)
                .map(|i| Match { port: Some(22), ip_str: Some(format!("192.0.2.{}", i % 250)), ..Match::default() })
                .collect();
            Ok(SearchResponse { matches, total: Some(self.total), facets: BTreeMap::new() })
        }

        async fn count(&self, query: &str, facets: &[FacetSpec]) -> Result<SearchResponse> {
            self.calls.lock().unwrap().push((format!("{} facets={}", query, crate::shodan::facet_param(facets)), 0));
            let mut map = BTreeMap::new();
            for f in facets {
                map.insert(
                    f.field.clone(),
                    vec![
                        crate::shodan::FacetBucket { count: 5, value: serde_json::json!(22) },
                        crate::shodan::FacetBucket { count: 3, value: serde_json::json!(80) },
                    ],
                );
            }
            Ok(SearchResponse { matches: Vec::new(), total: Some(8), facets: map })
        }
    }

    #[test]
    fn test_build_query() {
        assert_eq!(build_query("IL", "", None), "country:IL");
        assert_eq!(build_query("IL", "  port:3389 ", None), "country:IL port:3389");
        let net: IpNet = "192.0.2.0/24".parse().unwrap();
        assert_eq!(build_query("IL", "", Some(&net)), "country:IL net:192.0.2.0/24");
    }

    #[test]
    fn test_validate_country() {
        assert_eq!(validate_country("il").unwrap(), "IL");
        assert!(validate_country("ISR").is_err());
        assert!(validate_country("1L").is_err());
    }

    #[tokio::test]
    async fn test_paging_stops_at_limit() {
        let api = FakeSearch::new(vec![100, 100, 100], 1000);
        let response = collect_matches(&api, "country:IL", 200, Duration::ZERO).await.unwrap();
        assert_eq!(response.matches.len(), 200);
        assert_eq!(api.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_paging_truncates_partial_page() {
        let api = FakeSearch::new(vec![100], 1000);
        let response = collect_matches(&api, "country:IL", 30, Duration::ZERO).await.unwrap();
        assert_eq!(response.matches.len(), 30);
        assert_eq!(response.total, Some(1000));
    }

    #[tokio::test]
    async fn test_paging_stops_when_total_reached() {
        let api = FakeSearch::new(vec![100, 20, 100], 120);
        let response = collect_matches(&api, "country:IL", 500, Duration::ZERO).await.unwrap();
        assert_eq!(response.matches.len(), 120);
        assert_eq!(api.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_paging_stops_on_empty_page() {
        let api = FakeSearch::new(vec![100, 0], 10_000);
        let response = collect_matches(&api, "country:IL", 500, Duration::ZERO).await.unwrap();
        assert_eq!(response.matches.len(), 100);
        assert_eq!(api.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delay_between_pages() {
        let api = FakeSearch::new(vec![100, 100, 100], 1000);
        let start = Instant::now();
        collect_matches(&api, "country:IL", 300, Duration::from_millis(30)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(60));
        let pages: Vec<u32> = api.calls.lock().unwrap().iter().map(|c| c.1).collect();
        assert_eq!(pages, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fetch_presets_continues_after_failure() {
        let dir = tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        let mut api = FakeSearch::new(vec![3], 3);
        api.fail_on = Some("port:21");
        let only = vec!["rdp".to_string(), "ftp".to_string(), "ssh".to_string()];
        let summary = fetch_presets(&api, &paths, "IL", &only, Duration::ZERO).await.unwrap();
        assert_eq!(summary.saved.len(), 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "ftp");
        assert!(paths.preset_json("rdp").is_file());
        assert!(!paths.preset_json("ftp").exists());
        let first_query = &api.calls.lock().unwrap()[0].0;
        assert_eq!(first_query, "port:3389 country:\"IL\"");
    }

    #[tokio::test]
    async fn test_fetch_presets_rejects_unknown_name() {
        let dir = tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        let api = FakeSearch::new(vec![1], 1);
        let err = fetch_presets(&api, &paths, "IL", &["telnet".to_string()], Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, ExposureError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_collect_facets_writes_csvs() {
        let dir = tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        let api = FakeSearch::new(vec![], 0);
        let written = collect_facets(&api, &paths, "IL", 10, Duration::ZERO).await.unwrap();
        assert_eq!(written.len(), 6);
        let port_csv = fs::read_to_string(paths.facet_csv("global", "port")).unwrap();
        assert_eq!(port_csv, "value,count\n22,5\n80,3\n");
        assert!(paths.facet_csv("vuln", "vuln").is_file());
        assert!(paths.facet_csv("ics", "product").is_file());
        let calls = api.calls.lock().unwrap();
        assert_eq!(calls[0].0, "country:IL facets=port:10,org:10,asn:10,product:10");
        assert_eq!(calls[1].0, "country:IL has_vuln:true facets=vuln:10");
    }

    #[test]
    fn test_csv_and_json_outputs() {
        let dir = tempdir().unwrap();
        let response: SearchResponse = serde_json::from_str(
            r#"{"matches": [{"ip_str": "192.0.2.5", "port": 445, "transport": "tcp", "asn": "AS8551",
                "location": {"country_code": "IL"}, "org": "Acme, Ltd", "data": "x"}], "total": 1}"#,
        )
        .unwrap();
        let csv_path = dir.path().join("reports").join("out.csv");
        write_matches_csv(&csv_path, &response).unwrap();
        assert_eq!(
            fs::read_to_string(&csv_path).unwrap(),
            "ip,port,transport,country,org,asn,product,timestamp\n192.0.2.5,445,tcp,IL,\"Acme, Ltd\",AS8551,,\n"
        );

        let json_path = dir.path().join("data").join("raw").join("shodan_data.json");
        save_json(&json_path, &response).unwrap();
        let reloaded: serde_json::Value = serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(reloaded["matches"][0]["data"], "x");
        assert_eq!(reloaded["matches"][0]["asn"], "AS8551");
    }
}
