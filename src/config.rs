use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ExposureError, Result};

pub const API_KEY_VAR: &str = "SHODAN_API_KEY";
pub const ROOT_VAR: &str = "EXPOSURE_ROOT";

/// Directory layout every subcommand reads from and writes to. Relative
/// paths given on the command line resolve against `root`.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `--root`, then `$EXPOSURE_ROOT`, then the working directory.
    pub fn discover(cli_root: Option<PathBuf>) -> Self {
        let root = cli_root
            .or_else(|| env::var_os(ROOT_VAR).map(PathBuf::from))
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn figures_dir(&self) -> PathBuf {
        self.reports_dir().join("figures")
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("data").join("raw")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join("data").join("processed")
    }

    pub fn collected_csv(&self) -> PathBuf {
        self.reports_dir().join("shodan_raw_data.csv")
    }

    pub fn raw_json(&self) -> PathBuf {
        self.raw_dir().join("shodan_data.json")
    }

    pub fn preset_json(&self, name: &str) -> PathBuf {
        self.raw_dir().join(format!("shodan_{}.json", name))
    }

    pub fn risk_csv(&self) -> PathBuf {
        self.reports_dir().join("risk_data.csv")
    }

    pub fn port_summary_csv(&self) -> PathBuf {
        self.processed_dir().join("open_ports_summary.csv")
    }

    pub fn facet_csv(&self, group: &str, field: &str) -> PathBuf {
        self.processed_dir()
            .join(format!("{}_facets_{}.csv", group, field))
    }
}

/// `.env` files read at startup: the project root's, then the working
/// directory's. Parent directories are not searched.
pub fn dotenv_files(paths: &ProjectPaths) -> Vec<PathBuf> {
    let mut files = vec![paths.root().join(".env")];
    if let Ok(cwd) = env::current_dir() {
        let local = cwd.join(".env");
        if !files.contains(&local) {
            files.push(local);
        }
    }
    files.retain(|f| f.is_file());
    files
}

/// Load the `.env` files above. Variables already present in the
/// environment are left alone.
pub fn load_dotenv(paths: &ProjectPaths) {
    for file in dotenv_files(paths) {
        match dotenvy::from_path(&file) {
            Ok(()) => debug!(path = %file.display(), "loaded .env"),
            Err(e) => debug!(path = %file.display(), error = %e, "failed to load .env"),
        }
    }
}

/// Where the official Shodan CLI stores its key.
pub fn default_key_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("shodan").join("api_key"))
}

/// Pick the API key from the environment value, falling back to the key
/// file. Blank values count as unset.
pub fn resolve_api_key(env_value: Option<String>, key_file: Option<&Path>) -> Result<String> {
    if let Some(key) = env_value.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()) {
        return Ok(key);
    }

    if let Some(path) = key_file {
        if let Ok(contents) = fs::read_to_string(path) {
            let key = contents.trim();
            if !key.is_empty() {
                debug!(path = %path.display(), "using API key file");
                return Ok(key.to_string());
            }
        }
    }

    Err(ExposureError::Config(format!(
        "{} is not set. Export it (e.g. `export {}=...`) or add it to .env",
        API_KEY_VAR, API_KEY_VAR
    )))
}

pub fn api_key() -> Result<String> {
    resolve_api_key(env::var(API_KEY_VAR).ok(), default_key_file().as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_dotenv_files_skip_parent_dirs() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("project");
        fs::create_dir_all(&root).unwrap();
        fs::write(dir.path().join(".env"), "SHODAN_API_KEY=from-parent\n").unwrap();
        let paths = ProjectPaths::new(&root);
        assert!(!dotenv_files(&paths).contains(&dir.path().join(".env")));

        fs::write(root.join(".env"), "SHODAN_API_KEY=from-root\n").unwrap();
        assert_eq!(dotenv_files(&paths)[0], root.join(".env"));
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let paths = ProjectPaths::new("/srv/exposure");
        assert_eq!(
            paths.resolve(Path::new("reports/x.csv")),
            PathBuf::from("/srv/exposure/reports/x.csv")
        );
        assert_eq!(paths.resolve(Path::new("/tmp/x.csv")), PathBuf::from("/tmp/x.csv"));
    }

    #[test]
    fn test_default_layout() {
        let paths = ProjectPaths::new("/p");
        assert_eq!(paths.collected_csv(), PathBuf::from("/p/reports/shodan_raw_data.csv"));
        assert_eq!(paths.raw_json(), PathBuf::from("/p/data/raw/shodan_data.json"));
        assert_eq!(paths.preset_json("rdp"), PathBuf::from("/p/data/raw/shodan_rdp.json"));
        assert_eq!(
            paths.facet_csv("global", "port"),
            PathBuf::from("/p/data/processed/global_facets_port.csv")
        );
        assert_eq!(paths.figures_dir(), PathBuf::from("/p/reports/figures"));
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let dir = tempdir().unwrap();
        let absent = dir.path().join("api_key");
        let err = resolve_api_key(None, Some(&absent)).unwrap_err();
        assert!(matches!(err, ExposureError::Config(_)));
        assert!(err.to_string().contains(API_KEY_VAR));
    }

    #[test]
    fn test_blank_env_falls_back_to_key_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("api_key");
        fs::write(&file, "filekey\n").unwrap();
        let key = resolve_api_key(Some("   ".to_string()), Some(&file)).unwrap();
        assert_eq!(key, "filekey");
    }

    #[test]
    fn test_env_value_wins() {
        let key = resolve_api_key(Some(" envkey ".to_string()), None).unwrap();
        assert_eq!(key, "envkey");
    }
}
