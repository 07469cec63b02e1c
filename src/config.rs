//! Optional config file loading. Search order: ./manhwa-cli.toml, then
//! $XDG_CONFIG_HOME/manhwa-cli/config.toml (or the platform config dir).

use crate::assembler::MissingPagePolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const LOCAL_FILE: &str = "manhwa-cli.toml";
const APP_DIR: &str = "manhwa-cli";

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default, deny_unknown_fields)]
pub struct Config {
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Delay in milliseconds between requests.
    pub request_delay_ms: Option<u64>,
    /// Number of HTTP attempts for transient failures (default 2).
    pub retry_count: Option<u32>,
    /// Delay in seconds before each retry, e.g. [1, 2].
    pub retry_backoff_secs: Option<Vec<u64>>,
    /// Maximum number of search results shown.
    pub default_limit: Option<usize>,
    /// Chapters per menu page.
    pub page_size: Option<usize>,
    /// skip (default) or abort.
    pub missing_pages: Option<MissingPagePolicy>,
}

/// Candidate config paths, most specific first.
pub fn config_paths() -> Result<Vec<PathBuf>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join(LOCAL_FILE)];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join(APP_DIR).join("config.toml"));
    }
    Ok(paths)
}

/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    load_first(&config_paths()?)
}

fn load_first(paths: &[PathBuf]) -> Result<Option<Config>, String> {
    for path in paths {
        if path.exists() {
            return load_file(path).map(Some);
        }
    }
    Ok(None)
}

fn load_file(path: &Path) -> Result<Config, String> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
    toml::from_str(&s).map_err(|e| format!("Invalid config {}: {}", path.display(), e))
}
