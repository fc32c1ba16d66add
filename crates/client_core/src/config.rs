use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "operator.toml";
pub const DEFAULT_ALLOWED_CRS: [&str; 3] = ["EPSG:3857", "EPSG:4978", "EPSG:26915"];
pub const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_base: String,
    /// Operator credential sent as `X-API-Key` when present.
    pub api_key: Option<String>,
    pub page_size: u64,
    pub download_dir: PathBuf,
    /// Used until the service advertises its own list via `/config`.
    pub allowed_crs: Vec<String>,
    pub direct_latest_lookup: bool,
    pub request_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000".into(),
            api_key: None,
            page_size: 20,
            download_dir: PathBuf::from("downloads"),
            allowed_crs: DEFAULT_ALLOWED_CRS.iter().map(|crs| crs.to_string()).collect(),
            direct_latest_lookup: true,
            request_timeout: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    api_base: Option<String>,
    api_key: Option<String>,
    page_size: Option<u64>,
    download_dir: Option<PathBuf>,
    allowed_crs: Option<Vec<String>>,
    direct_latest_lookup: Option<bool>,
    request_timeout_secs: Option<u64>,
}

/// Defaults, then `operator.toml` (or `$ROBOROUTER_CONFIG`), then
/// `ROBOROUTER_*` environment variables.
pub fn load_config() -> anyhow::Result<ClientConfig> {
    let path = std::env::var("ROBOROUTER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
    load_config_from(Some(&path), |key| std::env::var(key).ok())
}

pub fn load_config_from(
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<ClientConfig> {
    let mut config = ClientConfig::default();

    if let Some(path) = path {
        if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file '{}'", path.display()))?;
            let file_cfg: FileConfig = toml::from_str(&raw)
                .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
            apply_file_config(&mut config, file_cfg);
        }
    }

    apply_env_overrides(&mut config, env)?;
    validate(&config)?;
    Ok(config)
}

fn apply_file_config(config: &mut ClientConfig, file_cfg: FileConfig) {
    if let Some(v) = file_cfg.api_base {
        config.api_base = v;
    }
    if let Some(v) = file_cfg.api_key {
        config.api_key = Some(v);
    }
    if let Some(v) = file_cfg.page_size {
        config.page_size = v;
    }
    if let Some(v) = file_cfg.download_dir {
        config.download_dir = v;
    }
    if let Some(v) = file_cfg.allowed_crs {
        config.allowed_crs = v;
    }
    if let Some(v) = file_cfg.direct_latest_lookup {
        config.direct_latest_lookup = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        config.request_timeout = (v > 0).then(|| Duration::from_secs(v));
    }
}

fn apply_env_overrides(
    config: &mut ClientConfig,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = env("ROBOROUTER_API_BASE") {
        config.api_base = v;
    }
    if let Some(v) = env("ROBOROUTER_API_KEY") {
        config.api_key = Some(v);
    }
    if let Some(v) = env("ROBOROUTER_PAGE_SIZE") {
        config.page_size = v
            .trim()
            .parse()
            .with_context(|| format!("ROBOROUTER_PAGE_SIZE must be an integer, got '{v}'"))?;
    }
    if let Some(v) = env("ROBOROUTER_DOWNLOAD_DIR") {
        config.download_dir = PathBuf::from(v);
    }
    if let Some(v) = env("ROBOROUTER_ALLOWED_CRS") {
        config.allowed_crs = v
            .split(',')
            .map(str::trim)
            .filter(|crs| !crs.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(v) = env("ROBOROUTER_DIRECT_LATEST") {
        config.direct_latest_lookup = parse_flag(&v)
            .ok_or_else(|| anyhow!("ROBOROUTER_DIRECT_LATEST must be a boolean, got '{v}'"))?;
    }
    if let Some(v) = env("ROBOROUTER_TIMEOUT_SECS") {
        let secs: u64 = v
            .trim()
            .parse()
            .with_context(|| format!("ROBOROUTER_TIMEOUT_SECS must be an integer, got '{v}'"))?;
        config.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }

    // An empty credential means "not configured".
    if config.api_key.as_deref().is_some_and(|key| key.trim().is_empty()) {
        config.api_key = None;
    }
    Ok(())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn validate(config: &ClientConfig) -> anyhow::Result<()> {
    let parsed = url::Url::parse(&config.api_base)
        .with_context(|| format!("api_base '{}' is not a valid URL", config.api_base))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(anyhow!("api_base must start with http:// or https://"));
    }
    if config.page_size == 0 {
        return Err(anyhow!("page_size must be at least 1"));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
