use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::file_service::{get_app_data_dir, read_json_or_default, write_json};
use crate::error::{Error, Result};
use crate::models::{DEFAULT_ZOOM, MAX_DEVICE_PIXEL_RATIO, MAX_ZOOM, MIN_ZOOM};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/v1/";
pub const BASE_URL_ENV: &str = "PREPDESK_API_URL";

const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;

/// Settings as persisted in `config.json`. Every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub device_pixel_ratio: Option<f32>,
    #[serde(default)]
    pub default_zoom: Option<f32>,
    #[serde(default)]
    pub max_upload_bytes: Option<u64>,
}

/// Defaults, file, and environment merged into concrete values.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub base_url: Url,
    pub request_timeout: Duration,
    pub device_pixel_ratio: f32,
    pub default_zoom: f32,
    pub max_upload_bytes: u64,
}

impl EffectiveConfig {
    pub fn resolve(config: Config, env_base_url: Option<String>) -> Result<Self> {
        let raw_url = env_base_url
            .filter(|url| !url.trim().is_empty())
            .or(config.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            base_url: normalize_base_url(&raw_url)?,
            request_timeout: Duration::from_secs(
                config.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            device_pixel_ratio: config
                .device_pixel_ratio
                .filter(|ratio| ratio.is_finite() && *ratio > 0.0)
                .map(|ratio| ratio.min(MAX_DEVICE_PIXEL_RATIO))
                .unwrap_or(1.0),
            default_zoom: config
                .default_zoom
                .filter(|zoom| zoom.is_finite())
                .map(|zoom| zoom.clamp(MIN_ZOOM, MAX_ZOOM))
                .unwrap_or(DEFAULT_ZOOM),
            max_upload_bytes: config.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        })
    }
}

/// Relative joins only work against a base path ending in `/`.
fn normalize_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    let url = Url::parse(&with_slash)?;
    if url.cannot_be_a_base() {
        return Err(Error::Config(format!("{} cannot be used as a base URL", raw)));
    }
    Ok(url)
}

fn get_config_path() -> Result<PathBuf> {
    Ok(get_app_data_dir()?.join("config.json"))
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    read_json_or_default(path)
}

pub fn save_config_to(path: &Path, config: &Config) -> Result<()> {
    write_json(path, config)
}

pub fn load_config() -> Result<Config> {
    load_config_from(&get_config_path()?)
}

pub fn get_effective_config() -> Result<EffectiveConfig> {
    let config = load_config()?;
    EffectiveConfig::resolve(config, std::env::var(BASE_URL_ENV).ok())
}
