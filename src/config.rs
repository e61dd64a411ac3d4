use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::catalog::{self, ModelOption};
use crate::errors::CliError;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const API_URL_ENV: &str = "CHATDECK_API_URL";
pub const API_KEY_ENV: &str = "CHATDECK_API_KEY";

/// Settings that outlive a single run. The message log and session token are
/// deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(
        rename = "openai_api_key",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub developer_message: Option<String>,
}

impl Settings {
    /// Stored model, or the default when missing or no longer offered.
    pub fn model_option(&self) -> &'static ModelOption {
        self.model
            .as_deref()
            .and_then(catalog::find_model)
            .unwrap_or_else(catalog::default_model)
    }

    pub fn developer_message_or_default(&self) -> String {
        self.developer_message
            .clone()
            .unwrap_or_else(|| catalog::default_persona().prompt.to_string())
    }
}

pub fn config_path() -> Result<PathBuf, CliError> {
    let base = dirs::config_dir().ok_or_else(|| {
        CliError::Generic("Could not resolve config directory for this OS.".to_string())
    })?;
    Ok(base.join("chatdeck").join("settings.json"))
}

pub fn load_settings() -> Result<Settings, CliError> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(Settings::default());
    }

    let text = fs::read_to_string(&path)?;
    if text.trim().is_empty() {
        return Ok(Settings::default());
    }
    Ok(serde_json::from_str(&text)?)
}

pub fn save_settings(settings: &Settings) -> Result<PathBuf, CliError> {
    let path = config_path()?;
    write_settings(&path, settings)?;
    Ok(path)
}

pub fn write_settings(path: &Path, settings: &Settings) -> Result<(), CliError> {
    let parent = path
        .parent()
        .ok_or_else(|| CliError::Generic("Invalid config path.".to_string()))?;
    fs::create_dir_all(parent)?;
    fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}

pub fn resolve_api_url(settings: &Settings, api_override: Option<&str>) -> Result<String, CliError> {
    let env_url = std::env::var(API_URL_ENV).ok();
    pick_api_url(settings, api_override, env_url.as_deref())
}

fn pick_api_url(
    settings: &Settings,
    api_override: Option<&str>,
    env_url: Option<&str>,
) -> Result<String, CliError> {
    let candidate = api_override
        .or(env_url)
        .or(settings.api_url.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_API_URL);
    validate_url(candidate)?;
    Ok(candidate.trim_end_matches('/').to_string())
}

pub fn env_api_key() -> Option<String> {
    std::env::var(API_KEY_ENV)
        .ok()
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

pub fn resolve_api_key(settings: &Settings) -> Option<String> {
    env_api_key().or_else(|| settings.api_key.clone().filter(|k| !k.is_empty()))
}

pub fn validate_url(value: &str) -> Result<(), CliError> {
    let parsed = Url::parse(value)?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(CliError::Usage(
            "API URL must use http:// or https://.".to_string(),
        ));
    }
    Ok(())
}
