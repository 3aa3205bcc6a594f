use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{StudioError, StudioResult};

/// Environment variable consulted before `api.api_keys` for the initial key.
pub const API_KEY_ENV: &str = "STUDIO_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Header carrying the API key on every request.
    #[serde(default = "default_auth_header")]
    pub auth_header: String,
    /// Candidate keys offered by the key picker, in order.
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            auth_header: default_auth_header(),
            api_keys: Vec::new(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}

fn default_auth_header() -> String {
    "x-goog-api-key".into()
}

fn default_timeout_secs() -> u64 {
    120
}

/// Per-capability model overrides. Absent entries use the registry defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelsConfig {
    pub chat: Option<String>,
    pub reasoning: Option<String>,
    pub image: Option<String>,
    pub image_edit: Option<String>,
    pub video: Option<String>,
    pub speech: Option<String>,
    pub transcription: Option<String>,
    /// Prebuilt voice used for speech synthesis.
    pub voice: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_budget")]
    pub budget: u32,
    #[serde(default = "default_server_fault_delay")]
    pub server_fault_delay_ms: u64,
    #[serde(default = "default_overload_delay")]
    pub overload_delay_ms: u64,
    #[serde(default = "default_reauth_delay")]
    pub reauth_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            budget: default_budget(),
            server_fault_delay_ms: default_server_fault_delay(),
            overload_delay_ms: default_overload_delay(),
            reauth_delay_ms: default_reauth_delay(),
        }
    }
}

fn default_budget() -> u32 {
    1
}

fn default_server_fault_delay() -> u64 {
    3000
}

fn default_overload_delay() -> u64 {
    2000
}

fn default_reauth_delay() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_polls: default_max_polls(),
        }
    }
}

impl VideoConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_poll_interval() -> u64 {
    10_000
}

fn default_max_polls() -> u32 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Overrides the platform data directory.
    pub data_dir: Option<PathBuf>,
    /// Scopes saved projects to one user when set.
    pub user_email: Option<String>,
}

impl StorageConfig {
    /// Returns `<data_local_dir>/AppStudio/store`, falling back to the working directory.
    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        if let Some(base) = dirs::data_local_dir() {
            return base.join("AppStudio").join("store");
        }
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("appstudio-store")
    }
}

fn resolve_config_path() -> StudioResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(StudioError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn parse_config(content: &str) -> StudioResult<AppConfig> {
    Ok(toml::from_str(content)?)
}

pub fn load_config() -> StudioResult<AppConfig> {
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), api_base = %config.api.api_base, "config loaded");
    Ok(config)
}
