use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_ENGINE_BASE_URL: &str = "http://localhost:5678";
pub const WORKFLOW_ID_PLACEHOLDER: &str = "{workflow_id}";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub retention: RetentionSettings,
    #[serde(default)]
    pub debug: DebugSettings,
    #[serde(default)]
    pub batch: BatchSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Production trigger endpoints only answer while the workflow is active.
    #[serde(default = "default_true")]
    pub endpoints_require_active: bool,
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_command_args")]
    pub command_args: Vec<String>,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointMode {
    #[default]
    Production,
    Test,
}

impl EndpointMode {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointMode::Production => "production",
            EndpointMode::Test => "test",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExecutionSettings {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base: u32,
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
    #[serde(default)]
    pub endpoint_mode: EndpointMode,
    #[serde(default)]
    pub fallback_to_test_endpoint: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetentionSettings {
    #[serde(default)]
    pub keep_last: Option<usize>,
    #[serde(default = "default_keep_logs")]
    pub keep_logs: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DebugSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_true")]
    pub auto_activate: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct BatchSettings {
    #[serde(default = "default_batch_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_batch_concurrency")]
    pub concurrency: usize,
}

/// How the configured API key can be used for privileged execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialState {
    Missing,
    Usable(String),
    Malformed(String),
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            endpoints_require_active: true,
            command: default_command(),
            command_args: default_command_args(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
            backoff_unit_ms: default_backoff_unit_ms(),
            endpoint_mode: EndpointMode::Production,
            fallback_to_test_endpoint: false,
        }
    }
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            keep_last: None,
            keep_logs: default_keep_logs(),
        }
    }
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            auto_activate: true,
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            delay_ms: default_batch_delay_ms(),
            concurrency: default_batch_concurrency(),
        }
    }
}

impl EngineSettings {
    pub fn credential(&self) -> CredentialState {
        let Some(raw) = self.api_key.as_deref() else {
            return CredentialState::Missing;
        };
        if raw.is_empty() {
            return CredentialState::Missing;
        }
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return CredentialState::Malformed("api key is blank".to_string());
        }
        if trimmed
            .chars()
            .any(|ch| ch.is_control() || ch.is_whitespace())
        {
            return CredentialState::Malformed(
                "api key contains whitespace or control characters".to_string(),
            );
        }
        CredentialState::Usable(trimmed.to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn trimmed_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

impl ExecutionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

impl DebugSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Longest time context collection can spend waiting for completion.
    pub fn completion_wait(&self) -> Duration {
        self.poll_interval().saturating_mul(self.max_polls)
    }
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Missing file means defaults; an unreadable or invalid file is an error.
    pub fn from_path_or_default(path: &Path) -> Result<Self, ConfigError> {
        match fs::metadata(path) {
            Ok(_) => Self::from_path(path),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let body = serde_yaml::to_string(self).map_err(|source| ConfigError::Encode {
            path: path.display().to_string(),
            source,
        })?;
        crate::shared::fs_atomic::atomic_write_file(path, body.as_bytes()).map_err(|source| {
            ConfigError::Write {
                path: path.display().to_string(),
                source,
            }
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = self.engine.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Settings(format!(
                "`engine.base_url` must start with http:// or https://, got `{base_url}`"
            )));
        }
        if self.engine.command.trim().is_empty() {
            return Err(ConfigError::Settings(
                "`engine.command` must be non-empty".to_string(),
            ));
        }
        if self.engine.request_timeout_seconds == 0 {
            return Err(ConfigError::Settings(
                "`engine.request_timeout_seconds` must be > 0".to_string(),
            ));
        }
        if self.execution.timeout_seconds == 0 {
            return Err(ConfigError::Settings(
                "`execution.timeout_seconds` must be > 0".to_string(),
            ));
        }
        if self.execution.backoff_base == 0 {
            return Err(ConfigError::Settings(
                "`execution.backoff_base` must be >= 1".to_string(),
            ));
        }
        if self.debug.max_iterations == 0 {
            return Err(ConfigError::Settings(
                "`debug.max_iterations` must be >= 1".to_string(),
            ));
        }
        if self.debug.poll_interval_ms == 0 {
            return Err(ConfigError::Settings(
                "`debug.poll_interval_ms` must be > 0".to_string(),
            ));
        }
        if self.batch.concurrency == 0 {
            return Err(ConfigError::Settings(
                "`batch.concurrency` must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    DEFAULT_ENGINE_BASE_URL.to_string()
}

fn default_command() -> String {
    "n8n".to_string()
}

fn default_command_args() -> Vec<String> {
    vec![
        "execute".to_string(),
        "--id".to_string(),
        WORKFLOW_ID_PLACEHOLDER.to_string(),
    ]
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base() -> u32 {
    2
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

fn default_keep_logs() -> usize {
    5
}

fn default_max_iterations() -> u32 {
    1
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_polls() -> u32 {
    60
}

fn default_batch_delay_ms() -> u64 {
    1000
}

fn default_batch_concurrency() -> usize {
    1
}
