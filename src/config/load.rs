use super::{settings_path, ConfigError, Settings};
use std::path::Path;

pub const ENGINE_URL_ENV: &str = "FLOWLOOP_ENGINE_URL";
pub const API_KEY_ENV: &str = "FLOWLOOP_API_KEY";

/// Values that may be supplied from the invoking environment instead of the
/// settings file. Collected once at the edge and applied explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsOverrides {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl SettingsOverrides {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var(ENGINE_URL_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty()),
            api_key: std::env::var(API_KEY_ENV).ok().filter(|v| !v.is_empty()),
        }
    }

    pub fn apply(&self, settings: &mut Settings) {
        if let Some(base_url) = &self.base_url {
            settings.engine.base_url = base_url.clone();
        }
        if let Some(api_key) = &self.api_key {
            settings.engine.api_key = Some(api_key.clone());
        }
    }
}

pub fn load_settings(
    state_root: &Path,
    overrides: &SettingsOverrides,
) -> Result<Settings, ConfigError> {
    let mut settings = Settings::from_path_or_default(&settings_path(state_root))?;
    overrides.apply(&mut settings);
    settings.validate()?;
    Ok(settings)
}
