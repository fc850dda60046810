pub mod error;
pub mod load;
pub mod paths;
pub mod settings;

pub use error::ConfigError;
pub use load::{load_settings, SettingsOverrides, API_KEY_ENV, ENGINE_URL_ENV};
pub use paths::{default_state_root, settings_path, GLOBAL_STATE_DIR, SETTINGS_FILE_NAME};
pub use settings::{
    BatchSettings, CredentialState, DebugSettings, EndpointMode, EngineSettings,
    ExecutionSettings, RetentionSettings, Settings, DEFAULT_ENGINE_BASE_URL,
    WORKFLOW_ID_PLACEHOLDER,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_settings_file_yields_defaults() {
        let dir = tempdir().expect("tempdir");
        let settings =
            load_settings(dir.path(), &SettingsOverrides::default()).expect("load defaults");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.execution.timeout_seconds, 60);
        assert_eq!(settings.execution.max_retries, 3);
        assert_eq!(settings.execution.backoff_base, 2);
        assert_eq!(settings.debug.max_iterations, 1);
        assert_eq!(settings.engine.credential(), CredentialState::Missing);
        assert_eq!(
            settings.debug.completion_wait(),
            std::time::Duration::from_secs(60)
        );
    }

    #[test]
    fn partial_yaml_fills_remaining_defaults() {
        let settings: Settings = serde_yaml::from_str(
            r#"
engine:
  base_url: https://engine.example.com/
  api_key: secret-key
execution:
  max_retries: 1
  endpoint_mode: test
"#,
        )
        .expect("parse settings");

        assert_eq!(settings.engine.trimmed_base_url(), "https://engine.example.com");
        assert_eq!(
            settings.engine.credential(),
            CredentialState::Usable("secret-key".to_string())
        );
        assert_eq!(settings.execution.max_retries, 1);
        assert_eq!(settings.execution.timeout_seconds, 60);
        assert_eq!(settings.execution.endpoint_mode, EndpointMode::Test);
        assert_eq!(settings.engine.command, "n8n");
    }

    #[test]
    fn overrides_win_over_file_values() {
        let dir = tempdir().expect("tempdir");
        fs::write(
            settings_path(dir.path()),
            "engine:\n  base_url: http://file.example\n",
        )
        .expect("write settings");
        let overrides = SettingsOverrides {
            base_url: Some("http://override.example".to_string()),
            api_key: Some("k".to_string()),
        };
        let settings = load_settings(dir.path(), &overrides).expect("load");
        assert_eq!(settings.engine.base_url, "http://override.example");
        assert_eq!(settings.engine.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn validation_rejects_nonsensical_values() {
        let mut settings = Settings::default();
        settings.engine.base_url = "localhost:5678".to_string();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Settings(msg)) if msg.contains("engine.base_url")
        ));

        let mut settings = Settings::default();
        settings.batch.concurrency = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.debug.max_iterations = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn credential_with_embedded_whitespace_is_malformed() {
        let mut engine = EngineSettings::default();
        engine.api_key = Some("abc def".to_string());
        assert!(matches!(engine.credential(), CredentialState::Malformed(_)));
        engine.api_key = Some("   ".to_string());
        assert!(matches!(engine.credential(), CredentialState::Malformed(_)));
        engine.api_key = Some(String::new());
        assert_eq!(engine.credential(), CredentialState::Missing);
    }

    #[test]
    fn settings_round_trip_through_save() {
        let dir = tempdir().expect("tempdir");
        let path = settings_path(dir.path());
        let mut settings = Settings::default();
        settings.retention.keep_last = Some(4);
        settings.save(&path).expect("save");
        let loaded = Settings::from_path(&path).expect("reload");
        assert_eq!(loaded.retention.keep_last, Some(4));
    }
}
