use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const TOOL_LOG_RELATIVE_PATH: &str = "logs/flowloop.log";

pub fn tool_log_path(state_root: &Path) -> PathBuf {
    state_root.join(TOOL_LOG_RELATIVE_PATH)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Append-only JSON-lines event sink. Write failures are swallowed: losing a
/// log line must never fail the operation being logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLog {
    path: Option<PathBuf>,
}

impl EventLog {
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn info(&self, event: &str, fields: Value) {
        self.append(LogLevel::Info, event, fields);
    }

    pub fn warn(&self, event: &str, fields: Value) {
        self.append(LogLevel::Warn, event, fields);
    }

    pub fn error(&self, event: &str, fields: Value) {
        self.append(LogLevel::Error, event, fields);
    }

    pub fn append(&self, level: LogLevel, event: &str, fields: Value) {
        let Some(path) = self.path.as_ref() else {
            return;
        };
        let mut payload = Map::new();
        payload.insert(
            "timestamp".to_string(),
            Value::from(crate::shared::time::now_secs()),
        );
        payload.insert("level".to_string(), Value::from(level.as_str()));
        payload.insert("event".to_string(), Value::from(event));
        match fields {
            Value::Object(map) => payload.extend(map),
            Value::Null => {}
            other => {
                payload.insert("message".to_string(), other);
            }
        }

        let Ok(line) = serde_json::to_string(&Value::Object(payload)) else {
            return;
        };
        if let Some(parent) = path.parent() {
            if fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path) else {
            return;
        };
        let _ = writeln!(file, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn appends_one_json_object_per_event() {
        let dir = tempdir().expect("tempdir");
        let log = EventLog::to_file(tool_log_path(dir.path()));
        log.info("workspace.setup", json!({"workspace": "orders", "sequence": 1}));
        log.warn("selector.probe", json!("activation unknown"));

        let raw = fs::read_to_string(tool_log_path(dir.path())).expect("read log");
        let lines: Vec<Value> = raw
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "workspace.setup");
        assert_eq!(lines[0]["sequence"], 1);
        assert_eq!(lines[1]["level"], "warn");
        assert_eq!(lines[1]["message"], "activation unknown");
    }

    #[test]
    fn disabled_log_writes_nothing() {
        let log = EventLog::disabled();
        log.error("ignored", json!({}));
        assert!(log.path().is_none());
    }
}
