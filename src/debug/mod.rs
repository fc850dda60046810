pub mod collector;
pub mod fixer;
pub mod session;

pub use collector::{ContextCollector, ContextReport, EngineContextCollector, FailureKind, Verdict};
pub use fixer::{CommandFixer, FixProposal, Fixer, PromptFixer};
pub use session::{
    CancellationToken, DebugDeps, DebugOptions, DebugOutcome, DebugSession, SessionIteration,
    SessionState, TerminationReason,
};

use crate::workspace::WorkspaceError;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum DebugError {
    #[error("debug session state transition `{from}` -> `{to}` is invalid")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
    #[error("debug session is not awaiting a fix (state `{state}`)")]
    NotAwaitingFix { state: SessionState },
    #[error("fixer failed: {0}")]
    Fixer(String),
    #[error("failed to allocate session id: {0}")]
    SessionId(String),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> DebugError {
    DebugError::Io {
        path: path.display().to_string(),
        source,
    }
}

pub(crate) fn json_error(path: &Path, source: serde_json::Error) -> DebugError {
    DebugError::Json {
        path: path.display().to_string(),
        source,
    }
}
