use super::attempt::{AttemptOutcome, ExecutionAttempt, SubAttempt, SubAttemptOutcome};
use crate::config::{EndpointMode, ExecutionSettings};
use crate::shared::ids::generate_compact_id;
use crate::shared::logging::EventLog;
use crate::shared::time::{now_millis, now_secs, Sleeper};
use crate::transport::{
    Acceptance, FailureClass, InvokeRequest, TransportEnv, TransportError, TransportKind,
    TransportSelector, TriggerFailure, TriggerResult,
};
use crate::workspace::{Workspace, WorkspaceError, WorkspaceStore};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: u32,
    pub backoff_unit: Duration,
    pub transport_override: Option<TransportKind>,
    pub endpoint_mode: EndpointMode,
    pub fallback_to_test_endpoint: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self::from_settings(&ExecutionSettings::default())
    }
}

impl ExecutionOptions {
    pub fn from_settings(settings: &ExecutionSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            max_retries: settings.max_retries,
            backoff_base: settings.backoff_base,
            backoff_unit: settings.backoff_unit(),
            transport_override: None,
            endpoint_mode: settings.endpoint_mode,
            fallback_to_test_endpoint: settings.fallback_to_test_endpoint,
        }
    }

    /// Pause before retry `retry_index` (1-based): `backoff_base^(retry_index-1)` units.
    pub fn backoff_before(&self, retry_index: u32) -> Duration {
        if retry_index == 0 {
            return Duration::ZERO;
        }
        let factor = self.backoff_base.saturating_pow(retry_index - 1);
        self.backoff_unit.saturating_mul(factor)
    }

    /// Upper bound on how long one `execute` call can block when `transports`
    /// transports are tried to exhaustion.
    pub fn worst_case_duration(&self, transports: usize) -> Duration {
        let transports = u32::try_from(transports).unwrap_or(u32::MAX);
        let per_transport_attempts = self.max_retries.saturating_add(1);
        let mut per_transport = self.timeout.saturating_mul(per_transport_attempts);
        for retry in 1..=self.max_retries {
            per_transport = per_transport.saturating_add(self.backoff_before(retry));
        }
        let mut total = per_transport.saturating_mul(transports);
        if self.fallback_to_test_endpoint && transports > 0 {
            total = total.saturating_add(self.timeout);
        }
        total
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("no transport available for workspace `{name}`: {}", .reasons.join("; "))]
    NoTransportAvailable { name: String, reasons: Vec<String> },
    #[error("unrecoverable configuration: {reason}{}", describe_prior(.attempt.as_deref()))]
    UnrecoverableConfig {
        reason: String,
        /// Present when the abort happened mid-attempt, after transports were tried.
        attempt: Option<Box<ExecutionAttempt>>,
    },
    #[error("all transports exhausted for workspace `{}`: {}", .attempt.workspace, describe_failures(.attempt))]
    AllTransportsExhausted { attempt: Box<ExecutionAttempt> },
    #[error("failed to allocate attempt id: {0}")]
    AttemptId(String),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

impl From<TransportError> for ExecutionError {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::NoTransportAvailable { name, reasons } => {
                Self::NoTransportAvailable { name, reasons }
            }
            TransportError::UnrecoverableConfig { reason } => Self::UnrecoverableConfig {
                reason,
                attempt: None,
            },
        }
    }
}

fn describe_failures(attempt: &ExecutionAttempt) -> String {
    attempt
        .transport_failures
        .iter()
        .map(|f| match f.endpoint_mode {
            Some(mode) => format!("{} ({}) {}: {}", f.transport, mode.as_str(), f.class, f.detail),
            None => format!("{} {}: {}", f.transport, f.class, f.detail),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_prior(attempt: Option<&ExecutionAttempt>) -> String {
    match attempt {
        Some(attempt) if !attempt.transport_failures.is_empty() => {
            format!(" (transport failures: {})", describe_failures(attempt))
        }
        _ => String::new(),
    }
}

/// Drives one execution attempt across the ranked transports with per-call
/// timeout, bounded retries and exponential backoff.
pub struct ExecutionOrchestrator<'a> {
    env: TransportEnv<'a>,
    store: &'a WorkspaceStore,
    sleeper: &'a dyn Sleeper,
    log: EventLog,
}

enum TransportVerdict {
    Accepted(Acceptance),
    Advance,
    Abort(String),
}

impl<'a> ExecutionOrchestrator<'a> {
    pub fn new(env: TransportEnv<'a>, store: &'a WorkspaceStore, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            env,
            store,
            sleeper,
            log: EventLog::disabled(),
        }
    }

    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub fn execute(
        &self,
        workspace: &Workspace,
        payload: &Value,
        options: &ExecutionOptions,
    ) -> Result<ExecutionAttempt, ExecutionError> {
        let selection =
            TransportSelector::new(self.env).select(workspace, options.transport_override)?;
        let attempt_id =
            generate_compact_id("att", now_secs()).map_err(ExecutionError::AttemptId)?;
        let mut attempt = ExecutionAttempt::new(attempt_id, workspace.name.clone(), now_millis());
        self.log.info(
            "execution.started",
            json!({
                "workspace": workspace.name.as_str(),
                "attemptId": attempt.attempt_id,
                "transports": selection.ranked,
            }),
        );

        for transport in selection.ranked {
            attempt.transport = Some(transport);
            match self.run_transport(transport, workspace, payload, options, &mut attempt) {
                TransportVerdict::Accepted(acceptance) => {
                    attempt.execution_id = acceptance.execution_id.clone();
                    attempt.engine_completed = acceptance.completed;
                    if let Some(response) = acceptance.response.as_ref() {
                        let response_id = format!("{}.response", attempt.attempt_id);
                        self.store
                            .persist_attempt(&workspace.name, &response_id, response)?;
                        attempt.response_ref = Some(format!("attempts/{response_id}.json"));
                    }
                    attempt.finish(AttemptOutcome::Succeeded, now_millis());
                    self.persist(&attempt)?;
                    return Ok(attempt);
                }
                TransportVerdict::Advance => continue,
                TransportVerdict::Abort(reason) => {
                    attempt.finish(AttemptOutcome::Failed, now_millis());
                    self.persist(&attempt)?;
                    return Err(ExecutionError::UnrecoverableConfig {
                        reason,
                        attempt: Some(Box::new(attempt)),
                    });
                }
            }
        }

        let all_timed_out = !attempt.transport_failures.is_empty()
            && attempt
                .transport_failures
                .iter()
                .all(|f| f.class == FailureClass::TimedOut);
        let outcome = if all_timed_out {
            AttemptOutcome::TimedOut
        } else {
            AttemptOutcome::Failed
        };
        attempt.finish(outcome, now_millis());
        self.persist(&attempt)?;
        Err(ExecutionError::AllTransportsExhausted {
            attempt: Box::new(attempt),
        })
    }

    fn run_transport(
        &self,
        transport: TransportKind,
        workspace: &Workspace,
        payload: &Value,
        options: &ExecutionOptions,
        attempt: &mut ExecutionAttempt,
    ) -> TransportVerdict {
        let mut endpoint_mode = options.endpoint_mode;
        for retry_index in 0..=options.max_retries {
            let backoff = options.backoff_before(retry_index);
            if !backoff.is_zero() {
                self.sleeper.sleep(backoff);
            }
            let mut result = self.invoke_once(
                transport,
                workspace,
                payload,
                options,
                endpoint_mode,
                retry_index,
                backoff,
                attempt,
            );
            if let Err(failure) = &result {
                if falls_back_to_test(transport, endpoint_mode, failure, options) {
                    attempt.record_transport_failure(transport, Some(endpoint_mode), failure);
                    endpoint_mode = EndpointMode::Test;
                    result = self.invoke_once(
                        transport,
                        workspace,
                        payload,
                        options,
                        endpoint_mode,
                        retry_index,
                        Duration::ZERO,
                        attempt,
                    );
                }
            }
            let failure = match result {
                Ok(acceptance) => return TransportVerdict::Accepted(acceptance),
                Err(failure) => failure,
            };

            let mode = (transport == TransportKind::TriggerEndpoint).then_some(endpoint_mode);
            attempt.record_transport_failure(transport, mode, &failure);
            if failure.class.is_retryable() {
                continue;
            }
            if failure.class == FailureClass::Fatal {
                return TransportVerdict::Abort(format!("{transport}: {}", failure.detail));
            }
            return TransportVerdict::Advance;
        }
        TransportVerdict::Advance
    }

    #[allow(clippy::too_many_arguments)]
    fn invoke_once(
        &self,
        transport: TransportKind,
        workspace: &Workspace,
        payload: &Value,
        options: &ExecutionOptions,
        endpoint_mode: EndpointMode,
        retry_index: u32,
        backoff: Duration,
        attempt: &mut ExecutionAttempt,
    ) -> TriggerResult {
        let request = InvokeRequest {
            workspace,
            payload,
            timeout: options.timeout,
            endpoint_mode,
        };
        let started = Instant::now();
        let mut result = transport.invoke(&self.env, &request);
        let elapsed = started.elapsed();
        if result.is_ok() && elapsed > options.timeout {
            result = Err(TriggerFailure::new(
                FailureClass::TimedOut,
                format!(
                    "accepted after {}ms, beyond the {}ms ceiling",
                    elapsed.as_millis(),
                    options.timeout.as_millis()
                ),
            ));
        }

        let sub = SubAttempt {
            transport,
            retry_index,
            endpoint_mode: (transport == TransportKind::TriggerEndpoint).then_some(endpoint_mode),
            outcome: if result.is_ok() {
                SubAttemptOutcome::Accepted
            } else {
                SubAttemptOutcome::Failed
            },
            failure_class: result.as_ref().err().map(|f| f.class),
            detail: result.as_ref().err().map(|f| f.detail.clone()),
            duration_ms: elapsed.as_millis() as u64,
            backoff_before_ms: backoff.as_millis() as u64,
        };
        self.log.append(
            if result.is_ok() {
                crate::shared::logging::LogLevel::Info
            } else {
                crate::shared::logging::LogLevel::Warn
            },
            "execution.sub_attempt",
            json!({
                "workspace": workspace.name.as_str(),
                "attemptId": attempt.attempt_id,
                "transport": transport,
                "retryIndex": retry_index,
                "endpointMode": sub.endpoint_mode,
                "failureClass": sub.failure_class,
                "detail": sub.detail,
                "durationMs": sub.duration_ms,
            }),
        );
        attempt.sub_attempts.push(sub);
        result
    }

    fn persist(&self, attempt: &ExecutionAttempt) -> Result<(), ExecutionError> {
        self.store
            .persist_attempt(&attempt.workspace, &attempt.attempt_id, attempt)?;
        self.log.info(
            "execution.finished",
            json!({
                "workspace": attempt.workspace.as_str(),
                "attemptId": attempt.attempt_id,
                "outcome": attempt.outcome,
                "transport": attempt.transport,
                "retryCount": attempt.retry_count,
            }),
        );
        Ok(())
    }
}

/// A production trigger URL the engine does not know may be retried once
/// against the test URL; the switch holds for the remaining retries.
fn falls_back_to_test(
    transport: TransportKind,
    endpoint_mode: EndpointMode,
    failure: &TriggerFailure,
    options: &ExecutionOptions,
) -> bool {
    failure.class == FailureClass::Unsupported
        && transport == TransportKind::TriggerEndpoint
        && endpoint_mode == EndpointMode::Production
        && options.fallback_to_test_endpoint
}
