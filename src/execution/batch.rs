use crate::config::{BatchSettings, EndpointMode};
use crate::engine::{EndpointTrigger, EngineApi};
use crate::shared::logging::EventLog;
use crate::shared::time::Sleeper;
use crate::transport::{FailureClass, TriggerFailure};
use crate::workspace::TriggerEndpoint;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Minimum spacing between the starts of two consecutive triggers.
    pub delay: Duration,
    pub concurrency: usize,
    pub timeout: Duration,
    pub endpoint_mode: EndpointMode,
}

impl BatchOptions {
    pub fn from_settings(batch: &BatchSettings, timeout: Duration, mode: EndpointMode) -> Self {
        Self {
            delay: Duration::from_millis(batch.delay_ms),
            concurrency: batch.concurrency.max(1),
            timeout,
            endpoint_mode: mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub node_name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TriggerFailure>,
}

impl BatchItem {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Triggers every endpoint once. At most `concurrency` requests are in flight
/// and request starts are spaced by `delay`. A failing endpoint never stops
/// the others; results come back in input order.
pub fn batch_trigger(
    engine: &dyn EngineApi,
    sleeper: &dyn Sleeper,
    endpoints: &[TriggerEndpoint],
    payload: &Value,
    options: &BatchOptions,
    log: &EventLog,
) -> Vec<BatchItem> {
    let next = AtomicUsize::new(0);
    let last_start: Mutex<Option<Instant>> = Mutex::new(None);
    let results: Mutex<Vec<Option<BatchItem>>> = Mutex::new(vec![None; endpoints.len()]);
    let workers = options.concurrency.max(1).min(endpoints.len().max(1));

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let index = next.fetch_add(1, Ordering::SeqCst);
                let Some(endpoint) = endpoints.get(index) else {
                    break;
                };
                wait_for_slot(&last_start, options.delay, sleeper);
                let item = trigger_one(engine, endpoint, payload, options);
                log.append(
                    if item.succeeded() {
                        crate::shared::logging::LogLevel::Info
                    } else {
                        crate::shared::logging::LogLevel::Warn
                    },
                    "batch.trigger",
                    json!({
                        "node": item.node_name,
                        "url": item.url,
                        "status": item.status,
                        "failure": item.failure.as_ref().map(|f| f.to_string()),
                    }),
                );
                if let Ok(mut slots) = results.lock() {
                    slots[index] = Some(item);
                }
            });
        }
    });

    let slots = results.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
    slots
        .into_iter()
        .zip(endpoints)
        .map(|(slot, endpoint)| {
            slot.unwrap_or_else(|| BatchItem {
                node_name: endpoint.node_name.clone(),
                url: endpoint.url_for(options.endpoint_mode).to_string(),
                status: None,
                execution_id: None,
                failure: Some(TriggerFailure::new(
                    FailureClass::Transient,
                    "trigger worker stopped before reporting",
                )),
            })
        })
        .collect()
}

fn wait_for_slot(last_start: &Mutex<Option<Instant>>, delay: Duration, sleeper: &dyn Sleeper) {
    let mut guard = match last_start.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(previous) = *guard {
        let remaining = delay.saturating_sub(previous.elapsed());
        if !remaining.is_zero() {
            sleeper.sleep(remaining);
        }
    }
    *guard = Some(Instant::now());
}

fn trigger_one(
    engine: &dyn EngineApi,
    endpoint: &TriggerEndpoint,
    payload: &Value,
    options: &BatchOptions,
) -> BatchItem {
    let url = endpoint.url_for(options.endpoint_mode).to_string();
    let request = EndpointTrigger {
        url: url.clone(),
        method: endpoint.method,
        payload: payload.clone(),
        timeout: options.timeout,
    };
    match engine.trigger_endpoint(&request) {
        Ok(response) => BatchItem {
            node_name: endpoint.node_name.clone(),
            url,
            status: Some(response.status),
            execution_id: response.execution_id,
            failure: None,
        },
        Err(err) => BatchItem {
            node_name: endpoint.node_name.clone(),
            url,
            status: match &err {
                crate::engine::EngineError::Status { code, .. } => Some(*code),
                _ => None,
            },
            execution_id: None,
            failure: Some(TriggerFailure::new(err.failure_class(), err.to_string())),
        },
    }
}
