use super::{
    EndpointTrigger, EngineApi, EngineError, ExecutionStarted, ExecutionState, ExecutionStatus,
    ImportedWorkflow, TriggerResponse, WorkflowStatus, API_KEY_HEADER, EXECUTION_ID_HEADER,
};
use crate::config::{CredentialState, EngineSettings};
use crate::shared::ids::RemoteWorkflowId;
use serde_json::{json, Value};
use std::time::Duration;

/// `EngineApi` over the engine's REST API and its public trigger URLs.
#[derive(Debug, Clone)]
pub struct HttpEngineClient {
    base_url: String,
    credential: CredentialState,
    agent: ureq::Agent,
}

impl HttpEngineClient {
    pub fn new(settings: &EngineSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(settings.request_timeout())
            .build();
        Self {
            base_url: settings.trimmed_base_url().to_string(),
            credential: settings.credential(),
            agent,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn api_key(&self) -> Result<&str, EngineError> {
        match &self.credential {
            CredentialState::Usable(key) => Ok(key),
            CredentialState::Missing => Err(EngineError::MissingCredential),
            CredentialState::Malformed(reason) => {
                Err(EngineError::MalformedCredential(reason.clone()))
            }
        }
    }

    fn api_request(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, EngineError> {
        let key = self.api_key()?;
        let url = self.endpoint(path);
        let mut request = self
            .agent
            .request(method, &url)
            .set(API_KEY_HEADER, key)
            .set("Accept", "application/json");
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let result = match body {
            Some(body) => request.send_json(body.clone()),
            None => request.call(),
        };
        let response = result.map_err(|err| map_ureq_error(method, &url, err))?;
        let raw = response.into_string().map_err(|err| EngineError::Decode {
            url: url.clone(),
            message: err.to_string(),
        })?;
        if raw.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&raw).map_err(|err| EngineError::Decode {
            url,
            message: err.to_string(),
        })
    }
}

impl EngineApi for HttpEngineClient {
    fn import_workflow(
        &self,
        body: &Value,
        remote_id: Option<&RemoteWorkflowId>,
    ) -> Result<ImportedWorkflow, EngineError> {
        let response = match remote_id {
            Some(id) => self.api_request(
                "PUT",
                &format!("api/v1/workflows/{}", urlencoding::encode(id.as_str())),
                Some(body),
                None,
            )?,
            None => self.api_request("POST", "api/v1/workflows", Some(body), None)?,
        };
        let url = self.endpoint("api/v1/workflows");
        let raw_id = value_id(&response).ok_or_else(|| EngineError::Decode {
            url: url.clone(),
            message: "import response has no workflow id".to_string(),
        })?;
        let id = RemoteWorkflowId::parse(&raw_id)
            .map_err(|message| EngineError::Decode { url, message })?;
        Ok(ImportedWorkflow {
            id,
            name: response
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            active: response
                .get("active")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            created: remote_id.is_none(),
        })
    }

    fn workflow_status(&self, remote_id: &RemoteWorkflowId) -> Result<WorkflowStatus, EngineError> {
        let path = format!("api/v1/workflows/{}", urlencoding::encode(remote_id.as_str()));
        let response = self.api_request("GET", &path, None, None)?;
        Ok(workflow_status_from(&response, remote_id.as_str()))
    }

    fn set_active(
        &self,
        remote_id: &RemoteWorkflowId,
        active: bool,
    ) -> Result<WorkflowStatus, EngineError> {
        let action = if active { "activate" } else { "deactivate" };
        let path = format!(
            "api/v1/workflows/{}/{action}",
            urlencoding::encode(remote_id.as_str())
        );
        self.api_request("POST", &path, Some(&json!({})), None)?;
        let status = self.workflow_status(remote_id)?;
        if status.active != active {
            return Err(EngineError::ActivationNotApplied {
                id: remote_id.to_string(),
                expected: if active { "active" } else { "inactive" }.to_string(),
            });
        }
        Ok(status)
    }

    fn list_workflows(&self) -> Result<Vec<WorkflowStatus>, EngineError> {
        let mut all = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut path = "api/v1/workflows?limit=100".to_string();
            if !cursor.is_empty() {
                path = format!("{path}&cursor={}", urlencoding::encode(&cursor));
            }
            let page = self.api_request("GET", &path, None, None)?;
            let items = page
                .get("data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            all.extend(items.iter().map(|item| workflow_status_from(item, "")));
            cursor = page
                .get("nextCursor")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if cursor.trim().is_empty() {
                break;
            }
        }
        Ok(all)
    }

    fn trigger_endpoint(&self, request: &EndpointTrigger) -> Result<TriggerResponse, EngineError> {
        let method = request.method.as_str();
        let result = if request.method.carries_query_payload() {
            let encoded = serde_json::to_string(&request.payload).map_err(|err| {
                EngineError::Decode {
                    url: request.url.clone(),
                    message: err.to_string(),
                }
            })?;
            let separator = if request.url.contains('?') { '&' } else { '?' };
            let url = format!("{}{separator}data={}", request.url, urlencoding::encode(&encoded));
            self.agent
                .request(method, &url)
                .timeout(request.timeout)
                .call()
        } else {
            self.agent
                .request(method, &request.url)
                .timeout(request.timeout)
                .send_json(request.payload.clone())
        };
        let response = result.map_err(|err| map_ureq_error(method, &request.url, err))?;
        let status = response.status();
        let execution_id = response
            .header(EXECUTION_ID_HEADER)
            .map(str::to_string)
            .filter(|v| !v.trim().is_empty());
        let raw = response.into_string().unwrap_or_default();
        let body = if raw.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
        };
        Ok(TriggerResponse {
            status,
            execution_id,
            body,
        })
    }

    fn execute_workflow(
        &self,
        remote_id: &RemoteWorkflowId,
        payload: &Value,
        timeout: Duration,
    ) -> Result<ExecutionStarted, EngineError> {
        let path = format!(
            "api/v1/workflows/{}/execute",
            urlencoding::encode(remote_id.as_str())
        );
        let body = json!({"workflowId": remote_id.as_str(), "data": payload});
        let response = self.api_request("POST", &path, Some(&body), Some(timeout))?;
        Ok(ExecutionStarted {
            execution_id: value_id(&response),
            finished: response
                .get("finished")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            body: Some(response),
        })
    }

    fn execution_status(&self, execution_id: &str) -> Result<ExecutionStatus, EngineError> {
        let path = format!(
            "api/v1/executions/{}?includeData=true",
            urlencoding::encode(execution_id)
        );
        let response = self.api_request("GET", &path, None, None)?;
        let finished = response
            .get("finished")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let state = match response.get("status").and_then(Value::as_str) {
            Some(raw) => ExecutionState::parse(raw),
            None if finished => ExecutionState::Success,
            None => ExecutionState::Unknown,
        };
        let error = response
            .pointer("/data/resultData/error/message")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(ExecutionStatus {
            id: value_id(&response).unwrap_or_else(|| execution_id.to_string()),
            finished,
            state,
            error,
            detail: response,
        })
    }
}

fn value_id(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn workflow_status_from(value: &Value, fallback_id: &str) -> WorkflowStatus {
    WorkflowStatus {
        id: value_id(value).unwrap_or_else(|| fallback_id.to_string()),
        name: value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        active: value
            .get("active")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        updated_at: value
            .get("updatedAt")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn map_ureq_error(method: &str, url: &str, err: ureq::Error) -> EngineError {
    match err {
        ureq::Error::Status(code, response) => EngineError::Status {
            method: method.to_string(),
            url: url.to_string(),
            code,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => {
            let message = transport.to_string();
            EngineError::Transport {
                method: method.to_string(),
                url: url.to_string(),
                timed_out: is_timeout(&transport, &message),
                message,
            }
        }
    }
}

fn is_timeout(transport: &ureq::Transport, message: &str) -> bool {
    let io_timeout = std::error::Error::source(transport)
        .and_then(|source| source.downcast_ref::<std::io::Error>())
        .is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        });
    io_timeout || message.to_ascii_lowercase().contains("timed out")
}
