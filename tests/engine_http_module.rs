use flowloop::config::EngineSettings;
use flowloop::engine::{
    EndpointTrigger, EngineApi, EngineError, ExecutionState, HttpEngineClient, API_KEY_HEADER,
};
use flowloop::shared::ids::RemoteWorkflowId;
use flowloop::transport::FailureClass;
use flowloop::workspace::HttpMethod;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
struct RecordedRequest {
    method: String,
    path: String,
    api_key: String,
    body: String,
}

struct StubResponse {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: String,
}

fn respond(status: u16, body: Value) -> StubResponse {
    StubResponse {
        status,
        headers: Vec::new(),
        body: body.to_string(),
    }
}

struct MockEngineServer {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockEngineServer {
    fn start<F>(expected_requests: usize, responder: F) -> Self
    where
        F: Fn(&str, &str) -> StubResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let requests_for_thread = Arc::clone(&requests);

        let handle = thread::spawn(move || {
            for _ in 0..expected_requests {
                let (mut stream, _) = listener.accept().expect("accept");
                let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

                let mut request_line = String::new();
                reader
                    .read_line(&mut request_line)
                    .expect("read request line");
                let mut parts = request_line.split_whitespace();
                let method = parts.next().unwrap_or_default().to_string();
                let path = parts.next().unwrap_or("/").to_string();

                let mut api_key = String::new();
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).expect("read header");
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                    let Some((name, value)) = line.split_once(':') else {
                        continue;
                    };
                    let name = name.trim().to_ascii_lowercase();
                    if name == API_KEY_HEADER.to_ascii_lowercase() {
                        api_key = value.trim().to_string();
                    }
                    if name == "content-length" {
                        content_length = value.trim().parse::<usize>().unwrap_or(0);
                    }
                }

                let mut body = vec![0_u8; content_length];
                if content_length > 0 {
                    reader.read_exact(&mut body).expect("read body");
                }
                requests_for_thread
                    .lock()
                    .expect("lock requests")
                    .push(RecordedRequest {
                        method: method.clone(),
                        path: path.clone(),
                        api_key,
                        body: String::from_utf8_lossy(&body).to_string(),
                    });

                let reply = responder(&method, &path);
                let mut response = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
                    reply.status,
                    reply.body.len()
                );
                for (name, value) in &reply.headers {
                    response.push_str(&format!("{name}: {value}\r\n"));
                }
                response.push_str("\r\n");
                response.push_str(&reply.body);
                stream
                    .write_all(response.as_bytes())
                    .expect("write response");
                stream.flush().expect("flush response");
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
            handle: Some(handle),
        }
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("lock requests").clone()
    }

    fn client(&self, api_key: Option<&str>) -> HttpEngineClient {
        let mut settings = EngineSettings::default();
        settings.base_url = format!("{}/", self.base_url);
        settings.api_key = api_key.map(str::to_string);
        settings.request_timeout_seconds = 5;
        HttpEngineClient::new(&settings)
    }
}

impl Drop for MockEngineServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn remote(raw: &str) -> RemoteWorkflowId {
    RemoteWorkflowId::parse(raw).expect("remote id")
}

#[test]
fn import_creates_then_updates_with_api_key() {
    let server = MockEngineServer::start(2, |method, _| match method {
        "POST" => respond(200, json!({"id": "wf-7", "name": "orders", "active": false})),
        _ => respond(200, json!({"id": "wf-7", "name": "orders", "active": true})),
    });
    let client = server.client(Some("secret"));

    let created = client
        .import_workflow(&json!({"name": "orders", "nodes": []}), None)
        .expect("create");
    assert_eq!(created.id.as_str(), "wf-7");
    assert!(created.created);
    assert!(!created.active);

    let updated = client
        .import_workflow(&json!({"name": "orders", "nodes": []}), Some(&created.id))
        .expect("update");
    assert!(!updated.created);
    assert!(updated.active);

    drop(client);
    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/api/v1/workflows");
    assert_eq!(requests[0].api_key, "secret");
    assert_eq!(requests[1].method, "PUT");
    assert_eq!(requests[1].path, "/api/v1/workflows/wf-7");
    let body: Value = serde_json::from_str(&requests[1].body).expect("json body");
    assert_eq!(body["name"], "orders");
}

#[test]
fn activation_is_verified_with_a_status_read() {
    let server = MockEngineServer::start(2, |method, _| match method {
        "POST" => respond(200, json!({})),
        _ => respond(200, json!({"id": "wf-1", "active": false})),
    });
    let client = server.client(Some("secret"));
    let err = client
        .set_active(&remote("wf-1"), true)
        .expect_err("not applied");
    assert!(matches!(err, EngineError::ActivationNotApplied { .. }));
    assert_eq!(err.failure_class(), FailureClass::Rejected);

    let requests = server.requests();
    assert_eq!(requests[0].path, "/api/v1/workflows/wf-1/activate");
    assert_eq!(requests[1].method, "GET");
}

#[test]
fn list_follows_next_cursor() {
    let server = MockEngineServer::start(2, |_, path| {
        if path.contains("cursor=") {
            respond(200, json!({"data": [{"id": "2", "name": "b", "active": true}]}))
        } else {
            respond(
                200,
                json!({"data": [{"id": "1", "name": "a", "active": false}], "nextCursor": "abc"}),
            )
        }
    });
    let client = server.client(Some("secret"));
    let all = client.list_workflows().expect("list");
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].id, "2");
    assert!(all[1].active);
    assert!(server.requests()[1].path.ends_with("cursor=abc"));
}

#[test]
fn get_trigger_sends_payload_in_query_and_reads_execution_header() {
    let server = MockEngineServer::start(1, |_, _| StubResponse {
        status: 200,
        headers: vec![("x-n8n-execution-id", "4242".to_string())],
        body: json!({"message": "Workflow was started"}).to_string(),
    });
    let client = server.client(None);
    let response = client
        .trigger_endpoint(&EndpointTrigger {
            url: format!("{}/webhook/orders", server.base_url),
            method: HttpMethod::Get,
            payload: json!({"a": 1}),
            timeout: Duration::from_secs(5),
        })
        .expect("trigger");
    assert_eq!(response.status, 200);
    assert_eq!(response.execution_id.as_deref(), Some("4242"));

    let request = &server.requests()[0];
    assert_eq!(request.method, "GET");
    assert!(
        request.path.starts_with("/webhook/orders?data="),
        "{}",
        request.path
    );
    assert!(request.api_key.is_empty());
}

#[test]
fn post_trigger_sends_json_body() {
    let server = MockEngineServer::start(1, |_, _| respond(200, json!({"ok": true})));
    let client = server.client(None);
    let response = client
        .trigger_endpoint(&EndpointTrigger {
            url: format!("{}/webhook-test/orders", server.base_url),
            method: HttpMethod::Post,
            payload: json!({"debug_mode": true}),
            timeout: Duration::from_secs(5),
        })
        .expect("trigger");
    assert_eq!(response.body, Some(json!({"ok": true})));
    assert!(response.execution_id.is_none());
    let body: Value = serde_json::from_str(&server.requests()[0].body).expect("json body");
    assert_eq!(body["debug_mode"], true);
}

#[test]
fn unregistered_webhook_maps_to_unsupported() {
    let server = MockEngineServer::start(1, |_, _| {
        respond(
            404,
            json!({"code": 404, "message": "The requested webhook \"POST orders\" is not registered."}),
        )
    });
    let client = server.client(None);
    let err = client
        .trigger_endpoint(&EndpointTrigger {
            url: format!("{}/webhook/orders", server.base_url),
            method: HttpMethod::Post,
            payload: json!({}),
            timeout: Duration::from_secs(5),
        })
        .expect_err("404");
    match &err {
        EngineError::Status { code, body, .. } => {
            assert_eq!(*code, 404);
            assert!(body.contains("not registered"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.failure_class(), FailureClass::Unsupported);
}

#[test]
fn execute_and_poll_execution_status() {
    let server = MockEngineServer::start(2, |_, path| {
        if path.starts_with("/api/v1/executions/") {
            respond(
                200,
                json!({
                    "id": 77,
                    "finished": true,
                    "status": "error",
                    "data": {"resultData": {"error": {"message": "boom"}}}
                }),
            )
        } else {
            respond(200, json!({"id": 77, "finished": false}))
        }
    });
    let client = server.client(Some("secret"));

    let started = client
        .execute_workflow(&remote("wf-1"), &json!({"x": 1}), Duration::from_secs(5))
        .expect("execute");
    assert_eq!(started.execution_id.as_deref(), Some("77"));
    assert!(!started.finished);

    let status = client.execution_status("77").expect("status");
    assert_eq!(status.state, ExecutionState::Error);
    assert_eq!(status.error.as_deref(), Some("boom"));

    let requests = server.requests();
    assert_eq!(requests[0].path, "/api/v1/workflows/wf-1/execute");
    let body: Value = serde_json::from_str(&requests[0].body).expect("json body");
    assert_eq!(body["workflowId"], "wf-1");
    assert_eq!(body["data"]["x"], 1);
    assert_eq!(requests[1].path, "/api/v1/executions/77?includeData=true");
}

#[test]
fn api_calls_without_credential_fail_before_any_request() {
    let settings = EngineSettings::default();
    let client = HttpEngineClient::new(&settings);
    let err = client
        .workflow_status(&remote("wf-1"))
        .expect_err("missing credential");
    assert_eq!(err, EngineError::MissingCredential);
    assert_eq!(err.failure_class(), FailureClass::Unsupported);
}

#[test]
fn server_errors_are_transient() {
    let server = MockEngineServer::start(1, |_, _| respond(503, json!({"message": "busy"})));
    let client = server.client(Some("secret"));
    let err = client
        .workflow_status(&remote("wf-1"))
        .expect_err("503");
    assert_eq!(err.failure_class(), FailureClass::Transient);
}
