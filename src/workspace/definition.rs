use super::endpoint::{HttpMethod, ResponseMode, TriggerEndpoint};
use super::{io_error, json_error, WorkspaceError};
use crate::shared::ids::{normalize_workflow_name, WorkflowName};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Fields the engine owns; sending them back on import is rejected.
pub const READ_ONLY_IMPORT_FIELDS: [&str; 4] = ["id", "active", "createdAt", "updatedAt"];

/// A workflow document as submitted by the user. The document itself is
/// opaque; only the fields needed for validation, endpoint discovery and
/// import are ever inspected.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    name: WorkflowName,
    document: Value,
}

impl WorkflowDefinition {
    pub fn new(name: WorkflowName, document: Value) -> Self {
        Self { name, document }
    }

    /// Loads a definition file and names it after the normalized file stem.
    pub fn from_path(path: &Path) -> Result<Self, WorkspaceError> {
        let stem = path
            .file_stem()
            .and_then(|v| v.to_str())
            .ok_or_else(|| WorkspaceError::InvalidName {
                name: path.display().to_string(),
                reason: "definition path has no usable file stem".to_string(),
            })?;
        let name = normalize_workflow_name(stem).map_err(|reason| WorkspaceError::InvalidName {
            name: stem.to_string(),
            reason,
        })?;
        let raw = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
        let document: Value = serde_json::from_str(&raw).map_err(|e| json_error(path, e))?;
        if !document.is_object() {
            return Err(WorkspaceError::InvalidDefinition {
                name: name.to_string(),
                reason: "definition must be a JSON object".to_string(),
            });
        }
        Ok(Self { name, document })
    }

    pub fn name(&self) -> &WorkflowName {
        &self.name
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn into_document(self) -> Value {
        self.document
    }

    /// Pretty JSON with object keys in sorted order; the identity of a version.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = serde_json::to_vec_pretty(&self.document).unwrap_or_default();
        bytes.push(b'\n');
        bytes
    }

    pub fn digest(&self) -> String {
        sha256_hex(&self.canonical_bytes())
    }

    pub fn nodes(&self) -> &[Value] {
        self.document
            .get("nodes")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.nodes().len()
    }

    pub fn display_name(&self) -> &str {
        self.document
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(self.name.as_str())
    }

    /// Structural checks the engine would otherwise reject on import.
    pub fn validate(&self) -> Result<(), WorkspaceError> {
        let invalid = |reason: String| WorkspaceError::InvalidDefinition {
            name: self.name.to_string(),
            reason,
        };
        let Some(object) = self.document.as_object() else {
            return Err(invalid("definition must be a JSON object".to_string()));
        };
        for field in ["name", "nodes", "connections"] {
            if !object.contains_key(field) {
                return Err(invalid(format!("missing required field `{field}`")));
            }
        }
        let Some(nodes) = object.get("nodes").and_then(Value::as_array) else {
            return Err(invalid("`nodes` must be an array".to_string()));
        };
        for (index, node) in nodes.iter().enumerate() {
            for field in ["name", "type", "position"] {
                if node.get(field).is_none() {
                    return Err(invalid(format!("node {index} missing `{field}` field")));
                }
            }
        }
        Ok(())
    }

    /// The body sent to the engine's import endpoint.
    pub fn import_body(&self) -> Value {
        let mut body = match &self.document {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        for field in READ_ONLY_IMPORT_FIELDS {
            body.remove(field);
        }
        if !body.contains_key("settings") {
            body.insert("settings".to_string(), Value::Object(Map::new()));
        }
        Value::Object(body)
    }

    /// Every webhook-style trigger node, with URLs rooted at `base_url`.
    /// Nodes with neither a path nor a webhook id cannot be addressed and are
    /// skipped.
    pub fn extract_trigger_endpoints(&self, base_url: &str) -> Vec<TriggerEndpoint> {
        let mut endpoints = Vec::new();
        for node in self.nodes() {
            let node_type = node.get("type").and_then(Value::as_str).unwrap_or_default();
            if !node_type.to_ascii_lowercase().contains("webhook") {
                continue;
            }
            let parameters = node.get("parameters");
            let param = |key: &str| {
                parameters
                    .and_then(|p| p.get(key))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .trim()
                    .to_string()
            };
            let path = param("path");
            let webhook_id = node
                .get("webhookId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            let address = if !path.is_empty() { path } else { webhook_id };
            if address.is_empty() {
                continue;
            }
            let method_raw = param("httpMethod");
            let method_raw = if method_raw.is_empty() {
                param("method")
            } else {
                method_raw
            };
            let method = if method_raw.is_empty() {
                HttpMethod::Get
            } else {
                HttpMethod::parse(&method_raw).unwrap_or(HttpMethod::Get)
            };
            let response_mode = param("responseMode");
            let response_mode = if response_mode.is_empty() {
                ResponseMode::OnReceived
            } else {
                ResponseMode::parse(&response_mode)
            };
            let node_name = node
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("Unnamed");
            endpoints.push(TriggerEndpoint::new(
                base_url,
                node_name,
                method,
                address,
                response_mode,
            ));
        }
        endpoints
    }

    pub fn has_credentials(&self) -> bool {
        self.nodes().iter().any(|node| {
            node.get("credentials")
                .and_then(Value::as_object)
                .is_some_and(|c| !c.is_empty())
        })
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
