use crate::transport::TransportKind;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            other => Err(format!("unsupported http method `{other}`")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
        }
    }

    /// Methods whose payload travels in the query string rather than a body.
    pub fn carries_query_payload(self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Delete)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a trigger node answers the request that started it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseMode {
    OnReceived,
    LastNode,
    ResponseNode,
    #[serde(untagged)]
    Other(String),
}

impl ResponseMode {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "onReceived" => Self::OnReceived,
            "lastNode" => Self::LastNode,
            "responseNode" => Self::ResponseNode,
            other => Self::Other(other.to_string()),
        }
    }

    /// A 2xx from a trigger in this mode is only sent after the run finished.
    pub fn waits_for_completion(&self) -> bool {
        matches!(self, Self::LastNode | Self::ResponseNode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEndpoint {
    pub kind: TransportKind,
    pub node_name: String,
    pub method: HttpMethod,
    pub path: String,
    pub production_url: String,
    pub test_url: String,
    pub response_mode: ResponseMode,
}

impl TriggerEndpoint {
    pub fn new(
        base_url: &str,
        node_name: impl Into<String>,
        method: HttpMethod,
        path: impl Into<String>,
        response_mode: ResponseMode,
    ) -> Self {
        let path = path.into();
        let base = base_url.trim_end_matches('/');
        let trimmed = path.trim_start_matches('/');
        Self {
            kind: TransportKind::TriggerEndpoint,
            node_name: node_name.into(),
            method,
            production_url: format!("{base}/webhook/{trimmed}"),
            test_url: format!("{base}/webhook-test/{trimmed}"),
            path,
            response_mode,
        }
    }

    pub fn url_for(&self, mode: crate::config::EndpointMode) -> &str {
        match mode {
            crate::config::EndpointMode::Production => &self.production_url,
            crate::config::EndpointMode::Test => &self.test_url,
        }
    }
}
