//! Stored tool-server definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Supported tool-server transports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Local subprocess speaking MCP over stdio.
    Stdio,
    /// Remote server over server-sent events.
    Sse,
    /// Remote server over streamable HTTP.
    StreamableHttp,
}

impl TransportKind {
    /// Wire name used in the gateway config document.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::StreamableHttp => "streamable_http",
        }
    }

    /// Parse a remote subtype. Only `sse` and `streamable_http` are accepted.
    pub fn remote_from_str(value: &str) -> Option<Self> {
        match value {
            "sse" => Some(TransportKind::Sse),
            "streamable_http" => Some(TransportKind::StreamableHttp),
            _ => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, TransportKind::Stdio)
    }
}

fn default_enabled() -> bool {
    true
}

/// Declaration of one tool server as kept by the store.
///
/// Fields belonging to the transport that is not selected are ignored when
/// the gateway document is built. `command` and `url` are optional so that a
/// store record missing its required field can still be represented and
/// skipped instead of failing the whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDefinition {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub transport: TransportKind,
    // stdio fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    // remote fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ServerDefinition {
    /// A local-command definition.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            transport: TransportKind::Stdio,
            command: Some(command.into()),
            args,
            env: BTreeMap::new(),
            url: None,
        }
    }

    /// A remote definition; `transport` should be `Sse` or `StreamableHttp`.
    pub fn remote(name: impl Into<String>, transport: TransportKind, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            transport,
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            url: Some(url.into()),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}
