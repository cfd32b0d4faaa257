//! The gateway config document: `{"mcpServers": {<name>: <entry>}}`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::definition::TransportKind;

/// Invocation descriptor for one server in the gateway config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerEntry {
    /// Local subprocess.
    Command {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
    },
    /// Remote endpoint.
    Remote {
        #[serde(rename = "type")]
        kind: TransportKind,
        url: String,
    },
}

/// Document written to disk for the gateway to consume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, ServerEntry>,
}

impl ConfigDocument {
    pub fn len(&self) -> usize {
        self.mcp_servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mcp_servers.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ServerEntry> {
        self.mcp_servers.get(name)
    }

    /// Pretty JSON, as written to disk.
    pub fn to_pretty_json(&self) -> crate::Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| crate::StewardError::ConfigParse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_entry_omits_empty_fields() {
        let entry = ServerEntry::Command {
            command: "uvx".to_string(),
            args: vec![],
            env: BTreeMap::new(),
        };
        assert_eq!(serde_json::to_value(&entry).unwrap(), json!({"command": "uvx"}));
    }

    #[test]
    fn test_remote_entry_shape() {
        let entry = ServerEntry::Remote {
            kind: TransportKind::StreamableHttp,
            url: "http://h/mcp".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({"type": "streamable_http", "url": "http://h/mcp"})
        );
    }

    #[test]
    fn test_document_reads_back_written_form() {
        let text = r#"{"mcpServers":{"a":{"command":"npx","args":["-y","pkg"]},"b":{"type":"sse","url":"http://x"}}}"#;
        let doc: ConfigDocument = serde_json::from_str(text).expect("valid document");
        assert_eq!(doc.len(), 2);
        assert!(matches!(doc.get("a"), Some(ServerEntry::Command { command, .. }) if command == "npx"));
        assert!(matches!(doc.get("b"), Some(ServerEntry::Remote { kind: TransportKind::Sse, .. })));
    }
}
