//! Capability listing against the running gateway.
//!
//! The gateway exposes one OpenAPI document per server at
//! `/<name>/openapi.json`; every POST operation in its `paths` is a tool.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;

use crate::definition::ServerDefinition;
use crate::settings::SupervisorSettings;
use crate::supervisor::GatewayStatus;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest response-body excerpt kept in an error message.
const ERROR_BODY_LIMIT: usize = 200;

/// One tool exposed by a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolSummary {
    pub path: String,
    pub summary: String,
    pub description: String,
}

/// Aggregated listing.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    #[serde(serialize_with = "serialize_status")]
    pub status: GatewayStatus,
    /// Per server: its tools, or why they could not be fetched.
    pub servers: BTreeMap<String, Result<Vec<ToolSummary>, String>>,
}

fn serialize_status<S: serde::Serializer>(status: &GatewayStatus, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(status.label())
}

impl DiscoveryReport {
    pub fn tool_count(&self) -> usize {
        self.servers
            .values()
            .filter_map(|r| r.as_ref().ok())
            .map(Vec::len)
            .sum()
    }
}

/// Extract tools from an OpenAPI document.
pub fn tools_from_openapi(doc: &serde_json::Value) -> Vec<ToolSummary> {
    let Some(paths) = doc.get("paths").and_then(|p| p.as_object()) else {
        return Vec::new();
    };
    paths
        .iter()
        .filter_map(|(path, methods)| {
            let post = methods.get("post")?;
            let field = |key: &str, fallback: &str| {
                post.get(key)
                    .and_then(|v| v.as_str())
                    .unwrap_or(fallback)
                    .to_string()
            };
            Some(ToolSummary {
                path: path.clone(),
                summary: field("summary", "No summary"),
                description: field("description", "No description"),
            })
        })
        .collect()
}

async fn fetch_tools(
    client: &reqwest::Client,
    base_url: &str,
    api_key: Option<&str>,
    server: &str,
) -> Result<Vec<ToolSummary>, String> {
    let url = format!("{}/{}/openapi.json", base_url, server);
    tracing::debug!(server, url = %url, "fetching OpenAPI document");

    let mut request = client.get(&url).timeout(DISCOVERY_TIMEOUT);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }
    let response = request
        .send()
        .await
        .map_err(|e| format!("Request error: {}", e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let excerpt: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        return Err(format!("HTTP {}: {}", status.as_u16(), excerpt));
    }

    let doc: serde_json::Value = response
        .json()
        .await
        .map_err(|_| "Invalid JSON in OpenAPI response".to_string())?;
    Ok(tools_from_openapi(&doc))
}

/// List tools of every enabled definition, fetched concurrently.
///
/// Returns the status alone when the gateway is not running.
pub async fn discover_tools(
    status: GatewayStatus,
    definitions: &[ServerDefinition],
    settings: &SupervisorSettings,
) -> DiscoveryReport {
    let mut report = DiscoveryReport {
        status,
        servers: BTreeMap::new(),
    };
    if !status.is_running() {
        tracing::warn!(status = %status, "gateway not running, skipping tool discovery");
        return report;
    }

    let client = reqwest::Client::new();
    let base_url = settings.local_base_url();
    let api_key = settings.effective_api_key();

    let enabled: Vec<&ServerDefinition> = definitions.iter().filter(|d| d.enabled).collect();
    let fetches = enabled
        .iter()
        .map(|def| fetch_tools(&client, &base_url, api_key, &def.name));
    let results = join_all(fetches).await;

    for (def, result) in enabled.into_iter().zip(results) {
        match &result {
            Ok(tools) => tracing::info!(server = %def.name, tools = tools.len(), "tools discovered"),
            Err(e) => tracing::error!(server = %def.name, error = %e, "tool discovery failed"),
        }
        report.servers.insert(def.name.clone(), result);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::TransportKind;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use serde_json::json;

    fn openapi() -> serde_json::Value {
        json!({
            "openapi": "3.1.0",
            "paths": {
                "/get_time": {"post": {"summary": "Get time", "description": "Current time"}},
                "/convert": {"post": {}},
                "/docs": {"get": {"summary": "ignored"}}
            }
        })
    }

    #[test]
    fn test_tools_from_openapi() {
        let mut tools = tools_from_openapi(&openapi());
        tools.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].path, "/convert");
        assert_eq!(tools[0].summary, "No summary");
        assert_eq!(tools[1].summary, "Get time");
        assert!(tools_from_openapi(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn test_not_running_returns_status_only() {
        let defs = vec![ServerDefinition::stdio("time", "uvx", vec![])];
        let report = discover_tools(GatewayStatus::Stopped, &defs, &SupervisorSettings::default()).await;
        assert_eq!(report.status, GatewayStatus::Stopped);
        assert!(report.servers.is_empty());
    }

    #[tokio::test]
    async fn test_discover_against_fake_gateway() {
        let app = Router::new()
            .route("/time/openapi.json", get(|| async { axum::Json(openapi()) }))
            .route("/broken/openapi.json", get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }))
            .route("/garbled/openapi.json", get(|| async { "not json" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let defs = vec![
            ServerDefinition::stdio("time", "uvx", vec![]),
            ServerDefinition::remote("broken", TransportKind::Sse, "http://x"),
            ServerDefinition::stdio("garbled", "uvx", vec![]),
            ServerDefinition::stdio("off", "uvx", vec![]).with_enabled(false),
        ];
        let settings = SupervisorSettings {
            port,
            ..Default::default()
        };
        let report = discover_tools(GatewayStatus::Running(1), &defs, &settings).await;

        assert_eq!(report.servers.len(), 3);
        assert_eq!(report.servers["time"].as_ref().map(Vec::len), Ok(2));
        let broken = report.servers["broken"].as_ref().unwrap_err();
        assert!(broken.starts_with("HTTP 502"), "{broken}");
        assert_eq!(
            report.servers["garbled"],
            Err("Invalid JSON in OpenAPI response".to_string())
        );
        assert_eq!(report.tool_count(), 2);

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "RUNNING");
        assert_eq!(value["servers"]["time"]["Ok"].as_array().map(Vec::len), Some(2));
    }
}
