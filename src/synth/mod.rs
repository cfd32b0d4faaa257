//! Configuration synthesizer.
//!
//! Builds the gateway config document from stored definitions, writes the
//! standard form to disk, renders the shell-adapted form for export, and runs
//! the inverse import path (parse, de-adapt, validate).

pub mod adapt;
pub mod document;
pub mod import;

use std::path::Path;

use crate::definition::{ServerDefinition, TransportKind};
use crate::error::StewardError;
use crate::settings::SupervisorSettings;

pub use document::{ConfigDocument, ServerEntry};

/// Build the gateway document.
///
/// Disabled definitions and enabled ones missing their required field are
/// left out. With `adapt` set, recognized launcher commands are wrapped in
/// shell indirection. When health checking is enabled the self-test entry is
/// appended and any user definition using its reserved name is dropped.
pub fn build_document(
    definitions: &[ServerDefinition],
    settings: &SupervisorSettings,
    adapt: bool,
) -> ConfigDocument {
    let self_test = settings.self_test();
    let health_enabled = settings.health_check.enabled;
    let mut doc = ConfigDocument::default();

    for def in definitions {
        if !def.enabled {
            continue;
        }
        if health_enabled && def.name == self_test.name {
            tracing::warn!(
                server = %def.name,
                "definition uses the reserved self-test name, ignored in favor of the built-in server"
            );
            continue;
        }

        let entry = match def.transport {
            TransportKind::Stdio => {
                let Some(command) = def.command.as_deref().filter(|c| !c.is_empty()) else {
                    tracing::warn!(server = %def.name, "skipping stdio definition: command is missing");
                    continue;
                };
                command_entry(command, &def.args, def.env.clone(), adapt)
            }
            TransportKind::Sse | TransportKind::StreamableHttp => {
                let Some(url) = def.url.as_deref().filter(|u| !u.is_empty()) else {
                    tracing::warn!(
                        server = %def.name,
                        transport = def.transport.as_str(),
                        "skipping remote definition: url is missing"
                    );
                    continue;
                };
                ServerEntry::Remote {
                    kind: def.transport,
                    url: url.to_string(),
                }
            }
        };

        doc.mcp_servers.insert(def.name.clone(), entry);
    }

    if health_enabled {
        let entry = command_entry(
            self_test.command,
            &self_test.args_vec(),
            Default::default(),
            adapt,
        );
        doc.mcp_servers.insert(self_test.name.to_string(), entry);
        tracing::debug!(server = self_test.name, adapted = adapt, "self-test server added");
    }

    doc
}

fn command_entry(
    command: &str,
    args: &[String],
    env: std::collections::BTreeMap<String, String>,
    adapt: bool,
) -> ServerEntry {
    let (command, args) = if adapt {
        adapt::adapt(command, args)
    } else {
        (command.to_string(), args.to_vec())
    };
    ServerEntry::Command { command, args, env }
}

/// Write the standard (non-adapted) document to `settings.config_file_path`,
/// creating parent directories as needed. Returns the number of entries.
///
/// The file is written to a sibling temp path and renamed into place so the
/// gateway never reads a half-written document.
pub async fn write_standard_document(
    definitions: &[ServerDefinition],
    settings: &SupervisorSettings,
) -> crate::Result<usize> {
    let path = settings.config_file_path.as_path();
    let doc = build_document(definitions, settings, false);
    let text = doc.to_pretty_json()?;
    write_atomic(path, text.as_bytes())
        .await
        .map_err(|e| StewardError::ConfigWrite(path.display().to_string(), e.to_string()))?;
    tracing::info!(
        path = %path.display(),
        servers = doc.len(),
        "gateway config document written"
    );
    Ok(doc.len())
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(dir).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Render the shell-adapted document as pretty JSON without touching disk.
pub fn render_adapted_document(
    definitions: &[ServerDefinition],
    settings: &SupervisorSettings,
) -> crate::Result<String> {
    build_document(definitions, settings, true).to_pretty_json()
}
