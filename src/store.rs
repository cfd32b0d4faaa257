//! Definition/settings store seam.
//!
//! Durable CRUD of definitions lives outside steward. The core only reads
//! through [`DefinitionStore`]. Two adapters ship here: [`FileStore`], a TOML
//! file the CLI points at, and [`MemoryStore`] for embedding and tests.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::definition::ServerDefinition;
use crate::error::StewardError;
use crate::settings::SupervisorSettings;

/// Read access to stored definitions and the settings record.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Enabled definitions, ordered by name.
    async fn enabled_definitions(&self) -> crate::Result<Vec<ServerDefinition>>;

    /// Names of every stored definition, enabled or not.
    async fn all_names(&self) -> crate::Result<BTreeSet<String>>;

    /// Current settings record.
    async fn load_settings(&self) -> crate::Result<SupervisorSettings>;
}

/// On-disk layout of a store file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreFile {
    #[serde(default)]
    pub settings: SupervisorSettings,
    #[serde(default)]
    pub servers: Vec<ServerDefinition>,
}

impl StoreFile {
    /// Parse and validate store file contents.
    pub fn parse(content: &str) -> crate::Result<Self> {
        let file: StoreFile =
            toml::from_str(content).map_err(|e| StewardError::ConfigParse(e.to_string()))?;
        file.validate()?;
        Ok(file)
    }

    /// Reject duplicate or empty names.
    pub fn validate(&self) -> crate::Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        for def in &self.servers {
            if def.name.trim().is_empty() {
                return Err(StewardError::Store(
                    "server definition with empty name".to_string(),
                ));
            }
            if !seen.insert(def.name.as_str()) {
                return Err(StewardError::Store(format!(
                    "duplicate server name '{}'",
                    def.name
                )));
            }
        }
        Ok(())
    }

    fn enabled_sorted(&self) -> Vec<ServerDefinition> {
        let mut defs: Vec<ServerDefinition> =
            self.servers.iter().filter(|d| d.enabled).cloned().collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    fn names(&self) -> BTreeSet<String> {
        self.servers.iter().map(|d| d.name.clone()).collect()
    }
}

/// TOML-file store. Re-read on every call so edits apply without a restart.
///
/// Relative `config_file_path` / `log_file_path` values are resolved against
/// the directory that holds the store file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> crate::Result<StoreFile> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            StewardError::Store(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        let mut file = StoreFile::parse(&content)?;
        self.resolve_paths(&mut file.settings);
        Ok(file)
    }

    fn resolve_paths(&self, settings: &mut SupervisorSettings) {
        let Some(base) = self.path.parent() else {
            return;
        };
        if settings.config_file_path.is_relative() {
            settings.config_file_path = base.join(&settings.config_file_path);
        }
        if let Some(log) = settings.log_file_path.as_mut()
            && log.is_relative()
        {
            *log = base.join(&*log);
        }
    }
}

#[async_trait]
impl DefinitionStore for FileStore {
    async fn enabled_definitions(&self) -> crate::Result<Vec<ServerDefinition>> {
        Ok(self.read().await?.enabled_sorted())
    }

    async fn all_names(&self) -> crate::Result<BTreeSet<String>> {
        Ok(self.read().await?.names())
    }

    async fn load_settings(&self) -> crate::Result<SupervisorSettings> {
        Ok(self.read().await?.settings)
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<StoreFile>,
}

impl MemoryStore {
    pub fn new(settings: SupervisorSettings, servers: Vec<ServerDefinition>) -> Self {
        Self {
            inner: RwLock::new(StoreFile { settings, servers }),
        }
    }

    /// Replace the settings record.
    pub async fn set_settings(&self, settings: SupervisorSettings) {
        self.inner.write().await.settings = settings;
    }

    /// Replace all definitions.
    pub async fn set_servers(&self, servers: Vec<ServerDefinition>) {
        self.inner.write().await.servers = servers;
    }
}

#[async_trait]
impl DefinitionStore for MemoryStore {
    async fn enabled_definitions(&self) -> crate::Result<Vec<ServerDefinition>> {
        Ok(self.inner.read().await.enabled_sorted())
    }

    async fn all_names(&self) -> crate::Result<BTreeSet<String>> {
        Ok(self.inner.read().await.names())
    }

    async fn load_settings(&self) -> crate::Result<SupervisorSettings> {
        Ok(self.inner.read().await.settings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::TransportKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[settings]
port = 9100
config_file_path = "gateway.json"

[settings.health_check]
enabled = true
auto_restart = true

[[servers]]
name = "zeta"
transport = "sse"
url = "http://localhost:9000/sse"

[[servers]]
name = "alpha"
transport = "stdio"
command = "uvx"
args = ["mcp-server-time"]

[[servers]]
name = "off"
enabled = false
transport = "stdio"
command = "npx"
"#;

    #[test]
    fn test_parse_store_file() {
        let file = StoreFile::parse(SAMPLE).expect("sample parses");
        assert_eq!(file.settings.port, 9100);
        assert!(file.settings.health_check.enabled);
        assert!(file.settings.health_check.auto_restart);
        assert_eq!(file.servers.len(), 3);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = StoreFile::parse(
            r#"
[[servers]]
name = "same"
transport = "stdio"
command = "a"

[[servers]]
name = "same"
transport = "stdio"
command = "b"
"#,
        );
        assert!(matches!(result, Err(StewardError::Store(msg)) if msg.contains("same")));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let result = StoreFile::parse("this is not toml {{{{");
        assert!(matches!(result, Err(StewardError::ConfigParse(_))));
    }

    #[tokio::test]
    async fn test_file_store_enabled_sorted_and_paths_resolved() {
        let mut temp = NamedTempFile::new().expect("create temp file");
        write!(temp, "{}", SAMPLE).expect("write store");
        let store = FileStore::new(temp.path());

        let enabled = store.enabled_definitions().await.expect("read enabled");
        let names: Vec<&str> = enabled.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(enabled[1].transport, TransportKind::Sse);

        let all = store.all_names().await.expect("read names");
        assert!(all.contains("off"));

        let settings = store.load_settings().await.expect("read settings");
        let parent = temp.path().parent().expect("temp has parent");
        assert_eq!(settings.config_file_path, parent.join("gateway.json"));
        assert_eq!(
            settings.log_file_path,
            Some(parent.join("mcpo_manager.log"))
        );
    }

    #[tokio::test]
    async fn test_file_store_empty_log_path_stays_unset() {
        let mut temp = NamedTempFile::new().expect("create temp file");
        write!(temp, "[settings]\nlog_file_path = \"\"\n").expect("write store");
        let store = FileStore::new(temp.path());

        let settings = store.load_settings().await.expect("read settings");
        assert_eq!(settings.log_file_path, None);
        let parent = temp.path().parent().expect("temp has parent");
        assert_eq!(settings.config_file_path, parent.join("mcp_generated_config.json"));
    }

    #[tokio::test]
    async fn test_file_store_missing_file() {
        let store = FileStore::new("/nonexistent/steward/steward.toml");
        let result = store.load_settings().await;
        assert!(matches!(result, Err(StewardError::Store(_))));
    }

    #[tokio::test]
    async fn test_memory_store_updates() {
        let store = MemoryStore::new(SupervisorSettings::default(), vec![]);
        assert!(store.enabled_definitions().await.unwrap().is_empty());
        store
            .set_servers(vec![ServerDefinition::stdio("b", "uvx", vec![]), ServerDefinition::stdio("a", "uvx", vec![])])
            .await;
        let names: Vec<String> = store
            .enabled_definitions()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
