//! Supervisor settings and the fixed self-test server constants.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

/// Identity, invocation and probe constants of the built-in self-test server.
///
/// These are not operator-editable; they are appended to the gateway config
/// when health checking is enabled and probed through the gateway's own port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfTestServer {
    pub name: &'static str,
    pub command: &'static str,
    pub args: &'static [&'static str],
    pub probe_path: &'static str,
    pub payload: &'static str,
}

/// The self-test server shipped with steward.
pub const SELF_TEST: SelfTestServer = SelfTestServer {
    name: "echo-mcp-server-for-testing",
    command: "uvx",
    args: &["echo-mcp-server-for-testing"],
    probe_path: "/echo",
    payload: r#"{"message":"health-check"}"#,
};

impl SelfTestServer {
    pub fn args_vec(&self) -> Vec<String> {
        self.args.iter().map(|a| a.to_string()).collect()
    }

    /// Path of the probe endpoint as exposed by the gateway: `/<name><probe_path>`.
    pub fn exposed_path(&self) -> String {
        format!("/{}{}", self.name, self.probe_path)
    }

    /// Parsed probe payload.
    pub fn payload_json(&self) -> serde_json::Value {
        serde_json::from_str(self.payload).unwrap_or(serde_json::Value::Null)
    }
}

fn default_port() -> u16 {
    8000
}

fn default_config_file_path() -> PathBuf {
    PathBuf::from("mcp_generated_config.json")
}

fn default_log_file_path() -> Option<PathBuf> {
    Some(PathBuf::from("mcpo_manager.log"))
}

/// An empty `log_file_path` means "no log file": gateway output is discarded.
fn deserialize_log_file_path<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()).map(PathBuf::from))
}

fn serialize_log_file_path<S>(path: &Option<PathBuf>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match path {
        Some(path) => path.serialize(serializer),
        None => serializer.serialize_str(""),
    }
}

fn default_gateway_binary() -> String {
    "mcpo".to_string()
}

fn default_interval_secs() -> u64 {
    10
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

/// Health-check section of the supervisor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default)]
    pub auto_restart: bool,
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_interval_secs(),
            failure_threshold: default_failure_threshold(),
            retry_delay_secs: default_retry_delay_secs(),
            auto_restart: false,
        }
    }
}

impl HealthCheckSettings {
    /// Full polling interval, never zero.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Short delay between sub-threshold retries, never zero.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs.max(1))
    }

    /// Consecutive failures that trigger action, never zero.
    pub fn threshold(&self) -> u32 {
        self.failure_threshold.max(1)
    }
}

/// Settings record consumed by the synthesizer, supervisor and monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorSettings {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally reachable base URL of the gateway, informational only.
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub use_api_key: bool,
    #[serde(default = "default_config_file_path")]
    pub config_file_path: PathBuf,
    /// Gateway stdout/stderr target. `""` in the store discards output.
    #[serde(
        default = "default_log_file_path",
        deserialize_with = "deserialize_log_file_path",
        serialize_with = "serialize_log_file_path"
    )]
    pub log_file_path: Option<PathBuf>,
    #[serde(default = "default_gateway_binary")]
    pub gateway_binary: String,
    #[serde(default)]
    pub health_check: HealthCheckSettings,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            public_base_url: None,
            api_key: None,
            use_api_key: false,
            config_file_path: default_config_file_path(),
            log_file_path: default_log_file_path(),
            gateway_binary: default_gateway_binary(),
            health_check: HealthCheckSettings::default(),
        }
    }
}

impl SupervisorSettings {
    /// The auth token, if one is set and applying it is enabled.
    pub fn effective_api_key(&self) -> Option<&str> {
        match (&self.api_key, self.use_api_key) {
            (Some(key), true) if !key.is_empty() => Some(key.as_str()),
            _ => None,
        }
    }

    /// Loopback base URL of the gateway.
    pub fn local_base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Self-test constants. Fixed; exposed through settings for convenience.
    pub fn self_test(&self) -> &'static SelfTestServer {
        &SELF_TEST
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let settings: SupervisorSettings = toml::from_str("").expect("valid TOML");
        assert_eq!(settings, SupervisorSettings::default());
        assert_eq!(settings.port, 8000);
        assert_eq!(settings.gateway_binary, "mcpo");
        assert!(!settings.health_check.enabled);
        assert_eq!(settings.health_check.failure_threshold, 3);
    }

    #[test]
    fn test_empty_log_file_path_discards_output() {
        let settings: SupervisorSettings =
            toml::from_str("log_file_path = \"\"").expect("valid TOML");
        assert_eq!(settings.log_file_path, None);

        let settings: SupervisorSettings =
            toml::from_str("log_file_path = \"logs/gw.log\"").expect("valid TOML");
        assert_eq!(settings.log_file_path, Some(PathBuf::from("logs/gw.log")));
    }

    #[test]
    fn test_unset_log_file_path_survives_toml() {
        let settings = SupervisorSettings {
            log_file_path: None,
            ..Default::default()
        };
        let text = toml::to_string(&settings).expect("serializable");
        assert!(text.contains("log_file_path = \"\""), "{text}");
        let back: SupervisorSettings = toml::from_str(&text).expect("valid TOML");
        assert_eq!(back, settings);
    }

    #[test]
    fn test_effective_api_key_requires_flag() {
        let mut settings = SupervisorSettings {
            api_key: Some("secret".to_string()),
            ..Default::default()
        };
        assert_eq!(settings.effective_api_key(), None);
        settings.use_api_key = true;
        assert_eq!(settings.effective_api_key(), Some("secret"));
        settings.api_key = Some(String::new());
        assert_eq!(settings.effective_api_key(), None);
    }

    #[test]
    fn test_zero_durations_clamped() {
        let hc = HealthCheckSettings {
            interval_secs: 0,
            retry_delay_secs: 0,
            failure_threshold: 0,
            ..Default::default()
        };
        assert_eq!(hc.interval(), Duration::from_secs(1));
        assert_eq!(hc.retry_delay(), Duration::from_secs(1));
        assert_eq!(hc.threshold(), 1);
    }

    #[test]
    fn test_self_test_exposed_path_and_payload() {
        assert_eq!(
            SELF_TEST.exposed_path(),
            "/echo-mcp-server-for-testing/echo"
        );
        assert_eq!(SELF_TEST.payload_json()["message"], "health-check");
    }
}
