//! Steward: local control plane for an MCP tool-server gateway.
//! Synthesizes the gateway config from stored server definitions, supervises
//! the gateway process, and restarts it when its self-test stops answering.

pub mod definition;
pub mod discovery;
pub mod error;
pub mod health;
pub mod hot_reload;
pub mod logs;
pub mod settings;
pub mod store;
pub mod supervisor;
pub mod synth;

pub use definition::{ServerDefinition, TransportKind};
pub use discovery::{DiscoveryReport, ToolSummary, discover_tools};
pub use error::{Result, StewardError};
pub use health::{GatewayControl, GatewayProbe, HealthMonitor, HttpProbe, MonitorHandle};
pub use hot_reload::run_hot_reload;
pub use settings::{HealthCheckSettings, SELF_TEST, SelfTestServer, SupervisorSettings};
pub use store::{DefinitionStore, FileStore, MemoryStore};
pub use supervisor::{GatewayStatus, Outcome, SharedState, Supervisor, platform_controller};
pub use synth::import::{ImportAnalysis, analyze_import, parse_imported_document};
pub use synth::{build_document, render_adapted_document, write_standard_document};
