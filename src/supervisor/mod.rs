//! Process supervisor for the gateway.
//!
//! Owns the gateway's lifecycle and its PID marker. Every public operation
//! returns an [`Outcome`]; launch, termination and write failures are logged
//! and reported there instead of propagated.

pub mod controller;
pub mod launch;
pub mod marker;
pub mod state;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::definition::ServerDefinition;
use crate::error::StewardError;
use crate::health::GatewayControl;
use crate::settings::SupervisorSettings;
use crate::synth;

pub use controller::{ProcessController, platform_controller};
pub use marker::{MarkerState, PidMarker};
pub use state::{ManualOpGuard, SharedState};

/// Default marker file name inside the data directory.
pub const MARKER_FILE_NAME: &str = "mcpo_process.pid";

const GRACE_PERIOD: Duration = Duration::from_secs(2);
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Gateway state derived from the marker and a liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    /// No marker.
    Stopped,
    /// Marker present and the process is alive.
    Running(u32),
    /// Marker present but the process is gone, or the marker is unreadable.
    Error(Option<u32>),
}

impl GatewayStatus {
    pub fn label(&self) -> &'static str {
        match self {
            GatewayStatus::Stopped => "STOPPED",
            GatewayStatus::Running(_) => "RUNNING",
            GatewayStatus::Error(_) => "ERROR",
        }
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            GatewayStatus::Stopped => None,
            GatewayStatus::Running(pid) => Some(*pid),
            GatewayStatus::Error(pid) => *pid,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, GatewayStatus::Running(_))
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of an operator-facing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl Outcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl From<crate::Result<String>> for Outcome {
    fn from(result: crate::Result<String>) -> Self {
        match result {
            Ok(message) => Outcome::ok(message),
            Err(e) => Outcome::failed(e.to_string()),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Starts, stops and restarts the gateway process.
#[derive(Debug)]
pub struct Supervisor {
    marker: PidMarker,
    controller: Arc<dyn ProcessController>,
    state: Arc<SharedState>,
    grace_period: Duration,
    kill_wait: Duration,
}

impl Supervisor {
    pub fn new(
        marker_path: impl Into<PathBuf>,
        controller: Arc<dyn ProcessController>,
        state: Arc<SharedState>,
    ) -> Self {
        Self {
            marker: PidMarker::new(marker_path),
            controller,
            state,
            grace_period: GRACE_PERIOD,
            kill_wait: KILL_WAIT,
        }
    }

    /// Override the graceful-stop and forced-kill waits.
    pub fn with_timeouts(mut self, grace_period: Duration, kill_wait: Duration) -> Self {
        self.grace_period = grace_period;
        self.kill_wait = kill_wait;
        self
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn marker(&self) -> &PidMarker {
        &self.marker
    }

    /// Current gateway status. Never fails.
    ///
    /// Reads the marker and checks liveness on the calling thread; async
    /// callers use [`Supervisor::current_status`].
    pub fn status(&self) -> GatewayStatus {
        status_of(&self.marker, self.controller.as_ref())
    }

    /// [`Supervisor::status`] on the blocking pool.
    pub async fn current_status(&self) -> GatewayStatus {
        let marker = self.marker.clone();
        let controller = self.controller.clone();
        match tokio::task::spawn_blocking(move || status_of(&marker, controller.as_ref())).await {
            Ok(status) => status,
            Err(e) => {
                tracing::debug!(error = %e, "status task failed, checking inline");
                self.status()
            }
        }
    }

    /// Launch the gateway with the config document already on disk.
    pub async fn start(&self, settings: &SupervisorSettings) -> Outcome {
        let _guard = self.state.begin_manual_op();
        report("start", self.start_unguarded(settings).await)
    }

    /// Stop the gateway and its process tree.
    pub async fn stop(&self) -> Outcome {
        let _guard = self.state.begin_manual_op();
        report("stop", self.stop_unguarded().await)
    }

    /// Stop, rewrite the standard config document from `definitions`, start.
    ///
    /// A failed stop or write aborts the sequence; the gateway is then left
    /// in whatever state the failing step produced.
    pub async fn restart_with_fresh_config(
        &self,
        definitions: &[ServerDefinition],
        settings: &SupervisorSettings,
    ) -> Outcome {
        let _guard = self.state.begin_manual_op();
        let mut steps = Vec::new();

        match self.stop_unguarded().await {
            Ok(message) => steps.push(message),
            Err(e) => {
                steps.push(format!("Stop failed: {}", e));
                return report_steps("restart", false, steps);
            }
        }

        match synth::write_standard_document(definitions, settings).await {
            Ok(count) => steps.push(format!(
                "Config written to {} ({} servers).",
                settings.config_file_path.display(),
                count
            )),
            Err(e) => {
                steps.push(format!("{}. Gateway left stopped.", e));
                return report_steps("restart", false, steps);
            }
        }

        match self.start_unguarded(settings).await {
            Ok(message) => {
                steps.push(message);
                report_steps("restart", true, steps)
            }
            Err(e) => {
                steps.push(e.to_string());
                report_steps("restart", false, steps)
            }
        }
    }

    /// Last `lines` lines of the configured gateway log.
    pub async fn log_tail(&self, settings: &SupervisorSettings, lines: usize) -> Vec<String> {
        crate::logs::tail(settings.log_file_path.clone(), lines).await
    }

    async fn start_unguarded(&self, settings: &SupervisorSettings) -> crate::Result<String> {
        match self.current_status().await {
            GatewayStatus::Running(pid) => return Err(StewardError::AlreadyRunning(pid)),
            GatewayStatus::Error(pid) => {
                tracing::warn!(pid = ?pid, "clearing stale PID marker before start");
                self.clear_marker();
            }
            GatewayStatus::Stopped => {}
        }

        let config_path = &settings.config_file_path;
        if !tokio::fs::try_exists(config_path).await.unwrap_or(false) {
            return Err(StewardError::NotConfigured(config_path.display().to_string()));
        }

        let pid = launch::spawn_gateway(settings).await?;
        if let Err(e) = self.marker.write(pid) {
            tracing::error!(pid, error = %e, "failed to persist PID marker, stopping gateway");
            if let Err(stop_err) = self
                .controller
                .terminate(pid, self.grace_period, self.kill_wait)
                .await
            {
                tracing::error!(pid, error = %stop_err, "unrecorded gateway could not be stopped");
            }
            return Err(StewardError::ProcessLaunch(format!(
                "failed to persist PID marker '{}': {}",
                self.marker.path().display(),
                e
            )));
        }

        Ok(format!("Gateway started with PID {}.", pid))
    }

    async fn stop_unguarded(&self) -> crate::Result<String> {
        let pid = match self.current_status().await {
            GatewayStatus::Stopped => return Ok("Gateway is not running.".to_string()),
            GatewayStatus::Error(None) => {
                self.clear_marker();
                return Ok("Cleared unreadable PID marker.".to_string());
            }
            GatewayStatus::Error(Some(pid)) => {
                self.clear_marker();
                return Ok(format!(
                    "Gateway process {} is not running. Cleared stale PID marker.",
                    pid
                ));
            }
            GatewayStatus::Running(pid) => pid,
        };

        tracing::info!(pid, "stopping gateway process");
        self.controller
            .terminate(pid, self.grace_period, self.kill_wait)
            .await?;
        self.clear_marker();
        Ok(format!("Gateway process {} stopped.", pid))
    }

    fn clear_marker(&self) {
        if let Err(e) = self.marker.clear() {
            tracing::warn!(path = %self.marker.path().display(), error = %e, "failed to remove PID marker");
        }
    }
}

fn status_of(marker: &PidMarker, controller: &dyn ProcessController) -> GatewayStatus {
    match marker.read() {
        MarkerState::Absent => GatewayStatus::Stopped,
        MarkerState::Corrupt => {
            tracing::warn!(path = %marker.path().display(), "PID marker is unreadable");
            GatewayStatus::Error(None)
        }
        MarkerState::Present(pid) if controller.is_alive(pid) => GatewayStatus::Running(pid),
        MarkerState::Present(pid) => {
            tracing::warn!(pid, "PID marker found but process is not running");
            GatewayStatus::Error(Some(pid))
        }
    }
}

fn report(operation: &str, result: crate::Result<String>) -> Outcome {
    match &result {
        Ok(message) => tracing::info!(operation, %message, "gateway operation succeeded"),
        Err(StewardError::AlreadyRunning(pid)) => {
            tracing::warn!(operation, pid, "gateway already running")
        }
        Err(e) => tracing::error!(operation, error = %e, "gateway operation failed"),
    }
    result.into()
}

fn report_steps(operation: &str, success: bool, steps: Vec<String>) -> Outcome {
    let message = steps.join(" ");
    if success {
        tracing::info!(operation, %message, "gateway operation succeeded");
        Outcome::ok(message)
    } else {
        tracing::error!(operation, %message, "gateway operation failed");
        Outcome::failed(message)
    }
}

#[async_trait]
impl GatewayControl for Supervisor {
    async fn status(&self) -> GatewayStatus {
        self.current_status().await
    }

    async fn restart_with_fresh_config(
        &self,
        definitions: &[ServerDefinition],
        settings: &SupervisorSettings,
    ) -> Outcome {
        Supervisor::restart_with_fresh_config(self, definitions, settings).await
    }
}
