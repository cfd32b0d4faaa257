//! Health monitor: probes the gateway through its self-test server and
//! drives supervised restarts after repeated failures.
//!
//! Each iteration reloads settings from the store, so enabling, disabling or
//! retuning health checks takes effect on the next tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::definition::ServerDefinition;
use crate::error::StewardError;
use crate::settings::{HealthCheckSettings, SupervisorSettings};
use crate::store::DefinitionStore;
use crate::supervisor::{GatewayStatus, Outcome, SharedState};

/// Delay while an operator-triggered operation is in flight.
const MANUAL_OP_DELAY: Duration = Duration::from_secs(2);

/// Bound on a single health probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Cooldown multiplier applied to the interval after a failed auto-restart.
const FAILED_RESTART_COOLDOWN: u32 = 3;

/// Single-shot health check against the running gateway.
#[async_trait]
pub trait GatewayProbe: Send + Sync {
    async fn probe(&self, settings: &SupervisorSettings) -> crate::Result<()>;
}

/// What the monitor needs from the supervisor.
#[async_trait]
pub trait GatewayControl: Send + Sync {
    async fn status(&self) -> GatewayStatus;

    async fn restart_with_fresh_config(
        &self,
        definitions: &[ServerDefinition],
        settings: &SupervisorSettings,
    ) -> Outcome;
}

/// POSTs the self-test payload to the gateway's loopback port.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayProbe for HttpProbe {
    async fn probe(&self, settings: &SupervisorSettings) -> crate::Result<()> {
        let self_test = settings.self_test();
        let url = format!("{}{}", settings.local_base_url(), self_test.exposed_path());

        let mut request = self
            .client
            .post(&url)
            .json(&self_test.payload_json())
            .timeout(self.timeout);
        if let Some(key) = settings.effective_api_key() {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                "timeout"
            } else if e.is_connect() {
                "connection failed"
            } else {
                "request failed"
            };
            StewardError::Probe(format!("{} ({}): {}", kind, url, e))
        })?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(url = %url, status = status.as_u16(), "health probe succeeded");
            Ok(())
        } else {
            Err(StewardError::Probe(format!("HTTP {} from {}", status.as_u16(), url)))
        }
    }
}

/// Failure-counting monitor loop.
pub struct HealthMonitor {
    store: Arc<dyn DefinitionStore>,
    control: Arc<dyn GatewayControl>,
    probe: Arc<dyn GatewayProbe>,
    state: Arc<SharedState>,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        control: Arc<dyn GatewayControl>,
        probe: Arc<dyn GatewayProbe>,
        state: Arc<SharedState>,
    ) -> Self {
        Self {
            store,
            control,
            probe,
            state,
        }
    }

    fn reset_failures(&self, reason: &str) {
        let previous = self.state.reset_failures();
        if previous > 0 {
            tracing::info!(previous, reason, "health failure counter reset");
        }
    }

    /// Run one iteration and return how long to sleep before the next.
    pub async fn tick(&self) -> Duration {
        let settings = match self.store.load_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load settings, skipping health check");
                self.reset_failures("settings unavailable");
                return HealthCheckSettings::default().interval();
            }
        };
        let health = &settings.health_check;

        if !health.enabled {
            self.reset_failures("health check disabled");
            return health.interval();
        }

        if self.state.manual_op_in_flight() {
            tracing::debug!("manual gateway operation in flight, skipping health check");
            return MANUAL_OP_DELAY;
        }

        let status = self.control.status().await;
        if !status.is_running() {
            tracing::debug!(status = %status, "gateway not running, skipping health check");
            self.reset_failures("gateway not running");
            return health.interval();
        }

        let error = match self.probe.probe(&settings).await {
            Ok(()) => {
                self.reset_failures("health probe succeeded");
                return health.interval();
            }
            Err(e) => e,
        };

        let failures = self.state.record_failure();
        let threshold = health.threshold();
        tracing::warn!(failures, threshold, error = %error, "gateway health probe failed");

        if failures < threshold {
            return health.retry_delay();
        }

        if !health.auto_restart {
            tracing::error!(
                failures,
                "gateway unhealthy and auto-restart is disabled, manual intervention required"
            );
            self.state.reset_failures();
            return health.interval();
        }

        tracing::warn!(failures, "failure threshold reached, restarting gateway");
        let definitions = match self.store.enabled_definitions().await {
            Ok(definitions) => definitions,
            Err(e) => {
                tracing::error!(error = %e, "failed to load definitions for auto-restart");
                self.state.reset_failures();
                return health.interval() * FAILED_RESTART_COOLDOWN;
            }
        };

        let outcome = self
            .control
            .restart_with_fresh_config(&definitions, &settings)
            .await;
        self.state.reset_failures();
        if outcome.success {
            tracing::info!(message = %outcome.message, "gateway auto-restart succeeded");
            health.interval()
        } else {
            tracing::error!(message = %outcome.message, "gateway auto-restart failed, cooling down");
            health.interval() * FAILED_RESTART_COOLDOWN
        }
    }

    /// Loop until `cancel` fires. Cancellation is observed at every sleep.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!("health monitor started");
        while !cancel.is_cancelled() {
            let delay = self.tick().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        tracing::info!("health monitor stopped");
    }

    /// Run on a background task.
    pub fn spawn(self, cancel: CancellationToken) -> MonitorHandle {
        let task = tokio::spawn(self.run(cancel.clone()));
        MonitorHandle { cancel, task }
    }
}

/// Handle to a spawned monitor.
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Cancel and wait up to `timeout` for the loop to exit.
    ///
    /// Returns `false` if the task had to be aborted.
    pub async fn shutdown(self, timeout: Duration) -> bool {
        self.cancel.cancel();
        let abort = self.task.abort_handle();
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "health monitor task ended abnormally");
                true
            }
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "health monitor did not stop in time, aborting");
                abort.abort();
                false
            }
        }
    }
}
