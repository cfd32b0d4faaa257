//! Gateway invocation and spawn.

use std::process::Stdio;

use crate::error::StewardError;
use crate::settings::SupervisorSettings;

/// Program and arguments the gateway is launched with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayInvocation {
    pub program: String,
    pub args: Vec<String>,
}

impl GatewayInvocation {
    /// `<binary> --port <port> --config <path> [--api-key <key>]`
    pub fn from_settings(settings: &SupervisorSettings) -> Self {
        let mut args = vec![
            "--port".to_string(),
            settings.port.to_string(),
            "--config".to_string(),
            settings.config_file_path.display().to_string(),
        ];
        if let Some(key) = settings.effective_api_key() {
            args.push("--api-key".to_string());
            args.push(key.to_string());
        }
        Self {
            program: settings.gateway_binary.clone(),
            args,
        }
    }

    /// Command line for logging, with the API key masked.
    pub fn redacted(&self) -> String {
        let mut out = vec![self.program.clone()];
        let mut mask_next = false;
        for arg in &self.args {
            if mask_next {
                out.push("****".to_string());
                mask_next = false;
            } else {
                mask_next = arg == "--api-key";
                out.push(arg.clone());
            }
        }
        out.join(" ")
    }
}

/// Open the log file for appending, or fall back to discarding output.
async fn output_targets(settings: &SupervisorSettings) -> crate::Result<(Stdio, Stdio)> {
    let Some(path) = settings.log_file_path.as_deref() else {
        tracing::info!("gateway output discarded, no log file configured");
        return Ok((Stdio::null(), Stdio::null()));
    };

    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            StewardError::ProcessLaunch(format!("cannot create log directory '{}': {}", dir.display(), e))
        })?;
    }
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| StewardError::ProcessLaunch(format!("cannot open log file '{}': {}", path.display(), e)))?
        .into_std()
        .await;
    let stderr = file
        .try_clone()
        .map_err(|e| StewardError::ProcessLaunch(format!("cannot share log file handle: {}", e)))?;

    tracing::info!(path = %path.display(), "gateway output redirected to log file");
    Ok((Stdio::from(file), Stdio::from(stderr)))
}

/// Explain a `NotFound` spawn failure by looking the binary up in `PATH`.
fn missing_binary_message(program: &str) -> String {
    match which::which(program) {
        Ok(found) => format!(
            "'{}' found at '{}' but failed to launch, check permissions",
            program,
            found.display()
        ),
        Err(_) => format!(
            "'{}' not found in PATH, is the gateway installed for this environment?",
            program
        ),
    }
}

/// Spawn the gateway and return its PID.
///
/// The child is handed to a background task that reaps it, so an exited
/// gateway does not linger as a zombie.
pub async fn spawn_gateway(settings: &SupervisorSettings) -> crate::Result<u32> {
    let invocation = GatewayInvocation::from_settings(settings);
    tracing::info!(command = %invocation.redacted(), "starting gateway process");

    let (stdout, stderr) = output_targets(settings).await?;

    let mut cmd = tokio::process::Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| {
        let message = if e.kind() == std::io::ErrorKind::NotFound {
            missing_binary_message(&invocation.program)
        } else {
            format!("'{}': {}", invocation.program, e)
        };
        StewardError::ProcessLaunch(message)
    })?;

    let Some(pid) = child.id() else {
        return Err(StewardError::ProcessLaunch(
            "gateway exited before its PID could be read".to_string(),
        ));
    };

    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => tracing::info!(pid, %status, "gateway process exited"),
            Err(e) => tracing::warn!(pid, error = %e, "failed to wait on gateway process"),
        }
    });

    tracing::info!(pid, "gateway process started");
    Ok(pid)
}
