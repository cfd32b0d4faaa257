//! steward: command-line front-end for the MCP gateway control plane.
//!
//! One-shot subcommands (`status`, `start`, `stop`, `restart`, `config`,
//! `export`, `import`, `tools`, `logs`) act on the gateway and exit; `run`
//! stays in the foreground with the health monitor and store hot-reload.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mcpo_steward::supervisor::MARKER_FILE_NAME;
use mcpo_steward::{
    DefinitionStore, FileStore, GatewayStatus, HealthMonitor, HttpProbe, Outcome, SharedState,
    Supervisor, SupervisorSettings, analyze_import, discover_tools, parse_imported_document,
    platform_controller, render_adapted_document, run_hot_reload, write_standard_document,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Bound on joining background tasks at shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// steward: supervise an MCP tool-server gateway.
#[derive(Parser)]
#[command(
    name = "steward",
    version,
    about = "steward: supervise an MCP tool-server gateway"
)]
struct Cli {
    /// Path to steward.toml [default: ./steward.toml or ~/.config/steward/steward.toml]
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,
    /// Directory holding the gateway PID marker [default: the store file's directory]
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print gateway status (STOPPED, RUNNING or ERROR) and PID
    Status,
    /// Write the gateway config from the store, then start the gateway
    Start,
    /// Stop the gateway and its child processes
    Stop,
    /// Stop, rewrite the config from the store, start
    Restart,
    /// Write the gateway config document from the store
    Config,
    /// Print the shell-adapted config document
    Export,
    /// Analyze an MCP config document against the store
    Import {
        /// JSON file to import
        file: PathBuf,
        /// Mark imported definitions enabled
        #[arg(long)]
        enable: bool,
    },
    /// List tools exposed by each enabled server through the running gateway
    Tools,
    /// Show the tail of the gateway log
    Logs {
        /// Number of lines
        #[arg(short = 'n', long, default_value = "100")]
        lines: usize,
    },
    /// Keep the gateway supervised in the foreground until Ctrl-C
    Run {
        /// Stop the gateway on exit instead of leaving it running
        #[arg(long)]
        stop_on_exit: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // RUST_LOG controls verbosity
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();

    // Ctrl-C handler cancels the root token for graceful shutdown
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutting down steward...");
        cancel_for_signal.cancel();
    });

    let store_path = resolve_store(cli.store)?;
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => store_dir(&store_path),
    };
    let ctx = App::new(store_path, &data_dir);

    let success = match cli.command {
        Commands::Status => {
            let status = ctx.supervisor.current_status().await;
            match status.pid() {
                Some(pid) => println!("{} (PID {})", status, pid),
                None => println!("{}", status),
            }
            true
        }
        Commands::Start => {
            let (definitions, settings) = ctx.load().await?;
            match write_standard_document(&definitions, &settings).await {
                Ok(_) => print_outcome(&ctx.supervisor.start(&settings).await),
                Err(e) => print_outcome(&Outcome::failed(e.to_string())),
            }
        }
        Commands::Stop => print_outcome(&ctx.supervisor.stop().await),
        Commands::Restart => {
            let (definitions, settings) = ctx.load().await?;
            print_outcome(
                &ctx.supervisor
                    .restart_with_fresh_config(&definitions, &settings)
                    .await,
            )
        }
        Commands::Config => {
            let (definitions, settings) = ctx.load().await?;
            let count = write_standard_document(&definitions, &settings).await?;
            println!(
                "Config written to {} ({} servers).",
                settings.config_file_path.display(),
                count
            );
            true
        }
        Commands::Export => {
            let (definitions, settings) = ctx.load().await?;
            println!("{}", render_adapted_document(&definitions, &settings)?);
            true
        }
        Commands::Import { file, enable } => run_import(&ctx, &file, enable).await?,
        Commands::Tools => run_tools(&ctx).await?,
        Commands::Logs { lines } => {
            let settings = ctx.settings().await?;
            for line in ctx.supervisor.log_tail(&settings, lines).await {
                println!("{}", line);
            }
            true
        }
        Commands::Run { stop_on_exit } => run_foreground(&ctx, stop_on_exit, cancel).await?,
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Store handle plus the supervisor built over the data directory.
struct App {
    store_path: PathBuf,
    store: Arc<FileStore>,
    state: Arc<SharedState>,
    supervisor: Arc<Supervisor>,
}

impl App {
    fn new(store_path: PathBuf, data_dir: &Path) -> Self {
        let state = SharedState::new();
        let supervisor = Supervisor::new(
            data_dir.join(MARKER_FILE_NAME),
            platform_controller(),
            state.clone(),
        );
        Self {
            store: Arc::new(FileStore::new(&store_path)),
            store_path,
            state,
            supervisor: Arc::new(supervisor),
        }
    }

    async fn settings(&self) -> Result<SupervisorSettings> {
        self.store
            .load_settings()
            .await
            .with_context(|| format!("Failed to load settings from {}", self.store_path.display()))
    }

    async fn load(&self) -> Result<(Vec<mcpo_steward::ServerDefinition>, SupervisorSettings)> {
        let definitions = self
            .store
            .enabled_definitions()
            .await
            .with_context(|| format!("Failed to load definitions from {}", self.store_path.display()))?;
        Ok((definitions, self.settings().await?))
    }
}

fn print_outcome(outcome: &Outcome) -> bool {
    if outcome.success {
        println!("{}", outcome.message);
    } else {
        eprintln!("Error: {}", outcome.message);
    }
    outcome.success
}

async fn run_import(ctx: &App, file: &Path, enable: bool) -> Result<bool> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let names = ctx
        .store
        .all_names()
        .await
        .with_context(|| format!("Failed to load definitions from {}", ctx.store_path.display()))?;

    let (pairs, warnings) = parse_imported_document(&text);
    let analysis = analyze_import(&names, pairs, enable);

    for warning in warnings.iter().chain(&analysis.notes) {
        println!("warning: {}", warning);
    }
    for name in &analysis.existing {
        println!("existing: {}", name);
    }
    for invalid in &analysis.invalid {
        println!("invalid: {}: {}", invalid.name, invalid.reason);
    }
    if !analysis.valid_new.is_empty() {
        println!("new ({}):", analysis.valid_new.len());
        println!("{}", serde_json::to_string_pretty(&analysis.valid_new)?);
    }
    Ok(analysis.invalid.is_empty())
}

async fn run_tools(ctx: &App) -> Result<bool> {
    let (definitions, settings) = ctx.load().await?;
    let report = discover_tools(ctx.supervisor.current_status().await, &definitions, &settings).await;

    println!("Gateway: {}", report.status);
    for (server, result) in &report.servers {
        match result {
            Ok(tools) => {
                println!("{} ({} tools)", server, tools.len());
                for tool in tools {
                    println!("  {}  {}", tool.path, tool.summary);
                }
            }
            Err(e) => println!("{}: error: {}", server, e),
        }
    }
    Ok(report.status.is_running())
}

/// Start the gateway if needed, then supervise it until cancelled.
async fn run_foreground(ctx: &App, stop_on_exit: bool, cancel: CancellationToken) -> Result<bool> {
    let status = ctx.supervisor.current_status().await;
    if let GatewayStatus::Running(pid) = status {
        tracing::info!(pid, "gateway already running, attaching");
    } else {
        let (definitions, settings) = ctx.load().await?;
        let outcome = ctx
            .supervisor
            .restart_with_fresh_config(&definitions, &settings)
            .await;
        if !print_outcome(&outcome) {
            return Ok(false);
        }
    }

    let monitor = HealthMonitor::new(
        ctx.store.clone(),
        ctx.supervisor.clone(),
        Arc::new(HttpProbe::new()),
        ctx.state.clone(),
    )
    .spawn(cancel.child_token());

    let hot_reload = tokio::spawn(run_hot_reload(
        ctx.store_path.clone(),
        ctx.store.clone(),
        ctx.supervisor.clone(),
        cancel.child_token(),
    ));

    tracing::info!(store = %ctx.store_path.display(), "steward supervising gateway, press Ctrl-C to exit");
    cancel.cancelled().await;

    if !monitor.shutdown(SHUTDOWN_TIMEOUT).await {
        tracing::warn!("health monitor was aborted");
    }
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, hot_reload).await.is_err() {
        tracing::warn!("hot-reload task did not stop in time");
    }

    if stop_on_exit {
        return Ok(print_outcome(&ctx.supervisor.stop().await));
    }
    tracing::info!("steward stopped, gateway left running");
    Ok(true)
}

/// Resolve the store path: explicit flag → ./steward.toml → ~/.config/steward/steward.toml.
fn resolve_store(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }

    let local = Path::new("steward.toml");
    if local.exists() {
        return Ok(local.to_path_buf());
    }

    if let Some(config_dir) = dirs::config_dir() {
        let xdg = config_dir.join("steward").join("steward.toml");
        if xdg.exists() {
            return Ok(xdg);
        }
    }

    Err(anyhow::anyhow!(
        "No steward.toml found. Searched ./steward.toml and ~/.config/steward/steward.toml. \
         Use --store to specify a path."
    ))
}

fn store_dir(store_path: &Path) -> PathBuf {
    match store_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
