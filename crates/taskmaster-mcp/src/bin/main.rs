use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use taskmaster_mcp::logging::{self, LogSink};
use taskmaster_mcp::transport::StdioTransport;
use taskmaster_mcp::{AppConfig, HeuristicGenerator, Services, TaskGenerator};

#[derive(Parser)]
#[command(name = "taskmaster-mcp")]
#[command(about = "Task Master MCP server with asynchronous long-running tools", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (default: ~/.taskmaster/config.toml)
    #[arg(short, long, global = true, env = "TASKMASTER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level or filter directive, overrides the configuration
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve MCP over stdio (default)
    Serve,

    /// Show the task file and the registered tools
    Info,

    /// Print the effective configuration as TOML
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Info => show_info(config).await,
        Commands::PrintConfig => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    // Held until exit so buffered log lines are flushed.
    let sink = logging::init(&config.logging)?;
    if let LogSink::Stderr = sink {
        warn!("No usable log directory, logging to stderr");
    }

    let generator: Arc<dyn TaskGenerator> = Arc::new(HeuristicGenerator::new()?);
    let services = Services::build(&config, generator).await?;
    info!(
        task_file = %config.tasks.file.display(),
        max_concurrent = config.operations.concurrency_limit(),
        "Task Master starting"
    );

    tokio::select! {
        result = services.server.serve(StdioTransport::stdio()) => result?,
        _ = shutdown_signal() => {}
    }

    let cancelled = services.manager.shutdown();
    info!(cancelled, "Operation manager stopped");
    drop(sink);
    Ok(())
}

async fn show_info(config: AppConfig) -> Result<()> {
    let generator: Arc<dyn TaskGenerator> = Arc::new(HeuristicGenerator::new()?);
    let services = Services::build(&config, generator).await?;

    let tasks = services.store.list(None).await;
    let done = tasks.iter().filter(|t| t.status.is_complete()).count();

    println!("{} v{}", services.server.info().name, services.server.info().version);
    println!("Task file: {}", config.tasks.file.display());
    println!("Tasks: {} ({} complete)", tasks.len(), done);
    if let Some(next) = services.store.next_task().await {
        println!("Next task: {} {}", next.id, next.title);
    }
    println!(
        "Operations: max {} concurrent, results kept {:?}",
        config.operations.concurrency_limit(),
        config.operations.retention()
    );

    println!("\nTools:");
    for tool in services.server.tools().list().await {
        println!("  {:<22} {}", tool.name, tool.description.unwrap_or_default());
    }

    services.manager.shutdown();
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let sigint = async {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = sigint => info!("Received SIGINT signal (Ctrl+C)"),
        _ = sigterm => info!("Received SIGTERM signal"),
    }
}
