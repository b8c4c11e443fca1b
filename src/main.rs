mod demos;

use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parasel_catalog::{run_task, RunRequest, TaskCatalog, VersionSelector};
use parasel_core::config::AppConfig;
use parasel_core::error::ParaselError;
use parasel_engine::{CommandHook, ExecutionPolicy, Executor, TracingHook};

const DEFAULT_CONFIG: &str = "parasel.toml";

#[derive(Parser)]
#[command(name = "parasel", version, about = "Concurrent step-pipeline runner")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG, env = "PARASEL_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override the configured bind address
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run a registered task and print its report
    Run {
        /// Task id
        task: String,
        /// Version selector: latest, stable, or an exact version
        #[arg(long, default_value = "latest")]
        version: String,
        /// Initial context as a JSON object, or `-` to read it from stdin
        #[arg(long)]
        input: Option<String>,
    },
    /// List registered tasks
    Tasks,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "parasel", &mut io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .init();

    let mut policy = ExecutionPolicy::from_config(&config.engine).with_hook(TracingHook);
    if let Some(hooks) = config.hooks.as_ref().filter(|h| !h.is_empty()) {
        policy = policy.with_hook(CommandHook::from_config(hooks));
    }
    let executor = Arc::new(Executor::new(policy));

    let mut catalog = TaskCatalog::new();
    demos::register_demos(&mut catalog)?;
    let catalog = Arc::new(catalog);

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Tasks => {
            for summary in catalog.summaries() {
                let stable = summary
                    .stable
                    .map(|v| format!(" (stable {})", v))
                    .unwrap_or_default();
                println!(
                    "{:<20} {}{}  {}",
                    summary.task_id,
                    summary.latest,
                    stable,
                    summary.description.unwrap_or_default()
                );
            }
        }
        Commands::Run {
            task,
            version,
            input,
        } => {
            // Validate the selector before reading any input.
            let _: VersionSelector = version.parse()?;
            let data = match input.as_deref() {
                Some("-") => {
                    let mut text = String::new();
                    io::stdin().read_to_string(&mut text)?;
                    parse_input(&text)?
                }
                Some(text) => parse_input(text)?,
                None => HashMap::new(),
            };

            let request = RunRequest::new(data).with_version(version);
            let report = run_task(&catalog, &executor, Some(&task), request).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                std::process::exit(1);
            }
        }
        Commands::Serve { bind } => {
            let mut gateway_config = config.gateway.clone();
            if let Some(bind) = bind {
                gateway_config.bind = bind;
            }
            info!(bind = %gateway_config.bind, "Starting gateway");
            let server = parasel_gateway::GatewayServer::new(gateway_config, catalog, executor);
            let cancel = tokio_util::sync::CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                cancel_clone.cancel();
            });

            server.run(cancel).await?;
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

/// A missing default config file means built-in defaults; an explicit path
/// must exist.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    match AppConfig::load(path) {
        Ok(config) => Ok(config),
        Err(ParaselError::ConfigNotFound(_)) if path == Path::new(DEFAULT_CONFIG) => {
            Ok(AppConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

fn parse_input(text: &str) -> anyhow::Result<HashMap<String, Value>> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => anyhow::bail!("input must be a JSON object, got {}", other),
    }
}
