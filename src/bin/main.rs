//! execute-sync CLI

use clap::{Parser, Subcommand};
use execute_sync::config::{LogFormat, LoggingConfig};
use execute_sync::{RunMode, SyncClient, SyncConfig};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "execute-sync")]
#[command(author, version, about = "Replicate Execute documents into a DuckDB / MotherDuck warehouse")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log level: quiet, info, debug [default: config file, else info]
    #[arg(long, global = true, env = "EXECUTESYNC_LOG_LEVEL")]
    log_level: Option<String>,

    /// JSON output (logs and results)
    #[arg(long, global = true)]
    json: bool,

    /// Also append logs to this file
    #[arg(long, global = true, env = "EXECUTESYNC_LOG_FILE")]
    log_file: Option<PathBuf>,
}

impl Cli {
    /// Command-line flags take precedence over the `[logging]` section.
    fn logging(&self, mut logging: LoggingConfig) -> LoggingConfig {
        if let Some(level) = &self.log_level {
            logging.level = level.clone();
        }
        if self.json {
            logging.format = LogFormat::Json;
        }
        if let Some(file) = &self.log_file {
            logging.file = Some(file.clone());
        }
        logging
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Periodically sync new updates to the warehouse (default)
    #[command(alias = "s")]
    Sync {
        /// Wait between iterations, in seconds or as "10m"; 0 runs once
        #[arg(short, long, value_parser = parse_wait)]
        wait: Option<Duration>,
    },
    /// One-time push of new updates to the warehouse
    #[command(alias = "p")]
    Push {
        /// Force a complete data refresh
        #[arg(short, long)]
        force: bool,
    },
    /// Fetch the schema and create helper views
    CreateViews,
    /// Remove superseded batches from the warehouse
    Prune,
    /// Create views, then push everything from the beginning
    Clone,
    /// Print the effective configuration, secrets removed
    Config,
    /// Generate sample config
    Init {
        #[arg(short, long, default_value = "execute-sync.toml")]
        output: String,
    },
    /// Print the version
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Commands that don't need config
    let loaded = match cli.command {
        Some(Commands::Init { .. }) | Some(Commands::Version) => None,
        _ => Some(load_config(cli.config.as_deref())),
    };

    let logging = match &loaded {
        Some(Ok((config, _))) => cli.logging(config.logging.clone()),
        _ => cli.logging(LoggingConfig::default()),
    };
    if let Err(e) = init_logging(&logging) {
        eprintln!("Failed to initialise logging: {}", e);
        return ExitCode::FAILURE;
    }

    let outcome = match loaded {
        None => run_standalone(&cli),
        Some(Err(e)) => Err(e),
        Some(Ok((config, source))) => {
            info!("Loaded config from {}", source);
            run(cli, config).await
        }
    };

    match outcome {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_standalone(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    match &cli.command {
        Some(Commands::Init { output }) => run_init(output),
        _ => {
            println!("execute-sync {}", execute_sync::VERSION);
            Ok(())
        }
    }
}

async fn run(cli: Cli, mut config: SyncConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        None => run_sync(config, RunMode::Continuous, cli.json).await,
        Some(Commands::Sync { wait }) => {
            if let Some(wait) = wait {
                config.sync.wait = wait;
            }
            run_sync(config, RunMode::Continuous, cli.json).await
        }
        Some(Commands::Push { force }) => {
            config.sync.force |= force;
            run_sync(config, RunMode::OneShot, cli.json).await
        }
        Some(Commands::CreateViews) => {
            let client = SyncClient::connect(config)?;
            let stats = client.create_views().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("✓ Created {} views", stats.created);
                for (view, e) in &stats.failed {
                    println!("  ✗ {}: {}", view, e);
                }
            }
            Ok(())
        }
        Some(Commands::Prune) => {
            let client = SyncClient::connect(config)?;
            let removed = client.prune()?;
            if cli.json {
                println!(r#"{{"rows_pruned":{}}}"#, removed);
            } else {
                println!("✓ Pruned {} superseded rows", removed);
            }
            Ok(())
        }
        Some(Commands::Clone) => {
            let client = SyncClient::connect(config)?;
            let iteration = client.clone_warehouse().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&iteration)?);
            } else {
                println!(
                    "✓ Clone completed: {} documents in {} pages ({}ms)",
                    iteration.documents_synced(),
                    iteration.pages,
                    iteration.duration_ms
                );
            }
            Ok(())
        }
        Some(Commands::Config) => {
            print!("{}", config.to_redacted_toml()?);
            Ok(())
        }
        Some(Commands::Init { .. }) | Some(Commands::Version) => unreachable!(), // Handled by run_standalone
    }
}

/// Load the configuration and describe where it came from.
fn load_config(path: Option<&str>) -> Result<(SyncConfig, String), Box<dyn std::error::Error>> {
    if let Some(p) = path {
        return Ok((SyncConfig::from_file(p)?, p.to_string()));
    }

    for default in &["execute-sync.toml", ".execute-sync.toml"] {
        if std::path::Path::new(default).exists() {
            return Ok((SyncConfig::from_file(default)?, default.to_string()));
        }
    }

    Ok((SyncConfig::from_env()?, "environment".to_string()))
}

async fn run_sync(
    config: SyncConfig,
    mode: RunMode,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !json {
        info!("execute-sync v{} ({})", execute_sync::VERSION, mode);
    }

    let client = SyncClient::connect(config)?;
    let result = client.run(mode).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.success {
        println!(
            "✓ {} iterations, {} documents synced, {} rejected",
            result.iterations,
            result.total_documents(),
            result.documents_rejected
        );
    } else {
        println!(
            "✗ {} of {} iterations failed, {} documents synced",
            result.failed_iterations,
            result.iterations,
            result.total_documents()
        );
    }
    Ok(())
}

fn run_init(output: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = r#"# execute-sync configuration

[upstream]
url = "https://execute.example.com/"
key_id = "your_key_id"
key_secret = "your_key_secret"
max_documents = 1000
include_calcs = false

[warehouse]
# Local DuckDB file; defaults to execute.duckdb in the state directory
# dsn = "execute.duckdb"
# Set a token to write to MotherDuck instead
# motherduck_token = "your_motherduck_token"
database = "execute"

[sync]
chunk_size = 10000
wait = "10m"
state_dir = "."
prune_interval = "24h"

[logging]
level = "info"
format = "text"
"#;

    std::fs::write(output, config)?;
    println!("✓ Created: {}", output);
    println!("\nEdit the file or use environment variables:");
    println!("  EXECUTESYNC_EXECUTE_URL, EXECUTESYNC_EXECUTE_APIKEY_ID, EXECUTESYNC_EXECUTE_APIKEY_SECRET");
    Ok(())
}

fn parse_wait(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).map_err(|e| e.to_string())
}

fn init_logging(logging: &LoggingConfig) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter_directive()));

    let file = match &logging.file {
        Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
        None => None,
    };

    // Logs go to stderr so JSON results on stdout stay parseable
    match (logging.format, file) {
        (LogFormat::Json, Some(file)) => fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr.and(Mutex::new(file)))
            .init(),
        (LogFormat::Json, None) => fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        (LogFormat::Text, Some(file)) => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(std::io::stderr.and(Mutex::new(file)))
            .init(),
        (LogFormat::Text, None) => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
    }
    Ok(())
}
