use anyhow::Result;
use clap::{Parser, Subcommand};
use sessync::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "sessync")]
#[command(about = "sessync - export and import per-origin storage snapshots")]
#[command(version)]
struct Cli {
    /// Path to config file (default: ~/.sessync/config.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides config)
    #[arg(long, global = true, env = "SESSYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Export an origin's storage to a snapshot file
    Export {
        /// Origin whose storage is exported
        #[arg(short, long)]
        origin: String,

        /// Output file; a `.zst` suffix compresses it
        #[arg(short = 'O', long)]
        output: Option<PathBuf>,
    },

    /// Import a snapshot file into an origin
    Import {
        #[arg(short, long)]
        origin: String,

        /// Snapshot file to apply
        #[arg(short, long)]
        input: PathBuf,

        /// Never touch databases whose name contains this (repeatable)
        #[arg(long = "deny")]
        deny: Vec<String>,

        /// Leave key-value areas alone
        #[arg(long)]
        skip_kv: bool,

        /// Leave structured databases alone
        #[arg(long)]
        skip_structured: bool,
    },

    /// Print a summary of a snapshot file
    Inspect {
        #[arg(short, long)]
        input: PathBuf,

        /// List every database and store
        #[arg(short, long)]
        verbose: bool,
    },

    /// Discard an origin's session area, as when its browsing session ends
    ClearSession {
        #[arg(short, long)]
        origin: String,
    },

    /// Serve the session bridge over stdin/stdout, one JSON message per line
    Bridge {
        #[arg(short, long)]
        origin: String,
    },
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if let Some(config_path) = &cli.config {
        Config::load_or_create(config_path)?
    } else if let Some(data_dir) = &cli.data_dir {
        Config::load_from(data_dir)?
    } else {
        Config::load()?
    };

    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    Ok(config)
}

/// Logs go to stderr so stdout stays free for bridge messages.
fn init_logging(config: &Config) {
    let log_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    let log_format = std::env::var("LOG_FORMAT")
        .unwrap_or_else(|_| config.observability.log_format.clone());

    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(log_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(log_filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config);

    tracing::debug!("Data dir: {:?}", config.storage.data_dir);

    match cli.command {
        Commands::Export { origin, output } => {
            commands::run_export(&config, &origin, output).await?;
        }
        Commands::Import {
            origin,
            input,
            deny,
            skip_kv,
            skip_structured,
        } => {
            let args = commands::ImportArgs {
                deny,
                skip_key_values: skip_kv,
                skip_structured,
            };
            commands::run_import(&config, &origin, &input, args).await?;
        }
        Commands::Inspect { input, verbose } => {
            commands::run_inspect(&input, verbose)?;
        }
        Commands::ClearSession { origin } => {
            commands::run_clear_session(&config, &origin).await?;
        }
        Commands::Bridge { origin } => {
            commands::run_bridge(&config, &origin).await?;
        }
    }

    Ok(())
}
