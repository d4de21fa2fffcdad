use clap::{Parser, Subcommand};
use mcpwatch::cli::replay::parse_timeout;
use mcpwatch::config::resolve_config_path;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mcpwatch")]
#[command(about = "Telemetry pipeline for MCP servers", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose pipeline logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send JSON-lines events through a pipeline and drain it
    Replay {
        file: PathBuf,

        /// Drain budget at shutdown
        #[arg(long, default_value = "5s", value_parser = parse_timeout)]
        timeout: Duration,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "mcpwatch=debug" } else { "mcpwatch=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Commands::Replay { file, timeout } => {
            mcpwatch::cli::replay::run(config_path, &file, timeout).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Init { stdout } => {
                mcpwatch::cli::config::init(stdout)?;
            }
            ConfigAction::Validate => {
                mcpwatch::cli::config::validate(config_path)?;
            }
        },
    }

    Ok(())
}
