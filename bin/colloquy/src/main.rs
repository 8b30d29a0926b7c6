mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "colloquy")]
#[command(about = "Conversation orchestration gateway", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file (defaults apply when absent)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (long-running daemon)
    Serve {
        /// Host to bind to (overrides config gateway.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config gateway.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Connect to a running gateway and chat interactively
    Chat {
        /// Gateway WebSocket URL
        #[arg(long, default_value = "ws://127.0.0.1:18890/ws")]
        url: String,
    },

    /// Query a running gateway's health and capability table
    Status {
        /// Gateway base URL
        #[arg(long, default_value = "http://127.0.0.1:18890")]
        url: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the resolved configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { host, port } => {
            commands::serve::run(cli.config, host, port).await?;
        }
        Commands::Chat { url } => {
            commands::chat::run(&url).await?;
        }
        Commands::Status { url } => {
            commands::status::run(&url).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                commands::config_cmd::show(cli.config)?;
            }
        },
    }

    Ok(())
}
