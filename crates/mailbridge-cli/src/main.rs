//! `mailbridge` -- CLI binary for the chat-to-Gmail bridge.
//!
//! Provides the following subcommands:
//!
//! - `mailbridge serve` -- Run the HTTP surface (OAuth, webhook, commands).
//! - `mailbridge config show` -- Print the resolved configuration.
//! - `mailbridge config check` -- Validate the configuration.

use clap::{Parser, Subcommand};

mod commands;

/// Chat-to-Gmail bridge.
#[derive(Parser)]
#[command(name = "mailbridge", about = "Chat-to-Gmail bridge", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve(commands::serve::ServeArgs),

    /// Inspect the resolved configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },
}

/// Subcommands for `mailbridge config`.
#[derive(Subcommand)]
enum ConfigCmd {
    /// Display the resolved configuration (secrets redacted).
    Show {
        /// Config file path (overrides auto-discovery).
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Report fields the bridge cannot run without.
    Check {
        /// Config file path (overrides auto-discovery).
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    match cli.command {
        Commands::Serve(args) => commands::serve::run(args).await?,
        Commands::Config { action } => {
            let platform = mailbridge_platform::NativePlatform::new();
            match action {
                ConfigCmd::Show { config } => {
                    let cfg = commands::load_config(&platform, config.as_deref()).await?;
                    commands::config_cmd::config_show(&cfg);
                }
                ConfigCmd::Check { config } => {
                    let cfg = commands::load_config(&platform, config.as_deref()).await?;
                    commands::config_cmd::config_check(&cfg)?;
                }
            }
        }
    }

    Ok(())
}
