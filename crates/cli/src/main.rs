//! Traymind CLI, the headless front end.
//!
//! Commands:
//! - `run`      Chat with the agent on the console (or send one message)
//! - `plugins`  List discovered plugins and how they load
//! - `config`   Show, locate, validate or generate the configuration
//! - `status`   Show runtime status

use clap::{Parser, Subcommand};
use traymind_config::ConfigStore;

mod commands;

#[derive(Parser)]
#[command(
    name = "traymind",
    about = "Traymind: event-driven desktop assistant runtime",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Run {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List discovered plugins
    Plugins,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Show runtime status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Print a default config file
    Default,
    /// Validate the config file
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let store = ConfigStore::open_default();

    // Initialize tracing
    let configured = store
        .as_ref()
        .map(|s| s.get().logging.level)
        .unwrap_or_else(|_| "info".to_string());
    let filter = if cli.verbose { "debug".to_string() } else { configured };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run { message } => commands::run::run(store?, message).await?,
        Commands::Plugins => commands::plugins::run(store?).await?,
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Path) {
            ConfigAction::Show => commands::config_cmd::show(store?).await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Default => commands::config_cmd::default().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
        },
        Commands::Status => commands::status::run(store?).await?,
    }

    Ok(())
}
