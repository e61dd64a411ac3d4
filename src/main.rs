mod api;
mod app;
mod catalog;
mod commands;
mod config;
mod dispatch;
mod errors;
mod output;
mod parse;
mod store;
mod tui;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::app::Runtime;
use crate::commands::chat::ChatArgs;
use crate::commands::config::ConfigCommand;
use crate::commands::key::KeyCommand;
use crate::commands::sessions::SessionsCommand;
use crate::commands::tui::TuiArgs;
use crate::errors::CliError;
use crate::output::{OutputMode, print_error};

#[derive(Debug, Parser)]
#[command(
    name = "chatdeck",
    version,
    about = "Chat with a streamed completion service from the terminal."
)]
struct Cli {
    #[arg(long = "api-url", global = true)]
    api_url: Option<String>,
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true)]
    quiet: bool,
    #[arg(long, global = true, default_value_t = 30_000)]
    timeout: u64,
    #[arg(long, global = true, default_value_t = 2)]
    retries: u32,
    #[arg(long, global = true)]
    verbose: bool,
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Read and change saved settings
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Manage the API key
    Key {
        #[command(subcommand)]
        command: KeyCommand,
    },
    /// Send one message and stream the reply
    Chat(ChatArgs),
    /// Interactive chat
    Tui(TuiArgs),
    /// Check that the service is up
    Health,
    /// Service-side conversations
    Sessions {
        #[command(subcommand)]
        command: SessionsCommand,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let output = OutputMode {
        json: cli.json,
        quiet: cli.quiet,
        verbose: cli.verbose,
        debug: cli.debug,
    };

    init_tracing(&output);

    let result = run(cli, output.clone()).await;
    if let Err(err) = result {
        print_error(&err, &output);
        std::process::exit(err.exit_code());
    }
}

/// Diagnostics go to stderr and only when asked for. `RUST_LOG` overrides the level.
fn init_tracing(output: &OutputMode) {
    if !output.verbose && !output.debug {
        return;
    }
    let default = if output.debug {
        "chatdeck=debug"
    } else {
        "chatdeck=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli, output: OutputMode) -> Result<(), CliError> {
    let settings = config::load_settings()?;
    tracing::debug!(model = ?settings.model, api_url = ?settings.api_url, "loaded settings");

    let mut runtime = Runtime {
        output,
        settings,
        api_url_override: cli.api_url,
        timeout_ms: cli.timeout,
        retries: cli.retries,
    };

    match cli.command {
        Commands::Config { command } => commands::config::handle(&mut runtime, command).await,
        Commands::Key { command } => commands::key::handle(&mut runtime, command).await,
        Commands::Chat(args) => commands::chat::handle(&runtime, args).await,
        Commands::Tui(args) => commands::tui::handle(&runtime, args).await,
        Commands::Health => commands::health::handle(&runtime).await,
        Commands::Sessions { command } => commands::sessions::handle(&runtime, command).await,
    }
}
