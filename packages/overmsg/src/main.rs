use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

mod chats;
mod cli;

use cli::App;

#[derive(Parser)]
#[command(name = "overmsg")]
#[command(about = "Command-line chat client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to <config dir>/overmsg/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Append ERROR events to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the candidate servers and show which one would be used
    Servers(cli::messaging::ServersArgs),

    /// Create an account and sign in
    Register(cli::account::CredentialArgs),

    /// Sign in to an existing account
    Login(cli::account::CredentialArgs),

    /// Sign out and forget the stored token
    Logout,

    /// Send a message to a peer
    Send(cli::messaging::SendArgs),

    /// Check whether a peer is online
    Online(cli::messaging::OnlineArgs),

    /// Stream incoming messages until Ctrl-C
    Listen(cli::listen::ListenArgs),

    /// Show or set the theme preference
    Theme(cli::settings::ThemeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.log_file.as_deref())?;

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let mut app = App::load(config_path)?;

    match cli.command {
        Commands::Servers(args) => cli::messaging::servers_command(&mut app, args).await,
        Commands::Register(args) => cli::account::register_command(&mut app, args).await,
        Commands::Login(args) => cli::account::login_command(&mut app, args).await,
        Commands::Logout => cli::account::logout_command(&mut app).await,
        Commands::Send(args) => cli::messaging::send_command(&app, args).await,
        Commands::Online(args) => cli::messaging::online_command(&app, args).await,
        Commands::Listen(args) => cli::listen::listen_command(&mut app, args).await,
        Commands::Theme(args) => cli::settings::theme_command(&mut app, args),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("Could not determine the config directory")?;
    Ok(dir.join("overmsg").join("config.toml"))
}

fn init_logging(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let default_directive = if debug {
        "overmsg=debug,overmsg_core=debug,info"
    } else {
        "overmsg=info,overmsg_core=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    // Errors go to the file regardless of RUST_LOG
    let error_log = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::ERROR),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(env_filter),
        )
        .with(error_log)
        .init();
    Ok(())
}
