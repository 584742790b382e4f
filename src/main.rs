//! outlinetv - Outline VPN client
//!
//! Connects to Outline servers with a shadowsocks access key, remembers the
//! last server and keeps itself up to date.

use clap::{Parser, Subcommand};
use outlinetv_core::{
    error::{AppError, UpdateError, VpnError},
    init_logging,
};

mod cli;

#[derive(Parser)]
#[command(name = "outlinetv")]
#[command(version)]
#[command(about = "Outline VPN client with session tracking and self-update")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect with an access key and stay connected until Ctrl-C
    Connect {
        /// Outline access key (ss://...)
        access_key: String,
    },
    /// Remember a server without connecting
    SaveServer {
        /// Outline access key (ss://...)
        access_key: String,
        /// Display name, defaults to the name embedded in the key
        #[arg(long)]
        name: Option<String>,
    },
    /// Show the saved server and tunnel start time
    Status,
    /// Forget the saved server and session data
    Forget {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Check for, download and install a newer release
    Update {
        /// Only report whether an update is available
        #[arg(long)]
        check_only: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(2);
    }

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Connect { access_key } => cli::vpn::run_connect(&access_key).await,
        Commands::SaveServer { access_key, name } => {
            cli::vpn::run_save_server(&access_key, name)
        }
        Commands::Status => cli::vpn::run_status(),
        Commands::Forget { yes } => cli::vpn::run_forget(yes),
        Commands::Update { check_only } => cli::update::run_update(check_only).await,
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            let exit_code = match e {
                // Configuration errors (exit code 2)
                AppError::Config(_) | AppError::Toml(_) | AppError::TomlSerialize(_) => 2,
                AppError::Preference(_) => 2,
                AppError::Vpn(ref vpn_error) => match vpn_error {
                    VpnError::InvalidAccessKey { .. } => 2,
                    VpnError::InvalidStateTransition { .. }
                    | VpnError::TunnelStartFailed { .. }
                    | VpnError::KeyResolutionFailed { .. }
                    | VpnError::SessionClosed => 1,
                },
                AppError::Session(_) | AppError::Permission(_) => 1,
                AppError::Update(UpdateError::Cancelled) => 130,
                AppError::Update(_) => 1,
                AppError::Io(_) => 1,
            };

            eprintln!("{}", e);
            std::process::exit(exit_code);
        }
    }
}
