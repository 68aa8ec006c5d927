//! Context Viewer auth server
//!
//! Token exchange endpoints plus small credential tools.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use context_viewer::{
    cli::{Cli, Command},
    config::Config,
    identity, policy, server, setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Decode { ref credential }) => run_decode(credential),
        Some(Command::Check { ref email }) => run_check(email),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Print the identity carried by a credential
fn run_decode(credential: &str) -> ExitCode {
    match identity::decode(credential) {
        Ok(identity) => match serde_json::to_string_pretty(&identity) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to serialize identity: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Report allow-list membership; exit status mirrors the answer
fn run_check(email: &str) -> ExitCode {
    if policy::is_authorized(email) {
        println!("{email}: allowed");
        ExitCode::SUCCESS
    } else {
        println!("{email}: not allowed");
        ExitCode::FAILURE
    }
}

async fn run_server(cli: Cli) -> ExitCode {
    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        production = config.oauth.production,
        configured = config.oauth.client_id().is_some() && config.oauth.client_secret().is_some(),
        "Starting Context Viewer auth server"
    );

    if let Err(e) = server::run(&config).await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
