//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Context Viewer auth - token exchange server and credential tools
#[derive(Parser, Debug)]
#[command(name = "context-viewer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CONTEXT_VIEWER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "CONTEXT_VIEWER_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "CONTEXT_VIEWER_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "CONTEXT_VIEWER_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CONTEXT_VIEWER_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the token exchange server (default)
    Serve,

    /// Decode an identity credential and print the profile as JSON
    Decode {
        /// Three-part signed credential
        #[arg(required = true)]
        credential: String,
    },

    /// Check whether an email is allowed to sign in
    Check {
        /// Email address
        #[arg(required = true)]
        email: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["context-viewer", "--port", "8080"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn check_takes_an_email() {
        let cli = Cli::try_parse_from(["context-viewer", "check", "a@b.com"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Check { email }) if email == "a@b.com"));
    }

    #[test]
    fn decode_requires_a_credential() {
        assert!(Cli::try_parse_from(["context-viewer", "decode"]).is_err());
    }
}
