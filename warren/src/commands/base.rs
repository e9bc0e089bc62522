//! Top-level CLI definition and dispatch.

use clap::{Parser, Subcommand};

use crate::commands::client::ClientVerb;
use crate::commands::server::ServerArgs;
use crate::commands::CommandHandler;

/// DNS-tunneled LLM chat.
#[derive(Debug, Parser)]
#[command(name = "warren", version)]
pub struct Cli {
    #[command(subcommand)]
    verb: Verb,
}

#[derive(Debug, Subcommand)]
enum Verb {
    /// Run the authoritative tunnel server.
    Server(ServerArgs),
    /// Client-side operations.
    #[command(subcommand)]
    Client(ClientVerb),
}

impl Cli {
    /// Default `RUST_LOG` filter: `chat -v` raises it to debug before
    /// the logger is installed.
    pub fn default_log_filter(&self) -> &'static str {
        match &self.verb {
            Verb::Client(verb) if verb.verbose() => "debug",
            _ => "info",
        }
    }
}

impl CommandHandler for Cli {
    fn handle(self) -> crate::error::Result<()> {
        match self.verb {
            Verb::Server(args) => args.handle(),
            Verb::Client(verb) => verb.handle(),
        }
    }
}
