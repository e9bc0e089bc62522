//! The `client` verb family.

use std::io::Write;

use clap::{Args, Subcommand};

use crate::client::chat;
use crate::client::stub::{ClientConfig, TunnelClient};
use crate::commands::CommandHandler;
use crate::error::AppError;

#[derive(Debug, Subcommand)]
pub enum ClientVerb {
    /// Interactive chat over the tunnel (or one-shot with -m).
    Chat(ChatArgs),
    /// Probe the tunnel without the shared key.
    TestConnection(ConnArgs),
}

impl ClientVerb {
    pub fn verbose(&self) -> bool {
        match self {
            ClientVerb::Chat(args) => args.conn.verbose,
            ClientVerb::TestConnection(args) => args.verbose,
        }
    }
}

impl CommandHandler for ClientVerb {
    fn handle(self) -> crate::error::Result<()> {
        match self {
            ClientVerb::Chat(args) => args.handle(),
            ClientVerb::TestConnection(args) => args.handle(),
        }
    }
}

/// Connection options shared by both client verbs.
#[derive(Debug, Args)]
pub struct ConnArgs {
    /// Resolver or tunnel server to send queries to.
    #[arg(long = "server", default_value = "127.0.0.1")]
    pub server: std::net::IpAddr,

    /// Port of the resolver or tunnel server.
    #[arg(short = 'p', long = "port", default_value_t = 1053)]
    pub port: u16,

    /// Zone suffix to append to every query. Overrides LLM_DNS_SUFFIX.
    #[arg(long = "suffix")]
    pub suffix: Option<String>,

    /// Verbose (debug) logging.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl ConnArgs {
    /// Build the stub config. `need_key` decides whether a missing
    /// LLM_PROXY_KEY is a configuration error or simply absent
    /// (test-connection works without it).
    fn client_config(&self, need_key: bool, delay_ms: u64) -> crate::error::Result<ClientConfig> {
        ClientConfig::from_env(
            std::net::SocketAddr::new(self.server, self.port),
            self.suffix.clone(),
            need_key,
            delay_ms,
        )
    }
}

impl CommandHandler for ConnArgs {
    /// `client test-connection`: one `tst` probe, report, exit.
    fn handle(self) -> crate::error::Result<()> {
        let config = self.client_config(false, 0)?;
        let runtime = tokio::runtime::Runtime::new()?;
        let client = TunnelClient::new(config)?;

        println!("[*] Probing tunnel via {}:{} ...", self.server, self.port);
        match runtime.block_on(client.probe()) {
            Ok(()) => {
                println!("[*] Tunnel ok: server answered the probe.");
                Ok(())
            }
            Err(err) => {
                println!("[!] No tunnel: {}", err);
                Err(AppError::transport("connection test failed"))
            }
        }
    }
}

/// `client chat` arguments.
#[derive(Debug, Args)]
pub struct ChatArgs {
    /// One-shot message: send, print the reply, exit.
    #[arg(short = 'm', long = "message")]
    pub message: Option<String>,

    /// Milliseconds to pause between msg query batches.
    #[arg(long = "delay", default_value_t = 0)]
    pub delay: u64,

    #[command(flatten)]
    pub conn: ConnArgs,
}

impl CommandHandler for ChatArgs {
    /// Run one turn (-m) or the interactive loop.
    fn handle(self) -> crate::error::Result<()> {
        let config = self.conn.client_config(true, self.delay)?;
        let runtime = tokio::runtime::Runtime::new()?;
        let client = TunnelClient::new(config)?;

        if let Some(message) = self.message {
            let outcome = runtime.block_on(chat::run_turn(&client, &message))?;
            return chat::one_shot_result(outcome);
        }

        println!(
            "[*] Session {} via {}:{}. /clear resets, /quit leaves.",
            client.session_id(),
            self.conn.server,
            self.conn.port
        );
        let stdin = std::io::stdin();
        loop {
            print!("you> ");
            std::io::stdout().flush()?;

            let mut line = String::new();
            if stdin.read_line(&mut line)? == 0 {
                break; // EOF
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "/quit" || line == "/exit" {
                break;
            }

            match runtime.block_on(chat::run_turn(&client, line)) {
                Ok(_) => {}
                Err(err @ AppError::Decrypt) => println!("[!] {}", err),
                Err(err) => println!("[!] turn failed: {}", err),
            }
        }

        // Best effort: drop the server-side session on the way out.
        if let Err(err) = runtime.block_on(client.reset()) {
            log::debug!("session reset on exit failed: {}", err);
        }
        Ok(())
    }
}
