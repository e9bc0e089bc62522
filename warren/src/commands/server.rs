//! The `server` verb.

use warren_wire::cipher::Key;

use crate::commands::CommandHandler;
use crate::server::config::ServerConfig;

/// Transport protocol for the DNS listener.
///
/// UDP is what stub resolvers actually forward; TCP is registered as a
/// fallback for middleboxes that retry truncated answers over a stream.
#[derive(clap::ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// UDP only (default).
    Udp,
    /// UDP plus a TCP listener on the same port.
    Tcp,
}

/// CLI configuration for the tunnel server.
///
/// Everything secret or deployment-specific (the shared key, the
/// upstream model endpoint, the search key) comes from the environment;
/// the flags cover the bind address and the zone.
#[derive(Debug, clap::Args)]
pub struct ServerArgs {
    /// Address to bind.
    #[arg(long = "host", default_value = "0.0.0.0")]
    pub host: std::net::IpAddr,

    /// UDP (and optionally TCP) port to bind. Port 53 requires elevated
    /// privileges; 1053 is useful for testing behind a forwarder.
    #[arg(short = 'p', long = "port", default_value_t = 1053)]
    pub port: u16,

    /// Listener protocol registration.
    #[arg(long = "protocol", default_value_t = Protocol::Udp, value_enum)]
    pub protocol: Protocol,

    /// Zone suffix the server is authoritative for. Overrides
    /// LLM_DNS_SUFFIX.
    #[arg(long = "suffix")]
    pub suffix: Option<String>,

    /// Seconds a session may stay idle before the sweeper evicts it.
    #[arg(long = "idle-timeout", default_value_t = 1800)]
    pub idle_timeout: u64,

    /// Print a fresh shared key and exit.
    #[arg(long = "generate-key")]
    pub generate_key: bool,
}

impl CommandHandler for ServerArgs {
    /// Start the server (or emit a key and stop).
    fn handle(self) -> crate::error::Result<()> {
        if self.generate_key {
            println!("{}", Key::generate().to_base64());
            return Ok(());
        }

        let config = ServerConfig::from_env(&self)?;
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(crate::server::run(config))
    }
}
