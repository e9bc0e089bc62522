//! Warren binary entrypoint.
//!
//! Parses CLI arguments and dispatches to command handlers in the
//! `warren` crate. The binary is intentionally a thin wrapper: argument
//! parsing, logger setup and dispatch happen here, while the real work
//! (the DNS server, the chat client) is performed by the command
//! implementations found in `warren::commands`.
//!
//! Examples
//!
//! Start the tunnel server on the standard test port:
//!
//! $ LLM_PROXY_KEY=... OPENAI_API_KEY=... warren server --port 1053 \
//!     --suffix llm.example.com
//!
//! Open an interactive chat through a resolver at 192.0.2.1:
//!
//! $ LLM_PROXY_KEY=... warren client chat --server 192.0.2.1 --port 53 \
//!     --suffix llm.example.com
//!
//! Check that queries reach the server at all (no key needed):
//!
//! $ warren client test-connection --server 192.0.2.1

use clap::Parser;
use env_logger::Env;

use warren::commands::base::Cli;
use warren::commands::CommandHandler;

fn main() {
    let cli = Cli::parse();
    env_logger::init_from_env(Env::default().default_filter_or(cli.default_log_filter()));

    if let Err(error) = cli.handle() {
        eprintln!("{}", error);
        std::process::exit(error.exit_code());
    }
}
