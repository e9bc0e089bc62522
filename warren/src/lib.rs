//! Warren: a chat tunnel that hides an LLM conversation inside DNS.
//!
//! This crate provides the pieces used by the `warren` binary:
//! - The `commands` module contains the CLI verbs and wiring: `server`
//!   runs the authoritative responder, `client chat` and
//!   `client test-connection` drive the tunnel from the other side.
//! - The `server` module holds the DNS wire layer, the session store and
//!   the per-session LLM orchestrator.
//! - The `client` module holds the DNS stub and the interactive prompt
//!   loop.
//!
//! The codec both sides share lives in the `warren-wire` crate.
//!
//! Design notes:
//! - Ownership is preferred for command handlers: `handle(self)` consumes
//!   the command struct so implementations can move resources (config,
//!   sockets, clients) without cloning.
//! - Command handlers that need async work build their own tokio runtime;
//!   `main` stays synchronous.

pub mod client;
pub mod commands;
pub mod error;
pub mod server;
