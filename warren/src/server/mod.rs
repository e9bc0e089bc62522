//! Server side of the tunnel: DNS wire layer, session store, and the
//! per-session LLM orchestrator.

pub mod config;
pub mod dns;
pub mod llm;
pub mod orchestrator;
pub mod search;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use warren_wire::cipher::Key;

use crate::error::AppError;
use crate::server::config::ServerConfig;
use crate::server::llm::LlmClient;
use crate::server::search::SearchClient;
use crate::server::session::SessionStore;

/// Shared immutable state handed to the wire handler and every
/// orchestrator task.
pub struct ServerContext {
    pub store: Arc<SessionStore>,
    pub key: Key,
    pub llm: LlmClient,
    pub search: Option<SearchClient>,
    pub system_prompt: Option<String>,
}

/// Bind the listener(s) and serve until shutdown.
pub async fn run(config: ServerConfig) -> Result<(), AppError> {
    let store = Arc::new(SessionStore::new(config.idle_timeout));
    store.spawn_sweeper();

    let search = match &config.search_key {
        Some(api_key) => Some(SearchClient::new(api_key.clone())?),
        None => None,
    };
    let ctx = Arc::new(ServerContext {
        store,
        key: config.key.clone(),
        llm: LlmClient::new(&config.llm)?,
        search,
        system_prompt: config.llm.system_prompt.clone(),
    });
    let web_search = if ctx.search.is_some() {
        "enabled"
    } else {
        "disabled"
    };

    let handler = dns::TunnelHandler::new(ctx, &config.suffix)?;
    let mut server = hickory_server::server::ServerFuture::new(handler);

    log::info!(
        "tunnel server answering for zone {} on {} (model {}, web_search {})",
        config.suffix,
        config.listen,
        config.llm.model,
        web_search
    );
    server.register_socket(tokio::net::UdpSocket::bind(config.listen).await?);
    if config.tcp {
        server.register_listener(
            tokio::net::TcpListener::bind(config.listen).await?,
            Duration::from_secs(10),
        );
    }

    server
        .block_until_done()
        .await
        .map_err(|err| AppError::transport(err.to_string()))
}
