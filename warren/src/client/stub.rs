//! DNS stub: the client's only way of talking to the server.
//!
//! Every operation is a DNS lookup against the tunnel server (or a
//! resolver that forwards to it). Outbound turns are split into `msg`
//! queries whose synthetic answers double as ACKs; the reply streams
//! back through `cnt` polls and `get` fetches. DNS gives no delivery
//! guarantees, so every query carries its own timeout and bounded retry,
//! and the server tolerates the duplicates retries create.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use hickory_resolver::config::{NameServerConfig, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{Resolver, TokioResolver};
use rand::Rng;
use warren_wire::cipher::Key;
use warren_wire::command::{parse_status, Command, TurnPhase, MAX_CHUNKS};
use warren_wire::{message, EOF_SENTINEL, PAST_END_REPLY, PROBE_REPLY};

use crate::error::AppError;
use crate::server::config::{env_opt, normalize_suffix};

const SID_LEN: usize = 6;

/// Per-query deadline before a retry.
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempts per query (first try included).
const QUERY_ATTEMPTS: u64 = 3;

/// Outstanding queries allowed per batch, for both `msg` and `get`.
const WINDOW: usize = 4;

/// Pause between `cnt` polls while the server is still generating.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Pause before refetching a chunk the server counted but has not
/// served yet.
const FETCH_RETRY: Duration = Duration::from_millis(100);

/// How long a turn may go without a single new chunk before the client
/// declares it dead.
const STALL_TIMEOUT: Duration = Duration::from_secs(90);

/// Resolved client settings.
#[derive(Debug)]
pub struct ClientConfig {
    pub server: SocketAddr,
    pub suffix: String,
    pub key: Option<Key>,
    pub delay: Duration,
}

impl ClientConfig {
    /// Fold flags and environment into a config. The shared key is only
    /// mandatory when `need_key` says so; the connection probe runs
    /// without one.
    pub fn from_env(
        server: SocketAddr,
        suffix: Option<String>,
        need_key: bool,
        delay_ms: u64,
    ) -> Result<Self, AppError> {
        let suffix = normalize_suffix(
            suffix
                .or_else(|| env_opt("LLM_DNS_SUFFIX"))
                .unwrap_or_else(|| "llm.example.com".to_string()),
        )?;

        let key = match env_opt("LLM_PROXY_KEY") {
            Some(encoded) => Some(
                Key::from_base64(&encoded)
                    .map_err(|_| AppError::config("LLM_PROXY_KEY is not a valid base64 key"))?,
            ),
            None => None,
        };
        if need_key && key.is_none() {
            return Err(AppError::config(
                "LLM_PROXY_KEY must be set to chat (ask the server operator)",
            ));
        }

        Ok(ClientConfig {
            server,
            suffix,
            key,
            delay: Duration::from_millis(delay_ms),
        })
    }
}

/// How a streamed turn ended.
#[derive(Debug, PartialEq, Eq)]
pub enum TurnEnd {
    Complete,
    /// The server closed the turn in its error state; any diagnostic
    /// text already went through the stream callback.
    ServerError,
}

enum Fetched {
    Text(String),
    Sentinel,
    NotYet,
}

pub struct TunnelClient {
    resolver: TokioResolver,
    suffix: String,
    key: Option<Key>,
    sid: String,
    delay: Duration,
    chunk_capacity: usize,
}

impl TunnelClient {
    pub fn new(config: ClientConfig) -> Result<Self, AppError> {
        let mut resolver_config = ResolverConfig::new();
        resolver_config.add_name_server(NameServerConfig::new(config.server, Protocol::Udp));
        let resolver = Resolver::builder_with_config(
            resolver_config,
            TokioConnectionProvider::default(),
        )
        .build();

        let sid = random_sid();
        let chunk_capacity = message::inbound_chunk_capacity(&config.suffix, sid.len());
        if chunk_capacity == 0 {
            return Err(AppError::config(
                "zone suffix leaves no room for payload labels",
            ));
        }

        Ok(TunnelClient {
            resolver,
            suffix: config.suffix,
            key: config.key,
            sid,
            delay: config.delay,
            chunk_capacity,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.sid
    }

    fn key(&self) -> Result<&Key, AppError> {
        self.key
            .as_ref()
            .ok_or_else(|| AppError::config("no shared key loaded"))
    }

    /// `tst` health probe.
    pub async fn probe(&self) -> Result<(), AppError> {
        let reply = self.txt_query(&Command::Tst.to_name(&self.suffix)).await?;
        if reply == PROBE_REPLY {
            Ok(())
        } else {
            Err(AppError::transport(format!(
                "unexpected probe reply: {:?}",
                reply
            )))
        }
    }

    /// Drop the server-side session (history and buffers).
    pub async fn reset(&self) -> Result<(), AppError> {
        let name = Command::Clr {
            sid: self.sid.clone(),
        }
        .to_name(&self.suffix);
        self.txt_query(&name).await.map(|_| ())
    }

    /// Seal one outbound turn and deliver every chunk, in index order,
    /// in windows of [`WINDOW`] parallel queries. Each query's synthetic
    /// answer is its ACK; unacknowledged chunks are retried a bounded
    /// number of times.
    pub async fn send_turn(&self, text: &str) -> Result<(), AppError> {
        let envelope = message::seal(self.key()?, text)?;
        let chunks = message::split_envelope(&envelope, self.chunk_capacity);
        let total = chunks.len();
        if total > MAX_CHUNKS as usize {
            return Err(AppError::transport(
                "message too large for one tunnel turn",
            ));
        }
        log::debug!(
            "session {}: sending {} chunk(s) of {} sealed bytes",
            self.sid,
            total,
            envelope.len()
        );

        let mut idx = 0usize;
        for batch in chunks.chunks(WINDOW) {
            let sends: Vec<_> = batch
                .iter()
                .enumerate()
                .map(|(offset, payload)| self.send_chunk(idx + offset, total, payload.clone()))
                .collect();
            for result in futures::future::join_all(sends).await {
                result?;
            }
            idx += batch.len();
            if !self.delay.is_zero() && idx < total {
                tokio::time::sleep(self.delay).await;
            }
        }
        Ok(())
    }

    /// Poll and fetch the response stream, handing plaintext to
    /// `on_text` in chunk order until the turn ends.
    pub async fn stream_response(
        &self,
        mut on_text: impl FnMut(&str),
    ) -> Result<TurnEnd, AppError> {
        let mut next_idx = 0usize;
        let mut last_progress = Instant::now();

        loop {
            let (produced, phase) = self.status().await?;

            'fetch: while next_idx < produced {
                let end = produced.min(next_idx + WINDOW);
                let fetches: Vec<_> = (next_idx..end)
                    .map(|idx| self.fetch_chunk(idx as u16))
                    .collect();
                for fetched in futures::future::join_all(fetches).await {
                    match fetched? {
                        Fetched::Text(text) => {
                            on_text(&text);
                            next_idx += 1;
                            last_progress = Instant::now();
                        }
                        Fetched::Sentinel => return Ok(TurnEnd::Complete),
                        Fetched::NotYet => {
                            // Counted but not served yet; back off and
                            // refetch from this index.
                            tokio::time::sleep(FETCH_RETRY).await;
                            break 'fetch;
                        }
                    }
                }
            }

            if next_idx >= produced {
                match phase {
                    TurnPhase::Complete => return Ok(TurnEnd::Complete),
                    TurnPhase::Error => return Ok(TurnEnd::ServerError),
                    TurnPhase::Generating => {}
                }
            }

            if last_progress.elapsed() > STALL_TIMEOUT {
                return Err(AppError::transport(
                    "turn timed out waiting for the server",
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn status(&self) -> Result<(usize, TurnPhase), AppError> {
        let name = Command::Cnt {
            sid: self.sid.clone(),
        }
        .to_name(&self.suffix);
        let reply = self.txt_query(&name).await?;
        parse_status(&reply)
            .map_err(|err| AppError::transport(format!("bad status reply {:?}: {}", reply, err)))
    }

    async fn fetch_chunk(&self, idx: u16) -> Result<Fetched, AppError> {
        let name = Command::Get {
            sid: self.sid.clone(),
            idx,
        }
        .to_name(&self.suffix);
        let reply = self.txt_query(&name).await?;
        if reply.is_empty() || reply == PAST_END_REPLY {
            return Ok(Fetched::NotYet);
        }
        let text = message::open_chunk(self.key()?, &reply)?;
        if text == EOF_SENTINEL {
            Ok(Fetched::Sentinel)
        } else {
            Ok(Fetched::Text(text))
        }
    }

    async fn send_chunk(&self, idx: usize, total: usize, payload: Vec<u8>) -> Result<(), AppError> {
        let name = Command::Msg {
            sid: self.sid.clone(),
            idx: idx as u16,
            total: total as u16,
            payload,
        }
        .to_name(&self.suffix);
        let fqdn = format!("{}.", name);

        for attempt in 1..=QUERY_ATTEMPTS {
            match tokio::time::timeout(QUERY_TIMEOUT, self.resolver.ipv4_lookup(fqdn.clone()))
                .await
            {
                Ok(Ok(_ack)) => return Ok(()),
                Ok(Err(err)) => {
                    log::debug!("chunk {} attempt {}: {}", idx, attempt, err)
                }
                Err(_) => log::debug!("chunk {} attempt {}: query timed out", idx, attempt),
            }
            tokio::time::sleep(Duration::from_millis(200 * attempt)).await;
        }
        Err(AppError::transport(format!(
            "no ack for chunk {} after {} attempts",
            idx, QUERY_ATTEMPTS
        )))
    }

    /// One TXT lookup with timeout and bounded retry; returns the first
    /// record's character-strings joined.
    async fn txt_query(&self, name: &str) -> Result<String, AppError> {
        let fqdn = format!("{}.", name);
        let mut last_err = String::new();

        for attempt in 1..=QUERY_ATTEMPTS {
            match tokio::time::timeout(QUERY_TIMEOUT, self.resolver.txt_lookup(fqdn.clone())).await
            {
                Ok(Ok(lookup)) => {
                    return Ok(lookup
                        .iter()
                        .next()
                        .map(|txt| {
                            txt.txt_data()
                                .iter()
                                .map(|part| String::from_utf8_lossy(part).into_owned())
                                .collect::<String>()
                        })
                        .unwrap_or_default());
                }
                Ok(Err(err)) => {
                    last_err = err.to_string();
                    log::debug!("query {} attempt {}: {}", name, attempt, last_err);
                }
                Err(_) => {
                    last_err = "query timed out".to_string();
                    log::debug!("query {} attempt {}: timed out", name, attempt);
                }
            }
            tokio::time::sleep(Duration::from_millis(200 * attempt)).await;
        }
        Err(AppError::transport(format!(
            "{} failed after {} attempts: {}",
            name.split('.').next().unwrap_or("query"),
            QUERY_ATTEMPTS,
            last_err
        )))
    }
}

/// Short random session token. Carries no secret; it only namespaces
/// state on the server.
fn random_sid() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..SID_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sid_is_wire_legal() {
        for _ in 0..50 {
            let sid = random_sid();
            assert_eq!(sid.len(), SID_LEN);
            assert!(Command::parse(&["cnt", sid.as_str()]).is_ok());
        }
    }

    #[test]
    fn sids_are_distinct() {
        let a = random_sid();
        let b = random_sid();
        // Collisions are possible in principle, vanishingly unlikely in
        // a two-draw test.
        assert_ne!(a, b);
    }
}
