//! Server configuration captured once at startup.
//!
//! Secrets and endpoints come from the environment, bind options from
//! the CLI; everything is folded into one immutable [`ServerConfig`]
//! value that is passed explicitly from `run` downward. Nothing reads
//! the environment after startup.

use std::net::SocketAddr;
use std::time::Duration;

use warren_wire::cipher::Key;

use crate::commands::server::{Protocol, ServerArgs};
use crate::error::AppError;

const DEFAULT_SUFFIX: &str = "llm.example.com";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Upstream chat-completion endpoint settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: Option<String>,
}

/// Everything the server needs, resolved and validated.
#[derive(Debug)]
pub struct ServerConfig {
    pub key: Key,
    pub suffix: String,
    pub listen: SocketAddr,
    pub tcp: bool,
    pub idle_timeout: Duration,
    pub llm: LlmConfig,
    pub search_key: Option<String>,
}

impl ServerConfig {
    /// Resolve configuration from flags and environment.
    ///
    /// A missing LLM_PROXY_KEY is not an error on the server: a fresh
    /// key is generated and printed once so the operator can hand it to
    /// clients. A missing OPENAI_API_KEY is fatal; the server cannot
    /// answer anything without the upstream.
    pub fn from_env(args: &ServerArgs) -> Result<Self, AppError> {
        let key = match env_opt("LLM_PROXY_KEY") {
            Some(encoded) => Key::from_base64(&encoded)
                .map_err(|_| AppError::config("LLM_PROXY_KEY is not a valid base64 key"))?,
            None => {
                let key = Key::generate();
                println!("LLM_PROXY_KEY={}", key.to_base64());
                println!("(no LLM_PROXY_KEY set; generated one, export it on both ends)");
                key
            }
        };

        let suffix = normalize_suffix(
            args.suffix
                .clone()
                .or_else(|| env_opt("LLM_DNS_SUFFIX"))
                .unwrap_or_else(|| DEFAULT_SUFFIX.to_string()),
        )?;

        let api_key = env_opt("OPENAI_API_KEY")
            .ok_or_else(|| AppError::config("OPENAI_API_KEY is required for the server"))?;

        Ok(ServerConfig {
            key,
            suffix,
            listen: SocketAddr::new(args.host, args.port),
            tcp: args.protocol == Protocol::Tcp,
            idle_timeout: Duration::from_secs(args.idle_timeout.max(1)),
            llm: LlmConfig {
                base_url: env_opt("OPENAI_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                api_key,
                model: env_opt("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                system_prompt: env_opt("OPENAI_SYSTEM_PROMPT"),
            },
            search_key: env_opt("PERPLEXITY_API_KEY"),
        })
    }
}

/// Lowercase, strip stray dots, and sanity-check a zone suffix.
pub fn normalize_suffix(suffix: impl AsRef<str>) -> Result<String, AppError> {
    let cleaned = suffix
        .as_ref()
        .trim()
        .trim_matches('.')
        .to_ascii_lowercase();
    if cleaned.is_empty() {
        return Err(AppError::config("zone suffix must not be empty"));
    }
    if !cleaned
        .split('.')
        .all(|label| !label.is_empty() && label.len() <= warren_wire::MAX_LABEL_LEN)
    {
        return Err(AppError::config("zone suffix has an invalid label"));
    }
    Ok(cleaned)
}

pub(crate) fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
