//! Per-session generation task.
//!
//! Spawned by the wire handler the moment an inbound message finishes
//! reassembly. One task owns the whole turn: open the payload, drive the
//! upstream stream, flush encrypted chunks into the session's outbound
//! array as the text grows, run tool calls in between, and close the
//! turn with the EOF sentinel chunk. The task never outlives its
//! session: every store operation it performs refuses to resurrect an
//! evicted sid, and a watch signal from `clr`/eviction stops it between
//! stream reads.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use warren_wire::message::{self, OUTBOUND_PLAINTEXT_LIMIT};
use warren_wire::{CLEAR_REPLY, CLEAR_REQUEST, EOF_SENTINEL};

use crate::server::llm::{ChatMessage, ChatStream, LlmError, StreamEvent, ToolCall};
use crate::server::ServerContext;

/// How long one stream read may stall before the turn is failed.
const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Backoff before the single retry of a transient upstream failure.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Tool-call rounds allowed per turn. Past the cap the tool schema is
/// withheld, which forces the model to answer in text.
const MAX_TOOL_ROUNDS: usize = 4;

/// Launch the generation task for a completed inbound message.
pub fn spawn(
    ctx: Arc<ServerContext>,
    sid: String,
    envelope: Vec<u8>,
    cancel: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        run(ctx, sid, envelope, cancel).await;
    });
}

async fn run(ctx: Arc<ServerContext>, sid: String, envelope: Vec<u8>, mut cancel: watch::Receiver<bool>) {
    let text = match message::open(&ctx.key, &envelope) {
        Ok(text) => text,
        Err(err) => {
            log::warn!("session {}: inbound payload rejected: {}", sid, err);
            fail(&ctx, &sid, "request could not be decrypted").await;
            return;
        }
    };

    if text.trim() == CLEAR_REQUEST {
        log::info!("session {}: conversation cleared", sid);
        match message::seal_chunk(&ctx.key, CLEAR_REPLY) {
            Ok(chunk) => ctx.store.acknowledge_clear(&sid, chunk).await,
            Err(_) => ctx.store.finish(&sid, false).await,
        }
        return;
    }

    if ctx.store.history(&sid).await.is_empty() {
        if let Some(prompt) = &ctx.system_prompt {
            ctx.store
                .append_history(&sid, ChatMessage::system(prompt.as_str()))
                .await;
        }
    }
    ctx.store
        .append_history(&sid, ChatMessage::user(text.as_str()))
        .await;

    let mut messages = ctx.store.history(&sid).await;
    let mut flusher = Flusher::default();
    let mut full_text = String::new();
    let mut tool_rounds = 0usize;

    'rounds: loop {
        let with_tools = ctx.search.is_some() && tool_rounds < MAX_TOOL_ROUNDS;
        let mut stream = match open_with_retry(&ctx, &messages, with_tools).await {
            Ok(stream) => stream,
            Err(err) => {
                log::error!("session {}: upstream failed: {}", sid, err);
                fail(&ctx, &sid, "upstream model unavailable").await;
                return;
            }
        };

        loop {
            let event = tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        log::info!("session {}: generation cancelled", sid);
                        return;
                    }
                    continue;
                }
                event = tokio::time::timeout(READ_TIMEOUT, stream.next_event()) => event,
            };

            let event = match event {
                Err(_) => {
                    log::error!("session {}: upstream stream stalled", sid);
                    fail(&ctx, &sid, "upstream stream stalled").await;
                    return;
                }
                Ok(Err(err)) => {
                    log::error!("session {}: {}", sid, err);
                    fail(&ctx, &sid, "upstream stream failed").await;
                    return;
                }
                Ok(Ok(None)) => break 'rounds,
                Ok(Ok(Some(event))) => event,
            };

            match event {
                StreamEvent::Token(token) => {
                    full_text.push_str(&token);
                    for unit in flusher.push(&token) {
                        if !emit(&ctx, &sid, &unit).await {
                            return;
                        }
                    }
                }
                StreamEvent::ToolCalls(calls) => {
                    tool_rounds += 1;
                    run_tools(&ctx, &sid, &mut messages, calls).await;
                    continue 'rounds;
                }
                StreamEvent::Done => break 'rounds,
            }
        }
    }

    let remainder = flusher.take_remainder();
    if !remainder.is_empty() && !emit(&ctx, &sid, &remainder).await {
        return;
    }
    if !emit(&ctx, &sid, EOF_SENTINEL).await {
        return;
    }

    ctx.store
        .append_history(&sid, ChatMessage::assistant(full_text))
        .await;
    ctx.store.finish(&sid, true).await;
    log::info!("session {}: turn complete", sid);
}

async fn open_with_retry(
    ctx: &ServerContext,
    messages: &[ChatMessage],
    with_tools: bool,
) -> Result<ChatStream, LlmError> {
    match ctx.llm.open_stream(messages, with_tools).await {
        Ok(stream) => Ok(stream),
        Err(err) if err.is_transient() => {
            log::warn!("upstream transient failure, retrying once: {}", err);
            tokio::time::sleep(RETRY_BACKOFF).await;
            ctx.llm.open_stream(messages, with_tools).await
        }
        Err(err) => Err(err),
    }
}

/// Seal one plaintext unit and append it. `false` means the turn cannot
/// continue (session evicted/cleared, or the cipher refused).
async fn emit(ctx: &ServerContext, sid: &str, text: &str) -> bool {
    match message::seal_chunk(&ctx.key, text) {
        Ok(chunk) => ctx.store.append_outbound(sid, chunk).await.is_some(),
        Err(err) => {
            log::error!("session {}: failed to seal outbound chunk: {}", sid, err);
            ctx.store.finish(sid, false).await;
            false
        }
    }
}

/// Encrypt a short diagnostic as the turn's outbound payload and close
/// the turn in the error state. A client holding the key reads the
/// reason; anyone else sees one opaque chunk.
async fn fail(ctx: &ServerContext, sid: &str, reason: &str) {
    if let Ok(chunk) = message::seal_chunk(&ctx.key, &format!("error: {}", reason)) {
        ctx.store.append_outbound(sid, chunk).await;
    }
    ctx.store.finish(sid, false).await;
}

async fn run_tools(
    ctx: &ServerContext,
    sid: &str,
    messages: &mut Vec<ChatMessage>,
    calls: Vec<ToolCall>,
) {
    let assistant = ChatMessage::assistant_tool_calls(calls.clone());
    messages.push(assistant.clone());
    ctx.store.append_history(sid, assistant).await;

    for call in calls {
        let result = execute_tool(ctx, &call).await;
        let reply = ChatMessage::tool(call.id.as_str(), result);
        messages.push(reply.clone());
        ctx.store.append_history(sid, reply).await;
    }
}

async fn execute_tool(ctx: &ServerContext, call: &ToolCall) -> String {
    if call.function.name != "web_search" {
        return format!("unsupported tool: {}", call.function.name);
    }
    let query = match parse_search_query(&call.function.arguments) {
        Some(query) => query,
        None => return "web_search failed: missing query argument".to_string(),
    };
    match &ctx.search {
        Some(search) => match search.search(&query).await {
            Ok(result) => result,
            Err(err) => {
                log::warn!("web_search failed: {}", err);
                format!("web_search failed: {}", err)
            }
        },
        None => "web_search is not configured".to_string(),
    }
}

fn parse_search_query(arguments: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(arguments)
        .ok()?
        .get("query")?
        .as_str()
        .map(str::to_string)
}

/// Rolling plaintext buffer that hands out full-size chunk units as the
/// stream grows, always cutting on a char boundary.
#[derive(Default)]
struct Flusher {
    pending: String,
}

impl Flusher {
    fn push(&mut self, text: &str) -> Vec<String> {
        self.pending.push_str(text);
        let mut units = Vec::new();
        while self.pending.len() >= OUTBOUND_PLAINTEXT_LIMIT {
            let mut cut = OUTBOUND_PLAINTEXT_LIMIT;
            while !self.pending.is_char_boundary(cut) {
                cut -= 1;
            }
            if cut == 0 {
                break;
            }
            units.push(self.pending.drain(..cut).collect());
        }
        units
    }

    fn take_remainder(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flusher_holds_partial_units() {
        let mut flusher = Flusher::default();
        assert!(flusher.push("short").is_empty());
        assert_eq!(flusher.take_remainder(), "short");
        assert_eq!(flusher.take_remainder(), "");
    }

    #[test]
    fn flusher_emits_full_units_in_order() {
        let mut flusher = Flusher::default();
        let text = "a".repeat(OUTBOUND_PLAINTEXT_LIMIT * 2 + 10);
        let units = flusher.push(&text);
        assert_eq!(units.len(), 2);
        assert!(units
            .iter()
            .all(|unit| unit.len() == OUTBOUND_PLAINTEXT_LIMIT));
        assert_eq!(flusher.take_remainder().len(), 10);
    }

    #[test]
    fn flusher_respects_char_boundaries() {
        let mut flusher = Flusher::default();
        // 4-byte scorpions straddle the unit boundary.
        let text = "\u{1f982}".repeat(OUTBOUND_PLAINTEXT_LIMIT / 2);
        let mut reassembled = String::new();
        for unit in flusher.push(&text) {
            assert!(unit.len() <= OUTBOUND_PLAINTEXT_LIMIT);
            reassembled.push_str(&unit);
        }
        reassembled.push_str(&flusher.take_remainder());
        assert_eq!(reassembled, text);
    }

    #[test]
    fn search_query_extraction() {
        assert_eq!(
            parse_search_query("{\"query\":\"rust dns\"}"),
            Some("rust dns".to_string())
        );
        assert_eq!(parse_search_query("{}"), None);
        assert_eq!(parse_search_query("not json"), None);
    }
}
