//! Streaming client for the upstream chat-completion endpoint.
//!
//! Only the OpenAI-style streaming contract is consumed: POST
//! `/chat/completions` with `stream: true`, read server-sent events,
//! accumulate `delta.content` fragments and `delta.tool_calls`
//! fragments, stop on `data: [DONE]`. The orchestrator pulls
//! [`StreamEvent`]s one at a time so it can interleave chunk flushing
//! and cancellation checks between reads.

use std::collections::VecDeque;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::server::config::LlmConfig;

/// One entry of a conversation, in the upstream wire shape.
///
/// `tool_calls` / `tool_call_id` are only populated on the
/// assistant/tool entries of a tool round trip; they are kept in the
/// session history so a follow-up turn replays a coherent transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        ChatMessage {
            role: "system".to_string(),
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".to_string(),
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        ChatMessage {
            role: "assistant".to_string(),
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        ChatMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        ChatMessage {
            role: "tool".to_string(),
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Tool schema advertised when a search key is configured.
pub fn web_search_tools() -> serde_json::Value {
    serde_json::json!([{
        "type": "function",
        "function": {
            "name": "web_search",
            "description": "Search the web for current information.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query."
                    }
                },
                "required": ["query"]
            }
        }
    }])
}

/// Upstream failures, split by whether a retry could plausibly help.
#[derive(Debug)]
pub enum LlmError {
    /// The request never got a response (connect, DNS, TLS, send).
    Connect(String),
    /// The endpoint answered with a non-success status.
    Status(u16, String),
    /// The stream broke mid-read.
    Read(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Connect(_) => true,
            LlmError::Status(code, _) => *code == 429 || *code >= 500,
            LlmError::Read(_) => false,
        }
    }
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::Connect(msg) => write!(f, "upstream unreachable: {}", msg),
            LlmError::Status(code, body) => write!(f, "upstream returned {}: {}", code, body),
            LlmError::Read(msg) => write!(f, "upstream stream broke: {}", msg),
        }
    }
}

impl std::error::Error for LlmError {}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<serde_json::Value>,
}

pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|err| AppError::upstream(err.to_string()))?;
        Ok(LlmClient {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    /// Open one streaming completion over `messages`.
    pub async fn open_stream(
        &self,
        messages: &[ChatMessage],
        with_tools: bool,
    ) -> Result<ChatStream, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
            tools: with_tools.then(web_search_tools),
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| LlmError::Connect(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let brief: String = body.chars().take(200).collect();
            return Err(LlmError::Status(status.as_u16(), brief));
        }

        Ok(ChatStream::new(response.bytes_stream().boxed()))
    }
}

/// One event pulled out of the stream.
#[derive(Debug, PartialEq)]
pub enum StreamEvent {
    /// A fragment of assistant text, in generation order.
    Token(String),
    /// The model finished a round asking for these tools to run.
    ToolCalls(Vec<ToolCall>),
    /// The stream is over.
    Done,
}

/// Incremental SSE framing: feed raw body bytes in, get the `data:`
/// payloads of complete lines out. Split only on newlines, so partial
/// UTF-8 sequences inside a line never get torn.
#[derive(Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Deserialize, Default)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Pull-based view over one streaming completion.
pub struct ChatStream {
    body: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    parser: SseParser,
    pending: VecDeque<StreamEvent>,
    partials: Vec<PartialCall>,
    done: bool,
}

impl ChatStream {
    fn new(body: BoxStream<'static, reqwest::Result<bytes::Bytes>>) -> Self {
        ChatStream {
            body,
            parser: SseParser::default(),
            pending: VecDeque::new(),
            partials: Vec::new(),
            done: false,
        }
    }

    /// Next event, or `None` once the stream is exhausted.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>, LlmError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.done {
                return Ok(None);
            }
            match self.body.next().await {
                Some(Ok(chunk)) => {
                    for payload in self.parser.push(&chunk) {
                        self.ingest(&payload);
                    }
                }
                Some(Err(err)) => return Err(LlmError::Read(err.to_string())),
                // Body ended without [DONE]; close out what we have.
                None => self.finish(),
            }
        }
    }

    fn ingest(&mut self, payload: &str) {
        if payload == "[DONE]" {
            self.finish();
            return;
        }
        let chunk: StreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(err) => {
                log::debug!("skipping unparseable stream payload: {}", err);
                return;
            }
        };
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content {
                if !text.is_empty() {
                    self.pending.push_back(StreamEvent::Token(text));
                }
            }
            if let Some(deltas) = choice.delta.tool_calls {
                self.accumulate(deltas);
            }
            if choice.finish_reason.as_deref() == Some("tool_calls") {
                self.flush_tool_calls();
            }
        }
    }

    fn accumulate(&mut self, deltas: Vec<ToolCallDelta>) {
        for delta in deltas {
            if self.partials.len() <= delta.index {
                self.partials
                    .resize_with(delta.index + 1, PartialCall::default);
            }
            let partial = &mut self.partials[delta.index];
            if let Some(id) = delta.id {
                partial.id = id;
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    partial.name.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    partial.arguments.push_str(&arguments);
                }
            }
        }
    }

    fn flush_tool_calls(&mut self) {
        if self.partials.is_empty() {
            return;
        }
        let calls: Vec<ToolCall> = self
            .partials
            .drain(..)
            .filter(|partial| !partial.name.is_empty())
            .map(|partial| ToolCall {
                id: partial.id,
                kind: "function".to_string(),
                function: FunctionCall {
                    name: partial.name,
                    arguments: partial.arguments,
                },
            })
            .collect();
        if !calls.is_empty() {
            self.pending.push_back(StreamEvent::ToolCalls(calls));
        }
    }

    fn finish(&mut self) {
        if !self.done {
            self.flush_tool_calls();
            self.pending.push_back(StreamEvent::Done);
            self.done = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_from(payloads: Vec<&'static [u8]>) -> ChatStream {
        let iter = payloads
            .into_iter()
            .map(|p| Ok(bytes::Bytes::from_static(p)));
        ChatStream::new(futures::stream::iter(iter).boxed())
    }

    #[test]
    fn sse_parser_handles_split_lines() {
        let mut parser = SseParser::default();
        assert!(parser.push(b"data: {\"a\":").is_empty());
        let got = parser.push(b"1}\r\n\r\ndata: [DONE]\n");
        assert_eq!(got, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn sse_parser_ignores_non_data_lines() {
        let mut parser = SseParser::default();
        let got = parser.push(b": keepalive\nevent: ping\ndata: x\n");
        assert_eq!(got, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn tokens_stream_in_order() {
        let mut stream = stream_from(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"The \"}}]}\n\n" as &[u8],
            b"data: {\"choices\":[{\"delta\":{\"content\":\"quick\"}}]}\n\n",
            b"data: [DONE]\n\n",
        ]);
        assert_eq!(
            stream.next_event().await.unwrap(),
            Some(StreamEvent::Token("The ".to_string()))
        );
        assert_eq!(
            stream.next_event().await.unwrap(),
            Some(StreamEvent::Token("quick".to_string()))
        );
        assert_eq!(stream.next_event().await.unwrap(), Some(StreamEvent::Done));
        assert_eq!(stream.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn tool_call_fragments_reassemble() {
        let mut stream = stream_from(vec![
            b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"web_search\",\"arguments\":\"\"}}]}}]}\n\n" as &[u8],
            b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"query\\\":\"}}]}}]}\n\n",
            b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"rust\\\"}\"}}]}}]}\n\n",
            b"data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            b"data: [DONE]\n\n",
        ]);
        match stream.next_event().await.unwrap() {
            Some(StreamEvent::ToolCalls(calls)) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].id, "call_1");
                assert_eq!(calls[0].function.name, "web_search");
                assert_eq!(calls[0].function.arguments, "{\"query\":\"rust\"}");
            }
            other => panic!("expected tool calls, got {:?}", other),
        }
        assert_eq!(stream.next_event().await.unwrap(), Some(StreamEvent::Done));
    }

    #[tokio::test]
    async fn abrupt_end_still_finishes() {
        let mut stream = stream_from(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"half\"}}]}\n\n" as &[u8],
        ]);
        assert_eq!(
            stream.next_event().await.unwrap(),
            Some(StreamEvent::Token("half".to_string()))
        );
        assert_eq!(stream.next_event().await.unwrap(), Some(StreamEvent::Done));
        assert_eq!(stream.next_event().await.unwrap(), None);
    }

    #[test]
    fn garbage_payload_is_skipped() {
        let mut stream = stream_from(vec![]);
        stream.ingest("not json");
        assert!(stream.pending.is_empty());
    }

    #[test]
    fn tool_schema_names_web_search() {
        let schema = web_search_tools();
        assert_eq!(schema[0]["function"]["name"], "web_search");
    }
}
