//! The `web_search` tool backend.
//!
//! A single synchronous-from-the-orchestrator's-point-of-view HTTP call
//! to the Perplexity chat API. Failures come back as `Err(text)` so the
//! orchestrator can inject them into the conversation as a tool-role
//! message instead of aborting the turn.

use serde::Deserialize;

use crate::error::AppError;

const SEARCH_ENDPOINT: &str = "https://api.perplexity.ai/chat/completions";
const SEARCH_MODEL: &str = "sonar";

#[derive(Deserialize)]
struct SearchResponse {
    choices: Vec<SearchChoice>,
}

#[derive(Deserialize)]
struct SearchChoice {
    message: SearchMessage,
}

#[derive(Deserialize)]
struct SearchMessage {
    content: String,
}

pub struct SearchClient {
    http: reqwest::Client,
    api_key: String,
}

impl SearchClient {
    pub fn new(api_key: String) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|err| AppError::upstream(err.to_string()))?;
        Ok(SearchClient { http, api_key })
    }

    /// Run one search query, returning the provider's answer text.
    pub async fn search(&self, query: &str) -> Result<String, String> {
        let body = serde_json::json!({
            "model": SEARCH_MODEL,
            "messages": [{"role": "user", "content": query}],
        });

        let response = self
            .http
            .post(SEARCH_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| format!("search request failed: {}", err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("search provider returned {}", status.as_u16()));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|err| format!("search response unreadable: {}", err))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| "search response carried no answer".to_string())
    }
}
