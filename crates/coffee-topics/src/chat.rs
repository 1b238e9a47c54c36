//! Minimal OpenAI-compatible chat completions client

use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Response contained no message content")]
    EmptyResponse,
}

#[derive(Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl ChatClient {
    pub fn new(api_url: &str, api_key: &str, model: &str) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run a single system + user exchange and return the assistant's text
    pub async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, ChatError> {
        let request_body = serde_json::json!({
            "model": &self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt }
            ],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        debug!("Chat API request to {}/chat/completions", self.api_url);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!("Chat API error {}: {}", status, message);
            return Err(ChatError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let json: serde_json::Value = response.json().await?;
        extract_content(&json).ok_or(ChatError::EmptyResponse)
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

fn extract_content(json: &serde_json::Value) -> Option<String> {
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Split a model reply into non-empty trimmed lines, keeping at most `limit`
pub fn reply_lines(content: &str, limit: usize) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(limit)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_content() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "  hello\n" } }]
        });
        assert_eq!(extract_content(&json).as_deref(), Some("hello"));

        let empty = serde_json::json!({ "choices": [{ "message": { "content": "   " } }] });
        assert!(extract_content(&empty).is_none());

        let missing = serde_json::json!({ "choices": [] });
        assert!(extract_content(&missing).is_none());
    }

    #[test]
    fn test_reply_lines() {
        let lines = reply_lines("one\n\n  two  \nthree\nfour\nfive\nsix\n", 5);
        assert_eq!(lines, vec!["one", "two", "three", "four", "five"]);
        assert!(reply_lines("\n \n", 5).is_empty());
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = ChatClient::new(DEFAULT_API_URL, "sk-secret", DEFAULT_MODEL).unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("gpt-4o-mini"));
    }
}
