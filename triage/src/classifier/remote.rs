//! Remote classification through an OpenAI-compatible chat endpoint
//!
//! Used only when the local rules are inconclusive and the user opted in
//! with a credential. Any failure is reported as an error here and turned
//! into `Other` by the caller.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::category::Category;
use crate::config::RemoteConfig;
use crate::error::{Result, TriageError};

/// Prompt template sent to the remote model.
const CLASSIFICATION_PROMPT: &str = r#"Classify this conversation into exactly one category.

Categories:
- JobOffers: recruiters, job offers, interview requests
- Networking: introductions, invitations to connect or meet
- Sales: product pitches, demos, pricing
- Spam: scams, prizes, unsolicited junk
- Other: anything else

Conversation:
From: {sender}
Subject: {subject}
Text (first 500 chars): {text}

Respond with ONLY the category name (JobOffers, Networking, Sales, Spam or Other). Nothing else."#;

const PREVIEW_CHARS: usize = 500;

#[async_trait]
pub trait RemoteClassifier: Send + Sync {
    /// Send `prompt` and return the raw category answer.
    async fn classify(&self, prompt: &str) -> Result<String>;
}

/// Build the prompt for one item.
pub fn build_prompt(text: &str, sender: &str, subject: &str) -> String {
    let preview: String = text.chars().take(PREVIEW_CHARS).collect();
    let subject = if subject.is_empty() { "(no subject)" } else { subject };

    CLASSIFICATION_PROMPT
        .replace("{sender}", sender)
        .replace("{subject}", subject)
        .replace("{text}", &preview)
}

/// Validate a raw answer against the closed category set.
pub fn parse_answer(answer: &str) -> Result<Category> {
    let cleaned = answer
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '.' | '!' | '*'))
        .trim();

    Category::parse(cleaned).ok_or_else(|| TriageError::InvalidCategory(cleaned.to_string()))
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

/// Remote classifier over HTTPS
pub struct HttpRemoteClassifier {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpRemoteClassifier {
    pub fn new(config: &RemoteConfig, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout().min(Duration::from_secs(5)))
            .build()
            .map_err(|e| TriageError::Network(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/chat/completions", config.endpoint.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl RemoteClassifier for HttpRemoteClassifier {
    async fn classify(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "temperature": 0.1,
            "max_tokens": 10,
            "stream": false
        });

        debug!("Calling remote classifier at {} with model {}", self.endpoint, self.model);

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TriageError::Network(format!("Remote request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(TriageError::Network(format!(
                "Remote classifier returned status: {}",
                resp.status()
            )));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| TriageError::Parse(format!("Failed to parse remote response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| TriageError::Parse("Remote response had no choices".to_string()))
    }
}
