use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::ports::TranslatorClient;
use crate::domain::translation::Direction;
use crate::error::{GatewayError, GatewayResult};

/// Chat-completion-shaped translator client: a single request per
/// finalized utterance, no streaming, no conversation history kept across
/// calls.
pub struct HttpTranslatorClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl HttpTranslatorClient {
    pub fn new(
        http: reqwest::Client,
        url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            url: url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout,
        }
    }

    fn prompt(text: &str, direction: Direction) -> String {
        format!(
            "Translate the following utterance into {}. Reply with the translation only, no quotes, no commentary:\n\n{text}",
            direction.target_language_name()
        )
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl TranslatorClient for HttpTranslatorClient {
    async fn translate(&self, text: &str, direction: Direction) -> GatewayResult<String> {
        if text.trim().is_empty() {
            return Err(GatewayError::TranslationRefused);
        }

        let body = json!({
            "model": self.model,
            "messages": [ChatMessage { role: "user", content: Self::prompt(text, direction) }],
            "temperature": 0.2,
        });

        let response = tokio::time::timeout(
            self.timeout,
            self.http
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| GatewayError::Timeout)?
        .map_err(|e| GatewayError::UpstreamUnavailable(format!("translator request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(GatewayError::TranslationFailed(format!(
                "translator returned status {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::UpstreamProtocol(format!("malformed translator response: {e}")))?;

        let translated = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if translated.trim().is_empty() {
            return Err(GatewayError::TranslationRefused);
        }

        Ok(translated)
    }
}
