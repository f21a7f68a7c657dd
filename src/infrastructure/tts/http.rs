use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::domain::ports::{AudioContainer, SynthesizedAudio, TtsClient};
use crate::domain::translation::Direction;
use crate::error::{GatewayError, GatewayResult};

/// Single-shot HTTP speech synthesis: one request per translated
/// utterance, full response body buffered before returning (no
/// chunked-audio streaming).
pub struct HttpTtsClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl HttpTtsClient {
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
}

#[async_trait]
impl TtsClient for HttpTtsClient {
    async fn synthesize(&self, text: &str, direction: Direction) -> GatewayResult<SynthesizedAudio> {
        if text.trim().is_empty() {
            return Err(GatewayError::SynthesisEmpty);
        }

        let body = json!({
            "model": self.model,
            "voice": direction.tts_voice(),
            "input": text,
            "response_format": "mp3",
        });

        let response = tokio::time::timeout(
            self.timeout,
            self.http.post(&self.url).bearer_auth(&self.api_key).json(&body).send(),
        )
        .await
        .map_err(|_| GatewayError::Timeout)?
        .map_err(|e| GatewayError::UpstreamUnavailable(format!("tts request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(GatewayError::SynthesisFailed(format!("tts returned status {}", response.status())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::UpstreamProtocol(format!("malformed tts response: {e}")))?;

        if bytes.is_empty() {
            return Err(GatewayError::SynthesisEmpty);
        }

        Ok(SynthesizedAudio {
            bytes: bytes.to_vec(),
            container: AudioContainer::Mp3,
        })
    }
}
