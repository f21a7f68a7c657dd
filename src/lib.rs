//! Real-time bidirectional speech-translation gateway.
//!
//! Layered the way the rest of this workspace's sibling projects are:
//! `domain` holds entities and port traits, `infrastructure` adapts them
//! to concrete upstreams, `application` orchestrates sessions, and
//! `gateway` is the inbound HTTP/websocket surface.
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod infrastructure;

use std::sync::Arc;
use std::time::Duration;

use crate::application::broadcast_session::BroadcastFrame;
use crate::config::AppConfig;
use crate::domain::ports::{SttProvider, TranslatorClient, TtsClient};
use crate::gateway::state::AppState;
use crate::infrastructure::{DeepgramSttProvider, FanoutHub, HttpTranslatorClient, HttpTtsClient, OverflowPolicy};

/// Builds the shared application state from a loaded config. Split out of
/// `main` so integration tests can construct the same wiring against mock
/// upstreams.
pub fn build_state(config: AppConfig) -> Arc<AppState> {
    let config = Arc::new(config);
    let http = reqwest::Client::new();

    let stt: Arc<dyn SttProvider> = Arc::new(DeepgramSttProvider::new(config.stt_url.clone(), config.stt_api_key.clone()));
    let translator: Arc<dyn TranslatorClient> = Arc::new(HttpTranslatorClient::new(
        http.clone(),
        config.llm_url.clone(),
        config.llm_api_key.clone(),
        config.llm_model.clone(),
        Duration::from_millis(config.llm_timeout_ms),
    ));
    let tts: Arc<dyn TtsClient> = Arc::new(HttpTtsClient::new(
        http,
        config.tts_url.clone(),
        config.tts_api_key.clone(),
        config.tts_model.clone(),
        Duration::from_millis(config.tts_timeout_ms),
    ));
    let broadcast: Arc<FanoutHub<BroadcastFrame>> = Arc::new(FanoutHub::new(config.subscriber_queue_depth, OverflowPolicy::DropOldest));

    Arc::new(AppState::new(config, stt, translator, tts, broadcast))
}
