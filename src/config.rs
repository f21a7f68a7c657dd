use std::path::PathBuf;

use crate::error::GatewayError;

/// Process-wide configuration, loaded once from the environment at
/// startup. There is no hot-reload path: a config change requires a
/// restart, matching the "fail fast before any socket opens" requirement.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub port: u16,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,

    pub stt_url: String,
    pub stt_api_key: String,

    pub llm_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_timeout_ms: u64,

    pub tts_url: String,
    pub tts_api_key: String,
    pub tts_model: String,
    pub tts_timeout_ms: u64,

    pub utterance_end_ms: u32,
    pub endpointing_ms: u32,
    pub trailing_window_ms: u64,
    pub hard_ceiling_ms: u64,

    pub subscriber_queue_depth: usize,
    pub max_sessions: usize,
}

fn required(name: &str) -> Result<String, GatewayError> {
    std::env::var(name).map_err(|_| GatewayError::Config(format!("missing required env var {name}")))
}

fn optional(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn optional_u32(name: &str, default: u32) -> Result<u32, GatewayError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| GatewayError::Config(format!("{name} must be a non-negative integer, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn optional_u64(name: &str, default: u64) -> Result<u64, GatewayError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| GatewayError::Config(format!("{name} must be a non-negative integer, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn optional_usize(name: &str, default: usize) -> Result<usize, GatewayError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| GatewayError::Config(format!("{name} must be a non-negative integer, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Loads from the process environment (after `dotenvy` has merged in
    /// any `.env` file). Returns before any socket is opened so a
    /// misconfiguration never produces a half-started gateway.
    pub fn from_env() -> Result<Self, GatewayError> {
        let port = optional_u32("PORT", 5050)? as u16;

        let tls_cert = std::env::var("TLS_CERT").ok().map(PathBuf::from);
        let tls_key = std::env::var("TLS_KEY").ok().map(PathBuf::from);
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(GatewayError::Config(
                "TLS_CERT and TLS_KEY must both be set or both be unset".into(),
            ));
        }

        Ok(Self {
            bind_addr: optional("BIND_ADDR", "0.0.0.0"),
            port,
            tls_cert,
            tls_key,

            stt_url: optional("STT_URL", "wss://api.deepgram.com/v1/listen"),
            stt_api_key: required("STT_API_KEY")?,

            llm_url: optional("LLM_URL", "https://api.openai.com/v1/chat/completions"),
            llm_api_key: required("LLM_API_KEY")?,
            llm_model: optional("LLM_MODEL", "gpt-4o-mini"),
            llm_timeout_ms: optional_u64("LLM_TIMEOUT_MS", 4_000)?,

            tts_url: optional("TTS_URL", "https://api.openai.com/v1/audio/speech"),
            tts_api_key: required("TTS_API_KEY")?,
            tts_model: optional("TTS_MODEL", "tts-1"),
            tts_timeout_ms: optional_u64("TTS_TIMEOUT_MS", 8_000)?,

            utterance_end_ms: optional_u32("UTTERANCE_END_MS", 1000)?,
            endpointing_ms: optional_u32("ENDPOINTING_MS", 300)?,
            trailing_window_ms: optional_u64("TRAILING_WINDOW_MS", 700)?,
            hard_ceiling_ms: optional_u64("HARD_CEILING_MS", 15_000)?,

            subscriber_queue_depth: optional_usize("SUBSCRIBER_QUEUE", 32)?,
            max_sessions: optional_usize("MAX_SESSIONS", 32)?,
        })
    }
}
