use thiserror::Error;

/// Error taxonomy shared by every component of the gateway.
///
/// Variants group by the stage that detected the failure, not by the
/// transport that carried it, so a session's propagation policy can match
/// on kind alone.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream protocol error: {0}")]
    UpstreamProtocol(String),

    #[error("idle timeout")]
    IdleTimeout,

    #[error("local send buffer is full")]
    Backpressured,

    #[error("client too slow draining audio")]
    ClientSlow,

    #[error("processing budget exceeded")]
    Timeout,

    #[error("translation request failed: {0}")]
    TranslationFailed(String),

    #[error("translation refused or empty")]
    TranslationRefused,

    #[error("speech synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("speech synthesis returned no audio")]
    SynthesisEmpty,

    #[error("stream already closed")]
    Closed,
}

impl GatewayError {
    /// Short, user-visible token sent to the client in `{type: "error", message}`.
    ///
    /// These strings are part of the client protocol (see the seed
    /// end-to-end scenarios) and must not be changed casually.
    pub fn client_message(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "ConfigError",
            GatewayError::UpstreamUnavailable(_) => "UpstreamUnavailable",
            GatewayError::UpstreamProtocol(_) => "UpstreamProtocol",
            GatewayError::IdleTimeout => "IdleTimeout",
            GatewayError::Backpressured => "Backpressured",
            GatewayError::ClientSlow => "ClientSlow",
            GatewayError::Timeout => "Timeout",
            GatewayError::TranslationFailed(_) => "TranslationFailed",
            GatewayError::TranslationRefused => "TranslationRefused",
            GatewayError::SynthesisFailed(_) => "SynthesisFailed",
            GatewayError::SynthesisEmpty => "SynthesisEmpty",
            GatewayError::Closed => "Closed",
        }
    }

    /// Whether this error, when raised inside a Conversation or Broadcast
    /// Session, must close the whole session rather than just end the
    /// current utterance.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, GatewayError::ClientSlow)
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
