use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::GatewayResult;

use super::transcript::TranscriptEvent;
use super::translation::Direction;

/// Negotiated options for one STT stream, derived from the configured
/// defaults and the direction of a Conversation Session (Broadcast
/// Sessions use the defaults verbatim, with no direction).
#[derive(Debug, Clone)]
pub struct SttOptions {
    pub language: String,
    pub model: String,
    pub sample_rate: u32,
    pub interim_results: bool,
    pub utterance_end_ms: u32,
    pub endpointing_ms: u32,
    pub vad_events: bool,
}

/// A live, bidirectional connection to the streaming STT service.
///
/// `open` returns both a handle for sending control/audio and a channel of
/// events as they arrive; the two halves are split so the event channel can
/// be polled from a `select!` loop while the handle is held elsewhere.
#[async_trait]
pub trait SttProvider: Send + Sync {
    async fn open(&self, options: SttOptions) -> GatewayResult<SttSession>;
}

pub struct SttSession {
    pub handle: Box<dyn SttHandle>,
    pub events: mpsc::Receiver<TranscriptEvent>,
}

#[async_trait]
pub trait SttHandle: Send + Sync {
    /// Forward one audio frame. Never blocks on network backpressure; an
    /// internal buffer absorbs transient stalls (e.g. mid-reconnect).
    async fn send_audio(&self, frame: &[u8]) -> GatewayResult<()>;

    /// Ask the upstream to flush any pending partial result as final and
    /// emit `UtteranceEnd`, without tearing down the connection.
    async fn finalize(&self) -> GatewayResult<()>;

    /// Tear down the stream. Idempotent: calling it twice is a no-op.
    async fn close(&self) -> GatewayResult<()>;
}

/// Single-shot text translation of one finalized utterance.
#[async_trait]
pub trait TranslatorClient: Send + Sync {
    async fn translate(&self, text: &str, direction: Direction) -> GatewayResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioContainer {
    Mp3,
}

#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub container: AudioContainer,
}

/// Single-shot text-to-speech synthesis of one translated utterance.
#[async_trait]
pub trait TtsClient: Send + Sync {
    async fn synthesize(&self, text: &str, direction: Direction) -> GatewayResult<SynthesizedAudio>;
}
