use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::warn;

use crate::domain::ports::{SttHandle, SttOptions, SttProvider, SttSession};
use crate::domain::transcript::TranscriptEvent;
use crate::error::{GatewayError, GatewayResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// If no audio frame has been sent for this long, the client sends a
/// keepalive control message of its own accord rather than waiting for
/// the upstream's 10 s idle close.
const KEEPALIVE_AFTER: Duration = Duration::from_secs(3);
const KEEPALIVE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// High-water mark on the outbound audio queue: `send_audio` never blocks
/// on the network, it just refuses once this many frames are backed up
/// waiting for the writer task.
const AUDIO_QUEUE_DEPTH: usize = 32;

/// How long `close()` waits for the upstream's final `Metadata` frame
/// before giving up and closing the socket anyway.
const METADATA_WAIT: Duration = Duration::from_secs(2);

/// Streaming STT client speaking the Deepgram-shaped listen protocol:
/// connect over websocket with options in the query string, stream raw
/// PCM as binary frames, receive JSON result frames, and control the
/// stream with `Finalize`/`CloseStream` text control messages.
pub struct DeepgramSttProvider {
    base_url: String,
    api_key: String,
}

impl DeepgramSttProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

fn build_url(base_url: &str, options: &SttOptions) -> String {
    let query = [
        ("model", options.model.clone()),
        ("language", options.language.clone()),
        ("encoding", "linear16".to_string()),
        ("sample_rate", options.sample_rate.to_string()),
        ("interim_results", options.interim_results.to_string()),
        ("utterance_end_ms", options.utterance_end_ms.to_string()),
        ("endpointing", options.endpointing_ms.to_string()),
        ("vad_events", options.vad_events.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| format!("{k}={}", urlencoding::encode(&v)))
    .collect::<Vec<_>>()
    .join("&");

    format!("{base_url}?{query}")
}

async fn connect(base_url: &str, api_key: &str, options: &SttOptions) -> GatewayResult<WsStream> {
    let url = build_url(base_url, options);
    let request = http::Request::builder()
        .uri(&url)
        .header("Authorization", format!("Token {api_key}"))
        .header("Host", http::Uri::try_from(&url).ok().and_then(|u| u.host().map(str::to_string)).unwrap_or_default())
        .header("Sec-WebSocket-Key", tokio_tungstenite::tungstenite::handshake::client::generate_key())
        .header("Sec-WebSocket-Version", "13")
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .body(())
        .map_err(|e| GatewayError::Config(format!("invalid STT url: {e}")))?;

    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| GatewayError::UpstreamUnavailable(format!("stt connect failed: {e}")))?;

    Ok(stream)
}

#[async_trait]
impl SttProvider for DeepgramSttProvider {
    async fn open(&self, options: SttOptions) -> GatewayResult<SttSession> {
        let stream = connect(&self.base_url, &self.api_key, &options).await?;
        let (sink, source) = stream.split();
        let closed = Arc::new(AtomicBool::new(false));

        let (events_tx, events_rx) = mpsc::channel(256);
        let (metadata_tx, metadata_rx) = oneshot::channel();
        let (writer_tx, writer_rx) = mpsc::channel(AUDIO_QUEUE_DEPTH);
        let last_activity = Arc::new(Mutex::new(Instant::now()));

        tokio::spawn(read_loop(source, events_tx, closed.clone(), metadata_tx));
        tokio::spawn(writer_loop(sink, writer_rx));
        tokio::spawn(keepalive_loop(writer_tx.clone(), last_activity.clone(), closed.clone()));

        Ok(SttSession {
            handle: Box::new(DeepgramHandle {
                writer_tx,
                closed,
                last_activity,
                metadata_rx: Mutex::new(Some(metadata_rx)),
            }),
            events: events_rx,
        })
    }
}

/// Commands accepted by `writer_loop`, the sole owner of the websocket
/// sink: routing every outbound message through one task means
/// `send_audio`, `finalize`, `close` and the keepalive timer never race
/// each other for the sink.
enum WriterCommand {
    Audio(Vec<u8>),
    Control(&'static str),
    Shutdown,
}

async fn writer_loop(mut sink: WsSink, mut rx: mpsc::Receiver<WriterCommand>) {
    while let Some(cmd) = rx.recv().await {
        let result = match cmd {
            WriterCommand::Shutdown => break,
            WriterCommand::Audio(bytes) => sink.send(Message::Binary(bytes)).await,
            WriterCommand::Control(kind) => sink.send(Message::Text(format!(r#"{{"type":"{kind}"}}"#))).await,
        };
        if result.is_err() {
            return;
        }
    }
    let _ = sink.close().await;
}

struct DeepgramHandle {
    writer_tx: mpsc::Sender<WriterCommand>,
    closed: Arc<AtomicBool>,
    last_activity: Arc<Mutex<Instant>>,
    metadata_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

#[async_trait]
impl SttHandle for DeepgramHandle {
    async fn send_audio(&self, frame: &[u8]) -> GatewayResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::Closed);
        }
        *self.last_activity.lock().await = Instant::now();
        match self.writer_tx.try_send(WriterCommand::Audio(frame.to_vec())) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(GatewayError::Backpressured),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(GatewayError::Closed),
        }
    }

    async fn finalize(&self) -> GatewayResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.writer_tx
            .send(WriterCommand::Control("Finalize"))
            .await
            .map_err(|e| GatewayError::UpstreamProtocol(format!("finalize send failed: {e}")))
    }

    async fn close(&self) -> GatewayResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _ = self.writer_tx.send(WriterCommand::Control("CloseStream")).await;
        if let Some(rx) = self.metadata_rx.lock().await.take() {
            let _ = tokio::time::timeout(METADATA_WAIT, rx).await;
        }
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum DeepgramFrame {
    Results {
        is_final: bool,
        speech_final: bool,
        channel: DeepgramChannel,
        #[serde(default)]
        start: f64,
        #[serde(default)]
        duration: f64,
    },
    #[serde(rename = "UtteranceEnd")]
    UtteranceEnd {
        #[serde(default)]
        last_word_end: f64,
    },
    Metadata {},
    Error {
        #[serde(default)]
        description: String,
    },
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Reads frames until the upstream socket closes, then emits a terminal
/// `error` (if the close was non-normal) followed by `Closed` and returns.
/// This client never reconnects on its own: a session that wants the
/// stream kept alive across an upstream drop (the Broadcast Session) does
/// so by calling `open()` again, not by asking this loop to retry.
async fn read_loop(
    mut source: WsSource,
    events_tx: mpsc::Sender<TranscriptEvent>,
    closed: Arc<AtomicBool>,
    metadata_tx: oneshot::Sender<()>,
) {
    let mut metadata_tx = Some(metadata_tx);
    loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                Some(DecodedFrame::Transcript(event)) => {
                    if events_tx.send(event).await.is_err() {
                        return;
                    }
                }
                Some(DecodedFrame::Metadata) => {
                    if let Some(tx) = metadata_tx.take() {
                        let _ = tx.send(());
                    }
                }
                None => {}
            },
            Some(Ok(Message::Close(frame))) => {
                if !closed.swap(true, Ordering::AcqRel) {
                    if let Some(err) = classify_close(frame) {
                        let _ = events_tx.send(TranscriptEvent::Error(err)).await;
                    }
                }
                let _ = events_tx.send(TranscriptEvent::Closed).await;
                return;
            }
            None => {
                closed.store(true, Ordering::Release);
                let _ = events_tx.send(TranscriptEvent::Closed).await;
                return;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(error = %e, "stt websocket read error");
                let _ = events_tx
                    .send(TranscriptEvent::Error(GatewayError::UpstreamProtocol(e.to_string())))
                    .await;
            }
        }
    }
}

/// Translates the upstream's close code/reason into a local error kind.
/// `1011` paired with a `NET-0001` reason is the service's own silence
/// timeout; anything else non-normal is a generic protocol error.
fn classify_close(frame: Option<tokio_tungstenite::tungstenite::protocol::CloseFrame<'static>>) -> Option<GatewayError> {
    let frame = frame?;
    if u16::from(frame.code) == 1000 {
        return None;
    }
    if u16::from(frame.code) == 1011 && frame.reason.contains("NET-0001") {
        return Some(GatewayError::IdleTimeout);
    }
    Some(GatewayError::UpstreamProtocol(format!("{}: {}", frame.code, frame.reason)))
}

/// Sends a keepalive control message whenever no audio has crossed the
/// handle for `KEEPALIVE_AFTER`, so the upstream's own idle-close timer
/// never fires while the connection is merely quiet between utterances.
async fn keepalive_loop(writer_tx: mpsc::Sender<WriterCommand>, last_activity: Arc<Mutex<Instant>>, closed: Arc<AtomicBool>) {
    loop {
        tokio::time::sleep(KEEPALIVE_CHECK_INTERVAL).await;
        if closed.load(Ordering::Acquire) {
            return;
        }
        let elapsed = last_activity.lock().await.elapsed();
        if elapsed < KEEPALIVE_AFTER {
            continue;
        }
        if writer_tx.send(WriterCommand::Control("KeepAlive")).await.is_err() {
            return;
        }
        *last_activity.lock().await = Instant::now();
    }
}

/// Result of decoding one text frame: a transcript event to forward to the
/// session, the upstream's final `Metadata` marker (not a transcript event
/// itself, just the signal `close()` waits on), or nothing worth reporting.
enum DecodedFrame {
    Transcript(TranscriptEvent),
    Metadata,
}

fn decode_frame(text: &str) -> Option<DecodedFrame> {
    let frame: DeepgramFrame = serde_json::from_str(text).ok()?;
    match frame {
        DeepgramFrame::Results { is_final, channel, duration, start, .. } => {
            let transcript = channel.alternatives.first().map(|a| a.transcript.clone()).unwrap_or_default();
            if transcript.is_empty() {
                return None;
            }
            let end_ms = ((start + duration) * 1000.0) as u64;
            Some(DecodedFrame::Transcript(if is_final {
                TranscriptEvent::Final { text: transcript, end_ms }
            } else {
                TranscriptEvent::Interim { text: transcript }
            }))
        }
        DeepgramFrame::UtteranceEnd { last_word_end } => Some(DecodedFrame::Transcript(TranscriptEvent::UtteranceEnd {
            end_ms: (last_word_end * 1000.0) as u64,
        })),
        DeepgramFrame::Metadata {} => Some(DecodedFrame::Metadata),
        DeepgramFrame::Error { description } => {
            Some(DecodedFrame::Transcript(TranscriptEvent::Error(GatewayError::UpstreamProtocol(description))))
        }
    }
}
