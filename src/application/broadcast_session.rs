use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::ports::{SttOptions, SttSession};
use crate::domain::transcript::TranscriptEvent;
use crate::domain::translation::Direction;
use crate::gateway::state::AppState;
use crate::infrastructure::fanout::SubscriberReceiver;

/// One language direction for the whole broadcast; unlike Conversation
/// Sessions, a broadcast has no per-connection mode tag to pick it from.
const BROADCAST_DIRECTION: Direction = Direction::EnToCn;

/// Subscriber's send queue is closed (or never opened) for 60 s without a
/// `ping` — two missed 30 s intervals — before the gateway gives up on it.
const PING_TIMEOUT: Duration = Duration::from_secs(60);

/// Reconnect schedule for the publisher's long-lived STT stream: doubling
/// from 1 s up to the 30 s cap, then one more attempt at the cap before
/// giving up on captions for the rest of the connection.
const STT_RECONNECT_BACKOFFS_MS: [u64; 6] = [1_000, 2_000, 4_000, 8_000, 16_000, 30_000];

/// Item carried on the broadcast fan-out hub: the translated text pair
/// produced by one utterance segment, or the synthesized speech for it.
/// The hub never carries the publisher's raw audio — subscribers only
/// ever hear the translated voice, per the external client contract.
#[derive(Debug, Clone)]
pub enum BroadcastFrame {
    Translation { ordinal: u64, original: String, translated: String },
    Audio(Arc<[u8]>),
    Status { message: String },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BrowserMessage<'a> {
    Translation { ordinal: u64, original: &'a str, translation: &'a str },
    Status { message: &'a str },
    Pong,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SubscriberMessage {
    Ping,
    Volume { #[serde(default)] value: f64 },
    Stop,
}

fn broadcast_stt_options(state: &AppState) -> SttOptions {
    SttOptions {
        language: BROADCAST_DIRECTION.source_language().to_string(),
        model: "nova-2".to_string(),
        sample_rate: 16_000,
        interim_results: true,
        utterance_end_ms: state.config.utterance_end_ms,
        endpointing_ms: state.config.endpointing_ms,
        vad_events: true,
    }
}

/// Drives the single publisher connection for a Broadcast Session: feeds
/// its audio into one long-lived STT stream, segments utterances on the
/// STT service's `utterance-end` signal, and for each segment runs the
/// same translate-then-synthesize pipeline a Conversation Session runs
/// per utterance, publishing the result to every current subscriber. If
/// the STT stream closes unexpectedly, it is reopened in the background
/// on an exponential backoff while the publisher connection stays up.
pub async fn run_publisher(mut socket: WebSocket, state: Arc<AppState>) {
    info!("broadcast publisher connected");

    let stt = match state.stt.open(broadcast_stt_options(&state)).await {
        Ok(session) => Some(session),
        Err(e) => {
            warn!(error = %e, "broadcast stt unavailable; captions and translation disabled for this connection");
            state.broadcast.publish(BroadcastFrame::Status { message: "captions unavailable".into() }).await;
            None
        }
    };

    let (mut stt_handle, mut stt_events) = match stt {
        Some(session) => (Some(session.handle), Some(session.events)),
        None => (None, None),
    };

    let mut transcript = String::new();
    // Own counter, independent of whatever STT resets internally on
    // reconnect: the public ordinal must keep climbing across that seam.
    let mut ordinal: u64 = 0;
    let mut reconnecting: Option<mpsc::Receiver<Option<SttSession>>> = None;
    // Total wall-clock time the publisher's previous STT streams were open,
    // added to the current stream's event timestamps so they read as one
    // continuous timeline across a mid-connection reconnect.
    let mut timestamp_offset_ms: u64 = 0;
    let mut stream_started_at = Instant::now();

    loop {
        tokio::select! {
            msg = socket.next() => {
                match msg {
                    Some(Ok(WsMessage::Binary(data))) => {
                        if !data.is_empty() {
                            if let Some(handle) = stt_handle.as_ref() {
                                let _ = handle.send_audio(&data).await;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "publisher websocket error");
                        break;
                    }
                }
            }

            Some(event) = recv_optional(&mut stt_events) => {
                match event {
                    TranscriptEvent::Final { text, end_ms } => {
                        debug!(end_ms = end_ms + timestamp_offset_ms, "broadcast transcript final segment");
                        if !transcript.is_empty() && !text.is_empty() {
                            transcript.push(' ');
                        }
                        transcript.push_str(&text);
                    }
                    TranscriptEvent::UtteranceEnd { .. } => {
                        if !transcript.trim().is_empty() {
                            ordinal += 1;
                            spawn_translate_and_synthesize(ordinal, std::mem::take(&mut transcript), state.clone());
                        }
                    }
                    TranscriptEvent::Interim { .. } => {}
                    TranscriptEvent::Error(e) => {
                        warn!(error = %e, "broadcast stt stream error");
                    }
                    TranscriptEvent::Closed => {
                        // The upstream ended the stream on its own (idle timeout,
                        // protocol error, ...); reopen it in the background so the
                        // publisher socket stays responsive while we wait.
                        timestamp_offset_ms += stream_started_at.elapsed().as_millis() as u64;
                        stt_handle = None;
                        stt_events = None;
                        reconnecting = Some(spawn_stt_reconnect(state.clone()));
                    }
                }
            }

            Some(outcome) = recv_optional(&mut reconnecting) => {
                reconnecting = None;
                match outcome {
                    Some(session) => {
                        info!("broadcast stt stream reconnected");
                        stream_started_at = Instant::now();
                        stt_handle = Some(session.handle);
                        stt_events = Some(session.events);
                    }
                    None => {
                        warn!("broadcast stt reconnect exhausted; captions disabled for the rest of this connection");
                        state.broadcast.publish(BroadcastFrame::Status { message: "captions unavailable".into() }).await;
                    }
                }
            }
        }
    }

    if let Some(handle) = stt_handle {
        let _ = handle.close().await;
    }
    info!("broadcast publisher disconnected");
}

/// Retries opening a fresh STT stream on a 1s-to-30s doubling backoff
/// schedule, sending `None` once the schedule is exhausted without success.
fn spawn_stt_reconnect(state: Arc<AppState>) -> mpsc::Receiver<Option<SttSession>> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        for delay_ms in STT_RECONNECT_BACKOFFS_MS {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            match state.stt.open(broadcast_stt_options(&state)).await {
                Ok(session) => {
                    let _ = tx.send(Some(session)).await;
                    return;
                }
                Err(e) => warn!(error = %e, "broadcast stt reconnect attempt failed"),
            }
        }
        let _ = tx.send(None).await;
    });
    rx
}

fn spawn_translate_and_synthesize(ordinal: u64, text: String, state: Arc<AppState>) {
    tokio::spawn(async move {
        let cancel = state.broadcast_control.begin_utterance().await;

        let translated = tokio::select! {
            _ = cancel.cancelled() => { state.broadcast_control.end_utterance().await; return; }
            r = state.translator.translate(&text, BROADCAST_DIRECTION) => r,
        };

        let translated = match translated {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "broadcast translation failed");
                state.broadcast_control.end_utterance().await;
                return;
            }
        };

        state
            .broadcast
            .publish(BroadcastFrame::Translation { ordinal, original: text, translated: translated.clone() })
            .await;

        let synthesized = tokio::select! {
            _ = cancel.cancelled() => { state.broadcast_control.end_utterance().await; return; }
            r = state.tts.synthesize(&translated, BROADCAST_DIRECTION) => r,
        };

        match synthesized {
            Ok(audio) => {
                state.broadcast.publish(BroadcastFrame::Audio(Arc::from(audio.bytes))).await;
            }
            Err(e) => warn!(error = %e, "broadcast synthesis failed"),
        }

        state.broadcast_control.end_utterance().await;
    });
}

async fn recv_optional<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(r) => {
            let value = r.recv().await;
            if value.is_none() {
                *rx = None;
            }
            value
        }
        None => std::future::pending().await,
    }
}

/// Drives a single read-only (except for `ping`/`volume`/`stop` control
/// messages) subscriber: pulls whatever the publisher's pipeline produces
/// off the hub and forwards it to this browser's socket.
pub async fn run_browser(socket: WebSocket, state: Arc<AppState>) {
    info!("broadcast subscriber connected");
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut sub: SubscriberReceiver<BroadcastFrame> = state.broadcast.subscribe().await;
    let mut last_ping = Instant::now();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<SubscriberMessage>(&text) {
                            Ok(SubscriberMessage::Ping) => {
                                last_ping = Instant::now();
                                if send_json(&mut ws_tx, &BrowserMessage::Pong).await.is_err() {
                                    break;
                                }
                            }
                            Ok(SubscriberMessage::Volume { .. }) => {
                                // Playback telemetry only; the gateway has nothing to act on.
                            }
                            Ok(SubscriberMessage::Stop) => {
                                state.broadcast_control.trip().await;
                                state.broadcast.clear_all().await;
                            }
                            Err(_) => {}
                        }
                    }
                    Some(Ok(_)) => {}
                }
            }

            item = sub.recv() => {
                match item {
                    Some(BroadcastFrame::Audio(bytes)) => {
                        if ws_tx.send(WsMessage::Binary(bytes.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Some(BroadcastFrame::Translation { ordinal, original, translated }) => {
                        let payload = BrowserMessage::Translation { ordinal, original: &original, translation: &translated };
                        if send_json(&mut ws_tx, &payload).await.is_err() {
                            break;
                        }
                    }
                    Some(BroadcastFrame::Status { message }) => {
                        let payload = BrowserMessage::Status { message: &message };
                        if send_json(&mut ws_tx, &payload).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = tokio::time::sleep(PING_TIMEOUT.saturating_sub(last_ping.elapsed())) => {
                if last_ping.elapsed() >= PING_TIMEOUT {
                    warn!("broadcast subscriber missed two ping intervals, closing");
                    break;
                }
            }
        }
    }

    state.broadcast.unsubscribe(sub.id()).await;
    info!("broadcast subscriber disconnected");
}

async fn send_json(
    ws_tx: &mut (impl futures_util::Sink<WsMessage, Error = axum::Error> + Unpin),
    payload: &BrowserMessage<'_>,
) -> Result<(), axum::Error> {
    let Ok(json) = serde_json::to_string(payload) else { return Ok(()) };
    ws_tx.send(WsMessage::Text(json)).await
}
