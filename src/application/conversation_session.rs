use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::ports::{SttHandle, SttOptions, SynthesizedAudio};
use crate::domain::session::{SessionId, Utterance, UtteranceState};
use crate::domain::transcript::TranscriptEvent;
use crate::domain::translation::Direction;
use crate::error::GatewayError;
use crate::gateway::messages::{ClientMessage, ServerMessage};
use crate::gateway::state::AppState;

/// Audio recorded past this point without a client `stop` is finalized
/// anyway, so one runaway client can't hold an STT stream open forever.
const MAX_RECORDING: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Recording,
    /// Client has stopped; still accepting trailing audio before the STT
    /// stream is told to finalize.
    Grace,
    AwaitingSttClose,
    Translating,
    Synthesizing,
}

enum Control {
    Translated { original: String, translated: String },
    Synthesized { audio: SynthesizedAudio },
    Failed(GatewayError),
}

/// Identifies which of the session's independent deadlines fired, since
/// more than one can be pending at once (the trailing window and the hard
/// ceiling both run during `Grace`).
#[derive(Debug, Clone, Copy)]
enum DeadlineKind {
    Recording,
    TrailingWindow,
    HardCeiling,
}

/// Drives one `/ws/conversation` connection end to end: audio in, STT,
/// translation, synthesis, audio out. One instance per client; no state is
/// shared across sessions except through `AppState`'s upstream clients.
pub async fn run(socket: WebSocket, direction: Direction, state: Arc<AppState>) {
    let id = SessionId::new();
    info!(%id, ?direction, "conversation session started");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<WsMessage>(32);

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut phase = Phase::Idle;
    let mut ordinal: u64 = 0;
    let mut utterance: Option<Utterance> = None;
    let mut stt_handle: Option<Box<dyn SttHandle>> = None;
    let mut stt_events: Option<mpsc::Receiver<TranscriptEvent>> = None;
    let mut ctrl_rx: Option<mpsc::Receiver<Control>> = None;
    let mut cancel = CancellationToken::new();
    let mut recording_deadline: Option<Instant> = None;
    let mut post_stop_deadline: Option<Instant> = None;
    let mut hard_ceiling_deadline: Option<Instant> = None;
    let mut last_upstream_failure: Option<Instant> = None;
    let session_fatal = CancellationToken::new();

    loop {
        let next_deadline = [
            recording_deadline.map(|d| (DeadlineKind::Recording, d)),
            post_stop_deadline.map(|d| (DeadlineKind::TrailingWindow, d)),
            hard_ceiling_deadline.map(|d| (DeadlineKind::HardCeiling, d)),
        ]
        .into_iter()
        .flatten()
        .min_by_key(|(_, d)| *d);

        tokio::select! {
            client_msg = ws_rx.next() => {
                match client_msg {
                    Some(Ok(WsMessage::Binary(data))) => {
                        handle_audio_frame(
                            data,
                            &mut phase,
                            &mut ordinal,
                            &mut utterance,
                            &mut stt_handle,
                            &mut stt_events,
                            &mut recording_deadline,
                            direction,
                            &state,
                            &out_tx,
                            &mut last_upstream_failure,
                            &session_fatal,
                        ).await;
                    }
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Ok(ClientMessage::Stop) = serde_json::from_str::<ClientMessage>(&text) {
                            handle_stop(
                                &mut phase,
                                &state,
                                &out_tx,
                                &mut post_stop_deadline,
                                &mut hard_ceiling_deadline,
                                &session_fatal,
                            ).await;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(%id, error = %e, "client websocket error");
                        break;
                    }
                }
            }

            Some(event) = recv_optional(&mut stt_events) => {
                handle_transcript_event(
                    event,
                    &mut phase,
                    &mut utterance,
                    &mut stt_handle,
                    &mut ctrl_rx,
                    &mut cancel,
                    ordinal,
                    direction,
                    &state,
                    &out_tx,
                    &mut recording_deadline,
                    &mut post_stop_deadline,
                    &mut hard_ceiling_deadline,
                    &session_fatal,
                ).await;
            }

            Some(control) = recv_optional(&mut ctrl_rx) => {
                let done = handle_control(
                    control,
                    &mut phase,
                    &mut utterance,
                    ordinal,
                    &out_tx,
                    &mut last_upstream_failure,
                    &session_fatal,
                ).await;
                if done {
                    stt_handle = None;
                    stt_events = None;
                    ctrl_rx = None;
                    recording_deadline = None;
                    post_stop_deadline = None;
                    hard_ceiling_deadline = None;
                }
            }

            _ = sleep_or_pending(next_deadline.map(|(_, d)| d)) => {
                let kind = next_deadline.expect("branch only resolves when a deadline is set").0;
                let fatal = handle_deadline(
                    kind,
                    &mut phase,
                    &ordinal,
                    &mut stt_handle,
                    &mut cancel,
                    &state,
                    &out_tx,
                    &mut recording_deadline,
                    &mut post_stop_deadline,
                    &mut hard_ceiling_deadline,
                    &session_fatal,
                ).await;
                if fatal {
                    stt_events = None;
                    ctrl_rx = None;
                }
            }

            _ = session_fatal.cancelled() => {
                warn!(%id, "session-fatal condition reached (client too slow or repeated upstream failure), closing session");
                break;
            }
        }
    }

    if let Some(handle) = stt_handle.take() {
        let _ = handle.close().await;
    }
    cancel.cancel();
    writer.abort();
    info!(%id, "conversation session ended");
}

/// Polls a channel that may not exist yet (no STT stream open, no
/// translation task running). A closed channel clears itself so the next
/// iteration parks on `pending()` instead of spinning.
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

async fn sleep_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d.into()).await,
        None => std::future::pending().await,
    }
}

/// Sends a server message without blocking on the client's read rate. A
/// full outbound queue means the client isn't draining fast enough; rather
/// than buffer unboundedly or stall the whole session loop, this trips
/// `session_fatal` so the caller closes the session on its next iteration.
async fn send_server(out_tx: &mpsc::Sender<WsMessage>, msg: ServerMessage, session_fatal: &CancellationToken) {
    let Ok(text) = serde_json::to_string(&msg) else { return };
    send_ws(out_tx, WsMessage::Text(text), session_fatal).await;
}

/// Same non-blocking, `ClientSlow`-on-full semantics as `send_server`, for
/// the raw binary TTS frame that isn't a tagged `ServerMessage`.
async fn send_ws(out_tx: &mpsc::Sender<WsMessage>, msg: WsMessage, session_fatal: &CancellationToken) {
    match out_tx.try_send(msg) {
        Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            let err = GatewayError::ClientSlow;
            warn!(error = %err, "outbound queue full");
            if err.is_session_fatal() {
                session_fatal.cancel();
            }
        }
    }
}

/// Records an `UpstreamUnavailable` occurrence and reports whether this is
/// the second one within 5 seconds, which closes the session rather than
/// just the current utterance.
fn note_upstream_failure(last: &mut Option<Instant>, err: &GatewayError) -> bool {
    if !matches!(err, GatewayError::UpstreamUnavailable(_)) {
        return false;
    }
    let now = Instant::now();
    let repeated = last.is_some_and(|t| now.duration_since(t) <= Duration::from_secs(5));
    *last = Some(now);
    repeated
}

#[allow(clippy::too_many_arguments)]
async fn handle_audio_frame(
    data: Vec<u8>,
    phase: &mut Phase,
    ordinal: &mut u64,
    utterance: &mut Option<Utterance>,
    stt_handle: &mut Option<Box<dyn SttHandle>>,
    stt_events: &mut Option<mpsc::Receiver<TranscriptEvent>>,
    recording_deadline: &mut Option<Instant>,
    direction: Direction,
    state: &Arc<AppState>,
    out_tx: &mpsc::Sender<WsMessage>,
    last_upstream_failure: &mut Option<Instant>,
    session_fatal: &CancellationToken,
) {
    if data.is_empty() {
        return;
    }
    match *phase {
        Phase::Idle => {
            *ordinal += 1;
            *utterance = Some(Utterance::new(*ordinal));
            *recording_deadline = Some(Instant::now() + MAX_RECORDING);

            let options = SttOptions {
                language: direction.source_language().to_string(),
                model: "nova-2".to_string(),
                sample_rate: 16_000,
                interim_results: true,
                utterance_end_ms: state.config.utterance_end_ms,
                endpointing_ms: state.config.endpointing_ms,
                vad_events: true,
            };

            match state.stt.open(options).await {
                Ok(session) => {
                    if session.handle.send_audio(&data).await.is_ok() {
                        *stt_handle = Some(session.handle);
                        *stt_events = Some(session.events);
                        *phase = Phase::Recording;
                    } else {
                        let err = GatewayError::UpstreamUnavailable("stt rejected initial audio frame".into());
                        if note_upstream_failure(last_upstream_failure, &err) {
                            session_fatal.cancel();
                        }
                        send_server(out_tx, ServerMessage::Error { ordinal: Some(*ordinal), message: err.client_message() }, session_fatal).await;
                        *utterance = None;
                        *recording_deadline = None;
                    }
                }
                Err(e) => {
                    if note_upstream_failure(last_upstream_failure, &e) {
                        session_fatal.cancel();
                    }
                    send_server(out_tx, ServerMessage::Error { ordinal: Some(*ordinal), message: e.client_message() }, session_fatal).await;
                    *utterance = None;
                    *recording_deadline = None;
                }
            }
        }
        Phase::Recording | Phase::Grace => {
            if let Some(handle) = stt_handle.as_ref() {
                let _ = handle.send_audio(&data).await;
            }
            if let Some(u) = utterance.as_mut() {
                u.touch_audio();
            }
        }
        _ => {
            // Past the point of accepting more audio for this utterance.
        }
    }
}

async fn handle_stop(
    phase: &mut Phase,
    state: &Arc<AppState>,
    out_tx: &mpsc::Sender<WsMessage>,
    post_stop_deadline: &mut Option<Instant>,
    hard_ceiling_deadline: &mut Option<Instant>,
    session_fatal: &CancellationToken,
) {
    match *phase {
        Phase::Idle => {
            send_server(out_tx, ServerMessage::Error { ordinal: None, message: "TranslationRefused" }, session_fatal).await;
        }
        Phase::Recording => {
            *phase = Phase::Grace;
            let now = Instant::now();
            *post_stop_deadline = Some(now + Duration::from_millis(state.config.trailing_window_ms));
            *hard_ceiling_deadline = Some(now + Duration::from_millis(state.config.hard_ceiling_ms));
        }
        // A second `stop` while already finalizing an utterance is ignored.
        _ => {}
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_transcript_event(
    event: TranscriptEvent,
    phase: &mut Phase,
    utterance: &mut Option<Utterance>,
    stt_handle: &mut Option<Box<dyn SttHandle>>,
    ctrl_rx: &mut Option<mpsc::Receiver<Control>>,
    cancel: &mut CancellationToken,
    ordinal: u64,
    direction: Direction,
    state: &Arc<AppState>,
    out_tx: &mpsc::Sender<WsMessage>,
    recording_deadline: &mut Option<Instant>,
    post_stop_deadline: &mut Option<Instant>,
    hard_ceiling_deadline: &mut Option<Instant>,
    session_fatal: &CancellationToken,
) {
    match event {
        TranscriptEvent::Interim { text } => {
            send_server(out_tx, ServerMessage::TranscriptionUpdate { ordinal, text, is_final: false }, session_fatal).await;
        }
        TranscriptEvent::Final { text, .. } => {
            if let Some(u) = utterance.as_mut() {
                u.append_final(&text);
                let growing = u.transcript.clone();
                send_server(out_tx, ServerMessage::TranscriptionUpdate { ordinal, text: growing, is_final: true }, session_fatal).await;
            }
        }
        TranscriptEvent::UtteranceEnd { .. } => {}
        TranscriptEvent::Error(GatewayError::IdleTimeout) => {
            // The STT stream closed itself on silence before the client
            // ever sent `stop`. Whatever transcript exists so far is all
            // we'll get; finish the utterance with it rather than hanging
            // the session on a stream that's already gone.
            if matches!(*phase, Phase::Recording | Phase::Grace) {
                *recording_deadline = None;
                *post_stop_deadline = None;
                if hard_ceiling_deadline.is_none() {
                    *hard_ceiling_deadline = Some(Instant::now() + Duration::from_millis(state.config.hard_ceiling_ms));
                }
                finish_recording(phase, utterance, stt_handle, ctrl_rx, cancel, ordinal, direction, state, out_tx, session_fatal).await;
            }
        }
        TranscriptEvent::Error(e) => {
            warn!(error = %e, "stt stream error");
        }
        TranscriptEvent::Closed => {
            if *phase == Phase::AwaitingSttClose {
                finish_recording(phase, utterance, stt_handle, ctrl_rx, cancel, ordinal, direction, state, out_tx, session_fatal).await;
            }
        }
    }
}

/// Ends the recording/grace stage of an utterance once the STT stream is
/// known to be done (whether by a normal close after `Finalize` or an
/// early `IdleTimeout`): either moves on to translation with whatever
/// transcript was collected, or refuses an empty one.
#[allow(clippy::too_many_arguments)]
async fn finish_recording(
    phase: &mut Phase,
    utterance: &mut Option<Utterance>,
    stt_handle: &mut Option<Box<dyn SttHandle>>,
    ctrl_rx: &mut Option<mpsc::Receiver<Control>>,
    cancel: &mut CancellationToken,
    ordinal: u64,
    direction: Direction,
    state: &Arc<AppState>,
    out_tx: &mpsc::Sender<WsMessage>,
    session_fatal: &CancellationToken,
) {
    *stt_handle = None;
    let transcript = utterance.as_ref().map(|u| u.transcript.clone()).unwrap_or_default();

    if transcript.trim().is_empty() {
        send_server(out_tx, ServerMessage::Error { ordinal: Some(ordinal), message: "TranslationRefused" }, session_fatal).await;
        if let Some(u) = utterance.as_mut() {
            u.transition(UtteranceState::Failed);
        }
        *phase = Phase::Idle;
        *utterance = None;
        return;
    }

    if let Some(u) = utterance.as_mut() {
        u.transition(UtteranceState::Translating);
    }
    *phase = Phase::Translating;
    *cancel = CancellationToken::new();
    *ctrl_rx = Some(spawn_translation_task(transcript, direction, state.clone(), cancel.clone()));
}

fn spawn_translation_task(
    text: String,
    direction: Direction,
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> mpsc::Receiver<Control> {
    let (tx, rx) = mpsc::channel(4);

    tokio::spawn(async move {
        let translated = tokio::select! {
            _ = cancel.cancelled() => return,
            r = state.translator.translate(&text, direction) => r,
        };

        let translated = match translated {
            Ok(t) => t,
            Err(e) => {
                let _ = tx.send(Control::Failed(e)).await;
                return;
            }
        };

        let _ = tx
            .send(Control::Translated { original: text.clone(), translated: translated.clone() })
            .await;

        let synthesized = tokio::select! {
            _ = cancel.cancelled() => return,
            r = state.tts.synthesize(&translated, direction) => r,
        };

        match synthesized {
            Ok(audio) => {
                let _ = tx.send(Control::Synthesized { audio }).await;
            }
            Err(e) => {
                let _ = tx.send(Control::Failed(e)).await;
            }
        }
    });

    rx
}

async fn handle_control(
    control: Control,
    phase: &mut Phase,
    utterance: &mut Option<Utterance>,
    ordinal: u64,
    out_tx: &mpsc::Sender<WsMessage>,
    last_upstream_failure: &mut Option<Instant>,
    session_fatal: &CancellationToken,
) -> bool {
    match control {
        Control::Translated { original, translated } => {
            *phase = Phase::Synthesizing;
            if let Some(u) = utterance.as_mut() {
                u.transition(UtteranceState::Synthesizing);
            }
            send_server(out_tx, ServerMessage::Translation { ordinal, original, translation: translated }, session_fatal).await;
            false
        }
        Control::Synthesized { audio } => {
            send_ws(out_tx, WsMessage::Binary(audio.bytes), session_fatal).await;
            if let Some(u) = utterance.as_mut() {
                u.transition(UtteranceState::Delivered);
            }
            *phase = Phase::Idle;
            *utterance = None;
            true
        }
        Control::Failed(e) => {
            if note_upstream_failure(last_upstream_failure, &e) {
                session_fatal.cancel();
            }
            send_server(out_tx, ServerMessage::Error { ordinal: Some(ordinal), message: e.client_message() }, session_fatal).await;
            if let Some(u) = utterance.as_mut() {
                u.transition(UtteranceState::Failed);
            }
            *phase = Phase::Idle;
            *utterance = None;
            true
        }
    }
}

/// Aborts the in-flight utterance with `Timeout`, tearing down whatever of
/// the STT/translate/synthesize pipeline is still running. Shared by both
/// the hard-ceiling deadline and (indirectly) anything else that needs to
/// bail out of an utterance mid-flight.
async fn abort_utterance_with_timeout(
    phase: &mut Phase,
    ordinal: &u64,
    stt_handle: &mut Option<Box<dyn SttHandle>>,
    cancel: &mut CancellationToken,
    out_tx: &mpsc::Sender<WsMessage>,
    post_stop_deadline: &mut Option<Instant>,
    hard_ceiling_deadline: &mut Option<Instant>,
    session_fatal: &CancellationToken,
) {
    cancel.cancel();
    if let Some(handle) = stt_handle.take() {
        let _ = handle.close().await;
    }
    send_server(out_tx, ServerMessage::Error { ordinal: Some(*ordinal), message: "Timeout" }, session_fatal).await;
    *phase = Phase::Idle;
    *post_stop_deadline = None;
    *hard_ceiling_deadline = None;
}

#[allow(clippy::too_many_arguments)]
async fn handle_deadline(
    kind: DeadlineKind,
    phase: &mut Phase,
    ordinal: &u64,
    stt_handle: &mut Option<Box<dyn SttHandle>>,
    cancel: &mut CancellationToken,
    state: &Arc<AppState>,
    out_tx: &mpsc::Sender<WsMessage>,
    recording_deadline: &mut Option<Instant>,
    post_stop_deadline: &mut Option<Instant>,
    hard_ceiling_deadline: &mut Option<Instant>,
    session_fatal: &CancellationToken,
) -> bool {
    match (kind, *phase) {
        // The audio cap fired mid-recording: force the same path a
        // client-sent `stop` would take, starting both the trailing
        // window and the hard ceiling.
        (DeadlineKind::Recording, Phase::Recording) => {
            let now = Instant::now();
            *recording_deadline = None;
            *phase = Phase::Grace;
            *post_stop_deadline = Some(now + Duration::from_millis(state.config.trailing_window_ms));
            *hard_ceiling_deadline = Some(now + Duration::from_millis(state.config.hard_ceiling_ms));
            false
        }
        (DeadlineKind::TrailingWindow, Phase::Grace) => {
            *post_stop_deadline = None;
            if let Some(handle) = stt_handle.as_ref() {
                let _ = handle.finalize().await;
                let _ = handle.close().await;
            }
            *phase = Phase::AwaitingSttClose;
            false
        }
        // The hard ceiling covers the whole post-stop pipeline (finalize,
        // translate, synthesize) regardless of which of those sub-phases
        // is currently running.
        (DeadlineKind::HardCeiling, Phase::Grace | Phase::AwaitingSttClose | Phase::Translating | Phase::Synthesizing) => {
            abort_utterance_with_timeout(phase, ordinal, stt_handle, cancel, out_tx, post_stop_deadline, hard_ceiling_deadline, session_fatal).await;
            true
        }
        // A deadline fired for a phase it no longer applies to (e.g. the
        // trailing window elapsed just as the hard ceiling also fired and
        // already advanced the phase); nothing to do.
        _ => false,
    }
}
