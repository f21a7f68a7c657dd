use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::application::broadcast_session::BroadcastFrame;
use crate::config::AppConfig;
use crate::domain::ports::{SttProvider, TranslatorClient, TtsClient};
use crate::infrastructure::FanoutHub;

/// Shared state handed to every axum handler. Cheap to clone: everything
/// behind it is already `Arc`-wrapped or immutable.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub stt: Arc<dyn SttProvider>,
    pub translator: Arc<dyn TranslatorClient>,
    pub tts: Arc<dyn TtsClient>,
    pub broadcast: Arc<FanoutHub<BroadcastFrame>>,
    pub broadcast_control: Arc<BroadcastControl>,
    session_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        stt: Arc<dyn SttProvider>,
        translator: Arc<dyn TranslatorClient>,
        tts: Arc<dyn TtsClient>,
        broadcast: Arc<FanoutHub<BroadcastFrame>>,
    ) -> Self {
        Self {
            config,
            stt,
            translator,
            tts,
            broadcast,
            broadcast_control: Arc::new(BroadcastControl::new()),
            session_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Attempts to reserve one session slot. Returns a guard that frees
    /// the slot on drop, covering early returns and panics alike.
    pub fn try_acquire_session(&self) -> Option<SessionGuard> {
        loop {
            let current = self.session_count.load(Ordering::Acquire);
            if current >= self.config.max_sessions {
                return None;
            }
            if self
                .session_count
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(SessionGuard {
                    counter: self.session_count.clone(),
                });
            }
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.session_count.load(Ordering::Acquire)
    }
}

pub struct SessionGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Tracks the Broadcast Session's current in-flight translate/synthesize
/// pipeline, if any, so a subscriber's authoritative `stop` can cancel it.
pub struct BroadcastControl {
    inflight: Mutex<Option<CancellationToken>>,
}

impl BroadcastControl {
    pub fn new() -> Self {
        Self { inflight: Mutex::new(None) }
    }

    /// Registers a fresh token for a newly started utterance pipeline.
    pub async fn begin_utterance(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.inflight.lock().await = Some(token.clone());
        token
    }

    /// Clears the in-flight marker once a pipeline finishes on its own.
    pub async fn end_utterance(&self) {
        *self.inflight.lock().await = None;
    }

    /// Cancels whatever pipeline is currently in flight, if any.
    pub async fn trip(&self) {
        if let Some(token) = self.inflight.lock().await.take() {
            token.cancel();
        }
    }
}

impl Default for BroadcastControl {
    fn default() -> Self {
        Self::new()
    }
}
