use std::time::Instant;
use uuid::Uuid;

use super::translation::Direction;

/// Identifies one Conversation or Broadcast Session for logging and the
/// subscriber registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which role a websocket connection plays on the Gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// `/ws/conversation?mode=<direction>` — one client, full pipeline.
    Conversation(Direction),
    /// `/ws/publisher` — a single audio source, no translation.
    Publisher,
    /// `/ws/browser` — a read-only subscriber of a Broadcast Session.
    Browser,
}

/// Lifecycle of a single utterance inside a Conversation Session.
///
/// Transitions only move forward; there is no path back to an earlier
/// state for the same ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceState {
    Recording,
    Finalizing,
    Translating,
    Synthesizing,
    Delivered,
    Failed,
}

/// One user turn inside a Conversation Session: from first audio frame to
/// delivered (or failed) synthesized reply.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub ordinal: u64,
    pub state: UtteranceState,
    pub transcript: String,
    pub started_at: Instant,
    pub last_audio_at: Instant,
}

impl Utterance {
    pub fn new(ordinal: u64) -> Self {
        let now = Instant::now();
        Self {
            ordinal,
            state: UtteranceState::Recording,
            transcript: String::new(),
            started_at: now,
            last_audio_at: now,
        }
    }

    pub fn transition(&mut self, next: UtteranceState) {
        self.state = next;
    }

    pub fn touch_audio(&mut self) {
        self.last_audio_at = Instant::now();
    }

    pub fn append_final(&mut self, text: &str) {
        if !self.transcript.is_empty() && !text.is_empty() {
            self.transcript.push(' ');
        }
        self.transcript.push_str(text);
    }
}
