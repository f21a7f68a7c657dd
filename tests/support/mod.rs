use std::collections::VecDeque;

use async_trait::async_trait;
use gateway_lib::domain::ports::{SttHandle, SttOptions, SttProvider, SttSession};
use gateway_lib::domain::transcript::TranscriptEvent;
use gateway_lib::error::{GatewayError, GatewayResult};
use tokio::sync::{mpsc, Mutex};

/// In-process stand-in for the streaming STT adapter. Every `send_audio`
/// call is counted; `finalize`/`close` immediately push a scripted
/// sequence of events (set at construction) onto the event channel so
/// tests don't need a real websocket upstream.
pub struct FakeSttProvider {
    pub script: Vec<TranscriptEvent>,
}

#[async_trait]
impl SttProvider for FakeSttProvider {
    async fn open(&self, _options: SttOptions) -> GatewayResult<SttSession> {
        let (tx, rx) = mpsc::channel(32);
        Ok(SttSession {
            handle: Box::new(FakeSttHandle { events: tx, script: self.script.clone() }),
            events: rx,
        })
    }
}

struct FakeSttHandle {
    events: mpsc::Sender<TranscriptEvent>,
    script: Vec<TranscriptEvent>,
}

#[async_trait]
impl SttHandle for FakeSttHandle {
    async fn send_audio(&self, _frame: &[u8]) -> GatewayResult<()> {
        Ok(())
    }

    async fn finalize(&self) -> GatewayResult<()> {
        for event in &self.script {
            let _ = self.events.send(event.clone()).await;
        }
        Ok(())
    }

    async fn close(&self) -> GatewayResult<()> {
        let _ = self.events.send(TranscriptEvent::Closed).await;
        Ok(())
    }
}

/// Stand-in for a continuously-streaming upstream (the Broadcast Session's
/// shape): the scripted events are pushed as soon as the stream opens,
/// with no explicit `finalize()` call to trigger them, since a live STT
/// stream emits `UtteranceEnd` on its own schedule rather than on request.
pub struct FakeLiveSttProvider {
    pub script: Vec<TranscriptEvent>,
}

#[async_trait]
impl SttProvider for FakeLiveSttProvider {
    async fn open(&self, _options: SttOptions) -> GatewayResult<SttSession> {
        let (tx, rx) = mpsc::channel(32);
        let script = self.script.clone();
        tokio::spawn(async move {
            for event in script {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        Ok(SttSession { handle: Box::new(FakeLiveSttHandle), events: rx })
    }
}

struct FakeLiveSttHandle;

#[async_trait]
impl SttHandle for FakeLiveSttHandle {
    async fn send_audio(&self, _frame: &[u8]) -> GatewayResult<()> {
        Ok(())
    }

    async fn finalize(&self) -> GatewayResult<()> {
        Ok(())
    }

    async fn close(&self) -> GatewayResult<()> {
        Ok(())
    }
}

/// Stand-in for an upstream that times out on silence mid-recording,
/// before the client ever sends `stop`: pushes whatever transcript events
/// are scripted, then an `IdleTimeout` error followed by `Closed`, all
/// without waiting for `finalize()`.
pub struct FakeIdleTimeoutSttProvider {
    pub script: Vec<TranscriptEvent>,
}

#[async_trait]
impl SttProvider for FakeIdleTimeoutSttProvider {
    async fn open(&self, _options: SttOptions) -> GatewayResult<SttSession> {
        let (tx, rx) = mpsc::channel(32);
        let script = self.script.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            for event in script {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(TranscriptEvent::Error(GatewayError::IdleTimeout)).await;
            let _ = tx.send(TranscriptEvent::Closed).await;
        });
        Ok(SttSession { handle: Box::new(FakeLiveSttHandle), events: rx })
    }
}

/// Stand-in for a publisher's upstream across a reconnect: each call to
/// `open()` pops the next scripted batch off the queue and streams it
/// immediately, same shape as `FakeLiveSttProvider` but one script per
/// connection attempt instead of one for the whole test.
pub struct FakeReconnectingSttProvider {
    pub scripts: Mutex<VecDeque<Vec<TranscriptEvent>>>,
}

impl FakeReconnectingSttProvider {
    pub fn new(scripts: Vec<Vec<TranscriptEvent>>) -> Self {
        Self { scripts: Mutex::new(scripts.into()) }
    }
}

#[async_trait]
impl SttProvider for FakeReconnectingSttProvider {
    async fn open(&self, _options: SttOptions) -> GatewayResult<SttSession> {
        let script = self.scripts.lock().await.pop_front().unwrap_or_default();
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for event in script {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        Ok(SttSession { handle: Box::new(FakeLiveSttHandle), events: rx })
    }
}
