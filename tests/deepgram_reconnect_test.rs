use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use gateway_lib::domain::ports::{SttOptions, SttProvider};
use gateway_lib::domain::transcript::TranscriptEvent;
use gateway_lib::infrastructure::DeepgramSttProvider;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

fn options() -> SttOptions {
    SttOptions {
        language: "en".into(),
        model: "nova-2".into(),
        sample_rate: 16_000,
        interim_results: true,
        utterance_end_ms: 1000,
        endpointing_ms: 300,
        vad_events: true,
    }
}

/// A bare-bones stand-in for the Deepgram listen endpoint: accepts one
/// connection, sends a single `Results` frame, then closes it with the
/// given code/reason to exercise the client's terminal-on-close behavior.
async fn spawn_upstream_that_closes(code: CloseCode, reason: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream).await.expect("handshake");
        let frame = r#"{"type":"Results","is_final":true,"speech_final":true,"start":0.0,"duration":0.2,"channel":{"alternatives":[{"transcript":"hello"}]}}"#;
        let _ = ws.send(Message::Text(frame.to_string())).await;
        let _ = ws.close(Some(CloseFrame { code, reason: reason.into() })).await;
    });

    format!("ws://{addr}")
}

#[tokio::test]
async fn stream_is_terminal_on_silence_close_and_surfaces_idle_timeout() {
    let base_url = spawn_upstream_that_closes(CloseCode::Error, "NET-0001").await;
    let provider = DeepgramSttProvider::new(base_url, "unused-key");

    let mut session = provider.open(options()).await.expect("connect succeeds");

    let first = tokio::time::timeout(Duration::from_secs(5), session.events.recv())
        .await
        .expect("event arrives before timeout")
        .expect("channel stays open until close is drained");
    match first {
        TranscriptEvent::Final { text, .. } => assert_eq!(text, "hello"),
        other => panic!("unexpected first event: {other:?}"),
    }

    let second = tokio::time::timeout(Duration::from_secs(5), session.events.recv())
        .await
        .expect("error arrives before timeout")
        .expect("channel still open");
    assert!(matches!(second, TranscriptEvent::Error(gateway_lib::error::GatewayError::IdleTimeout)));

    let third = tokio::time::timeout(Duration::from_secs(5), session.events.recv())
        .await
        .expect("closed arrives before timeout")
        .expect("channel still open");
    assert!(matches!(third, TranscriptEvent::Closed));

    // No reconnect attempt follows: the channel simply ends.
    assert!(session.events.recv().await.is_none());

    // Idempotent: closing twice must not panic or error.
    session.handle.close().await.expect("first close");
    session.handle.close().await.expect("second close is a no-op");
}

#[tokio::test]
async fn stream_is_terminal_on_protocol_error_close() {
    let base_url = spawn_upstream_that_closes(CloseCode::Policy, "DATA-0000").await;
    let provider = DeepgramSttProvider::new(base_url, "unused-key");

    let mut session = provider.open(options()).await.expect("connect succeeds");
    let _ = tokio::time::timeout(Duration::from_secs(5), session.events.recv()).await; // the "hello" result

    let error = tokio::time::timeout(Duration::from_secs(5), session.events.recv())
        .await
        .expect("error arrives before timeout")
        .expect("channel still open");
    assert!(matches!(error, TranscriptEvent::Error(gateway_lib::error::GatewayError::UpstreamProtocol(_))));
}
