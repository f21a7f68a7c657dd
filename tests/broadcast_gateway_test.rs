mod support;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use gateway_lib::application::broadcast_session::BroadcastFrame;
use gateway_lib::config::AppConfig;
use gateway_lib::domain::ports::{SttProvider, TranslatorClient, TtsClient};
use gateway_lib::domain::transcript::TranscriptEvent;
use gateway_lib::gateway::state::AppState;
use gateway_lib::infrastructure::translator::HttpTranslatorClient;
use gateway_lib::infrastructure::tts::HttpTtsClient;
use gateway_lib::infrastructure::{FanoutHub, OverflowPolicy};
use serde_json::{json, Value};
use serial_test::serial;
use support::{FakeLiveSttProvider, FakeReconnectingSttProvider};
use tokio_tungstenite::tungstenite::Message as ClientMessage;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn spawn_gateway(stt_script: Vec<TranscriptEvent>) -> (String, MockServer, MockServer) {
    let stt: Arc<dyn SttProvider> = Arc::new(FakeLiveSttProvider { script: stt_script });
    spawn_gateway_with_provider(stt).await
}

async fn spawn_gateway_with_provider(stt: Arc<dyn SttProvider>) -> (String, MockServer, MockServer) {
    let llm_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "ni hao"}}]
        })))
        .mount(&llm_server)
        .await;

    let tts_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/speech"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFFu8, 0xFB, 0x90, 0x00]))
        .mount(&tts_server)
        .await;

    std::env::set_var("STT_API_KEY", "unused");
    std::env::set_var("LLM_API_KEY", "unused");
    std::env::set_var("TTS_API_KEY", "unused");
    std::env::set_var("PORT", "0");

    let config = Arc::new(AppConfig::from_env().expect("config loads"));
    let translator: Arc<dyn TranslatorClient> = Arc::new(HttpTranslatorClient::new(
        reqwest::Client::new(),
        format!("{}/chat", llm_server.uri()),
        "key",
        "model",
        Duration::from_millis(config.llm_timeout_ms),
    ));
    let tts: Arc<dyn TtsClient> = Arc::new(HttpTtsClient::new(
        reqwest::Client::new(),
        format!("{}/speech", tts_server.uri()),
        "key",
        "model",
        Duration::from_millis(config.tts_timeout_ms),
    ));
    let broadcast = Arc::new(FanoutHub::<BroadcastFrame>::new(config.subscriber_queue_depth, OverflowPolicy::DropOldest));

    let state = Arc::new(AppState::new(config, stt, translator, tts, broadcast));
    let app = gateway_lib::gateway::routes::build(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{addr}"), llm_server, tts_server)
}

async fn recv_json(
    ws: &mut (impl futures_util::Stream<Item = Result<ClientMessage, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> Value {
    loop {
        match ws.next().await.expect("stream open").expect("no error") {
            ClientMessage::Text(text) => return serde_json::from_str(&text).expect("valid json"),
            _ => continue,
        }
    }
}

fn utterance_script() -> Vec<TranscriptEvent> {
    vec![
        TranscriptEvent::Final { text: "hello".to_string(), end_ms: 400 },
        TranscriptEvent::UtteranceEnd { end_ms: 1400 },
    ]
}

#[tokio::test]
#[serial]
async fn subscriber_receives_translation_and_synthesized_audio() {
    let (base_url, _llm, _tts) = spawn_gateway(utterance_script()).await;

    let (mut browser, _resp) = tokio_tungstenite::connect_async(format!("{base_url}/ws/browser")).await.expect("browser connects");
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (_publisher, _resp) = tokio_tungstenite::connect_async(format!("{base_url}/ws/publisher")).await.expect("publisher connects");

    let translation = recv_json(&mut browser).await;
    assert_eq!(translation["type"], "translation");
    assert_eq!(translation["original"], "hello");
    assert_eq!(translation["translation"], "ni hao");

    let audio = tokio::time::timeout(Duration::from_secs(5), browser.next())
        .await
        .expect("audio arrives before timeout")
        .expect("stream open")
        .expect("no error");
    assert_eq!(audio, ClientMessage::Binary(vec![0xFF, 0xFB, 0x90, 0x00]));
}

#[tokio::test]
#[serial]
async fn multiple_subscribers_all_receive_the_same_translation() {
    let (base_url, _llm, _tts) = spawn_gateway(utterance_script()).await;

    let (mut browser_a, _resp) = tokio_tungstenite::connect_async(format!("{base_url}/ws/browser")).await.expect("browser a connects");
    let (mut browser_b, _resp) = tokio_tungstenite::connect_async(format!("{base_url}/ws/browser")).await.expect("browser b connects");
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (_publisher, _resp) = tokio_tungstenite::connect_async(format!("{base_url}/ws/publisher")).await.expect("publisher connects");

    let a = recv_json(&mut browser_a).await;
    let b = recv_json(&mut browser_b).await;
    assert_eq!(a["translation"], "ni hao");
    assert_eq!(b["translation"], "ni hao");
}

#[tokio::test]
#[serial]
async fn subscriber_ping_is_answered_with_pong() {
    let (base_url, _llm, _tts) = spawn_gateway(vec![]).await;

    let (mut browser, _resp) = tokio_tungstenite::connect_async(format!("{base_url}/ws/browser")).await.expect("browser connects");
    browser.send(ClientMessage::Text(r#"{"type":"ping"}"#.to_string())).await.unwrap();

    let pong = recv_json(&mut browser).await;
    assert_eq!(pong["type"], "pong");
}

#[tokio::test]
#[serial]
async fn ordinal_keeps_increasing_across_an_stt_reconnect() {
    let first_batch = vec![
        TranscriptEvent::Final { text: "hello".to_string(), end_ms: 400 },
        TranscriptEvent::UtteranceEnd { end_ms: 1400 },
        TranscriptEvent::Closed,
    ];
    let second_batch = utterance_script();
    let stt: Arc<dyn SttProvider> = Arc::new(FakeReconnectingSttProvider::new(vec![first_batch, second_batch]));
    let (base_url, _llm, _tts) = spawn_gateway_with_provider(stt).await;

    let (mut browser, _resp) = tokio_tungstenite::connect_async(format!("{base_url}/ws/browser")).await.expect("browser connects");
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (_publisher, _resp) = tokio_tungstenite::connect_async(format!("{base_url}/ws/publisher")).await.expect("publisher connects");

    let first = recv_json(&mut browser).await;
    assert_eq!(first["type"], "translation");
    assert_eq!(first["ordinal"], 1);

    // The publisher's STT stream reconnects on a 1s-to-30s doubling
    // backoff; the first retry lands around 1s out.
    let second = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let msg = recv_json(&mut browser).await;
            if msg["type"] == "translation" {
                return msg;
            }
        }
    })
    .await
    .expect("second translation arrives before timeout");
    assert_eq!(second["ordinal"], 2);
}
