use serde::{Deserialize, Serialize};

/// Text control messages a browser client sends over `/ws/conversation`.
/// Binary frames on the same socket are raw PCM audio and are not part of
/// this enum.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Stop,
}

/// Text messages the gateway sends back to a conversation client. The
/// synthesized speech itself never travels in one of these: it goes out as
/// a raw binary frame on the same socket, right after `Translation`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    TranscriptionUpdate {
        ordinal: u64,
        text: String,
        is_final: bool,
    },
    Translation {
        ordinal: u64,
        original: String,
        translation: String,
    },
    Error {
        ordinal: Option<u64>,
        message: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_message_parses_from_json() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"stop"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Stop));
    }

    #[test]
    fn translation_message_uses_the_external_field_name() {
        let msg = ServerMessage::Translation {
            ordinal: 1,
            original: "你好".to_string(),
            translation: "hello".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"translation\""));
        assert!(json.contains("\"translation\":\"hello\""));
    }

    #[test]
    fn error_message_serializes_ordinal_as_null_when_absent() {
        let msg = ServerMessage::Error { ordinal: None, message: "TranslationRefused" };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"ordinal\":null"));
    }
}
