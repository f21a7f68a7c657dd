use serde::{Deserialize, Serialize};

/// The two supported language directions. A Conversation Session picks
/// one per connection from its `mode` query param; a Broadcast Session
/// has no per-connection mode tag, so it uses a single fixed direction
/// for the whole publisher stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    CnToEn,
    EnToCn,
}

impl Direction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "cn-en" | "cn_en" | "cn-to-en" => Some(Direction::CnToEn),
            "en-cn" | "en_cn" | "en-to-cn" => Some(Direction::EnToCn),
            _ => None,
        }
    }

    /// BCP-47 language tag to request from the STT service.
    pub fn source_language(&self) -> &'static str {
        match self {
            Direction::CnToEn => "zh",
            Direction::EnToCn => "en",
        }
    }

    /// Human-readable target language name, used in the translator prompt.
    pub fn target_language_name(&self) -> &'static str {
        match self {
            Direction::CnToEn => "English",
            Direction::EnToCn => "Chinese",
        }
    }

    /// Voice identifier requested from the TTS service for this direction's
    /// target language.
    pub fn tts_voice(&self) -> &'static str {
        match self {
            Direction::CnToEn => "alloy",
            Direction::EnToCn => "nova",
        }
    }
}

/// Result of translating one finalized utterance.
#[derive(Debug, Clone)]
pub struct TranslationResult {
    pub original: String,
    pub translated: String,
    pub direction: Direction,
}
