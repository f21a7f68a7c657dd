/// Domain layer - business entities, value types, and port interfaces.
/// Independent of transport, storage, and upstream wire formats.
pub mod audio;
pub mod ports;
pub mod session;
pub mod transcript;
pub mod translation;

pub use audio::AudioFrame;
pub use ports::{AudioContainer, SttHandle, SttOptions, SttProvider, SttSession, SynthesizedAudio, TranslatorClient, TtsClient};
pub use session::{SessionId, SessionMode, Utterance, UtteranceState};
pub use transcript::TranscriptEvent;
pub use translation::{Direction, TranslationResult};
