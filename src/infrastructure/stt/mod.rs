/// Streaming STT adapter implementations.
mod deepgram;

pub use deepgram::DeepgramSttProvider;
