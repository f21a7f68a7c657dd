/// Infrastructure layer - concrete adapters implementing domain ports.
/// Depends on the domain layer; independent of the application layer.
pub mod fanout;
pub mod stt;
pub mod translator;
pub mod tts;

pub use fanout::{FanoutHub, OverflowPolicy, SubscriberId, SubscriberReceiver};
pub use stt::DeepgramSttProvider;
pub use translator::HttpTranslatorClient;
pub use tts::HttpTtsClient;
