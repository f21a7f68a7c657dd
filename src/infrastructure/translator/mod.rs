mod http;

pub use http::HttpTranslatorClient;
