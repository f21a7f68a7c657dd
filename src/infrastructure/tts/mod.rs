mod http;

pub use http::HttpTtsClient;
