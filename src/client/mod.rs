pub mod http;
pub mod realtime;

pub use http::DataApiClient;
pub use realtime::RealtimeClient;
