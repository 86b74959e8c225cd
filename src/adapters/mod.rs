// Adapters layer: concrete implementations of the domain ports.

pub mod command;
pub mod http;
pub mod storage;

pub use command::HostRunner;
pub use http::HttpKeyFetcher;
pub use storage::LocalStorage;
