// src/ingest/providers/mod.rs
pub mod fixture;
pub mod http;

pub use fixture::StaticFeedProvider;
pub use http::HttpFeedProvider;
