//! Proxy engine, upstream HTTP client and process bootstrap.

pub mod bootstrap;
pub mod engine;
pub mod lifecycle;
pub mod models_cache;
pub mod upstream_client;
