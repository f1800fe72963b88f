//! HTTP surface: health, model catalog, admin endpoints and the catch-all
//! proxy dispatch, with proxy-key auth and permissive CORS.

mod admin;
mod proxy;

pub use proxy::{RouterState, router};

#[cfg(test)]
mod tests;
