//! Request-body normalization for the upstream gateway dialect.
//!
//! [`normalize`] canonicalizes model ids, folds parameter spellings onto the
//! upstream's shape and translates reasoning intent per provider.

mod normalize;
mod reasoning;

pub use normalize::normalize;
pub use reasoning::{ReasoningEffort, ReasoningIntent, compute_budget, parse_intent, translate};
