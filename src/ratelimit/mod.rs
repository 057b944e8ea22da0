//! Throttling decisions and action-type rules.

mod keys;
mod limiter;
pub mod rules;

pub use keys::RateLimitKey;
pub use limiter::{RateLimitResult, RateLimiter};
pub use rules::{ConfigRegistry, RateLimitConfig};
