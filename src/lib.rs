//! Gatekeeper - Abuse Throttling Service
//!
//! This crate bounds the rate of sensitive operations (login, password
//! reset, OTP verification, admin API calls) per identifier. Counters live
//! in a shared Redis-compatible store when it is reachable and in
//! process-local memory when it is not, so callers are never blocked on a
//! dead backend.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use ratelimit::{ConfigRegistry, RateLimitConfig, RateLimitResult, RateLimiter};
