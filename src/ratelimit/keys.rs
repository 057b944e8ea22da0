//! Store key generation for counters and blocks.

/// Prefix for failure counter keys.
pub const COUNTER_PREFIX: &str = "rate_limit";
/// Prefix for block marker keys.
pub const BLOCK_PREFIX: &str = "rate_block";

/// The pair of store keys tracking one (action type, identifier).
///
/// The identifier is treated as an opaque string and embedded verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    counter: String,
    block: String,
}

impl RateLimitKey {
    pub fn new(action_type: &str, identifier: &str) -> Self {
        Self {
            counter: format!("{}:{}:{}", COUNTER_PREFIX, action_type, identifier),
            block: format!("{}:{}:{}", BLOCK_PREFIX, action_type, identifier),
        }
    }

    /// Key of the failure counter.
    pub fn counter(&self) -> &str {
        &self.counter
    }

    /// Key of the block marker.
    pub fn block(&self) -> &str {
        &self.block
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.counter)
    }
}
