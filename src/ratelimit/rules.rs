//! Rate limit rules and the action-type registry.
//!
//! Each action type maps to an immutable [`RateLimitConfig`]. The registry
//! is built once at startup, optionally merged with a YAML override file,
//! and then shared read-only. Unknown action types resolve to the `general`
//! entry instead of failing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{GatekeeperError, Result};

/// Action type for login attempts.
pub const LOGIN: &str = "login";
/// Action type for password reset requests.
pub const PASSWORD_RESET: &str = "passwordReset";
/// Action type for one-time-password verification.
pub const OTP_VERIFY: &str = "otpVerify";
/// Action type for administrative API calls.
pub const ADMIN_API: &str = "adminApi";
/// Fallback action type for anything not otherwise configured.
pub const GENERAL: &str = "general";

/// Thresholds for a single action type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Failed attempts that trigger a block
    pub max_attempts: u64,
    /// Idle time after which the failure counter resets
    pub window_seconds: u64,
    /// How long a block lasts once triggered
    pub block_duration_seconds: u64,
}

impl RateLimitConfig {
    pub const fn new(max_attempts: u64, window_seconds: u64, block_duration_seconds: u64) -> Self {
        Self {
            max_attempts,
            window_seconds,
            block_duration_seconds,
        }
    }

    fn validate(&self, action: &str) -> Result<()> {
        if self.max_attempts == 0 || self.window_seconds == 0 || self.block_duration_seconds == 0 {
            return Err(GatekeeperError::Config(format!(
                "rate limit for '{}' must have non-zero maxAttempts, windowSeconds and blockDurationSeconds",
                action
            )));
        }
        Ok(())
    }
}

/// The built-in table. This is an external contract; callers rely on it.
const DEFAULT_RULES: &[(&str, RateLimitConfig)] = &[
    (LOGIN, RateLimitConfig::new(5, 300, 900)),
    (PASSWORD_RESET, RateLimitConfig::new(3, 3600, 3600)),
    (OTP_VERIFY, RateLimitConfig::new(5, 300, 1800)),
    (ADMIN_API, RateLimitConfig::new(100, 60, 300)),
];

const DEFAULT_GENERAL: RateLimitConfig = RateLimitConfig::new(1000, 60, 60);

/// Override file layout.
#[derive(Debug, Clone, Default, Deserialize)]
struct RulesFile {
    #[serde(default)]
    actions: HashMap<String, RateLimitConfig>,
    #[serde(default)]
    general: Option<RateLimitConfig>,
}

/// Immutable mapping from action type to thresholds.
#[derive(Debug, Clone)]
pub struct ConfigRegistry {
    actions: HashMap<String, RateLimitConfig>,
    general: RateLimitConfig,
}

impl Default for ConfigRegistry {
    fn default() -> Self {
        Self {
            actions: DEFAULT_RULES
                .iter()
                .map(|(name, config)| (name.to_string(), *config))
                .collect(),
            general: DEFAULT_GENERAL,
        }
    }
}

impl ConfigRegistry {
    /// Load overrides from a YAML file, merged over the built-in table.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse overrides from a YAML string, merged over the built-in table.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: RulesFile = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse rate limit rules: {}", e)))?;

        let mut registry = Self::default();

        if let Some(general) = file.general {
            general.validate(GENERAL)?;
            registry.general = general;
        }

        for (action, config) in file.actions {
            config.validate(&action)?;
            if action == GENERAL {
                registry.general = config;
            } else {
                registry.actions.insert(action, config);
            }
        }

        Ok(registry)
    }

    /// Thresholds for an action type, or the `general` entry if unknown.
    pub fn get_config(&self, action_type: &str) -> RateLimitConfig {
        self.actions
            .get(action_type)
            .copied()
            .unwrap_or(self.general)
    }

    /// Whether the action type has its own entry. `general` always does.
    pub fn is_known(&self, action_type: &str) -> bool {
        action_type == GENERAL || self.actions.contains_key(action_type)
    }

    /// Configured action types, sorted by name.
    pub fn action_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let registry = ConfigRegistry::default();

        assert_eq!(registry.get_config(LOGIN), RateLimitConfig::new(5, 300, 900));
        assert_eq!(registry.get_config(PASSWORD_RESET), RateLimitConfig::new(3, 3600, 3600));
        assert_eq!(registry.get_config(OTP_VERIFY), RateLimitConfig::new(5, 300, 1800));
        assert_eq!(registry.get_config(ADMIN_API), RateLimitConfig::new(100, 60, 300));
        assert_eq!(registry.get_config(GENERAL), RateLimitConfig::new(1000, 60, 60));
    }

    #[test]
    fn test_unknown_action_uses_general() {
        let registry = ConfigRegistry::default();

        let config = registry.get_config("unknown");
        assert_eq!(config.max_attempts, 1000);
        assert_eq!(config.window_seconds, 60);
        assert_eq!(config.block_duration_seconds, 60);
        assert!(!registry.is_known("unknown"));
        assert!(registry.is_known(GENERAL));
        assert!(registry.is_known(LOGIN));
    }

    #[test]
    fn test_action_types_are_case_sensitive() {
        let registry = ConfigRegistry::default();
        assert_eq!(registry.get_config("Login"), DEFAULT_GENERAL);
    }

    #[test]
    fn test_yaml_overrides_merge_over_defaults() {
        let yaml = r#"
actions:
  login:
    maxAttempts: 10
    windowSeconds: 600
    blockDurationSeconds: 1200
  signup:
    maxAttempts: 2
    windowSeconds: 30
    blockDurationSeconds: 45
"#;
        let registry = ConfigRegistry::from_yaml(yaml).unwrap();

        assert_eq!(registry.get_config(LOGIN), RateLimitConfig::new(10, 600, 1200));
        assert_eq!(registry.get_config("signup"), RateLimitConfig::new(2, 30, 45));
        // Untouched entries keep their defaults
        assert_eq!(registry.get_config(OTP_VERIFY), RateLimitConfig::new(5, 300, 1800));
        assert_eq!(
            registry.action_types(),
            vec![ADMIN_API, LOGIN, OTP_VERIFY, PASSWORD_RESET, "signup"]
        );
    }

    #[test]
    fn test_yaml_general_override() {
        let yaml = r#"
general:
  maxAttempts: 50
  windowSeconds: 10
  blockDurationSeconds: 20
"#;
        let registry = ConfigRegistry::from_yaml(yaml).unwrap();
        assert_eq!(registry.get_config("anything"), RateLimitConfig::new(50, 10, 20));
    }

    #[test]
    fn test_zero_values_rejected() {
        let yaml = r#"
actions:
  login:
    maxAttempts: 0
    windowSeconds: 300
    blockDurationSeconds: 900
"#;
        let err = ConfigRegistry::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, GatekeeperError::Config(_)));
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        let err = ConfigRegistry::from_yaml("actions: [1, 2").unwrap_err();
        assert!(matches!(err, GatekeeperError::Config(_)));
    }

    #[test]
    fn test_config_serializes_camel_case() {
        let json = serde_json::to_value(RateLimitConfig::new(5, 300, 900)).unwrap();
        assert_eq!(json["maxAttempts"], 5);
        assert_eq!(json["windowSeconds"], 300);
        assert_eq!(json["blockDurationSeconds"], 900);
    }
}
