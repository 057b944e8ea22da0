//! Configuration management for Gatekeeper.
//!
//! Settings are layered: an optional settings file, then environment
//! variables prefixed with `GATEKEEPER` (nested with `__`, for example
//! `GATEKEEPER__REMOTE__HOST`), then the plain `REDIS_*` variables commonly
//! set by deployment tooling. Without a remote host the service runs on the
//! process-local store.

use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::Result;

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Deserialize)]
pub struct GatekeeperConfig {
    /// Logging level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Path to a YAML file overriding the built-in action types
    #[serde(default)]
    pub rules_path: Option<String>,

    /// Shared counter store settings; absent means local-only operation
    #[serde(skip)]
    pub remote: Option<RemoteConfig>,

    /// Why a present `remote` table was rejected
    #[serde(skip)]
    remote_error: Option<String>,

    /// Process-local store settings
    #[serde(default)]
    pub local: LocalConfig,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            rules_path: None,
            remote: None,
            remote_error: None,
            local: LocalConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Connection settings for the shared counter store.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Hostname or IP address; empty means not configured
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Logical database index
    #[serde(default)]
    pub db: i64,

    /// Connection attempts before the store is marked unhealthy
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Backoff growth per attempt in milliseconds
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,

    /// Upper bound on the backoff between attempts in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Interval between health probes in seconds
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Speak RESP3 and subscribe to connection push events, so a dropped
    /// connection is noticed without waiting for the next probe. Needs a
    /// server that supports `HELLO 3`.
    #[serde(default = "default_push_events")]
    pub push_events: bool,
}

impl RemoteConfig {
    /// Create settings for a host with every other field defaulted.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            db: 0,
            connect_attempts: default_connect_attempts(),
            backoff_step_ms: default_backoff_step_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            probe_interval_secs: default_probe_interval_secs(),
            push_events: default_push_events(),
        }
    }

    /// Delay before the given retry (1-based), growing linearly up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let step = self.backoff_step_ms.saturating_mul(u64::from(attempt));
        Duration::from_millis(step.min(self.max_backoff_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

/// Process-local store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    /// Seconds between sweeps of expired entries; 0 disables the sweeper
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl LocalConfig {
    /// The sweep interval, or `None` when sweeping is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_backoff_step_ms() -> u64 {
    50
}

fn default_max_backoff_ms() -> u64 {
    2000
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_response_timeout_ms() -> u64 {
    500
}

fn default_probe_interval_secs() -> u64 {
    30
}

fn default_push_events() -> bool {
    true
}

fn default_sweep_interval_secs() -> u64 {
    60
}

/// Plain environment variables mapped onto remote settings keys.
const REDIS_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("REDIS_HOST", "remote.host"),
    ("REDIS_PORT", "remote.port"),
    ("REDIS_USERNAME", "remote.username"),
    ("REDIS_PASSWORD", "remote.password"),
    ("REDIS_DB", "remote.db"),
];

impl GatekeeperConfig {
    /// Load configuration from the environment only.
    pub fn from_env() -> Result<Self> {
        Self::load(None::<&Path>)
    }

    /// Load configuration from an optional settings file layered under the
    /// environment.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            let path = path.as_ref();
            info!(path = %path.display(), "Loading settings file");
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("GATEKEEPER")
                .prefix_separator("__")
                .separator("__"),
        );

        for (var, key) in REDIS_ENV_OVERRIDES {
            let value = env::var(var).ok().filter(|v| !v.is_empty());
            builder = builder.set_override_option(*key, value)?;
        }

        Self::from_settings(builder.build()?)
    }

    /// Deserialize built settings.
    ///
    /// The `remote` table is read on its own: if it is malformed it is
    /// dropped and the error kept for [`GatekeeperConfig::remote_error`], so
    /// bad connection parameters never stop startup.
    fn from_settings(settings: config::Config) -> Result<Self> {
        let remote = settings.get::<RemoteConfig>("remote");
        let mut config: GatekeeperConfig = settings.try_deserialize()?;

        match remote {
            Ok(remote) => config.remote = Some(remote),
            Err(config::ConfigError::NotFound(_)) => {}
            Err(e) => config.remote_error = Some(e.to_string()),
        }
        Ok(config)
    }

    /// Remote settings, if a host is actually configured.
    pub fn remote_settings(&self) -> Option<&RemoteConfig> {
        self.remote.as_ref().filter(|r| !r.host.trim().is_empty())
    }

    /// The reason remote settings were discarded, if they were.
    pub fn remote_error(&self) -> Option<&str> {
        self.remote_error.as_deref()
    }

    /// Parse configuration from a YAML string, without environment layering.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?;
        Self::from_settings(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests touching the process environment run one at a time.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const MANAGED_VARS: &[&str] = &[
        "REDIS_HOST",
        "REDIS_PORT",
        "REDIS_USERNAME",
        "REDIS_PASSWORD",
        "REDIS_DB",
        "GATEKEEPER__LOG_LEVEL",
        "GATEKEEPER__REMOTE__HOST",
        "GATEKEEPER__REMOTE__PORT",
    ];

    fn with_env<T>(vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        for var in MANAGED_VARS {
            env::remove_var(var);
        }
        for (var, value) in vars {
            env::set_var(var, value);
        }
        let result = f();
        for var in MANAGED_VARS {
            env::remove_var(var);
        }
        result
    }

    #[test]
    fn test_defaults_run_local_only() {
        let config = GatekeeperConfig::default();
        assert!(config.remote.is_none());
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.local.sweep_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_remote_defaults_from_yaml() {
        let yaml = r#"
remote:
  host: cache.internal
"#;
        let config = GatekeeperConfig::from_yaml(yaml).unwrap();
        let remote = config.remote.unwrap();
        assert_eq!(remote.host, "cache.internal");
        assert_eq!(remote.port, 6379);
        assert_eq!(remote.connect_attempts, 3);
        assert_eq!(remote.probe_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_remote_without_host_is_ignored() {
        let yaml = r#"
remote:
  port: 6380
"#;
        let config = GatekeeperConfig::from_yaml(yaml).unwrap();
        assert!(config.remote.is_some());
        assert!(config.remote_settings().is_none());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut remote = RemoteConfig::new("localhost", 6379);
        assert_eq!(remote.backoff(1), Duration::from_millis(50));
        assert_eq!(remote.backoff(2), Duration::from_millis(100));

        remote.max_backoff_ms = 120;
        assert_eq!(remote.backoff(3), Duration::from_millis(120));
        assert_eq!(remote.backoff(50), Duration::from_millis(120));
    }

    #[test]
    fn test_sweeper_can_be_disabled() {
        let yaml = r#"
local:
  sweep_interval_secs: 0
log_format: json
"#;
        let config = GatekeeperConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.local.sweep_interval(), None);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_malformed_remote_yaml_is_dropped() {
        let yaml = r#"
log_level: debug
remote:
  host: cache.internal
  port: not-a-port
"#;
        let config = GatekeeperConfig::from_yaml(yaml).unwrap();
        assert!(config.remote_settings().is_none());
        assert!(config.remote_error().is_some());
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_env_without_remote_runs_local_only() {
        let config = with_env(&[], GatekeeperConfig::from_env).unwrap();
        assert!(config.remote.is_none());
        assert!(config.remote_error().is_none());
    }

    #[test]
    fn test_prefixed_env_maps_nested_keys() {
        let config = with_env(
            &[
                ("GATEKEEPER__REMOTE__HOST", "cache.internal"),
                ("GATEKEEPER__REMOTE__PORT", "6380"),
                ("GATEKEEPER__LOG_LEVEL", "debug"),
            ],
            GatekeeperConfig::from_env,
        )
        .unwrap();

        let remote = config.remote_settings().unwrap();
        assert_eq!(remote.host, "cache.internal");
        assert_eq!(remote.port, 6380);
        assert_eq!(remote.connect_attempts, 3);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_redis_env_overrides_prefixed_env() {
        let config = with_env(
            &[
                ("GATEKEEPER__REMOTE__HOST", "ignored.internal"),
                ("REDIS_HOST", "redis.internal"),
                ("REDIS_PORT", "6390"),
                ("REDIS_USERNAME", "svc"),
                ("REDIS_PASSWORD", "secret"),
                ("REDIS_DB", "2"),
            ],
            GatekeeperConfig::from_env,
        )
        .unwrap();

        let remote = config.remote_settings().unwrap();
        assert_eq!(remote.host, "redis.internal");
        assert_eq!(remote.port, 6390);
        assert_eq!(remote.username.as_deref(), Some("svc"));
        assert_eq!(remote.password.as_deref(), Some("secret"));
        assert_eq!(remote.db, 2);
    }

    #[test]
    fn test_empty_redis_host_is_ignored() {
        let config = with_env(&[("REDIS_HOST", "")], GatekeeperConfig::from_env).unwrap();
        assert!(config.remote.is_none());

        let config = with_env(
            &[("REDIS_HOST", ""), ("REDIS_PORT", "6380")],
            GatekeeperConfig::from_env,
        )
        .unwrap();
        assert_eq!(config.remote.as_ref().map(|r| r.port), Some(6380));
        assert!(config.remote_settings().is_none());
    }

    #[test]
    fn test_invalid_redis_port_falls_back_to_local() {
        let config = with_env(
            &[("REDIS_HOST", "127.0.0.1"), ("REDIS_PORT", "not-a-port")],
            GatekeeperConfig::from_env,
        )
        .unwrap();

        assert!(config.remote_settings().is_none());
        assert!(config.remote_error().is_some());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_settings_file_is_layered_under_env() {
        let path = env::temp_dir().join(format!("gatekeeper-settings-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "log_level: warn\nremote:\n  host: file.internal\n  port: 7000\nlocal:\n  sweep_interval_secs: 5\n",
        )
        .unwrap();

        let config = with_env(&[("GATEKEEPER__REMOTE__PORT", "7001")], || {
            GatekeeperConfig::load(Some(&path))
        });
        std::fs::remove_file(&path).unwrap();
        let config = config.unwrap();

        let remote = config.remote_settings().unwrap();
        assert_eq!(remote.host, "file.internal");
        assert_eq!(remote.port, 7001);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.local.sweep_interval(), Some(Duration::from_secs(5)));
    }
}
