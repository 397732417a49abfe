//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Path of the Taskcluster Helm chart rendered for every instance
    pub chart_path: String,
    /// Connect to the admin database over its public IP
    /// Useful when the operator runs outside the database's VPC
    pub use_public_ips: bool,
    /// Port of the metrics and health probe server
    pub metrics_port: u16,
    /// Timeout for each admin database operation (seconds)
    pub database_timeout_secs: u64,
    /// Timeout for each broker management API call (seconds)
    pub broker_timeout_secs: u64,
    /// Reconciliation error requeue interval (seconds)
    /// Only used when the per-resource backoff state cannot be read
    pub reconciliation_error_requeue_secs: u64,
    /// Interval between successful reconciliations (seconds)
    pub resync_interval_secs: u64,
    /// Watch stream restart delay after the stream ends (seconds)
    pub watch_restart_delay_secs: u64,
    /// How long to wait for the HTTP server to become ready (seconds)
    pub server_startup_timeout_secs: u64,
    /// HTTP server readiness poll interval (milliseconds)
    pub server_poll_interval_ms: u64,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            chart_path: DEFAULT_CHART_PATH.to_string(),
            use_public_ips: false,
            metrics_port: DEFAULT_METRICS_PORT,
            database_timeout_secs: DEFAULT_DATABASE_TIMEOUT_SECS,
            broker_timeout_secs: DEFAULT_BROKER_TIMEOUT_SECS,
            reconciliation_error_requeue_secs: DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            server_startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            server_poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
            log_format: "text".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            chart_path: env_var_or_default_str("CHART_PATH", DEFAULT_CHART_PATH),
            use_public_ips: env_var_or_default_bool("USE_PUBLIC_IPS", false),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            database_timeout_secs: env_var_or_default(
                "DATABASE_TIMEOUT_SECS",
                DEFAULT_DATABASE_TIMEOUT_SECS,
            ),
            broker_timeout_secs: env_var_or_default(
                "BROKER_TIMEOUT_SECS",
                DEFAULT_BROKER_TIMEOUT_SECS,
            ),
            reconciliation_error_requeue_secs: env_var_or_default(
                "RECONCILIATION_ERROR_REQUEUE_SECS",
                DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
            ),
            resync_interval_secs: env_var_or_default(
                "RESYNC_INTERVAL_SECS",
                DEFAULT_RESYNC_INTERVAL_SECS,
            ),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            server_startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            server_poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
            log_format: env_var_or_default_str("LOG_FORMAT", "text"),
        }
    }

    /// True when logs should be written as JSON lines
    #[must_use]
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    /// Get database operation timeout
    #[must_use]
    pub fn database_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.database_timeout_secs)
    }

    /// Get broker operation timeout
    #[must_use]
    pub fn broker_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.broker_timeout_secs)
    }

    /// Get reconciliation error requeue duration
    #[must_use]
    pub fn reconciliation_error_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.reconciliation_error_requeue_secs)
    }

    /// Get resync duration
    #[must_use]
    pub fn resync_interval_duration(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Get server startup timeout
    #[must_use]
    pub fn server_startup_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.server_startup_timeout_secs)
    }

    /// Get server readiness poll interval
    #[must_use]
    pub fn server_poll_interval_duration(&self) -> Duration {
        Duration::from_millis(self.server_poll_interval_ms)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
