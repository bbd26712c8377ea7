//! Configuration loading and management.
//!
//! Configuration is layered with figment. Sources, in order of priority:
//! 1. Default values (compiled in)
//! 2. Config file: `/var/task/lambda-watchdog.toml` (optional)
//! 3. Environment variables with the `LAMBDA_WATCHDOG_` prefix
//!
//! | Variable | Field |
//! |----------|-------|
//! | `LAMBDA_WATCHDOG_CAPTURE_ERRORS` | `capture_errors` |
//! | `LAMBDA_WATCHDOG_CAPTURE_TIMEOUT_WARNINGS` | `capture_timeout_warnings` |
//! | `LAMBDA_WATCHDOG_CAPTURE_MEMORY_WARNINGS` | `capture_memory_warnings` |
//! | `LAMBDA_WATCHDOG_TIMEOUT_MARGIN` | `timeout_margin` (ms) |
//! | `LAMBDA_WATCHDOG_MEMORY_POLL_INTERVAL` | `memory_poll_interval` (ms) |
//! | `LAMBDA_WATCHDOG_MEMORY_WARNING_THRESHOLD` | `memory_warning_threshold` |
//! | `LAMBDA_WATCHDOG_REPORT_TIMEOUT` | `report_timeout` (ms) |

use crate::error::Result;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/var/task/lambda-watchdog.toml";
const ENV_PREFIX: &str = "LAMBDA_WATCHDOG_";

/// Watchdog and completion-reporting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Report errors passed to the completion callback.
    pub capture_errors: bool,
    /// Schedule the time-warning and time-critical checks.
    pub capture_timeout_warnings: bool,
    /// Schedule the memory poll.
    pub capture_memory_warnings: bool,
    /// How long before the deadline the time-critical check fires.
    #[serde(with = "duration_ms")]
    pub timeout_margin: Duration,
    /// Delay between the end of one memory check and the start of the next.
    #[serde(with = "duration_ms")]
    pub memory_poll_interval: Duration,
    /// Fraction of the memory ceiling at which the memory warning is reported.
    pub memory_warning_threshold: f64,
    /// Upper bound on waiting for an error report to be acknowledged.
    ///
    /// `None` waits until the reporter acknowledges or drops the report.
    #[serde(with = "option_duration_ms")]
    pub report_timeout: Option<Duration>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            capture_errors: true,
            capture_timeout_warnings: true,
            capture_memory_warnings: true,
            timeout_margin: Duration::from_millis(500),
            memory_poll_interval: Duration::from_millis(500),
            memory_warning_threshold: 0.75,
            report_timeout: None,
        }
    }
}

impl WatchdogConfig {
    /// Loads configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration using a custom config file path.
    ///
    /// A missing file is skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(WatchdogConfig::default()));

        if config_path.as_ref().exists() {
            figment = figment.merge(Toml::file(config_path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        Ok(figment.extract()?)
    }

    /// Creates a new config builder.
    pub fn builder() -> WatchdogConfigBuilder {
        WatchdogConfigBuilder::new()
    }
}

/// Builder for constructing configuration programmatically.
#[must_use = "builders do nothing unless .build() is called"]
pub struct WatchdogConfigBuilder {
    config: WatchdogConfig,
}

impl WatchdogConfigBuilder {
    /// Creates a new config builder with default values.
    pub fn new() -> Self {
        Self {
            config: WatchdogConfig::default(),
        }
    }

    /// Sets whether completion errors are reported.
    pub fn capture_errors(mut self, enabled: bool) -> Self {
        self.config.capture_errors = enabled;
        self
    }

    /// Sets whether the time checks are scheduled.
    pub fn capture_timeout_warnings(mut self, enabled: bool) -> Self {
        self.config.capture_timeout_warnings = enabled;
        self
    }

    /// Sets whether the memory poll is scheduled.
    pub fn capture_memory_warnings(mut self, enabled: bool) -> Self {
        self.config.capture_memory_warnings = enabled;
        self
    }

    /// Sets the margin before the deadline for the time-critical check.
    pub fn timeout_margin(mut self, margin: Duration) -> Self {
        self.config.timeout_margin = margin;
        self
    }

    /// Sets the memory poll interval.
    pub fn memory_poll_interval(mut self, interval: Duration) -> Self {
        self.config.memory_poll_interval = interval;
        self
    }

    /// Sets the memory warning threshold, as a fraction of the ceiling.
    pub fn memory_warning_threshold(mut self, threshold: f64) -> Self {
        self.config.memory_warning_threshold = threshold;
        self
    }

    /// Bounds the wait for error report acknowledgement.
    pub fn report_timeout(mut self, timeout: Duration) -> Self {
        self.config.report_timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> WatchdogConfig {
        self.config
    }
}

impl Default for WatchdogConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = Option::<u64>::deserialize(deserializer)?;
        Ok(ms.map(Duration::from_millis))
    }
}
