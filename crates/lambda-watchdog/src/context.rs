//! Invocation budget and host detection.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

const FUNCTION_NAME_ENV: &str = "AWS_LAMBDA_FUNCTION_NAME";
const FUNCTION_VERSION_ENV: &str = "AWS_LAMBDA_FUNCTION_VERSION";
const LOG_STREAM_ENV: &str = "AWS_LAMBDA_LOG_STREAM_NAME";

/// Time and memory budget of a single invocation.
///
/// The remaining time is derived from a deadline on the tokio clock, so it
/// decreases monotonically and is re-queried on every call.
#[derive(Debug, Clone, Copy)]
pub struct InvocationContext {
    deadline: Instant,
    memory_limit_mb: u64,
}

impl InvocationContext {
    /// Creates a context whose deadline is `remaining` from now.
    pub fn new(remaining: Duration, memory_limit_mb: u64) -> Self {
        Self {
            deadline: Instant::now() + remaining,
            memory_limit_mb,
        }
    }

    /// Time left before the platform terminates the invocation.
    pub fn remaining_time(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Memory ceiling of the invocation, in MB.
    pub fn memory_limit_mb(&self) -> u64 {
        self.memory_limit_mb
    }
}

/// Identifiers of the function as exposed by the Lambda environment.
///
/// A missing function name means the code is not running under Lambda, in
/// which case no watchdog is started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostEnvironment {
    /// `AWS_LAMBDA_FUNCTION_NAME`.
    pub function_name: Option<String>,
    /// `AWS_LAMBDA_FUNCTION_VERSION`.
    pub function_version: Option<String>,
    /// `AWS_LAMBDA_LOG_STREAM_NAME`.
    pub log_stream: Option<String>,
}

impl HostEnvironment {
    /// Reads the identifiers from the process environment.
    pub fn from_env() -> Self {
        Self {
            function_name: non_empty_var(FUNCTION_NAME_ENV),
            function_version: non_empty_var(FUNCTION_VERSION_ENV),
            log_stream: non_empty_var(LOG_STREAM_ENV),
        }
    }

    /// An environment with no identifiers, as seen outside Lambda.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Returns `true` when running under Lambda.
    pub fn is_lambda(&self) -> bool {
        self.function_name.is_some()
    }

    /// Tags attached to every report sent during the invocation.
    ///
    /// Empty outside Lambda. Identifiers missing from the environment are
    /// left out.
    pub fn tags(&self) -> BTreeMap<String, String> {
        let Some(name) = &self.function_name else {
            return BTreeMap::new();
        };

        let mut tags = BTreeMap::new();
        tags.insert("Lambda".to_string(), name.clone());
        if let Some(version) = &self.function_version {
            tags.insert("Version".to_string(), version.clone());
        }
        if let Some(log_stream) = &self.log_stream {
            tags.insert("LogStream".to_string(), log_stream.clone());
        }
        tags
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
