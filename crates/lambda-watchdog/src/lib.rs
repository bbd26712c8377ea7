//! Timeout and low-memory watchdog for AWS Lambda invocations.
//!
//! This crate instruments the lifecycle of a single Lambda invocation:
//!
//! - **Completion interception**: errors passed to the completion are
//!   reported, and completion waits until the report is acknowledged before
//!   the original outcome is forwarded unchanged.
//! - **Watchdog**: while the handler runs, deferred checks report when half
//!   the time budget is spent, when the deadline is about to be hit and when
//!   resident memory crosses a fraction of the memory ceiling.
//!
//! Every check is cancelled as soon as the invocation completes, before any
//! completion report is sent, so no telemetry leaks into the next invocation
//! served by the same execution environment.
//!
//! The reporting transport is pluggable through the [`Reporter`] trait.
//! [`TracingReporter`] forwards reports to `tracing`.
//!
//! # Usage
//!
//! ```no_run
//! use lambda_watchdog::{Interceptor, InvocationContext, TracingReporter, WatchdogConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), lambda_watchdog::WatchdogError> {
//! let interceptor = Interceptor::builder(Arc::new(TracingReporter::new()))
//!     .config(WatchdogConfig::load()?)
//!     .build();
//!
//! let event = serde_json::json!({"orderId": 42});
//! let ctx = InvocationContext::new(Duration::from_secs(30), 512);
//!
//! let completion = interceptor
//!     .begin(&event, ctx)
//!     .wrap(|error: Option<String>, data: Option<u32>| (error, data));
//!
//! // ... handler body ...
//!
//! let (error, data) = completion.succeed(7).await;
//! assert!(error.is_none());
//! assert_eq!(data, Some(7));
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! See [`WatchdogConfig`] for the available options and how they are loaded
//! from files and `LAMBDA_WATCHDOG_*` environment variables.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod error;
pub mod interceptor;
pub mod memory;
pub mod report;
pub mod watchdog;

pub use config::{WatchdogConfig, WatchdogConfigBuilder};
pub use context::{HostEnvironment, InvocationContext};
pub use error::{ReporterError, Result, WatchdogError};
pub use interceptor::{
    Completion, ErrorOrigin, Interceptor, InterceptorBuilder, Invocation, InvocationError,
    PendingReport, ReportKind, ReportableError,
};
pub use memory::{MemoryProbe, ProcessMemory};
pub use report::{
    Acknowledgement, Acknowledger, Level, MessageOptions, ReportContext, Reporter, TracingReporter,
};
pub use watchdog::{TimerRole, Watchdog};
