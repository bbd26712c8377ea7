//! Tower middleware running AWS Lambda handlers under the invocation watchdog.
//!
//! This crate provides a Tower layer that applies the `lambda-watchdog`
//! interceptor to every invocation of a `lambda_runtime` handler. While the
//! handler runs, the watchdog reports when half of the time budget is gone,
//! when the deadline is imminent and when memory runs low. When the handler
//! returns, the checks are cancelled and a handler error is reported and
//! acknowledged before the result reaches the runtime.
//!
//! # Usage
//!
//! ```no_run
//! use lambda_runtime::{run, service_fn, Error, LambdaEvent};
//! use lambda_watchdog::{Interceptor, TracingReporter, WatchdogConfig};
//! use lambda_watchdog_tower::WatchdogLayer;
//! use std::sync::Arc;
//! use tower::ServiceBuilder;
//!
//! async fn handler(event: LambdaEvent<serde_json::Value>) -> Result<serde_json::Value, Error> {
//!     tracing::info!("Processing request");
//!     Ok(event.payload)
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let interceptor = Interceptor::builder(Arc::new(TracingReporter::new()))
//!         .config(WatchdogConfig::load()?)
//!         .build();
//!
//!     let service = ServiceBuilder::new()
//!         .layer(WatchdogLayer::new(interceptor))
//!         .service(service_fn(handler));
//!
//!     run(service).await
//! }
//! ```
//!
//! # Errors
//!
//! The inner service's error type must implement
//! [`ReportableError`](lambda_watchdog::ReportableError). It is implemented
//! for `lambda_runtime::Error`, so handlers built with `service_fn` work as
//! they are.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod context;
mod future;
mod layer;
mod service;

pub use context::invocation_context;
pub use future::WatchdogFuture;
pub use layer::WatchdogLayer;
pub use service::WatchdogService;
