//! SQS Lambda example running under the invocation watchdog.
//!
//! This example mirrors the AWS Lambda Rust Runtime's `basic-sqs` example
//! but wraps the handler in `WatchdogLayer`. Reports go through the
//! `TracingReporter`, so warnings and handler errors show up in the function's
//! log stream.
//!
//! The layer provides:
//! - A warning once half of the time budget is spent
//! - A timeout report shortly before the deadline
//! - Low-memory warnings while the handler runs
//! - Error reporting before the result is returned to the runtime
//!
//! # Running
//!
//! ```bash
//! cargo build --example sqs_handler --release
//! ```

use aws_lambda_events::sqs::SqsEventObj;
use lambda_runtime::{Error, LambdaEvent, run, service_fn};
use lambda_watchdog::{Interceptor, TracingReporter, WatchdogConfig};
use lambda_watchdog_tower::WatchdogLayer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing_subscriber::EnvFilter;

#[derive(Deserialize, Serialize)]
struct Data {
    id: String,
    text: String,
}

async fn function_handler(event: LambdaEvent<SqsEventObj<Data>>) -> Result<(), Error> {
    for record in &event.payload.records {
        tracing::info!(
            id = ?record.body.id,
            text = ?record.body.text,
            "Processing SQS message"
        );
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .without_time()
        .init();

    let interceptor = Interceptor::builder(Arc::new(TracingReporter::new()))
        .config(WatchdogConfig::load()?)
        .build();

    let service = ServiceBuilder::new()
        .layer(WatchdogLayer::new(interceptor))
        .service(service_fn(function_handler));

    run(service).await
}
