//! Tower Service implementation for the invocation watchdog.

use crate::context::invocation_context;
use crate::future::WatchdogFuture;
use lambda_runtime::LambdaEvent;
use lambda_watchdog::{Interceptor, ReportableError, Reporter};
use serde::Serialize;
use std::task::{Context, Poll};
use tower::Service;

/// Tower service that runs a Lambda handler under the watchdog.
///
/// For each call this service:
/// 1. Derives the time and memory budget from the Lambda context
/// 2. Begins an invocation, which merges the event into the reporter's
///    context and starts the watchdog
/// 3. Invokes the inner service
/// 4. Completes the invocation with the inner result
///
/// # Type Parameters
///
/// * `S` - The inner service type
/// * `R` - The reporter type
pub struct WatchdogService<S, R> {
    inner: S,
    interceptor: Interceptor<R>,
}

impl<S, R> WatchdogService<S, R> {
    /// Creates a new service wrapping the given service.
    pub(crate) fn new(inner: S, interceptor: Interceptor<R>) -> Self {
        Self { inner, interceptor }
    }
}

impl<S: Clone, R> Clone for WatchdogService<S, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            interceptor: self.interceptor.clone(),
        }
    }
}

impl<S, R, T> Service<LambdaEvent<T>> for WatchdogService<S, R>
where
    S: Service<LambdaEvent<T>>,
    S::Error: ReportableError,
    R: Reporter,
    T: Serialize,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = WatchdogFuture<S::Future, R, S::Response, S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, event: LambdaEvent<T>) -> Self::Future {
        let ctx = invocation_context(&event.context);

        tracing::debug!(
            target: "lambda_watchdog",
            request_id = %event.context.request_id,
            remaining_ms = ctx.remaining_time().as_millis() as u64,
            memory_limit_mb = ctx.memory_limit_mb(),
            "Beginning invocation"
        );

        let invocation = self.interceptor.begin(&event.payload, ctx);
        let future = self.inner.call(event);

        WatchdogFuture::new(future, invocation)
    }
}
