//! Future implementation that completes the invocation before returning.

use lambda_watchdog::{Invocation, PendingReport, ReportableError, Reporter};
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future that wraps a handler and completes its invocation.
///
/// This future:
/// 1. Polls the inner future until completion
/// 2. Cancels every watchdog check
/// 3. Reports the error, if any and if configured
/// 4. Waits for the report to be acknowledged before returning the result
///
/// The result is returned unchanged. Dropping the future before it completes
/// also cancels the watchdog.
#[pin_project]
pub struct WatchdogFuture<F, R, T, E> {
    #[pin]
    inner: F,
    invocation: Option<Invocation<R>>,
    pending_report: Option<PendingReport>,
    pending_result: Option<Result<T, E>>,
}

impl<F, R, T, E> WatchdogFuture<F, R, T, E> {
    /// Creates a new future wrapping the given handler future.
    pub(crate) fn new(inner: F, invocation: Invocation<R>) -> Self {
        Self {
            inner,
            invocation: Some(invocation),
            pending_report: None,
            pending_result: None,
        }
    }
}

impl<F, R, T, E> Future for WatchdogFuture<F, R, T, E>
where
    F: Future<Output = Result<T, E>>,
    R: Reporter,
    E: ReportableError,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if this.pending_result.is_none() {
            match this.inner.poll(cx) {
                Poll::Ready(result) => {
                    let report = this
                        .invocation
                        .take()
                        .and_then(|mut invocation| invocation.settle(result.as_ref().err()));

                    match report {
                        Some(report) => {
                            *this.pending_report = Some(report);
                            *this.pending_result = Some(result);
                        }
                        None => return Poll::Ready(result),
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        if let Some(report) = this.pending_report.as_mut() {
            match Pin::new(report).poll(cx) {
                Poll::Ready(()) => {
                    *this.pending_report = None;
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        Poll::Ready(
            this.pending_result
                .take()
                .expect("pending_result should be set"),
        )
    }
}
