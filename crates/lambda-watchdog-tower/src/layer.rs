//! Tower Layer implementation for the invocation watchdog.

use crate::service::WatchdogService;
use lambda_watchdog::{Interceptor, Reporter};
use std::sync::Arc;
use tower::Layer;

/// Tower layer that runs Lambda handlers under the watchdog.
///
/// This layer wraps a service so that every invocation:
/// - Attaches the event and function tags to the reporter's context
/// - Schedules the timeout and memory checks while the handler runs
/// - Cancels every check as soon as the handler returns
/// - Reports a handler error and waits for the acknowledgement before
///   returning the result
///
/// # Example
///
/// ```ignore
/// use lambda_watchdog::{Interceptor, TracingReporter};
/// use lambda_watchdog_tower::WatchdogLayer;
/// use tower::ServiceBuilder;
///
/// let layer = WatchdogLayer::new(Interceptor::new(Arc::new(TracingReporter::new())));
///
/// let service = ServiceBuilder::new()
///     .layer(layer)
///     .service(my_handler);
/// ```
pub struct WatchdogLayer<R> {
    interceptor: Interceptor<R>,
}

impl<R: Reporter> WatchdogLayer<R> {
    /// Creates a layer from a configured interceptor.
    pub fn new(interceptor: Interceptor<R>) -> Self {
        Self { interceptor }
    }

    /// Creates a layer with default settings around the given reporter.
    ///
    /// Configuration defaults are used and the host is read from the
    /// environment. Use [`Interceptor::builder`] for anything else.
    pub fn with_reporter(reporter: Arc<R>) -> Self {
        Self::new(Interceptor::new(reporter))
    }

    /// The interceptor shared by every wrapped service.
    pub fn interceptor(&self) -> &Interceptor<R> {
        &self.interceptor
    }
}

impl<R> Clone for WatchdogLayer<R> {
    fn clone(&self) -> Self {
        Self {
            interceptor: self.interceptor.clone(),
        }
    }
}

impl<R: Reporter> From<Interceptor<R>> for WatchdogLayer<R> {
    fn from(interceptor: Interceptor<R>) -> Self {
        Self::new(interceptor)
    }
}

impl<S, R> Layer<S> for WatchdogLayer<R> {
    type Service = WatchdogService<S, R>;

    fn layer(&self, inner: S) -> Self::Service {
        WatchdogService::new(inner, self.interceptor.clone())
    }
}
