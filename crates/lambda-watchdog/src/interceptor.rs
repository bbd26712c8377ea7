//! Completion interception.
//!
//! An [`Interceptor`] is created once per process around a [`Reporter`].
//! Every invocation starts with [`Interceptor::begin`], which attaches the
//! event to the reporter's context and starts the watchdog, and ends by
//! funnelling its outcome through the returned [`Invocation`]:
//!
//! 1. every watchdog check is cancelled;
//! 2. if the outcome is an error that must be reported, it is reported and
//!    completion waits for the reporter's acknowledgement;
//! 3. the original outcome is forwarded unchanged.

use crate::config::WatchdogConfig;
use crate::context::{HostEnvironment, InvocationContext};
use crate::memory::{MemoryProbe, ProcessMemory};
use crate::report::{Acknowledgement, Level, MessageOptions, ReportContext, Reporter};
use crate::watchdog::Watchdog;
use serde::Serialize;
use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Sleep;

/// How an error is submitted to the reporter.
#[derive(Debug)]
pub enum ReportKind<'a> {
    /// A proper error value, reported with [`Reporter::capture_exception`].
    Exception(&'a dyn StdError),
    /// Any other value, reported as an error-level message.
    Message(Cow<'a, str>),
}

/// An error value that can be passed through a completion.
pub trait ReportableError {
    /// Classifies the error for reporting.
    fn report_kind(&self) -> ReportKind<'_>;

    /// Whether the error arose outside the normal completion path, such as an
    /// uncaught fault in a background task.
    ///
    /// Background errors are always reported, even when `capture_errors` is
    /// disabled.
    fn is_background(&self) -> bool {
        false
    }
}

impl<T: ReportableError + ?Sized> ReportableError for &T {
    fn report_kind(&self) -> ReportKind<'_> {
        (**self).report_kind()
    }

    fn is_background(&self) -> bool {
        (**self).is_background()
    }
}

impl ReportableError for Box<dyn StdError + Send + Sync> {
    fn report_kind(&self) -> ReportKind<'_> {
        ReportKind::Exception(&**self)
    }
}

impl ReportableError for str {
    fn report_kind(&self) -> ReportKind<'_> {
        ReportKind::Message(Cow::Borrowed(self))
    }
}

impl ReportableError for String {
    fn report_kind(&self) -> ReportKind<'_> {
        ReportKind::Message(Cow::Borrowed(self.as_str()))
    }
}

impl ReportableError for serde_json::Value {
    fn report_kind(&self) -> ReportKind<'_> {
        match self {
            serde_json::Value::String(s) => ReportKind::Message(Cow::Borrowed(s.as_str())),
            other => ReportKind::Message(Cow::Owned(other.to_string())),
        }
    }
}

/// Where an [`InvocationError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// Returned by the handler.
    Completion,
    /// Raised outside the normal completion path.
    Background,
}

/// A handler error carrying its reporting classification.
#[derive(Debug, Error)]
#[error("{payload}")]
pub struct InvocationError {
    payload: Payload,
    origin: ErrorOrigin,
}

#[derive(Debug, Error)]
enum Payload {
    #[error(transparent)]
    Exception(Box<dyn StdError + Send + Sync>),
    #[error("{0}")]
    Message(String),
}

impl InvocationError {
    /// Wraps an error value.
    pub fn exception(error: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            payload: Payload::Exception(error.into()),
            origin: ErrorOrigin::Completion,
        }
    }

    /// Wraps a plain message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            payload: Payload::Message(message.into()),
            origin: ErrorOrigin::Completion,
        }
    }

    /// Marks the error as raised outside the normal completion path.
    pub fn in_background(mut self) -> Self {
        self.origin = ErrorOrigin::Background;
        self
    }

    /// Where the error came from.
    pub fn origin(&self) -> ErrorOrigin {
        self.origin
    }
}

impl ReportableError for InvocationError {
    fn report_kind(&self) -> ReportKind<'_> {
        match &self.payload {
            Payload::Exception(e) => ReportKind::Exception(&**e),
            Payload::Message(m) => ReportKind::Message(Cow::Borrowed(m.as_str())),
        }
    }

    fn is_background(&self) -> bool {
        self.origin == ErrorOrigin::Background
    }
}

/// Process-wide entry point: owns the reporter and starts invocations.
pub struct Interceptor<R> {
    reporter: Arc<R>,
    config: Arc<WatchdogConfig>,
    host: Arc<HostEnvironment>,
    probe: Arc<dyn MemoryProbe>,
}

impl<R> Clone for Interceptor<R> {
    fn clone(&self) -> Self {
        Self {
            reporter: Arc::clone(&self.reporter),
            config: Arc::clone(&self.config),
            host: Arc::clone(&self.host),
            probe: Arc::clone(&self.probe),
        }
    }
}

impl<R> fmt::Debug for Interceptor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("config", &self.config)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl<R: Reporter> Interceptor<R> {
    /// Creates an interceptor with default configuration, the host read from
    /// the environment and process memory measurement.
    pub fn new(reporter: Arc<R>) -> Self {
        Self::builder(reporter).build()
    }

    /// Creates a builder for more detailed configuration.
    pub fn builder(reporter: Arc<R>) -> InterceptorBuilder<R> {
        InterceptorBuilder::new(reporter)
    }

    /// The shared reporter.
    pub fn reporter(&self) -> &Arc<R> {
        &self.reporter
    }

    /// The active configuration.
    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// The detected host environment.
    pub fn host(&self) -> &HostEnvironment {
        &self.host
    }

    /// Starts monitoring an invocation.
    ///
    /// Merges a serialised copy of `event` into the reporter's context. Under
    /// Lambda, also merges the function tags and starts the watchdog;
    /// elsewhere no check is ever scheduled.
    pub fn begin<T>(&self, event: &T, ctx: InvocationContext) -> Invocation<R>
    where
        T: Serialize + ?Sized,
    {
        let mut context = ReportContext::default();

        match serde_json::to_value(event) {
            Ok(value) => {
                context.extra.insert("event".to_string(), value);
            }
            Err(e) => {
                tracing::warn!(target: "lambda_watchdog", error = %e, "Failed to serialise invocation event");
            }
        }

        context.tags = self.host.tags();

        if !context.is_empty() {
            self.reporter.merge_context(context);
        }

        let watchdog = if self.host.is_lambda() {
            Watchdog::start(
                Arc::clone(&self.reporter),
                &self.config,
                ctx,
                Arc::clone(&self.probe),
            )
        } else {
            tracing::debug!(target: "lambda_watchdog", "Not running under Lambda, watchdog disabled");
            Watchdog::idle()
        };

        Invocation {
            reporter: Arc::clone(&self.reporter),
            config: Arc::clone(&self.config),
            watchdog,
        }
    }
}

/// Builder for configuring an [`Interceptor`].
#[must_use = "builders do nothing unless .build() is called"]
pub struct InterceptorBuilder<R> {
    reporter: Arc<R>,
    config: WatchdogConfig,
    host: Option<HostEnvironment>,
    probe: Arc<dyn MemoryProbe>,
}

impl<R: Reporter> InterceptorBuilder<R> {
    /// Creates a new builder around the given reporter.
    pub fn new(reporter: Arc<R>) -> Self {
        Self {
            reporter,
            config: WatchdogConfig::default(),
            host: None,
            probe: Arc::new(ProcessMemory),
        }
    }

    /// Sets the configuration.
    pub fn config(mut self, config: WatchdogConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the host environment instead of reading it from the process
    /// environment.
    pub fn host(mut self, host: HostEnvironment) -> Self {
        self.host = Some(host);
        self
    }

    /// Sets the memory probe used by the memory poll.
    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Builds the interceptor.
    pub fn build(self) -> Interceptor<R> {
        Interceptor {
            reporter: self.reporter,
            config: Arc::new(self.config),
            host: Arc::new(self.host.unwrap_or_else(HostEnvironment::from_env)),
            probe: self.probe,
        }
    }
}

/// A running invocation.
///
/// Dropping it without completing cancels the watchdog.
#[derive(Debug)]
pub struct Invocation<R> {
    reporter: Arc<R>,
    config: Arc<WatchdogConfig>,
    watchdog: Watchdog,
}

impl<R: Reporter> Invocation<R> {
    /// The invocation's watchdog.
    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Cancels every watchdog check. Safe to call repeatedly.
    pub fn cancel_timers(&mut self) {
        self.watchdog.cancel_all();
    }

    /// Wraps a completion callback taking `(error, data)`.
    pub fn wrap<F>(self, done: F) -> Completion<R, F> {
        Completion {
            invocation: self,
            done,
        }
    }

    /// Completes the invocation with a `Result`, returning it unchanged once
    /// any error report has been acknowledged.
    pub async fn complete<D, E>(mut self, result: Result<D, E>) -> Result<D, E>
    where
        E: ReportableError,
    {
        if let Some(report) = self.settle(result.as_ref().err()) {
            report.await;
        }
        result
    }

    /// Runs the synchronous part of completion.
    ///
    /// Cancels the watchdog, then reports `error` if it is present and either
    /// `capture_errors` is enabled or the error is background-originated. The
    /// returned report must be awaited before the outcome is forwarded.
    pub fn settle<E>(&mut self, error: Option<&E>) -> Option<PendingReport>
    where
        E: ReportableError + ?Sized,
    {
        self.watchdog.cancel_all();

        let error = error?;
        if !self.config.capture_errors && !error.is_background() {
            return None;
        }

        tracing::debug!(
            target: "lambda_watchdog",
            background = error.is_background(),
            "Reporting completion error"
        );

        let ack = match error.report_kind() {
            ReportKind::Exception(e) => self.reporter.capture_exception(e),
            ReportKind::Message(message) => self
                .reporter
                .capture_message(&message, MessageOptions::level(Level::Error)),
        };

        Some(PendingReport::new(ack, self.config.report_timeout))
    }
}

/// A completion callback wrapped by an [`Invocation`].
///
/// [`done`](Completion::done), [`fail`](Completion::fail) and
/// [`succeed`](Completion::succeed) all take the same path, and each consumes
/// the completion.
#[must_use = "an invocation is only completed by calling done, fail or succeed"]
pub struct Completion<R, F> {
    invocation: Invocation<R>,
    done: F,
}

impl<R: Reporter, F> Completion<R, F> {
    /// Completes with an optional error and optional data, returning what the
    /// original callback returns.
    pub async fn done<E, D, O>(self, error: Option<E>, data: Option<D>) -> O
    where
        F: FnOnce(Option<E>, Option<D>) -> O,
        E: ReportableError,
    {
        let Completion {
            mut invocation,
            done,
        } = self;

        if let Some(report) = invocation.settle(error.as_ref()) {
            report.await;
        }

        done(error, data)
    }

    /// Completes with an error.
    pub async fn fail<E, D, O>(self, error: E) -> O
    where
        F: FnOnce(Option<E>, Option<D>) -> O,
        E: ReportableError,
    {
        self.done(Some(error), None).await
    }

    /// Completes successfully with data.
    pub async fn succeed<E, D, O>(self, data: D) -> O
    where
        F: FnOnce(Option<E>, Option<D>) -> O,
        E: ReportableError,
    {
        self.done(None, Some(data)).await
    }

    /// The wrapped invocation.
    pub fn invocation(&self) -> &Invocation<R> {
        &self.invocation
    }
}

/// Resolves once a completion error report is acknowledged.
///
/// Reporter failures and the optional report timeout also resolve it; both
/// are logged and never surface to the caller.
#[must_use = "futures do nothing unless polled"]
pub struct PendingReport {
    ack: Acknowledgement,
    timeout: Option<Duration>,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl PendingReport {
    fn new(ack: Acknowledgement, timeout: Option<Duration>) -> Self {
        Self {
            ack,
            timeout,
            deadline: None,
        }
    }
}

impl fmt::Debug for PendingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReport")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Future for PendingReport {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Poll::Ready(result) = Pin::new(&mut this.ack).poll(cx) {
            if let Err(e) = result {
                tracing::warn!(target: "lambda_watchdog", error = %e, "Completion error was not reported");
            }
            return Poll::Ready(());
        }

        if let Some(timeout) = this.timeout.take() {
            this.deadline = Some(Box::pin(tokio::time::sleep(timeout)));
        }

        if let Some(deadline) = this.deadline.as_mut()
            && deadline.as_mut().poll(cx).is_ready()
        {
            tracing::warn!(target: "lambda_watchdog", "Timed out waiting for error report acknowledgement");
            return Poll::Ready(());
        }

        Poll::Pending
    }
}
