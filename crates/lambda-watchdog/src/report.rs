//! The seam between the watchdog and an error-reporting backend.
//!
//! The transport itself lives outside this crate. A backend implements
//! [`Reporter`] and hands back an [`Acknowledgement`] for every report, which
//! resolves once the report has been logged or has failed.

use crate::error::ReporterError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Severity of a report.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Debug information.
    Debug,
    /// Informational message.
    #[default]
    Info,
    /// Advisory condition.
    Warning,
    /// Failure.
    Error,
    /// Unrecoverable failure.
    Fatal,
}

/// Options accompanying a message report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageOptions {
    /// Severity of the message.
    pub level: Level,
    /// Structured metadata.
    pub extra: Map<String, Value>,
}

impl MessageOptions {
    /// Options at the given level with no metadata.
    pub fn level(level: Level) -> Self {
        Self {
            level,
            extra: Map::new(),
        }
    }

    /// Adds a metadata entry.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Context merged into the reporter's ambient scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportContext {
    /// Structured metadata attached to subsequent reports.
    pub extra: Map<String, Value>,
    /// Tags attached to subsequent reports.
    pub tags: BTreeMap<String, String>,
}

impl ReportContext {
    /// Returns `true` if there is nothing to merge.
    pub fn is_empty(&self) -> bool {
        self.extra.is_empty() && self.tags.is_empty()
    }
}

/// An error-reporting backend.
///
/// One reporter is created per process and shared by every invocation.
/// Reports are submitted synchronously; delivery happens in the background
/// and is signalled through the returned [`Acknowledgement`]. Callers that do
/// not care about delivery simply drop it.
pub trait Reporter: Send + Sync + 'static {
    /// Reports an error value.
    fn capture_exception(&self, error: &dyn std::error::Error) -> Acknowledgement;

    /// Reports a plain message.
    fn capture_message(&self, message: &str, options: MessageOptions) -> Acknowledgement;

    /// Merges metadata and tags into the scope used by later reports.
    fn merge_context(&self, context: ReportContext);
}

/// Resolves once a report has been logged (`Ok`) or has failed (`Err`).
#[must_use = "dropping an acknowledgement does not cancel the report"]
#[derive(Debug)]
pub struct Acknowledgement {
    state: AckState,
}

#[derive(Debug)]
enum AckState {
    Ready(Option<Result<(), ReporterError>>),
    Pending(oneshot::Receiver<Result<(), ReporterError>>),
}

impl Acknowledgement {
    /// Creates a pending acknowledgement and the handle that completes it.
    pub fn channel() -> (Acknowledger, Acknowledgement) {
        let (tx, rx) = oneshot::channel();
        (
            Acknowledger { tx },
            Acknowledgement {
                state: AckState::Pending(rx),
            },
        )
    }

    /// An acknowledgement for a report that has already been logged.
    pub fn logged() -> Self {
        Self {
            state: AckState::Ready(Some(Ok(()))),
        }
    }

    /// An acknowledgement for a report that has already failed.
    pub fn failed(error: ReporterError) -> Self {
        Self {
            state: AckState::Ready(Some(Err(error))),
        }
    }
}

impl Future for Acknowledgement {
    type Output = Result<(), ReporterError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            AckState::Ready(result) => Poll::Ready(result.take().unwrap_or(Ok(()))),
            AckState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(ReporterError::Dropped))),
        }
    }
}

/// Completes an [`Acknowledgement`].
///
/// Dropping it without calling a method resolves the acknowledgement with
/// [`ReporterError::Dropped`].
#[derive(Debug)]
pub struct Acknowledger {
    tx: oneshot::Sender<Result<(), ReporterError>>,
}

impl Acknowledger {
    /// Signals that the report was logged.
    pub fn logged(self) {
        let _ = self.tx.send(Ok(()));
    }

    /// Signals that the report could not be delivered.
    pub fn failed(self, error: ReporterError) {
        let _ = self.tx.send(Err(error));
    }
}

/// Reporter that turns reports into `tracing` events.
///
/// Useful when no reporting backend is wired up: reports end up wherever the
/// subscriber sends logs. Every report is acknowledged immediately.
#[derive(Debug, Default)]
pub struct TracingReporter {
    context: Mutex<ReportContext>,
}

impl TracingReporter {
    /// Creates a reporter with an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the merged context.
    pub fn context(&self) -> ReportContext {
        self.context
            .lock()
            .map(|ctx| ctx.clone())
            .unwrap_or_default()
    }

    fn tags(&self) -> String {
        let ctx = self.context();
        serde_json::to_string(&ctx.tags).unwrap_or_default()
    }
}

impl Reporter for TracingReporter {
    fn capture_exception(&self, error: &dyn std::error::Error) -> Acknowledgement {
        tracing::error!(target: "lambda_watchdog::report", tags = %self.tags(), error = %error, "Captured exception");
        Acknowledgement::logged()
    }

    fn capture_message(&self, message: &str, options: MessageOptions) -> Acknowledgement {
        let tags = self.tags();
        let extra = Value::Object(options.extra);
        match options.level {
            Level::Debug => {
                tracing::debug!(target: "lambda_watchdog::report", %tags, %extra, "{}", message)
            }
            Level::Info => {
                tracing::info!(target: "lambda_watchdog::report", %tags, %extra, "{}", message)
            }
            Level::Warning => {
                tracing::warn!(target: "lambda_watchdog::report", %tags, %extra, "{}", message)
            }
            Level::Error | Level::Fatal => {
                tracing::error!(target: "lambda_watchdog::report", %tags, %extra, "{}", message)
            }
        }
        Acknowledgement::logged()
    }

    fn merge_context(&self, context: ReportContext) {
        if let Ok(mut current) = self.context.lock() {
            current.extra.extend(context.extra);
            current.tags.extend(context.tags);
        }
    }
}
