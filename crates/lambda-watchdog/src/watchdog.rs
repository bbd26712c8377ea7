//! Timeout and memory watchdog for a single invocation.
//!
//! The watchdog runs up to three independent checks alongside the handler:
//!
//! - **time warning**: once, halfway through the remaining time
//! - **time critical**: once, `timeout_margin` before the deadline
//! - **memory poll**: repeatedly, until usage crosses the warning threshold
//!
//! The memory poll sleeps between checks instead of ticking on an interval,
//! so a slow check can never overlap the next one or cause one to be skipped.
//!
//! Each check is a tokio task owned by the [`Watchdog`]. Cancelling closes a
//! shared gate, then aborts the tasks and forgets their handles, so cancelling
//! twice is harmless. Dropping the watchdog cancels everything.
//!
//! An aborted check may still be running on another worker until its next
//! await point, so checks report under the gate's lock and only while it is
//! open. Once [`Watchdog::cancel_all`] returns, no check report is in flight
//! and none will follow.

use crate::config::WatchdogConfig;
use crate::context::InvocationContext;
use crate::memory::MemoryProbe;
use crate::report::{Level, MessageOptions, Reporter};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// The checks a watchdog can schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerRole {
    /// Warning halfway through the time budget.
    TimeWarning,
    /// Error shortly before the platform kills the invocation.
    TimeCritical,
    /// Low-memory poll.
    MemoryPoll,
}

impl fmt::Display for TimerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerRole::TimeWarning => "time_warning",
            TimerRole::TimeCritical => "time_critical",
            TimerRole::MemoryPoll => "memory_poll",
        };
        f.write_str(name)
    }
}

/// Lets checks report until the watchdog is cancelled.
#[derive(Debug, Default)]
struct Gate {
    closed: Mutex<bool>,
}

impl Gate {
    /// Runs `report` unless the gate is closed. Returns whether it ran.
    fn report(&self, report: impl FnOnce()) -> bool {
        let closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return false;
        }
        report();
        true
    }

    fn close(&self) {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }
}

/// Owns the scheduled checks of one invocation.
#[derive(Debug, Default)]
pub struct Watchdog {
    gate: Arc<Gate>,
    time_warning: Option<JoinHandle<()>>,
    time_critical: Option<JoinHandle<()>>,
    memory_poll: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// A watchdog with nothing scheduled.
    pub fn idle() -> Self {
        Self::default()
    }

    /// Schedules the checks enabled in `config` for the invocation `ctx`.
    ///
    /// Must be called within a tokio runtime. Outside one, nothing is
    /// scheduled and a warning is logged.
    pub fn start<R: Reporter>(
        reporter: Arc<R>,
        config: &WatchdogConfig,
        ctx: InvocationContext,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        let mut watchdog = Self::idle();

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!(target: "lambda_watchdog", error = %e, "No tokio runtime, watchdog disabled");
                return watchdog;
            }
        };

        let remaining = ctx.remaining_time();

        if config.capture_timeout_warnings {
            let warning_delay = time_warning_delay(remaining);
            let critical_delay = time_critical_delay(remaining, config.timeout_margin);

            watchdog.time_warning = Some(runtime.spawn(time_warning(
                Arc::clone(&reporter),
                Arc::clone(&watchdog.gate),
                ctx,
                remaining,
                warning_delay,
            )));
            watchdog.time_critical = Some(runtime.spawn(time_critical(
                Arc::clone(&reporter),
                Arc::clone(&watchdog.gate),
                critical_delay,
            )));

            tracing::debug!(
                target: "lambda_watchdog",
                remaining_ms = remaining.as_millis() as u64,
                warning_delay_ms = warning_delay.as_millis() as u64,
                critical_delay_ms = critical_delay.as_millis() as u64,
                "Scheduled timeout checks"
            );
        }

        if config.capture_memory_warnings {
            let limit_mb = ctx.memory_limit_mb();
            if limit_mb == 0 {
                tracing::debug!(target: "lambda_watchdog", "Memory limit unknown, memory poll disabled");
            } else {
                watchdog.memory_poll = Some(runtime.spawn(memory_poll(
                    reporter,
                    Arc::clone(&watchdog.gate),
                    probe,
                    limit_mb,
                    config.memory_poll_interval,
                    config.memory_warning_threshold,
                )));

                tracing::debug!(
                    target: "lambda_watchdog",
                    limit_mb,
                    interval_ms = config.memory_poll_interval.as_millis() as u64,
                    "Scheduled memory poll"
                );
            }
        }

        watchdog
    }

    /// Cancels every scheduled check.
    ///
    /// Checks that never ran, already finished or were already cancelled are
    /// skipped. Waits for a check report being submitted concurrently, so no
    /// check report is made after this returns.
    pub fn cancel_all(&mut self) {
        self.gate.close();

        for role in [
            TimerRole::TimeWarning,
            TimerRole::TimeCritical,
            TimerRole::MemoryPoll,
        ] {
            if let Some(handle) = self.slot(role).take() {
                handle.abort();
                tracing::trace!(target: "lambda_watchdog", %role, "Cancelled check");
            }
        }
    }

    /// Returns `true` if the check for `role` is scheduled and has not finished.
    pub fn is_armed(&self, role: TimerRole) -> bool {
        let handle = match role {
            TimerRole::TimeWarning => &self.time_warning,
            TimerRole::TimeCritical => &self.time_critical,
            TimerRole::MemoryPoll => &self.memory_poll,
        };
        handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Returns `true` if any check is still pending.
    pub fn is_active(&self) -> bool {
        self.is_armed(TimerRole::TimeWarning)
            || self.is_armed(TimerRole::TimeCritical)
            || self.is_armed(TimerRole::MemoryPoll)
    }

    fn slot(&mut self, role: TimerRole) -> &mut Option<JoinHandle<()>> {
        match role {
            TimerRole::TimeWarning => &mut self.time_warning,
            TimerRole::TimeCritical => &mut self.time_critical,
            TimerRole::MemoryPoll => &mut self.memory_poll,
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Delay before the time warning: half the remaining time.
pub fn time_warning_delay(remaining: Duration) -> Duration {
    remaining / 2
}

/// Delay before the time-critical check, never negative.
pub fn time_critical_delay(remaining: Duration, margin: Duration) -> Duration {
    remaining.saturating_sub(margin)
}

/// Seconds quoted in the time warning: half the budget, rounded up to whole
/// seconds before halving.
pub fn warning_seconds(remaining: Duration) -> f64 {
    (remaining.as_millis() as f64 / 1000.0).ceil() / 2.0
}

async fn time_warning<R: Reporter>(
    reporter: Arc<R>,
    gate: Arc<Gate>,
    ctx: InvocationContext,
    remaining_at_start: Duration,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;

    let message = format!(
        "Execution Time Exceeds {} seconds",
        warning_seconds(remaining_at_start)
    );
    let options = MessageOptions::level(Level::Warning).with_extra(
        "TimeRemainingInMsec",
        ctx.remaining_time().as_millis() as u64,
    );

    if gate.report(|| drop(reporter.capture_message(&message, options))) {
        tracing::debug!(target: "lambda_watchdog", "Time warning fired");
    }
}

async fn time_critical<R: Reporter>(reporter: Arc<R>, gate: Arc<Gate>, delay: Duration) {
    tokio::time::sleep(delay).await;

    let options = MessageOptions::level(Level::Error);
    if gate.report(|| drop(reporter.capture_message("Function Timed Out", options))) {
        tracing::debug!(target: "lambda_watchdog", "Time critical check fired");
    }
}

async fn memory_poll<R: Reporter>(
    reporter: Arc<R>,
    gate: Arc<Gate>,
    probe: Arc<dyn MemoryProbe>,
    limit_mb: u64,
    interval: Duration,
    threshold: f64,
) {
    loop {
        tokio::time::sleep(interval).await;

        let used_mb = probe.resident_mb();
        let fraction = used_mb / limit_mb as f64;

        if fraction >= threshold {
            let options = MessageOptions::level(Level::Warning)
                .with_extra("MemoryLimitInMB", limit_mb)
                .with_extra("MemoryUsedInMB", used_mb.floor() as u64);

            if gate.report(|| drop(reporter.capture_message("Low Memory Warning", options))) {
                tracing::debug!(target: "lambda_watchdog", used_mb, limit_mb, "Memory warning fired");
            }
            return;
        }

        tracing::trace!(target: "lambda_watchdog", used_mb, limit_mb, "Memory within limit");
    }
}
