//! Shared test doubles for watchdog integration tests.

#![allow(dead_code)]

use lambda_watchdog::{
    Acknowledgement, Acknowledger, Level, MemoryProbe, MessageOptions, ReportContext, Reporter,
    ReporterError,
};
use serde_json::{Map, Value};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Instant;

/// How the recording reporter acknowledges reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Acknowledge as logged immediately.
    Logged,
    /// Fail immediately.
    Failed,
    /// Hold acknowledgers until [`RecordingReporter::release_all`].
    Held,
    /// Drop the acknowledger without completing it.
    Dropped,
}

/// A report as seen by the reporter.
#[derive(Debug, Clone, PartialEq)]
pub enum Captured {
    Exception(String),
    Message {
        text: String,
        level: Level,
        extra: Map<String, Value>,
    },
}

impl Captured {
    pub fn text(&self) -> &str {
        match self {
            Captured::Exception(text) => text,
            Captured::Message { text, .. } => text,
        }
    }
}

/// A report and the (tokio) instant it was submitted.
#[derive(Debug, Clone)]
pub struct Record {
    pub report: Captured,
    pub at: Instant,
}

/// Reporter that records every call.
pub struct RecordingReporter {
    mode: AckMode,
    records: Mutex<Vec<Record>>,
    contexts: Mutex<Vec<ReportContext>>,
    held: Mutex<Vec<Acknowledger>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::with_mode(AckMode::Logged)
    }

    pub fn with_mode(mode: AckMode) -> Self {
        Self {
            mode,
            records: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    pub fn reports(&self) -> Vec<Captured> {
        self.records().into_iter().map(|r| r.report).collect()
    }

    pub fn contexts(&self) -> Vec<ReportContext> {
        self.contexts.lock().unwrap().clone()
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    /// Acknowledges every held report as logged.
    pub fn release_all(&self) {
        for acker in self.held.lock().unwrap().drain(..) {
            acker.logged();
        }
    }

    fn record(&self, report: Captured) -> Acknowledgement {
        self.records.lock().unwrap().push(Record {
            report,
            at: Instant::now(),
        });

        match self.mode {
            AckMode::Logged => Acknowledgement::logged(),
            AckMode::Failed => Acknowledgement::failed(ReporterError::Failed("unreachable".into())),
            AckMode::Held => {
                let (acker, ack) = Acknowledgement::channel();
                self.held.lock().unwrap().push(acker);
                ack
            }
            AckMode::Dropped => {
                let (_acker, ack) = Acknowledgement::channel();
                ack
            }
        }
    }
}

impl Reporter for RecordingReporter {
    fn capture_exception(&self, error: &dyn std::error::Error) -> Acknowledgement {
        self.record(Captured::Exception(error.to_string()))
    }

    fn capture_message(&self, message: &str, options: MessageOptions) -> Acknowledgement {
        self.record(Captured::Message {
            text: message.to_string(),
            level: options.level,
            extra: options.extra,
        })
    }

    fn merge_context(&self, context: ReportContext) {
        self.contexts.lock().unwrap().push(context);
    }
}

/// Memory probe returning a fixed sequence of readings, repeating the last.
pub struct ScriptedMemory {
    readings: Vec<f64>,
    calls: AtomicUsize,
}

impl ScriptedMemory {
    pub fn new(readings: impl Into<Vec<f64>>) -> Self {
        Self {
            readings: readings.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MemoryProbe for ScriptedMemory {
    fn resident_mb(&self) -> f64 {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let index = call.min(self.readings.len().saturating_sub(1));
        self.readings.get(index).copied().unwrap_or(0.0)
    }
}
