//! Completion interception: reporting, ordering and forwarding.

mod common;

use common::{AckMode, Captured, RecordingReporter, ScriptedMemory};
use lambda_watchdog::{
    HostEnvironment, Interceptor, Invocation, InvocationContext, InvocationError, Level,
    WatchdogConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

fn lambda_host() -> HostEnvironment {
    HostEnvironment {
        function_name: Some("orders".to_string()),
        function_version: Some("$LATEST".to_string()),
        log_stream: Some("2024/05/01/[$LATEST]abcdef".to_string()),
    }
}

fn interceptor(
    reporter: &Arc<RecordingReporter>,
    config: WatchdogConfig,
) -> Interceptor<RecordingReporter> {
    Interceptor::builder(Arc::clone(reporter))
        .config(config)
        .host(lambda_host())
        .memory_probe(Arc::new(ScriptedMemory::new([1.0])))
        .build()
}

fn begin(interceptor: &Interceptor<RecordingReporter>) -> Invocation<RecordingReporter> {
    interceptor.begin(
        &json!({"orderId": 42}),
        InvocationContext::new(Duration::from_secs(10), 128),
    )
}

#[tokio::test]
async fn test_success_forwards_data_without_report() {
    let reporter = Arc::new(RecordingReporter::new());
    let interceptor = interceptor(&reporter, WatchdogConfig::default());

    let completion =
        begin(&interceptor).wrap(|error: Option<String>, data: Option<u32>| (error, data));
    let (error, data) = completion.succeed(7).await;

    assert_eq!(error, None);
    assert_eq!(data, Some(7));
    assert!(reporter.reports().is_empty());
}

#[tokio::test]
async fn test_capture_disabled_forwards_error_without_report() {
    let reporter = Arc::new(RecordingReporter::new());
    let config = WatchdogConfig::builder().capture_errors(false).build();
    let interceptor = interceptor(&reporter, config);

    let completion =
        begin(&interceptor).wrap(|error: Option<String>, data: Option<u32>| (error, data));
    let (error, data) = completion.done(Some("boom".to_string()), Some(3)).await;

    assert_eq!(error.as_deref(), Some("boom"));
    assert_eq!(data, Some(3));
    assert!(reporter.reports().is_empty());
}

#[tokio::test]
async fn test_background_error_reported_even_when_capture_disabled() {
    let reporter = Arc::new(RecordingReporter::new());
    let config = WatchdogConfig::builder().capture_errors(false).build();
    let interceptor = interceptor(&reporter, config);

    let completion =
        begin(&interceptor).wrap(|error: Option<InvocationError>, _data: Option<()>| error);
    let error = completion
        .fail(InvocationError::exception(std::io::Error::other("worker crashed")).in_background())
        .await;

    assert_eq!(error.unwrap().to_string(), "worker crashed");
    assert_eq!(
        reporter.reports(),
        vec![Captured::Exception("worker crashed".to_string())]
    );
}

#[tokio::test]
async fn test_error_values_are_reported_as_exceptions() {
    let reporter = Arc::new(RecordingReporter::new());
    let interceptor = interceptor(&reporter, WatchdogConfig::default());

    let result: Result<(), Box<dyn std::error::Error + Send + Sync>> =
        Err("connection refused".into());
    let result = begin(&interceptor).complete(result).await;

    assert_eq!(result.unwrap_err().to_string(), "connection refused");
    assert_eq!(
        reporter.reports(),
        vec![Captured::Exception("connection refused".to_string())]
    );
}

#[tokio::test]
async fn test_plain_values_are_reported_as_error_messages() {
    let reporter = Arc::new(RecordingReporter::new());
    let interceptor = interceptor(&reporter, WatchdogConfig::default());

    let completion = begin(&interceptor).wrap(|error: Option<&'static str>, _data: Option<()>| error);
    let error = completion.fail("validation failed").await;

    assert_eq!(error, Some("validation failed"));
    match &reporter.reports()[..] {
        [Captured::Message { text, level, extra }] => {
            assert_eq!(text, "validation failed");
            assert_eq!(*level, Level::Error);
            assert!(extra.is_empty());
        }
        other => panic!("unexpected reports {other:?}"),
    }
}

#[tokio::test]
async fn test_callback_waits_for_acknowledgement() {
    let reporter = Arc::new(RecordingReporter::with_mode(AckMode::Held));
    let interceptor = interceptor(&reporter, WatchdogConfig::default());
    let called = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&called);
    let completion = begin(&interceptor).wrap(move |error: Option<String>, data: Option<u32>| {
        flag.store(true, Ordering::SeqCst);
        (error, data)
    });

    let task = tokio::spawn(completion.fail("boom".to_string()));

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(reporter.held_count(), 1);
    assert!(!called.load(Ordering::SeqCst));
    assert!(!task.is_finished());

    reporter.release_all();

    let (error, data) = task.await.unwrap();
    assert!(called.load(Ordering::SeqCst));
    assert_eq!(error.as_deref(), Some("boom"));
    assert_eq!(data, None);
}

#[tokio::test]
async fn test_reporter_failure_still_completes() {
    let reporter = Arc::new(RecordingReporter::with_mode(AckMode::Failed));
    let interceptor = interceptor(&reporter, WatchdogConfig::default());

    let result: Result<u32, String> = Err("boom".to_string());
    let result = begin(&interceptor).complete(result).await;

    assert_eq!(result, Err("boom".to_string()));
    assert_eq!(reporter.reports().len(), 1);
}

#[tokio::test]
async fn test_dropped_acknowledger_still_completes() {
    let reporter = Arc::new(RecordingReporter::with_mode(AckMode::Dropped));
    let interceptor = interceptor(&reporter, WatchdogConfig::default());

    let result: Result<u32, String> = Err("boom".to_string());
    let result = begin(&interceptor).complete(result).await;

    assert_eq!(result, Err("boom".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_report_timeout_unblocks_completion() {
    let reporter = Arc::new(RecordingReporter::with_mode(AckMode::Held));
    let config = WatchdogConfig::builder()
        .capture_timeout_warnings(false)
        .capture_memory_warnings(false)
        .report_timeout(Duration::from_secs(2))
        .build();
    let interceptor = interceptor(&reporter, config);
    let start = Instant::now();

    let result: Result<u32, String> = Err("boom".to_string());
    let result = begin(&interceptor).complete(result).await;

    assert_eq!(result, Err("boom".to_string()));
    assert_eq!(start.elapsed(), Duration::from_secs(2));
    assert_eq!(reporter.held_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_completion_cancels_watchdog_before_reporting() {
    let reporter = Arc::new(RecordingReporter::new());
    let interceptor = interceptor(&reporter, WatchdogConfig::default());

    let invocation = begin(&interceptor);
    assert!(invocation.watchdog().is_active());

    let result: Result<u32, String> = Err("boom".to_string());
    let _ = invocation.complete(result).await;

    tokio::time::sleep(Duration::from_secs(30)).await;

    let texts: Vec<_> = reporter
        .reports()
        .iter()
        .map(|r| r.text().to_string())
        .collect();
    assert_eq!(texts, vec!["boom"]);
}

#[tokio::test(start_paused = true)]
async fn test_success_cancels_watchdog() {
    let reporter = Arc::new(RecordingReporter::new());
    let interceptor = interceptor(&reporter, WatchdogConfig::default());

    let completion = begin(&interceptor).wrap(|_error: Option<String>, data: Option<u32>| data);
    assert!(completion.invocation().watchdog().is_active());

    tokio::time::sleep(Duration::from_millis(5500)).await;
    assert_eq!(reporter.reports().len(), 1);

    assert_eq!(completion.succeed(1).await, Some(1));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(reporter.reports().len(), 1);
}

#[tokio::test]
async fn test_cancel_timers_is_idempotent() {
    let reporter = Arc::new(RecordingReporter::new());
    let interceptor = interceptor(&reporter, WatchdogConfig::default());

    let mut invocation = begin(&interceptor);
    invocation.cancel_timers();
    invocation.cancel_timers();

    assert!(!invocation.watchdog().is_active());
    assert_eq!(invocation.complete(Ok::<_, String>(5)).await, Ok(5));
    assert!(reporter.reports().is_empty());
}

#[tokio::test]
async fn test_begin_merges_event_and_tags() {
    let reporter = Arc::new(RecordingReporter::new());
    let interceptor = interceptor(&reporter, WatchdogConfig::default());

    let _invocation = begin(&interceptor);

    let contexts = reporter.contexts();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].extra["event"], json!({"orderId": 42}));
    assert_eq!(contexts[0].tags["Lambda"], "orders");
    assert_eq!(contexts[0].tags["Version"], "$LATEST");
    assert_eq!(contexts[0].tags["LogStream"], "2024/05/01/[$LATEST]abcdef");
}

#[tokio::test]
async fn test_begin_outside_lambda_merges_event_only() {
    let reporter = Arc::new(RecordingReporter::new());
    let interceptor = Interceptor::builder(Arc::clone(&reporter))
        .host(HostEnvironment::detached())
        .build();

    let invocation = interceptor.begin(
        &json!({"orderId": 42}),
        InvocationContext::new(Duration::from_secs(10), 128),
    );

    assert!(!invocation.watchdog().is_active());
    let contexts = reporter.contexts();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].extra["event"], json!({"orderId": 42}));
    assert!(contexts[0].tags.is_empty());
}

#[tokio::test]
async fn test_event_is_copied_at_begin() {
    let reporter = Arc::new(RecordingReporter::new());
    let interceptor = interceptor(&reporter, WatchdogConfig::default());

    let mut event = json!({"items": [1, 2]});
    let invocation =
        interceptor.begin(&event, InvocationContext::new(Duration::from_secs(10), 128));
    event["items"] = json!([]);

    let _ = invocation.complete(Ok::<_, String>(())).await;

    assert_eq!(reporter.contexts()[0].extra["event"], json!({"items": [1, 2]}));
}

#[tokio::test]
async fn test_interceptor_is_reused_across_invocations() {
    let reporter = Arc::new(RecordingReporter::new());
    let interceptor = interceptor(&reporter, WatchdogConfig::default());

    for i in 0..3 {
        let result: Result<u32, String> = Err(format!("failure {i}"));
        let _ = begin(&interceptor).complete(result).await;
    }

    assert_eq!(reporter.contexts().len(), 3);
    let texts: Vec<_> = reporter
        .reports()
        .iter()
        .map(|r| r.text().to_string())
        .collect();
    assert_eq!(texts, vec!["failure 0", "failure 1", "failure 2"]);
}

/// Memory probe that blocks its worker before reporting high usage.
struct SlowMemory {
    delay: Duration,
    used_mb: f64,
}

impl lambda_watchdog::MemoryProbe for SlowMemory {
    fn resident_mb(&self) -> f64 {
        std::thread::sleep(self.delay);
        self.used_mb
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_check_running_during_completion_never_reports_afterwards() {
    let reporter = Arc::new(RecordingReporter::new());
    let config = WatchdogConfig::builder()
        .capture_timeout_warnings(false)
        .memory_poll_interval(Duration::from_millis(50))
        .build();
    let interceptor = Interceptor::builder(Arc::clone(&reporter))
        .config(config)
        .host(lambda_host())
        .memory_probe(Arc::new(SlowMemory {
            delay: Duration::from_millis(300),
            used_mb: 99.0,
        }))
        .build();

    let mut invocation =
        interceptor.begin(&json!({}), InvocationContext::new(Duration::from_secs(10), 100));

    // The memory check is now blocked inside the probe on another worker.
    std::thread::sleep(Duration::from_millis(150));
    invocation.cancel_timers();

    let result: Result<u32, String> = Err("boom".to_string());
    let result = invocation.complete(result).await;
    assert_eq!(result, Err("boom".to_string()));

    let at_completion: Vec<String> =
        reporter.reports().iter().map(|r| r.text().to_string()).collect();
    assert_eq!(at_completion, vec!["boom"]);

    tokio::time::sleep(Duration::from_millis(500)).await;

    let later: Vec<String> = reporter.reports().iter().map(|r| r.text().to_string()).collect();
    assert_eq!(later, vec!["boom"]);
}
