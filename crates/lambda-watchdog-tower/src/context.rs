//! Conversion from the Lambda runtime context to an invocation budget.

use lambda_watchdog::InvocationContext;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Builds the invocation budget from a Lambda runtime context.
///
/// The remaining time is the distance from now to the context's deadline
/// (milliseconds since the Unix epoch), clamped at zero. A negative or zero
/// configured memory size is treated as unknown.
pub fn invocation_context(ctx: &lambda_runtime::Context) -> InvocationContext {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let remaining = Duration::from_millis(ctx.deadline.saturating_sub(now_ms));
    let memory_limit_mb = u64::try_from(ctx.env_config.memory).unwrap_or(0);

    InvocationContext::new(remaining, memory_limit_mb)
}
