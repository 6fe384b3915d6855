/*!
 * Tracing
 * Structured tracing for inbound requests using the tracing crate
 *
 * `log` records from the managers reach the subscriber through the
 * tracing-log bridge installed by `init`.
 */

use crate::core::id::UserId;
use std::cell::Cell;
use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Requests slower than this are reported at warn level
const SLOW_REQUEST: Duration = Duration::from_millis(10);

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - ABILITY_KERNEL_TRACE_JSON: Enable JSON output (default: false)
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("ABILITY_KERNEL_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::NONE)
                    .compact(),
            )
            .try_init()
    };

    match installed {
        Ok(()) => info!(json = use_json, "Structured tracing initialized"),
        Err(e) => debug!("Tracing subscriber already installed: {}", e),
    }
}

/// Span around one inbound request
pub struct RequestSpan {
    span: tracing::Span,
    start: Instant,
    operation: &'static str,
    trace_id: String,
    result: Cell<Option<i32>>,
}

impl RequestSpan {
    pub fn new(operation: &'static str, user: UserId) -> Self {
        let trace_id = Uuid::new_v4().to_string();
        let span = span!(
            Level::DEBUG,
            "request",
            trace_id = %trace_id,
            operation = operation,
            user = user,
            result = tracing::field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
            operation,
            trace_id,
            result: Cell::new(None),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn record_result(&self, code: i32) {
        self.result.set(Some(code));
        self.span.record("result", code);
    }

    /// Result code recorded so far
    pub fn result(&self) -> Option<i32> {
        self.result.get()
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for RequestSpan {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let _entered = self.span.enter();
        if elapsed > SLOW_REQUEST {
            warn!(
                trace_id = %self.trace_id,
                operation = self.operation,
                result = ?self.result.get(),
                duration_ms = elapsed.as_millis() as u64,
                "slow request"
            );
        } else {
            debug!(
                operation = self.operation,
                result = ?self.result.get(),
                duration_us = elapsed.as_micros() as u64,
                "request completed"
            );
        }
    }
}

#[inline]
pub fn span_request(operation: &'static str, user: UserId) -> RequestSpan {
    RequestSpan::new(operation, user)
}
