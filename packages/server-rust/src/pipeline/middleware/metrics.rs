//! Metrics middleware for command handling.
//!
//! Runs every handler call inside a `command` span that records duration and
//! outcome, and feeds the `metrics` facade. Without an installed recorder the
//! counters are no-ops.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use dispatch_core::{CommandEnvelope, ResultEnvelope};
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::pipeline::handler::{HandleError, HandleOutcome};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments handler calls with timing and counting.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records handler duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Outcome label: `ok`, `no_result`, or the error kind.
fn outcome_label(outcome: &HandleOutcome) -> &'static str {
    match outcome {
        Ok(Some(_)) => "ok",
        Ok(None) => "no_result",
        Err(err) => err.kind(),
    }
}

impl<S> Service<CommandEnvelope> for MetricsService<S>
where
    S: Service<CommandEnvelope, Response = Option<ResultEnvelope>, Error = HandleError> + Send,
    S::Future: Send + 'static,
{
    type Response = Option<ResultEnvelope>;
    type Error = HandleError;
    type Future = Pin<Box<dyn Future<Output = HandleOutcome> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, command: CommandEnvelope) -> Self::Future {
        let name = command.name.clone();
        let span = info_span!(
            "command",
            command_id = %command.id,
            command = %name,
            trace_id = command.context.trace_id.as_deref(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(command);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();
                let outcome = outcome_label(&result);

                let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(
                    "dispatch_commands_total",
                    "command" => name,
                    "outcome" => outcome
                )
                .increment(1);
                metrics::histogram!("dispatch_command_duration_ms")
                    .record(elapsed.as_secs_f64() * 1_000.0);

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
