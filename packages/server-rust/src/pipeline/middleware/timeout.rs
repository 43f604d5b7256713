//! Timeout middleware for command handling.
//!
//! Fails commands that exceed the configured handler timeout with
//! `HandleError::Timeout`. The abandoned handler future is dropped.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use dispatch_core::{CommandEnvelope, ResultEnvelope};
use tower::{Layer, Service};

use crate::pipeline::handler::{HandleError, HandleOutcome};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer that bounds every handler call by a fixed duration.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    timeout: Duration,
}

impl TimeoutLayer {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            timeout: self.timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

/// Service wrapper that enforces the handler timeout.
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    timeout: Duration,
}

impl<S> Service<CommandEnvelope> for TimeoutService<S>
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
        let timeout = self.timeout;
        let fut = self.inner.call(command);
        Box::pin(async move {
            match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(HandleError::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    /// Service that takes a configurable delay before responding.
    #[derive(Clone)]
    struct SlowService {
        delay: Duration,
    }

    impl Service<CommandEnvelope> for SlowService {
        type Response = Option<ResultEnvelope>;
        type Error = HandleError;
        type Future = Pin<Box<dyn Future<Output = HandleOutcome> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _command: CommandEnvelope) -> Self::Future {
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(None)
            })
        }
    }

    fn command() -> CommandEnvelope {
        CommandEnvelope::new("c1", "create_order.assign_courier", json!({ "orderID": "o1" }))
    }

    #[tokio::test(start_paused = true)]
    async fn completes_within_timeout() {
        let svc = TimeoutLayer::new(Duration::from_secs(1)).layer(SlowService {
            delay: Duration::from_millis(10),
        });
        assert!(svc.oneshot(command()).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn exceeds_timeout_returns_error() {
        let svc = TimeoutLayer::new(Duration::from_millis(50)).layer(SlowService {
            delay: Duration::from_millis(200),
        });
        let err = svc.oneshot(command()).await.unwrap_err();
        assert!(matches!(err, HandleError::Timeout { timeout_ms: 50 }));
    }
}
