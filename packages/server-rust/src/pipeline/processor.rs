//! Processor: the top-level dispatch loop.
//!
//! Pulls one command at a time from the reader, runs it through the handler
//! stack and forwards any result to the writer. Every per-message failure is
//! logged and absorbed; only cancellation ends the loop. While the reader is
//! stopped the loop backs off and polls again, so a restarted reader is picked
//! up without restarting the processor.

use std::sync::Arc;

use dispatch_core::{CommandEnvelope, ResultEnvelope};
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, warn};

use super::config::{BackoffConfig, RetryConfig};
use super::handler::HandleError;
use super::lifecycle::{Lifecycle, LifecycleError};
use super::reader::{CommandReader, ReadError};
use super::writer::{ResultWriter, WriteError};

const COMPONENT: &str = "processor";

/// Drives commands from a [`CommandReader`] through a handler service `S`.
pub struct Processor<S> {
    reader: Arc<CommandReader>,
    writer: Arc<ResultWriter>,
    handler: S,
    retry: RetryConfig,
    idle_backoff: BackoffConfig,
    lifecycle: Lifecycle<()>,
}

impl<S> Processor<S>
where
    S: Service<CommandEnvelope, Response = Option<ResultEnvelope>, Error = HandleError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    #[must_use]
    pub fn new(
        reader: Arc<CommandReader>,
        writer: Arc<ResultWriter>,
        handler: S,
        retry: RetryConfig,
    ) -> Self {
        Self {
            reader,
            writer,
            handler,
            retry,
            idle_backoff: BackoffConfig::default(),
            lifecycle: Lifecycle::new(COMPONENT),
        }
    }

    /// Pacing of the loop while the reader is stopped.
    #[must_use]
    pub fn with_idle_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.idle_backoff = backoff;
        self
    }

    /// Launches the dispatch loop under a child of `parent`.
    ///
    /// The reader is not started here; its lifecycle is independent.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AlreadyStarted`] if the processor is not stopped.
    pub fn start(&self, parent: &CancellationToken) -> Result<(), LifecycleError> {
        let dispatch = DispatchLoop {
            reader: Arc::clone(&self.reader),
            writer: Arc::clone(&self.writer),
            handler: self.handler.clone(),
            retry: self.retry,
            idle_backoff: self.idle_backoff,
        };
        self.lifecycle.start(parent, |token| dispatch.run(token))
    }

    /// Cancels the loop and waits for it to exit. A command being handled
    /// when `stop` is called is abandoned.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotRunning`] if the processor is not running.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        self.lifecycle.stop().await
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}

// ---------------------------------------------------------------------------
// Dispatch loop
// ---------------------------------------------------------------------------

struct DispatchLoop<S> {
    reader: Arc<CommandReader>,
    writer: Arc<ResultWriter>,
    handler: S,
    retry: RetryConfig,
    idle_backoff: BackoffConfig,
}

impl<S> DispatchLoop<S>
where
    S: Service<CommandEnvelope, Response = Option<ResultEnvelope>, Error = HandleError>,
{
    async fn run(mut self, token: CancellationToken) {
        let mut idle: u32 = 0;

        loop {
            let command = match self.reader.read(&token).await {
                Ok(command) => {
                    idle = 0;
                    command
                }
                Err(ReadError::Cancelled) => break,
                Err(ReadError::ChannelClosed) => {
                    if idle == 0 {
                        warn!("command channel closed, waiting for the reader");
                    }
                    let delay = self.idle_backoff.delay_for(idle);
                    idle = idle.saturating_add(1);
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = tokio::time::sleep(delay) => continue,
                    }
                }
                Err(err) => {
                    warn!(error = %err, "read error");
                    continue;
                }
            };

            let command_id = command.id.clone();
            let command_name = command.name.clone();

            let outcome = tokio::select! {
                () = token.cancelled() => break,
                outcome = self.handle(command) => outcome,
            };

            let result = match outcome {
                Ok(result) => result,
                Err(err) => {
                    warn!(
                        command_id = %command_id,
                        command = %command_name,
                        error = %err,
                        "command failed"
                    );
                    None
                }
            };

            if let Some(result) = &result {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = publish(&self.writer, self.retry, result) => {}
                }
            }

            info!(
                command_id = %command_id,
                command = %command_name,
                result = result.as_ref().map(|r| r.name.as_str()),
                "command processed"
            );
        }

        debug!("dispatch loop exited");
    }

    async fn handle(
        &mut self,
        command: CommandEnvelope,
    ) -> Result<Option<ResultEnvelope>, HandleError> {
        self.handler.ready().await?.call(command).await
    }
}

/// Publishes with up to `retry.attempts` extra tries, then drops the result.
async fn publish(writer: &ResultWriter, retry: RetryConfig, result: &ResultEnvelope) {
    let mut attempt = 0;
    loop {
        match writer.write(Some(result)).await {
            Ok(()) => return,
            Err(err) if err.is_retryable() && attempt < retry.attempts => {
                attempt += 1;
                warn!(
                    result_id = %result.id,
                    attempt,
                    error = %err,
                    "publish failed, retrying"
                );
                tokio::time::sleep(retry.delay).await;
            }
            Err(err) => {
                drop_result(result, attempt, &err);
                return;
            }
        }
    }
}

fn drop_result(result: &ResultEnvelope, retries: u32, err: &WriteError) {
    metrics::counter!("dispatch_results_dropped_total").increment(1);
    error!(
        result_id = %result.id,
        result = %result.name,
        retries,
        error = %err,
        "result dropped"
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
