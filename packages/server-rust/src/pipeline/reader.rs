//! Command reader: background consumption loop plus a pull API.
//!
//! The loop pulls raw messages from the injected [`MessageSource`], decodes
//! them and hands envelopes to the processor through a capacity-1 command
//! channel. Decode and transport failures go to a separate capacity-1 error
//! channel with `try_send`; when that channel is full the new error is
//! dropped and logged, so a slow consumer never stalls consumption.

use std::sync::Arc;

use dispatch_core::codec::{self, CodecError, WireFormat};
use dispatch_core::{CausalContext, CommandEnvelope};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::BackoffConfig;
use super::lifecycle::{Lifecycle, LifecycleError};
use crate::broker::{BrokerError, BrokerMessage};
use crate::traits::MessageSource;

const COMPONENT: &str = "command reader";

/// Why [`CommandReader::read`] returned without a command.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// The token passed to `read` was cancelled.
    #[error("read cancelled")]
    Cancelled,
    /// The reader is not running, or was stopped while the caller waited.
    #[error("command channel closed")]
    ChannelClosed,
    /// A message could not be decoded and was skipped.
    #[error("malformed message at partition {partition} offset {offset}: {source}")]
    Decode {
        partition: i32,
        offset: i64,
        #[source]
        source: CodecError,
    },
    /// The broker read failed; the loop retries after a backoff.
    #[error("broker read failed: {0}")]
    Transport(#[from] BrokerError),
}

struct Receivers {
    commands: mpsc::Receiver<CommandEnvelope>,
    errors: mpsc::Receiver<ReadError>,
    errors_open: bool,
}

/// Reads commands from one topic.
pub struct CommandReader {
    source: Arc<dyn MessageSource>,
    format: WireFormat,
    backoff: BackoffConfig,
    lifecycle: Lifecycle<()>,
    channels: parking_lot::Mutex<Option<Arc<tokio::sync::Mutex<Receivers>>>>,
}

impl CommandReader {
    /// Creates a stopped reader over `source`. The reader never closes `source`.
    #[must_use]
    pub fn new(source: Arc<dyn MessageSource>, format: WireFormat, backoff: BackoffConfig) -> Self {
        Self {
            source,
            format,
            backoff,
            lifecycle: Lifecycle::new(COMPONENT),
            channels: parking_lot::Mutex::new(None),
        }
    }

    /// Starts the consumption loop under a child of `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AlreadyStarted`] if the reader is not stopped.
    pub fn start(&self, parent: &CancellationToken) -> Result<(), LifecycleError> {
        self.lifecycle.start(parent, |token| {
            let (command_tx, command_rx) = mpsc::channel(1);
            let (error_tx, error_rx) = mpsc::channel(1);
            *self.channels.lock() = Some(Arc::new(tokio::sync::Mutex::new(Receivers {
                commands: command_rx,
                errors: error_rx,
                errors_open: true,
            })));

            ConsumeLoop {
                source: Arc::clone(&self.source),
                format: self.format,
                backoff: self.backoff,
                commands: command_tx,
                errors: error_tx,
            }
            .run(token)
        })
    }

    /// Stops the loop, waits for it to exit, and closes both channels.
    ///
    /// Callers blocked in [`read`](Self::read) wake up with
    /// [`ReadError::ChannelClosed`].
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotRunning`] if the reader is not running.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        // Cleared together with the Running -> Stopping flip, so a `start`
        // racing this call can never have its fresh channels discarded.
        self.lifecycle
            .stop_with(|| {
                self.channels.lock().take();
            })
            .await
    }

    /// Waits for the next decoded command, reported error, or cancellation,
    /// whichever comes first. No source has priority over another.
    ///
    /// Cancel-safe: dropping the future loses no command.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::Cancelled`] when `cancel` fires,
    /// [`ReadError::ChannelClosed`] when the reader is not running, and the
    /// reported [`ReadError::Decode`] / [`ReadError::Transport`] errors.
    pub async fn read(&self, cancel: &CancellationToken) -> Result<CommandEnvelope, ReadError> {
        let receivers = self
            .channels
            .lock()
            .clone()
            .ok_or(ReadError::ChannelClosed)?;

        let mut guard = tokio::select! {
            () = cancel.cancelled() => return Err(ReadError::Cancelled),
            guard = receivers.lock() => guard,
        };
        let Receivers {
            commands,
            errors,
            errors_open,
        } = &mut *guard;

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Err(ReadError::Cancelled),
                command = commands.recv() => return command.ok_or(ReadError::ChannelClosed),
                error = errors.recv(), if *errors_open => match error {
                    Some(error) => return Err(error),
                    None => *errors_open = false,
                },
            }
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}

// ---------------------------------------------------------------------------
// Consumption loop
// ---------------------------------------------------------------------------

struct ConsumeLoop {
    source: Arc<dyn MessageSource>,
    format: WireFormat,
    backoff: BackoffConfig,
    commands: mpsc::Sender<CommandEnvelope>,
    errors: mpsc::Sender<ReadError>,
}

impl ConsumeLoop {
    async fn run(self, token: CancellationToken) {
        let mut failures: u32 = 0;

        loop {
            let read = tokio::select! {
                () = token.cancelled() => break,
                read = self.source.read_message() => read,
            };

            let message = match read {
                Ok(message) => {
                    failures = 0;
                    message
                }
                Err(error) => {
                    let delay = self.backoff.delay_for(failures);
                    failures = failures.saturating_add(1);
                    warn!(
                        error = %error,
                        consecutive_failures = failures,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "broker read failed"
                    );
                    self.report(ReadError::Transport(error));
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            let Some(command) = self.decode(&message) else {
                continue;
            };

            tokio::select! {
                () = token.cancelled() => break,
                sent = self.commands.send(command) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("reader loop exited");
    }

    fn decode(&self, message: &BrokerMessage) -> Option<CommandEnvelope> {
        match codec::decode_command(self.format, &message.value) {
            Ok(command) => {
                debug!(
                    command_id = %command.id,
                    command = %command.name,
                    partition = message.partition,
                    offset = message.offset,
                    "command decoded"
                );
                Some(command.with_context(CausalContext::from_headers(&message.headers)))
            }
            Err(source) => {
                warn!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %source,
                    "skipping malformed message"
                );
                self.report(ReadError::Decode {
                    partition: message.partition,
                    offset: message.offset,
                    source,
                });
                None
            }
        }
    }

    fn report(&self, error: ReadError) {
        if let Err(TrySendError::Full(dropped)) = self.errors.try_send(error) {
            metrics::counter!("dispatch_reader_errors_dropped_total").increment(1);
            warn!(error = %dropped, "error channel full, dropping report");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use dispatch_core::context::TRACEPARENT_HEADER;
    use tokio::time::Instant;

    use super::*;
    use crate::broker::MemoryTopic;

    const VALID: &[u8] =
        br#"{"id":"c1","name":"create_order.assign_courier","payload":{"orderID":"o1"}}"#;

    fn reader_over(topic: &Arc<MemoryTopic>) -> CommandReader {
        CommandReader::new(
            Arc::clone(topic) as Arc<dyn MessageSource>,
            WireFormat::Json,
            BackoffConfig::default(),
        )
    }

    /// Source replaying a fixed script, then pending forever.
    struct ScriptedSource {
        script: tokio::sync::Mutex<VecDeque<Result<BrokerMessage, BrokerError>>>,
        calls: parking_lot::Mutex<Vec<Instant>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<BrokerMessage, BrokerError>>) -> Self {
            Self {
                script: tokio::sync::Mutex::new(script.into()),
                calls: parking_lot::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MessageSource for ScriptedSource {
        async fn read_message(&self) -> Result<BrokerMessage, BrokerError> {
            self.calls.lock().push(Instant::now());
            let next = self.script.lock().await.pop_front();
            match next {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }

        async fn close(&self) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    fn message(value: &[u8]) -> BrokerMessage {
        BrokerMessage {
            topic: "commands".to_string(),
            partition: 0,
            offset: 0,
            key: None,
            value: value.to_vec(),
            headers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn lifecycle_guards() {
        let topic = Arc::new(MemoryTopic::new("commands"));
        let reader = reader_over(&topic);
        let root = CancellationToken::new();

        assert!(matches!(
            reader.stop().await,
            Err(LifecycleError::NotRunning { .. })
        ));
        reader.start(&root).unwrap();
        assert!(matches!(
            reader.start(&root),
            Err(LifecycleError::AlreadyStarted { .. })
        ));
        reader.stop().await.unwrap();
        assert!(matches!(
            reader.stop().await,
            Err(LifecycleError::NotRunning { .. })
        ));
    }

    #[tokio::test]
    async fn decodes_commands_and_attaches_context() {
        let topic = Arc::new(MemoryTopic::new("commands"));
        topic
            .publish(
                None,
                VALID.to_vec(),
                vec![(
                    TRACEPARENT_HEADER.to_string(),
                    b"00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_vec(),
                )],
            )
            .unwrap();

        let reader = reader_over(&topic);
        let root = CancellationToken::new();
        reader.start(&root).unwrap();

        let command = reader.read(&root).await.unwrap();
        assert_eq!(command.id, "c1");
        assert_eq!(command.name, "create_order.assign_courier");
        assert_eq!(
            command.context.trace_id.as_deref(),
            Some("4bf92f3577b34da6a3ce929d0e0e4736")
        );
        reader.stop().await.unwrap();
    }

    #[tokio::test]
    async fn decode_failure_does_not_block_next_message() {
        let topic = Arc::new(MemoryTopic::new("commands"));
        topic.publish_value(b"{garbage".to_vec()).unwrap();
        topic.publish_value(VALID.to_vec()).unwrap();

        let reader = reader_over(&topic);
        let root = CancellationToken::new();
        reader.start(&root).unwrap();

        let mut decode_errors = 0;
        let command = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                match reader.read(&root).await {
                    Ok(command) => break command,
                    Err(ReadError::Decode { offset, .. }) => {
                        assert_eq!(offset, 0);
                        decode_errors += 1;
                    }
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(command.id, "c1");
        assert!(decode_errors <= 1);
        reader.stop().await.unwrap();
    }

    #[tokio::test]
    async fn full_error_channel_drops_new_errors_and_keeps_consuming() {
        let topic = Arc::new(MemoryTopic::new("commands"));
        for _ in 0..3 {
            topic.publish_value(b"not an envelope".to_vec()).unwrap();
        }
        topic.publish_value(VALID.to_vec()).unwrap();

        let reader = reader_over(&topic);
        let root = CancellationToken::new();
        reader.start(&root).unwrap();

        // Nobody reads while the loop works through the backlog.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut errors = 0;
        let mut commands = 0;
        while let Ok(next) = tokio::time::timeout(Duration::from_millis(50), reader.read(&root)).await
        {
            match next {
                Ok(_) => commands += 1,
                Err(ReadError::Decode { .. }) => errors += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(commands, 1);
        assert_eq!(errors, 1, "only the first error fits in the channel");
        reader.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_wakes_blocked_reader_with_channel_closed() {
        let topic = Arc::new(MemoryTopic::new("commands"));
        let reader = Arc::new(reader_over(&topic));
        let root = CancellationToken::new();
        reader.start(&root).unwrap();

        let blocked = {
            let reader = Arc::clone(&reader);
            let root = root.clone();
            tokio::spawn(async move { reader.read(&root).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        reader.stop().await.unwrap();
        assert!(!reader.is_running());
        assert!(matches!(
            blocked.await.unwrap(),
            Err(ReadError::ChannelClosed)
        ));
        assert!(matches!(
            reader.read(&root).await,
            Err(ReadError::ChannelClosed)
        ));

        // Nothing is consumed after stop returns.
        topic.publish_value(VALID.to_vec()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(topic.drain().await.len(), 1);
    }

    #[tokio::test]
    async fn restarted_reader_serves_commands_again() {
        let topic = Arc::new(MemoryTopic::new("commands"));
        let reader = reader_over(&topic);
        let root = CancellationToken::new();

        reader.start(&root).unwrap();
        reader.stop().await.unwrap();
        reader.start(&root).unwrap();

        topic.publish_value(VALID.to_vec()).unwrap();
        let command = tokio::time::timeout(Duration::from_secs(1), reader.read(&root))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(command.id, "c1");
        reader.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn start_racing_stop_keeps_its_channels() {
        let topic = Arc::new(MemoryTopic::new("commands"));
        let reader = Arc::new(reader_over(&topic));
        let root = CancellationToken::new();
        reader.start(&root).unwrap();

        for round in 0..32 {
            let stopper = {
                let reader = Arc::clone(&reader);
                tokio::spawn(async move { reader.stop().await })
            };
            let starter = {
                let reader = Arc::clone(&reader);
                let root = root.clone();
                tokio::spawn(async move {
                    while reader.start(&root).is_err() {
                        tokio::task::yield_now().await;
                    }
                })
            };
            stopper.await.unwrap().unwrap();
            starter.await.unwrap();
            assert!(reader.is_running());

            topic.publish_value(VALID.to_vec()).unwrap();
            let command = tokio::time::timeout(Duration::from_secs(1), reader.read(&root))
                .await
                .unwrap_or_else(|_| panic!("round {round}: restarted reader delivered nothing"))
                .unwrap();
            assert_eq!(command.id, "c1");
        }

        reader.stop().await.unwrap();
    }

    #[tokio::test]
    async fn read_before_start_is_channel_closed() {
        let topic = Arc::new(MemoryTopic::new("commands"));
        let reader = reader_over(&topic);
        let root = CancellationToken::new();
        assert!(matches!(
            reader.read(&root).await,
            Err(ReadError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn cancelled_read_returns_cancelled() {
        let topic = Arc::new(MemoryTopic::new("commands"));
        let reader = reader_over(&topic);
        let root = CancellationToken::new();
        reader.start(&root).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            reader.read(&cancel).await,
            Err(ReadError::Cancelled)
        ));
        reader.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_back_off_exponentially() {
        let source = Arc::new(ScriptedSource::new(vec![
            Err(BrokerError::Unavailable {
                reason: "down".into(),
            }),
            Err(BrokerError::Unavailable {
                reason: "down".into(),
            }),
            Err(BrokerError::Unavailable {
                reason: "down".into(),
            }),
            Ok(message(VALID)),
        ]));
        let reader = CommandReader::new(
            Arc::clone(&source) as Arc<dyn MessageSource>,
            WireFormat::Json,
            BackoffConfig::default(),
        );
        let root = CancellationToken::new();
        reader.start(&root).unwrap();

        let command = loop {
            match reader.read(&root).await {
                Ok(command) => break command,
                Err(ReadError::Transport(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        };
        assert_eq!(command.id, "c1");

        let calls = source.calls.lock().clone();
        assert!(calls.len() >= 4);
        let gaps: Vec<Duration> = calls.windows(2).take(3).map(|w| w[1] - w[0]).collect();
        assert!(gaps[0] >= Duration::from_millis(50));
        assert!(gaps[1] >= Duration::from_millis(100));
        assert!(gaps[2] >= Duration::from_millis(200));

        reader.stop().await.unwrap();
    }
}
