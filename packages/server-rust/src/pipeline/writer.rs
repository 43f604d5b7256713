//! Result writer: encode a result envelope and publish it to the result topic.
//!
//! Thin by intent: failures are returned to the caller, retry policy lives in
//! the processor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dispatch_core::codec::{self, CodecError, WireFormat};
use dispatch_core::ResultEnvelope;
use tracing::debug;

use crate::broker::{BrokerError, OutboundMessage};
use crate::traits::MessageSink;

/// Why a result was not published.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("result encoding failed: {0}")]
    Encode(#[source] CodecError),
    #[error("publish failed: {0}")]
    Publish(#[source] BrokerError),
    #[error("result writer closed")]
    Closed,
}

impl WriteError {
    /// Only broker failures are worth retrying; encoding is deterministic.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Publish(err) if !matches!(err, BrokerError::Closed))
    }
}

/// Publishes results to one topic.
pub struct ResultWriter {
    sink: Arc<dyn MessageSink>,
    topic: String,
    format: WireFormat,
    closed: AtomicBool,
}

impl ResultWriter {
    #[must_use]
    pub fn new(sink: Arc<dyn MessageSink>, topic: impl Into<String>, format: WireFormat) -> Self {
        Self {
            sink,
            topic: topic.into(),
            format,
            closed: AtomicBool::new(false),
        }
    }

    /// Publishes `result`. `None` is a no-op success.
    ///
    /// The broker key is the result id; the causal context becomes headers.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::Closed`] after [`close`](Self::close), and the
    /// encode or publish failure otherwise. Nothing is retried here.
    pub async fn write(&self, result: Option<&ResultEnvelope>) -> Result<(), WriteError> {
        let Some(result) = result else {
            return Ok(());
        };
        if self.closed.load(Ordering::Acquire) {
            return Err(WriteError::Closed);
        }

        let value = codec::encode_result(self.format, result).map_err(WriteError::Encode)?;
        let message = OutboundMessage {
            topic: self.topic.clone(),
            key: Some(result.id.to_string().into_bytes()),
            value,
            headers: result.context.to_headers(),
        };

        self.sink
            .write_messages(vec![message])
            .await
            .map_err(WriteError::Publish)?;
        debug!(result_id = %result.id, result = %result.name, topic = %self.topic, "result published");
        Ok(())
    }

    /// Closes the underlying sink. Later writes fail with [`WriteError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::Closed`] if already closed, or the sink's error.
    pub async fn close(&self) -> Result<(), WriteError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(WriteError::Closed);
        }
        self.sink.close().await.map_err(WriteError::Publish)
    }
}
