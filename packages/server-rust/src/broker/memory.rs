//! Single-partition in-process topic.
//!
//! A `MemoryTopic` is both a [`MessageSource`] and a [`MessageSink`]: whatever is
//! published can be read back in publish order. Offsets start at 0 and grow by
//! one per message. Closing wakes any pending reader with [`BrokerError::Closed`].

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::{BrokerError, BrokerMessage, Headers, OutboundMessage};
use crate::traits::{MessageSink, MessageSource};

const PARTITION: i32 = 0;

/// In-memory topic with unbounded buffering.
#[derive(Debug)]
pub struct MemoryTopic {
    name: String,
    tx: mpsc::UnboundedSender<BrokerMessage>,
    rx: Mutex<mpsc::UnboundedReceiver<BrokerMessage>>,
    next_offset: AtomicI64,
    closed: CancellationToken,
}

impl MemoryTopic {
    /// Creates an empty topic.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            tx,
            rx: Mutex::new(rx),
            next_offset: AtomicI64::new(0),
            closed: CancellationToken::new(),
        }
    }

    /// Returns the topic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a message and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Closed`] if the topic has been closed.
    pub fn publish(
        &self,
        key: Option<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        headers: Headers,
    ) -> Result<i64, BrokerError> {
        if self.closed.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        let message = BrokerMessage {
            topic: self.name.clone(),
            partition: PARTITION,
            offset,
            key,
            value: value.into(),
            headers,
        };
        // The receiver lives as long as `self`, so the send cannot fail.
        let _ = self.tx.send(message);
        Ok(offset)
    }

    /// Appends a message with no key and no headers.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Closed`] if the topic has been closed.
    pub fn publish_value(&self, value: impl Into<Vec<u8>>) -> Result<i64, BrokerError> {
        self.publish(None, value, Vec::new())
    }

    /// Number of messages published so far.
    #[must_use]
    pub fn published(&self) -> i64 {
        self.next_offset.load(Ordering::SeqCst)
    }

    /// Removes and returns every message not yet read, without waiting.
    pub async fn drain(&self) -> Vec<BrokerMessage> {
        let mut rx = self.rx.lock().await;
        let mut drained = Vec::new();
        while let Ok(message) = rx.try_recv() {
            drained.push(message);
        }
        drained
    }
}

#[async_trait]
impl MessageSource for MemoryTopic {
    async fn read_message(&self) -> Result<BrokerMessage, BrokerError> {
        tokio::select! {
            () = self.closed.cancelled() => Err(BrokerError::Closed),
            message = async { self.rx.lock().await.recv().await } => {
                message.ok_or(BrokerError::Closed)
            }
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.cancel();
        Ok(())
    }
}

#[async_trait]
impl MessageSink for MemoryTopic {
    async fn write_messages(&self, messages: Vec<OutboundMessage>) -> Result<(), BrokerError> {
        if let Some(stray) = messages.iter().find(|m| m.topic != self.name) {
            return Err(BrokerError::UnknownTopic {
                topic: stray.topic.clone(),
            });
        }
        for message in messages {
            self.publish(message.key, message.value, message.headers)?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.cancel();
        Ok(())
    }
}
