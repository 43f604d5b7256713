//! Newline-delimited broker adapter.
//!
//! Each non-blank input line is one message value, passed through as raw bytes
//! so that undecodable input surfaces as a per-message decode failure. Each
//! published value is written followed by `\n`. Headers are not representable and are dropped on
//! output. Lets the server run end to end over stdin/stdout.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{BrokerError, BrokerMessage, OutboundMessage};
use crate::traits::{MessageSink, MessageSource};

/// Source reading one message per line from an async reader.
///
/// At end of input the source stays pending forever instead of reporting an
/// error, so an exhausted input idles until the pipeline is stopped.
pub struct LineSource<R> {
    topic: String,
    input: Mutex<LineBuffer<R>>,
    next_offset: AtomicI64,
    exhausted: AtomicBool,
    closed: AtomicBool,
}

/// Reader plus the bytes of the line currently being assembled.
struct LineBuffer<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> LineSource<R> {
    /// Wraps `reader`, labelling its messages with `topic`.
    pub fn new(topic: impl Into<String>, reader: R) -> Self {
        Self {
            topic: topic.into(),
            input: Mutex::new(LineBuffer {
                reader: BufReader::new(reader),
                line: Vec::new(),
            }),
            next_offset: AtomicI64::new(0),
            exhausted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }
}

impl LineSource<tokio::io::Stdin> {
    /// Source over the process's standard input.
    pub fn stdin(topic: impl Into<String>) -> Self {
        Self::new(topic, tokio::io::stdin())
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> MessageSource for LineSource<R> {
    async fn read_message(&self) -> Result<BrokerMessage, BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        if self.exhausted.load(Ordering::Acquire) {
            return std::future::pending().await;
        }

        let mut input = self.input.lock().await;
        let LineBuffer { reader, line } = &mut *input;
        loop {
            // `read_until` keeps partial input in `line`, so dropping this future loses nothing.
            let read = reader.read_until(b'\n', line).await?;
            if read == 0 && line.is_empty() {
                if !self.exhausted.swap(true, Ordering::AcqRel) {
                    info!(topic = %self.topic, "line source reached end of input");
                }
                drop(input);
                return std::future::pending().await;
            }

            let mut value = std::mem::take(line);
            while matches!(value.last(), Some(b'\n' | b'\r')) {
                value.pop();
            }
            if value.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
            return Ok(BrokerMessage {
                topic: self.topic.clone(),
                partition: 0,
                offset,
                key: None,
                value,
                headers: Vec::new(),
            });
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Sink writing one message value per line to an async writer.
pub struct LineSink<W> {
    topic: String,
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> LineSink<W> {
    /// Wraps `writer`; only messages addressed to `topic` are accepted.
    pub fn new(topic: impl Into<String>, writer: W) -> Self {
        Self {
            topic: topic.into(),
            writer: Mutex::new(writer),
        }
    }
}

impl LineSink<tokio::io::Stdout> {
    /// Sink over the process's standard output.
    pub fn stdout(topic: impl Into<String>) -> Self {
        Self::new(topic, tokio::io::stdout())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageSink for LineSink<W> {
    async fn write_messages(&self, messages: Vec<OutboundMessage>) -> Result<(), BrokerError> {
        if let Some(stray) = messages.iter().find(|m| m.topic != self.topic) {
            return Err(BrokerError::UnknownTopic {
                topic: stray.topic.clone(),
            });
        }
        let mut writer = self.writer.lock().await;
        for message in &messages {
            writer.write_all(&message.value).await?;
            writer.write_all(b"\n").await?;
        }
        writer.flush().await?;
        debug!(topic = %self.topic, count = messages.len(), "lines written");
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }
}
