//! Broker message types and adapters.
//!
//! The pipeline talks to a broker only through [`MessageSource`](crate::MessageSource)
//! and [`MessageSink`](crate::MessageSink). Two adapters ship with the crate:
//! - [`memory`]: single-partition in-process topic
//! - [`lines`]: newline-delimited envelopes over any async reader/writer (stdin/stdout)

pub mod lines;
pub mod memory;

pub use lines::{LineSink, LineSource};
pub use memory::MemoryTopic;

/// Raw header list, in broker order. Values are opaque bytes.
pub type Headers = Vec<(String, Vec<u8>)>;

/// One message pulled from a topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub headers: Headers,
}

/// One message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub headers: Headers,
}

/// Errors reported by broker clients.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The client was closed by its owner.
    #[error("broker client closed")]
    Closed,
    /// The broker could not be reached or refused the request.
    #[error("broker unavailable: {reason}")]
    Unavailable { reason: String },
    /// A message was addressed to a topic this client does not serve.
    #[error("unknown topic: {topic}")]
    UnknownTopic { topic: String },
    #[error("broker i/o error: {0}")]
    Io(#[from] std::io::Error),
}
