//! Dispatch Core: command/result envelopes, causal context, and the wire codec.

pub mod codec;
pub mod context;
pub mod envelope;
pub mod messages;
pub mod types;

pub use codec::{CodecError, WireFormat};
pub use context::CausalContext;
pub use envelope::{CommandEnvelope, Payload, ResultEnvelope};
pub use messages::{CommandKind, ResultKind};
pub use types::{CourierId, OrderId};
