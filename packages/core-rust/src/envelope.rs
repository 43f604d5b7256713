//! In-memory command and result envelopes.
//!
//! An envelope wraps one broker message: identifier, name tag, structured
//! payload and the causal context taken from (or destined for) broker headers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::CodecError;
use crate::context::CausalContext;
use crate::messages::{CommandKind, ResultKind, UnknownName};

/// Arbitrary structured payload. Decoded into a typed shape only by the handler.
pub type Payload = serde_json::Value;

/// A decoded command, handed from the reader to the processor exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    /// Producer-assigned identifier (a UUID string by convention, not enforced).
    pub id: String,
    /// Raw command name. Resolved against [`CommandKind`] at dispatch time.
    pub name: String,
    /// Command-specific payload, still untyped.
    pub payload: Payload,
    /// Trace context propagated from the broker headers.
    pub context: CausalContext,
}

impl CommandEnvelope {
    /// Creates an envelope with an empty causal context.
    pub fn new(id: impl Into<String>, name: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            payload,
            context: CausalContext::default(),
        }
    }

    /// Attaches a causal context to this envelope.
    #[must_use]
    pub fn with_context(mut self, context: CausalContext) -> Self {
        self.context = context;
        self
    }

    /// Resolves the name against the closed command catalogue.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownName`] if the name is not a known command.
    pub fn kind(&self) -> Result<CommandKind, UnknownName> {
        self.name.parse()
    }

    /// Decodes the payload into the command-specific shape `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Payload`] if the payload does not match `T`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        T::deserialize(&self.payload).map_err(|source| CodecError::Payload {
            expected: std::any::type_name::<T>(),
            source,
        })
    }
}

/// A result produced by the handler and published by the writer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEnvelope {
    /// Freshly generated identifier, unrelated to the triggering command's id.
    pub id: Uuid,
    /// Result tag from the closed catalogue.
    pub name: ResultKind,
    /// Typed result data, already encoded to a structured value.
    pub payload: Payload,
    /// Context inherited from the triggering command.
    pub context: CausalContext,
}

impl ResultEnvelope {
    /// Builds a result with a new v4 identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if `payload` cannot be represented as a
    /// structured value (e.g. a map with non-string keys).
    pub fn new<T: Serialize>(
        name: ResultKind,
        payload: &T,
        context: CausalContext,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            payload: serde_json::to_value(payload)?,
            context,
        })
    }

    /// Decodes the payload into the result-specific shape `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Payload`] if the payload does not match `T`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        T::deserialize(&self.payload).map_err(|source| CodecError::Payload {
            expected: std::any::type_name::<T>(),
            source,
        })
    }
}

/// Wire shape shared by commands and results: `{ id, name, payload }`.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireEnvelope {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub payload: Payload,
}

/// Borrowed wire shape used when encoding.
#[derive(Debug, Serialize)]
pub(crate) struct WireEnvelopeRef<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub payload: &'a Payload,
}
