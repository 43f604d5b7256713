//! Envelope codec: pure functions between envelopes and wire bytes.
//!
//! Both commands and results use the `{ id, name, payload }` shape. JSON is the
//! default structured-text format; named `MsgPack` (`rmp_serde::to_vec_named()`)
//! is available for producers that already speak it.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::context::CausalContext;
use crate::envelope::{CommandEnvelope, ResultEnvelope, WireEnvelope, WireEnvelopeRef};
use crate::messages::ResultKind;

/// Serialization format of envelopes on the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// UTF-8 JSON text.
    #[default]
    Json,
    /// `MsgPack` with named fields.
    MsgPack,
}

impl WireFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::MsgPack => "msgpack",
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a [`WireFormat`] name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown wire format `{0}` (expected `json` or `msgpack`)")]
pub struct UnknownWireFormat(pub String);

impl FromStr for WireFormat {
    type Err = UnknownWireFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "msgpack" | "messagepack" => Ok(Self::MsgPack),
            _ => Err(UnknownWireFormat(s.to_string())),
        }
    }
}

/// Errors raised while encoding or decoding envelopes and payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid msgpack: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
    #[error("msgpack encoding failed: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
    #[error("envelope has an empty id")]
    MissingId,
    #[error("envelope has an empty name")]
    MissingName,
    #[error("result id is not a uuid: {0}")]
    InvalidResultId(String),
    #[error("unrecognized result name: {0}")]
    UnknownResult(String),
    #[error("payload does not match {expected}: {source}")]
    Payload {
        expected: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Decodes one broker message value into a command envelope.
///
/// The returned envelope has an empty causal context; the reader attaches the
/// context from the message headers. The name is only checked for presence:
/// resolving it against the catalogue is the dispatcher's job.
///
/// # Errors
///
/// Returns a [`CodecError`] if the bytes are not a well-formed envelope in
/// `format`, or if the id or name is empty.
pub fn decode_command(format: WireFormat, bytes: &[u8]) -> Result<CommandEnvelope, CodecError> {
    let wire = decode_wire(format, bytes)?;
    Ok(CommandEnvelope::new(wire.id, wire.name, wire.payload))
}

/// Encodes a command envelope. Used by producers and tests.
///
/// # Errors
///
/// Returns a [`CodecError`] if serialization fails.
pub fn encode_command(format: WireFormat, command: &CommandEnvelope) -> Result<Vec<u8>, CodecError> {
    encode_wire(
        format,
        &WireEnvelopeRef {
            id: &command.id,
            name: &command.name,
            payload: &command.payload,
        },
    )
}

/// Encodes a result envelope for publishing.
///
/// # Errors
///
/// Returns a [`CodecError`] if serialization fails.
pub fn encode_result(format: WireFormat, result: &ResultEnvelope) -> Result<Vec<u8>, CodecError> {
    let id = result.id.to_string();
    encode_wire(
        format,
        &WireEnvelopeRef {
            id: &id,
            name: result.name.as_str(),
            payload: &result.payload,
        },
    )
}

/// Decodes a published result. Used by downstream consumers and tests.
///
/// # Errors
///
/// Returns a [`CodecError`] if the bytes are malformed, the id is not a UUID,
/// or the name is not in the result catalogue.
pub fn decode_result(format: WireFormat, bytes: &[u8]) -> Result<ResultEnvelope, CodecError> {
    let wire = decode_wire(format, bytes)?;
    let id = Uuid::parse_str(&wire.id).map_err(|_| CodecError::InvalidResultId(wire.id.clone()))?;
    let name: ResultKind = wire
        .name
        .parse()
        .map_err(|_| CodecError::UnknownResult(wire.name.clone()))?;
    Ok(ResultEnvelope {
        id,
        name,
        payload: wire.payload,
        context: CausalContext::default(),
    })
}

fn decode_wire(format: WireFormat, bytes: &[u8]) -> Result<WireEnvelope, CodecError> {
    let wire: WireEnvelope = match format {
        WireFormat::Json => serde_json::from_slice(bytes)?,
        WireFormat::MsgPack => rmp_serde::from_slice(bytes)?,
    };
    if wire.id.trim().is_empty() {
        return Err(CodecError::MissingId);
    }
    if wire.name.trim().is_empty() {
        return Err(CodecError::MissingName);
    }
    Ok(wire)
}

fn encode_wire(format: WireFormat, wire: &WireEnvelopeRef<'_>) -> Result<Vec<u8>, CodecError> {
    match format {
        WireFormat::Json => Ok(serde_json::to_vec(wire)?),
        WireFormat::MsgPack => Ok(rmp_serde::to_vec_named(wire)?),
    }
}
