//! Causal context carried from a command to the results it produces.
//!
//! The context travels in broker headers: a W3C `traceparent` for the trace and
//! parent span, and a `baggage` header of comma-separated `key=value` pairs.

use std::collections::BTreeMap;

/// Header carrying the W3C trace context.
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// Header carrying propagated baggage entries.
pub const BAGGAGE_HEADER: &str = "baggage";

const TRACE_ID_LEN: usize = 32;
const SPAN_ID_LEN: usize = 16;

/// Trace and correlation metadata threaded through every pipeline call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CausalContext {
    /// 32-hex-digit trace identifier, if the producer sent one.
    pub trace_id: Option<String>,
    /// 16-hex-digit identifier of the producer's span.
    pub span_id: Option<String>,
    /// Whether the producer sampled this trace.
    pub sampled: bool,
    /// Baggage entries, ordered for deterministic header output.
    pub baggage: BTreeMap<String, String>,
}

impl CausalContext {
    /// Extracts the context from raw broker headers.
    ///
    /// Unknown headers, non-UTF-8 values and malformed `traceparent` values are
    /// ignored; a message never fails to decode because of its tracing headers.
    #[must_use]
    pub fn from_headers(headers: &[(String, Vec<u8>)]) -> Self {
        let mut ctx = Self::default();
        for (name, value) in headers {
            let Ok(value) = std::str::from_utf8(value) else {
                continue;
            };
            if name.eq_ignore_ascii_case(TRACEPARENT_HEADER) {
                if let Some((trace_id, span_id, sampled)) = parse_traceparent(value) {
                    ctx.trace_id = Some(trace_id);
                    ctx.span_id = Some(span_id);
                    ctx.sampled = sampled;
                }
            } else if name.eq_ignore_ascii_case(BAGGAGE_HEADER) {
                ctx.baggage.extend(parse_baggage(value));
            }
        }
        ctx
    }

    /// Renders the context back into broker headers.
    #[must_use]
    pub fn to_headers(&self) -> Vec<(String, Vec<u8>)> {
        let mut headers = Vec::new();
        if let (Some(trace_id), Some(span_id)) = (&self.trace_id, &self.span_id) {
            let flags = if self.sampled { "01" } else { "00" };
            headers.push((
                TRACEPARENT_HEADER.to_string(),
                format!("00-{trace_id}-{span_id}-{flags}").into_bytes(),
            ));
        }
        if !self.baggage.is_empty() {
            let baggage = self
                .baggage
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",");
            headers.push((BAGGAGE_HEADER.to_string(), baggage.into_bytes()));
        }
        headers
    }

    /// Returns `true` when no trace or baggage was propagated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trace_id.is_none() && self.baggage.is_empty()
    }
}

/// Parses `version-traceid-spanid-flags`. All-zero ids are invalid per W3C.
fn parse_traceparent(value: &str) -> Option<(String, String, bool)> {
    let mut parts = value.trim().split('-');
    let version = parts.next()?;
    let trace_id = parts.next()?;
    let span_id = parts.next()?;
    let flags = parts.next()?;

    if version.len() != 2 || version == "ff" || !is_hex(version) {
        return None;
    }
    if trace_id.len() != TRACE_ID_LEN || !is_hex(trace_id) || is_zero(trace_id) {
        return None;
    }
    if span_id.len() != SPAN_ID_LEN || !is_hex(span_id) || is_zero(span_id) {
        return None;
    }
    if flags.len() != 2 {
        return None;
    }
    let flags = u8::from_str_radix(flags, 16).ok()?;

    Some((
        trace_id.to_ascii_lowercase(),
        span_id.to_ascii_lowercase(),
        flags & 0x01 == 0x01,
    ))
}

fn parse_baggage(value: &str) -> impl Iterator<Item = (String, String)> + '_ {
    value.split(',').filter_map(|member| {
        // Member properties after ';' are not propagated.
        let member = member.split(';').next()?;
        let (key, value) = member.split_once('=')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        Some((key.to_string(), value.trim().to_string()))
    })
}

fn is_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_zero(s: &str) -> bool {
    s.bytes().all(|b| b == b'0')
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const SPAN: &str = "00f067aa0ba902b7";

    fn header(name: &str, value: &str) -> (String, Vec<u8>) {
        (name.to_string(), value.as_bytes().to_vec())
    }

    #[test]
    fn extracts_traceparent_and_baggage() {
        let headers = vec![
            header("traceparent", &format!("00-{TRACE}-{SPAN}-01")),
            header("baggage", "tenant=acme, region = eu;ttl=5"),
            header("content-type", "application/json"),
        ];

        let ctx = CausalContext::from_headers(&headers);
        assert_eq!(ctx.trace_id.as_deref(), Some(TRACE));
        assert_eq!(ctx.span_id.as_deref(), Some(SPAN));
        assert!(ctx.sampled);
        assert_eq!(ctx.baggage.get("tenant").map(String::as_str), Some("acme"));
        assert_eq!(ctx.baggage.get("region").map(String::as_str), Some("eu"));
    }

    #[test]
    fn malformed_traceparent_is_ignored() {
        let cases = [
            "garbage",
            "00-short-00f067aa0ba902b7-01",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-zz",
        ];
        for case in cases {
            let ctx = CausalContext::from_headers(&[header("traceparent", case)]);
            assert!(ctx.trace_id.is_none(), "accepted {case}");
        }
    }

    #[test]
    fn non_utf8_header_values_are_skipped() {
        let headers = vec![("baggage".to_string(), vec![0xff, 0xfe])];
        assert!(CausalContext::from_headers(&headers).is_empty());
    }

    #[test]
    fn headers_survive_propagation() {
        let incoming = vec![
            header("traceparent", &format!("00-{TRACE}-{SPAN}-00")),
            header("baggage", "b=2,a=1"),
        ];
        let ctx = CausalContext::from_headers(&incoming);
        let outgoing = ctx.to_headers();

        assert_eq!(
            outgoing,
            vec![
                header("traceparent", &format!("00-{TRACE}-{SPAN}-00")),
                header("baggage", "a=1,b=2"),
            ]
        );
        assert_eq!(CausalContext::from_headers(&outgoing), ctx);
    }

    #[test]
    fn empty_context_renders_no_headers() {
        assert!(CausalContext::default().to_headers().is_empty());
    }
}
