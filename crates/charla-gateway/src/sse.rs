//! SSE-like line framing: chunk reassembly and per-line frame decoding.
//!
//! The gateway streams `data: `-prefixed lines separated by blank lines,
//! with `:`-prefixed keepalive comments and a literal `data: [DONE]`
//! terminator. Chunk boundaries are arbitrary, so bytes are carried across
//! reads until a full line is available.

use serde::Deserialize;

/// Terminal sentinel ending a streamed response.
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data: ";

/// Reassembles arbitrary byte chunks into complete newline-terminated lines.
///
/// The carry buffer holds raw bytes rather than decoded text so that a
/// multi-byte UTF-8 sequence split across two chunks is reassembled before
/// decoding. A line with no terminating newline when the stream ends is
/// protocol-invalid and is dropped by the caller. Line length is unbounded:
/// a pathological single-line payload grows the carry buffer without limit.
#[derive(Debug, Default)]
pub struct LineAssembler {
    carry: Vec<u8>,
}

impl LineAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every line it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let rest = self.carry.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.carry, rest);
            line.pop();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Whether an unterminated fragment is pending.
    pub fn has_partial(&self) -> bool {
        !self.carry.is_empty()
    }
}

/// One classified stream line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Blank line, keepalive comment, malformed payload, or any other line
    /// shape that carries no event.
    Ignored,
    /// Incremental content fragment (empty when the payload has none).
    Delta(String),
    /// End-of-stream sentinel.
    Done,
    /// In-band error payload; terminal for the response.
    Error {
        message: String,
        details: Option<String>,
    },
}

/// Streamed data payload, validated at the decoder boundary.
/// Missing fields decode as empty/absent rather than failing the frame.
#[derive(Debug, Deserialize)]
struct StreamPayload {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Classify one complete line.
pub fn decode_frame(line: &str) -> Frame {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return Frame::Ignored;
    }
    let Some(payload) = trimmed.strip_prefix(DATA_PREFIX) else {
        return Frame::Ignored;
    };
    if payload == DONE_SENTINEL {
        return Frame::Done;
    }
    match serde_json::from_str::<StreamPayload>(payload) {
        Ok(StreamPayload {
            error: Some(message),
            details,
            ..
        }) => Frame::Error { message, details },
        Ok(payload) => {
            let delta = payload
                .choices
                .first()
                .and_then(|c| c.delta.content.clone())
                .unwrap_or_default();
            Frame::Delta(delta)
        }
        Err(e) => {
            tracing::warn!("skipping malformed stream frame ({e}): {trimmed}");
            Frame::Ignored
        }
    }
}
