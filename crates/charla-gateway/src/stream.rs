//! Streamed response events and delta accumulation.
//!
//! The reasoning sub-protocol is an in-band convention: the model wraps its
//! deliberation in literal `[THINK]`/`[/THINK]` markers inside otherwise
//! plain text. All sentinel parsing lives here so a different delimiter pair
//! could be swapped in without touching the projection or orchestration
//! layers.

use std::pin::Pin;
use std::sync::LazyLock;

use futures::StreamExt;
use regex::Regex;
use tokio_stream::Stream;

use crate::sse::{Frame, LineAssembler, decode_frame};

/// Open marker of the in-band reasoning section.
pub const REASONING_OPEN: &str = "[THINK]";
/// Close marker of the in-band reasoning section.
pub const REASONING_CLOSE: &str = "[/THINK]";

static SENTINEL_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[THINK\]|\[/THINK\]").unwrap());

/// Events produced by a streaming chat response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One incremental content fragment.
    Delta(String),
    /// Stream finished normally.
    Done,
    /// Terminal failure: an in-band error frame or a transport error.
    Error {
        message: String,
        details: Option<String>,
    },
}

impl StreamEvent {
    /// Check if this event ends the response.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}

/// A stream of response events
pub type StreamEventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Drive a raw byte stream through the line assembler and frame decoder.
///
/// A `[DONE]` sentinel or an error frame stops processing immediately, even
/// when more complete lines are already sitting in the assembled buffer. A
/// trailing unterminated line when the stream ends is dropped; the stream
/// still finishes with a `Done` event.
pub fn ingest<S, B, E>(bytes: S) -> impl Stream<Item = StreamEvent> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut assembler = LineAssembler::new();
        futures::pin_mut!(bytes);
        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield StreamEvent::Error {
                        message: e.to_string(),
                        details: None,
                    };
                    return;
                }
            };
            for line in assembler.push(chunk.as_ref()) {
                match decode_frame(&line) {
                    Frame::Ignored => {}
                    Frame::Delta(delta) => yield StreamEvent::Delta(delta),
                    Frame::Done => {
                        yield StreamEvent::Done;
                        return;
                    }
                    Frame::Error { message, details } => {
                        yield StreamEvent::Error { message, details };
                        return;
                    }
                }
            }
        }
        if assembler.has_partial() {
            tracing::warn!("stream ended mid-line, dropping partial frame");
        }
        yield StreamEvent::Done;
    }
}

/// Output of one accumulation step. Both halves are always defined,
/// possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitContent {
    pub reasoning: String,
    pub answer: String,
}

/// Accumulates content deltas in arrival order and splits out the reasoning
/// section after every append.
///
/// The full text is re-split on each delta rather than scanned incrementally;
/// conversational responses are short enough in practice that the quadratic
/// re-scan is not worth optimizing away. Once the first close sentinel has
/// appeared, later sentinel occurrences are inert: the split's segments past
/// the answer are ignored.
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    full_text: String,
}

impl DeltaAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one fragment and return the current (reasoning, answer) pair.
    pub fn push(&mut self, delta: &str) -> SplitContent {
        self.full_text.push_str(delta);
        self.split()
    }

    /// Current split of everything accumulated so far.
    pub fn split(&self) -> SplitContent {
        if !self.full_text.contains(REASONING_OPEN) {
            return SplitContent {
                reasoning: String::new(),
                answer: self.full_text.clone(),
            };
        }
        let parts: Vec<&str> = SENTINEL_SPLIT.split(&self.full_text).collect();
        SplitContent {
            reasoning: parts.get(1).copied().unwrap_or_default().to_string(),
            answer: parts.get(2).copied().unwrap_or_default().to_string(),
        }
    }

    /// Everything accumulated so far, sentinels included.
    pub fn full_text(&self) -> &str {
        &self.full_text
    }
}
