//! charla-gateway: Inference gateway client and SSE ingestion pipeline
//!
//! This crate talks to a local OpenAI-compatible gateway and turns its
//! streamed responses into an ordered sequence of content deltas, with the
//! in-band reasoning section split out.

pub mod error;
pub mod gateway;
pub mod sse;
pub mod stream;
pub mod wire;

pub use error::{Error, Result};
pub use gateway::GatewayClient;
pub use stream::{DeltaAccumulator, SplitContent, StreamEvent, StreamEventStream};
