//! Server-sent event source with an incremental parser.

mod client;
mod parser;

pub use client::{EventSource, FrameReader, SseSource};
pub use parser::{SseEvent, SseParser};
