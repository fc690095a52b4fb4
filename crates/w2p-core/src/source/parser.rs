//! Incremental server-sent events parser.
//!
//! Bytes arrive in arbitrary chunks; complete lines are consumed and events
//! are dispatched on blank lines. Supported fields are `event:`, `data:`
//! (repeated lines joined with `\n`) and `id:`. Comment lines (`:` prefix)
//! are keep-alives and produce nothing.
//!
//! A line longer than [`MAX_LINE_BYTES`] without a terminating newline is a
//! broken stream; the parser drops its state and reports the connection as
//! interrupted.

use crate::error::SourceError;

/// Longest line the parser buffers while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One dispatched SSE event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    /// Event type from the `event:` field
    pub event_type: Option<String>,
    /// Payload from the `data:` field(s)
    pub data: String,
    /// Event id from the `id:` field
    pub id: Option<String>,
}

impl SseEvent {
    /// Heartbeats carry no data.
    pub fn is_empty(&self) -> bool {
        self.data.trim().is_empty()
    }
}

/// Streaming SSE parser that accumulates bytes and yields complete events.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event_type: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the parser and return any complete events.
    ///
    /// Lines are split on raw bytes so a multi-byte UTF-8 character cut by a
    /// chunk boundary is reassembled before decoding.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>, SourceError> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        let mut start = 0;

        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let raw = &self.buffer[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = String::from_utf8_lossy(raw).into_owned();
            start = end + 1;

            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        self.buffer.drain(..start);

        if self.buffer.len() > MAX_LINE_BYTES {
            self.reset();
            return Err(SourceError::Interrupted(format!(
                "line exceeds {} bytes without a newline",
                MAX_LINE_BYTES
            )));
        }

        Ok(events)
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_type = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // `retry:` and unknown fields are ignored
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() && self.event_type.is_none() {
            self.id = None;
            return None;
        }

        let event = SseEvent {
            event_type: self.event_type.take(),
            data: self.data.join("\n"),
            id: self.id.take(),
        };
        self.data.clear();
        Some(event)
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.event_type = None;
        self.data.clear();
        self.id = None;
    }
}
