//! Incremental decoder for `text/event-stream` bodies.
//!
//! Lines end with `\n`, `\r\n` or `\r`. `data:` lines accumulate into the event data joined by
//! `\n`, `id:` sets the last event id, `event:` the event type and `retry:` the reconnection
//! delay. Lines starting with `:` are comments. A blank line dispatches the event, unless it
//! carried no data.

use std::mem;
use std::time::Duration;

/// A dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the last `id:` field seen on the stream, possibly set by an earlier event.
    pub id: Option<String>,
    /// Value of the `event:` field, absent for the default `message` type.
    pub event: Option<String>,
    pub data: String,
}

/// Turns body chunks into events. Chunk boundaries may fall anywhere, including inside a UTF-8
/// sequence or between `\r` and `\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    /// The previous chunk ended with `\r`, a leading `\n` of the next one belongs to it.
    pending_cr: bool,
    data: Vec<String>,
    event: Option<String>,
    last_event_id: Option<String>,
    retry: Option<Duration>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id to send as `Last-Event-ID` when reconnecting.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Reconnection delay requested by the server.
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    /// Drops the partially received event of a connection that ended.
    ///
    /// The last event id and the reconnection delay survive, they apply to the next connection.
    pub fn reset_connection(&mut self) {
        self.line.clear();
        self.pending_cr = false;
        self.data.clear();
        self.event = None;
    }

    /// Feeds a body chunk, returning the events it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();

        for &byte in chunk {
            let pending_cr = mem::replace(&mut self.pending_cr, false);
            match byte {
                b'\n' if pending_cr => {}
                b'\n' => self.end_line(&mut events),
                b'\r' => {
                    self.pending_cr = true;
                    self.end_line(&mut events);
                }
                _ => self.line.push(byte),
            }
        }

        events
    }

    fn end_line(&mut self, events: &mut Vec<SseEvent>) {
        let line = mem::take(&mut self.line);
        if line.is_empty() {
            if let Some(event) = self.dispatch() {
                events.push(event);
            }
            return;
        }

        let line = String::from_utf8_lossy(&line);
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };
        self.apply_field(field, value);
    }

    fn apply_field(&mut self, field: &str, value: &str) {
        match field {
            "data" => self.data.push(value.to_owned()),
            "event" => self.event = Some(value.to_owned()),
            // Ids containing NUL are ignored.
            "id" if !value.contains('\0') => self.last_event_id = Some(value.to_owned()),
            "retry" => {
                if let Ok(millis) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(millis));
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }

        let data = mem::take(&mut self.data).join("\n");

        Some(SseEvent {
            id: self.last_event_id.clone(),
            event,
            data,
        })
    }
}
