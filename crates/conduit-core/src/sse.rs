//! Incremental Server-Sent-Events decoding.
//!
//! Network chunks split lines, and sometimes UTF-8 sequences, at arbitrary
//! points. Bytes are held until a full line is available and only then
//! decoded, so a character cut in half by a chunk boundary survives.

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the last `event:` field, if any.
    pub event: Option<String>,
    /// All `data:` lines of the event joined by `\n`.
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// The event type; `message` when the stream named none.
    pub fn kind(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Fields seen since the last blank line.
#[derive(Debug, Default)]
struct Pending {
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl Pending {
    /// Take the event out, leaving an empty one behind.
    ///
    /// An event without data lines is dropped.
    fn dispatch(&mut self) -> Option<SseEvent> {
        let pending = std::mem::take(self);
        if pending.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: pending.event,
            data: pending.data.join("\n"),
            id: pending.id,
        })
    }
}

/// Byte-buffered SSE parser.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    pending: Pending,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the events it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let line = decode_line(&self.buffer[start..end]);
            start = end + 1;

            if line.is_empty() {
                events.extend(self.pending.dispatch());
            } else {
                self.apply(&line);
            }
        }
        self.buffer.drain(..start);

        events
    }

    /// End of stream: dispatch whatever is still open.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let line = decode_line(&std::mem::take(&mut self.buffer));
            self.apply(&line);
        }
        self.pending.dispatch()
    }

    /// Whether a partial line or an undispatched event is held.
    pub fn has_buffered_data(&self) -> bool {
        !self.buffer.is_empty() || !self.pending.data.is_empty()
    }

    fn apply(&mut self, line: &str) {
        // Lines starting with a colon are comments
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.pending.event = Some(value.to_string()),
            "data" => self.pending.data.push(value.to_string()),
            "id" => self.pending.id = Some(value.to_string()),
            _ => {}
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
