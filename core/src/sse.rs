//! Server-Sent Events parsing for streaming HTTP responses.
//!
//! The parser accumulates incoming bytes and extracts complete events
//! delimited by a blank line. Feeding never parses; extraction happens in
//! [`SseParser::next`]. The internal buffer grows by doubling and never
//! shrinks; after an event is extracted the remaining bytes are compacted
//! to the front of the buffer.
//!
//! Arbitrary byte sequences are accepted — UTF-8 validity is the
//! caller's concern, and invalid sequences are replaced when event text
//! is materialized.

use memchr::memmem;

const SSE_INITIAL_BUFFER_SIZE: usize = 4096;

/// One parsed SSE event.
///
/// `event` is `None` when no `event:` line was present; `data` is `None`
/// when no `data:` line was present. A bare `data:` line contributes an
/// empty payload string, which still counts as present.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: Option<String>,
}

impl SseEvent {
    /// True exactly when the data payload is the literal `[DONE]`.
    pub fn is_done(&self) -> bool {
        self.data.as_deref() == Some("[DONE]")
    }
}

#[derive(Debug)]
pub struct SseParser {
    buf: Vec<u8>,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(SSE_INITIAL_BUFFER_SIZE),
        }
    }

    /// Append bytes to the internal buffer. No parsing work happens here.
    pub fn feed(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let needed = self.buf.len() + data.len();
        if needed > self.buf.capacity() {
            let mut new_cap = self.buf.capacity().max(SSE_INITIAL_BUFFER_SIZE);
            while new_cap < needed + 1 {
                new_cap *= 2;
            }
            self.buf.reserve_exact(new_cap - self.buf.len());
        }
        self.buf.extend_from_slice(data);
    }

    /// Extract the next complete event, or `None` if the buffer does not
    /// yet contain a full one.
    pub fn next_event(&mut self) -> Option<SseEvent> {
        let (at, delim_len) = find_event_delimiter(&self.buf)?;
        let event = parse_event(&self.buf[..at]);
        self.buf.drain(..at + delim_len);
        Some(event)
    }

    /// Bytes currently buffered (awaiting a terminator).
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.buf.capacity()
    }
}

/// Locate the earliest event terminator: `\n\n` or `\r\n\r\n`, whichever
/// starts closer to the buffer head. Returns the offset and terminator
/// length.
fn find_event_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = memmem::find(buf, b"\n\n");
    let crlf = memmem::find(buf, b"\r\n\r\n");
    match (lf, crlf) {
        (Some(l), Some(c)) if c < l => Some((c, 4)),
        (Some(l), _) => Some((l, 2)),
        (None, Some(c)) => Some((c, 4)),
        (None, None) => None,
    }
}

fn parse_event(text: &[u8]) -> SseEvent {
    let mut event = SseEvent::default();
    let mut data: Option<Vec<u8>> = None;

    for line in text.split(|&b| b == b'\n') {
        if let Some(rest) = line.strip_prefix(b"event:") {
            let value = rest.strip_prefix(b" ").unwrap_or(rest);
            event.event = Some(String::from_utf8_lossy(value).into_owned());
        } else if let Some(rest) = line.strip_prefix(b"data:") {
            let value = rest.strip_prefix(b" ").unwrap_or(rest);
            match &mut data {
                None => data = Some(value.to_vec()),
                Some(accum) => {
                    accum.push(b'\n');
                    accum.extend_from_slice(value);
                }
            }
        }
        // Anything else (comments starting with ':', unknown fields,
        // blank lines) is ignored.
    }

    event.data = data.map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
    event
}
