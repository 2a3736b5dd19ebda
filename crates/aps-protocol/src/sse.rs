use bytes::{Bytes, BytesMut};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Longest line kept while waiting for its newline. Longer lines are dropped.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Incremental `text/event-stream` decoder.
///
/// Bytes are buffered until a full line is available, so a UTF-8 sequence split
/// across network chunks is decoded intact.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: BytesMut,
    /// Prefix of `buffer` already known to contain no newline.
    scanned: usize,
    /// Set while skipping the rest of an oversized line.
    discarding: bool,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        loop {
            let Some(offset) = self.buffer[self.scanned..]
                .iter()
                .position(|byte| *byte == b'\n')
            else {
                self.scanned = self.buffer.len();
                if self.scanned > MAX_LINE_BYTES {
                    self.buffer.clear();
                    self.scanned = 0;
                    self.discarding = true;
                }
                break;
            };
            let raw = self.buffer.split_to(self.scanned + offset + 1);
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) {
                continue;
            }

            let mut line = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }
            if line.is_empty() {
                self.finish_event(&mut events);
                continue;
            }
            self.apply_line(&line);
        }

        events
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.push_bytes(chunk.as_bytes())
    }

    /// Flushes a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        let discarding = std::mem::take(&mut self.discarding);
        self.scanned = 0;
        if discarding {
            self.buffer.clear();
        } else if !self.buffer.is_empty() {
            let raw = self.buffer.split();
            let mut line = String::from_utf8_lossy(&raw).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }
            if !line.is_empty() {
                self.apply_line(&line);
            }
        }
        self.finish_event(&mut events);
        events
    }

    fn apply_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => {
                self.event = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "data" => self.data_lines.push(value.to_string()),
            _ => {}
        }
    }

    fn finish_event(&mut self, events: &mut Vec<SseEvent>) {
        if self.event.is_none() && self.data_lines.is_empty() {
            return;
        }
        let data = self.data_lines.join("\n");
        events.push(SseEvent {
            event: self.event.take(),
            data,
        });
        self.data_lines.clear();
    }
}

/// Encodes one SSE frame. Multi-line data is split into several `data:` lines.
pub fn encode_sse(event: Option<&str>, data: &str) -> Bytes {
    let mut out = BytesMut::with_capacity(data.len() + 32);
    if let Some(event) = event {
        out.extend_from_slice(b"event: ");
        out.extend_from_slice(event.as_bytes());
        out.extend_from_slice(b"\n");
    }
    for line in data.split('\n') {
        out.extend_from_slice(b"data: ");
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\n");
    }
    out.extend_from_slice(b"\n");
    out.freeze()
}

pub fn encode_keep_alive() -> Bytes {
    Bytes::from_static(b": keep-alive\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_events_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("event: message_start\nda").is_empty());
        let events = parser.push_str("ta: {\"a\":1}\n\n: comment\n\ndata: [DONE]\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: Some("message_start".to_string()),
                    data: "{\"a\":1}".to_string(),
                },
                SseEvent {
                    event: None,
                    data: "[DONE]".to_string(),
                },
            ]
        );
    }

    #[test]
    fn keeps_multibyte_characters_split_between_chunks() {
        let payload = "data: héllo\n\n".as_bytes();
        let split = payload.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut parser = SseParser::new();
        assert!(parser.push_bytes(&payload[..split]).is_empty());
        let events = parser.push_bytes(&payload[split..]);
        assert_eq!(events[0].data, "héllo");
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: tail").is_empty());
        let events = parser.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "tail");
    }

    #[test]
    fn many_lines_in_one_chunk() {
        let mut payload = String::new();
        for idx in 0..500 {
            payload.push_str(&format!("data: {idx}\r\n\r\n"));
        }
        let mut parser = SseParser::new();
        let events = parser.push_str(&payload);
        assert_eq!(events.len(), 500);
        assert_eq!(events[499].data, "499");
    }

    #[test]
    fn oversized_line_is_dropped() {
        let mut parser = SseParser::new();
        let junk = vec![b'x'; MAX_LINE_BYTES + 1];
        assert!(parser.push_bytes(b"data: ").is_empty());
        assert!(parser.push_bytes(&junk).is_empty());
        assert!(parser.buffer.is_empty());
        let events = parser.push_str("still junk\ndata: ok\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: None,
                data: "ok".to_string(),
            }]
        );
    }

    #[test]
    fn encodes_named_multiline_frame() {
        let frame = encode_sse(Some("error"), "a\nb");
        assert_eq!(&frame[..], b"event: error\ndata: a\ndata: b\n\n");
    }
}
