use aps_protocol::ProtocolKind;
use aps_protocol::sse::{SseEvent, SseParser};
use bytes::Bytes;

use crate::codec::{StreamDecoder, StreamEncoder, codec_for};
use crate::error::TransformError;
use crate::ir::StreamEvent;

/// Converts an upstream SSE byte stream into client-protocol SSE frames.
///
/// Frames are produced per pushed chunk, in upstream order.
pub struct StreamConverter {
    parser: SseParser,
    decoder: Box<dyn StreamDecoder>,
    encoder: Box<dyn StreamEncoder>,
    /// First error event reported by the upstream, not yet taken.
    upstream_error: Option<String>,
}

impl StreamConverter {
    pub fn new(upstream: ProtocolKind, client: ProtocolKind) -> Self {
        Self {
            parser: SseParser::new(),
            decoder: codec_for(upstream).stream_decoder(),
            encoder: codec_for(client).stream_encoder(),
            upstream_error: None,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, TransformError> {
        let mut frames = Vec::new();
        for event in self.parser.push_bytes(chunk) {
            for ir in self.decoder.decode(event)? {
                self.encode(ir, &mut frames);
            }
        }
        Ok(frames)
    }

    /// Error event the upstream sent inside the stream since the last call.
    /// The event itself is still translated for the client.
    pub fn take_upstream_error(&mut self) -> Option<String> {
        self.upstream_error.take()
    }

    fn encode(&mut self, ir: StreamEvent, frames: &mut Vec<Bytes>) {
        if let StreamEvent::Error { kind, message } = &ir
            && self.upstream_error.is_none()
        {
            self.upstream_error = Some(describe_error(kind, message));
        }
        frames.extend(self.encoder.encode(ir));
    }

    /// Flushes buffered input and closes the client stream.
    pub fn finish(&mut self) -> Result<Vec<Bytes>, TransformError> {
        let mut frames = Vec::new();
        for event in self.parser.finish() {
            for ir in self.decoder.decode(event)? {
                self.encode(ir, &mut frames);
            }
        }
        for ir in self.decoder.finish() {
            self.encode(ir, &mut frames);
        }
        frames.extend(self.encoder.finish());
        Ok(frames)
    }

    /// Terminal error frames in the client protocol.
    pub fn error(&mut self, message: &str) -> Vec<Bytes> {
        self.encoder.error(message)
    }
}

/// Error frames for a same-protocol relay that has no converter.
pub fn error_frames(client: ProtocolKind, message: &str) -> Vec<Bytes> {
    codec_for(client).stream_encoder().error(message)
}

/// Watches a stream relayed byte for byte for upstream error events.
///
/// Events that fail to decode are ignored; the bytes reach the client as sent.
pub struct StreamErrorWatch {
    parser: SseParser,
    decoder: Box<dyn StreamDecoder>,
}

impl StreamErrorWatch {
    pub fn new(protocol: ProtocolKind) -> Self {
        Self {
            parser: SseParser::new(),
            decoder: codec_for(protocol).stream_decoder(),
        }
    }

    /// First error event completed by `chunk`, if any.
    pub fn observe(&mut self, chunk: &[u8]) -> Option<String> {
        let events = self.parser.push_bytes(chunk);
        self.scan(events)
    }

    pub fn finish(&mut self) -> Option<String> {
        let events = self.parser.finish();
        self.scan(events)
    }

    fn scan(&mut self, events: Vec<SseEvent>) -> Option<String> {
        let mut found = None;
        for event in events {
            let Ok(decoded) = self.decoder.decode(event) else {
                continue;
            };
            for ir in decoded {
                if let StreamEvent::Error { kind, message } = ir
                    && found.is_none()
                {
                    found = Some(describe_error(&kind, &message));
                }
            }
        }
        found
    }
}

fn describe_error(kind: &str, message: &str) -> String {
    if kind.is_empty() {
        message.to_string()
    } else {
        format!("{kind}: {message}")
    }
}
