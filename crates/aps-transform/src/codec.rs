use aps_protocol::ProtocolKind;
use aps_protocol::sse::SseEvent;
use bytes::Bytes;
use serde_json::Value;

use crate::claude::ClaudeCodec;
use crate::error::TransformError;
use crate::ir::{ChatRequest, ChatResponse, StreamEvent};
use crate::openai_chat::OpenAIChatCodec;

/// Wire codec for one protocol kind.
pub trait ProtocolCodec: Send + Sync {
    fn kind(&self) -> ProtocolKind;

    fn decode_request(&self, raw: &[u8]) -> Result<ChatRequest, TransformError>;

    /// Serializes `request` for this protocol with `model` in place of the client's model.
    fn encode_request(&self, request: &ChatRequest, model: &str) -> Result<Bytes, TransformError>;

    fn decode_response(&self, raw: &[u8]) -> Result<ChatResponse, TransformError>;

    fn encode_response(&self, response: &ChatResponse) -> Result<Bytes, TransformError>;

    fn stream_decoder(&self) -> Box<dyn StreamDecoder>;

    fn stream_encoder(&self) -> Box<dyn StreamEncoder>;

    /// Proxy-originated error body in this protocol's error shape.
    fn error_value(&self, status: u16, message: &str) -> Value;
}

/// Turns upstream SSE events into intermediate stream events.
pub trait StreamDecoder: Send {
    fn decode(&mut self, event: SseEvent) -> Result<Vec<StreamEvent>, TransformError>;

    fn finish(&mut self) -> Vec<StreamEvent>;
}

/// Turns intermediate stream events into client SSE frames.
pub trait StreamEncoder: Send {
    fn encode(&mut self, event: StreamEvent) -> Vec<Bytes>;

    /// Frames closing a stream whose upstream ended without a terminal event.
    fn finish(&mut self) -> Vec<Bytes>;

    /// Terminal error frames for a stream that cannot continue.
    fn error(&mut self, message: &str) -> Vec<Bytes>;
}

static CLAUDE: ClaudeCodec = ClaudeCodec;
static OPENAI_CHAT: OpenAIChatCodec = OpenAIChatCodec;

pub fn codec_for(kind: ProtocolKind) -> &'static dyn ProtocolCodec {
    match kind {
        ProtocolKind::Anthropic => &CLAUDE,
        ProtocolKind::OpenAI => &OPENAI_CHAT,
    }
}

pub fn to_intermediate(kind: ProtocolKind, raw: &[u8]) -> Result<ChatRequest, TransformError> {
    codec_for(kind).decode_request(raw)
}

pub fn from_intermediate(
    kind: ProtocolKind,
    request: &ChatRequest,
    model: &str,
) -> Result<Bytes, TransformError> {
    codec_for(kind).encode_request(request, model)
}

pub fn upstream_response_to_intermediate(
    kind: ProtocolKind,
    raw: &[u8],
) -> Result<ChatResponse, TransformError> {
    codec_for(kind).decode_response(raw)
}

pub fn intermediate_to_client(
    kind: ProtocolKind,
    response: &ChatResponse,
) -> Result<Bytes, TransformError> {
    codec_for(kind).encode_response(response)
}
