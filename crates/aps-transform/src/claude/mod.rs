pub mod request;
pub mod response;
pub mod stream;

use aps_protocol::ProtocolKind;
use aps_protocol::claude::create_message::request::CreateMessageRequestBody;
use aps_protocol::claude::create_message::response::CreateMessageResponse;
use aps_protocol::claude::error::ErrorResponse;
use bytes::Bytes;
use serde_json::Value;

use crate::codec::{ProtocolCodec, StreamDecoder, StreamEncoder};
use crate::error::TransformError;
use crate::ir::{ChatRequest, ChatResponse};

pub use stream::{ClaudeStreamDecoder, ClaudeStreamEncoder};

/// Codec for the Anthropic create-message protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeCodec;

impl ProtocolCodec for ClaudeCodec {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Anthropic
    }

    fn decode_request(&self, raw: &[u8]) -> Result<ChatRequest, TransformError> {
        let body: CreateMessageRequestBody = serde_json::from_slice(raw)?;
        Ok(request::decode_request(body))
    }

    fn encode_request(&self, request: &ChatRequest, model: &str) -> Result<Bytes, TransformError> {
        let body = request::encode_request(request, model);
        Ok(Bytes::from(serde_json::to_vec(&body)?))
    }

    fn decode_response(&self, raw: &[u8]) -> Result<ChatResponse, TransformError> {
        let body: CreateMessageResponse = serde_json::from_slice(raw)?;
        Ok(response::decode_response(body))
    }

    fn encode_response(&self, response: &ChatResponse) -> Result<Bytes, TransformError> {
        let body = response::encode_response(response);
        Ok(Bytes::from(serde_json::to_vec(&body)?))
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(ClaudeStreamDecoder::new())
    }

    fn stream_encoder(&self) -> Box<dyn StreamEncoder> {
        Box::new(ClaudeStreamEncoder::new())
    }

    fn error_value(&self, status: u16, message: &str) -> Value {
        serde_json::to_value(ErrorResponse::for_status(status, message)).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ContentPart, Role, ToolChoice};
    use serde_json::json;

    #[test]
    fn decodes_system_blocks_tools_and_results() {
        let raw = json!({
            "model": "claude-sonnet-4",
            "max_tokens": 1024,
            "system": [{"type": "text", "text": "You are terse."}, {"type": "text", "text": "Answer in English."}],
            "messages": [
                {"role": "user", "content": "weather in Paris?"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "Checking."},
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Paris"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "18C"},
                    {"type": "document", "source": {"type": "text", "data": "x", "media_type": "text/plain"}}
                ]}
            ],
            "tools": [
                {"name": "get_weather", "description": "Weather", "input_schema": {"type": "object"}},
                {"type": "web_search_20250305", "name": "web_search"}
            ],
            "tool_choice": {"type": "any"},
            "temperature": 0.2,
            "top_k": 5,
            "stream": true
        });
        let request = ClaudeCodec
            .decode_request(&serde_json::to_vec(&raw).unwrap())
            .unwrap();

        assert_eq!(
            request.system.as_deref(),
            Some("You are terse.\nAnswer in English.")
        );
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[1].role, Role::Assistant);
        assert_eq!(
            request.messages[2].content,
            vec![ContentPart::ToolResult {
                tool_use_id: "toolu_1".to_string(),
                content: vec![ContentPart::Text("18C".to_string())],
                is_error: false,
            }]
        );
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.tool_choice, Some(ToolChoice::Any));
        assert_eq!(request.params.top_k, Some(5));
        assert!(request.stream);
    }

    #[test]
    fn request_survives_a_trip_through_the_intermediate_form() {
        let raw = json!({
            "model": "claude-sonnet-4",
            "max_tokens": 512,
            "system": "be brief",
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "hi"}]},
                {"role": "assistant", "content": [{"type": "text", "text": "hello"}]},
                {"role": "user", "content": [{"type": "text", "text": "bye"}]}
            ],
            "stop_sequences": ["END"],
            "top_p": 0.9
        });
        let first = ClaudeCodec
            .decode_request(&serde_json::to_vec(&raw).unwrap())
            .unwrap();
        let encoded = ClaudeCodec.encode_request(&first, "claude-sonnet-4").unwrap();
        let second = ClaudeCodec.decode_request(&encoded).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn encode_fills_required_max_tokens() {
        let request = ChatRequest {
            model: "gpt-4o".to_string(),
            system: None,
            messages: vec![crate::ir::Message {
                role: Role::User,
                content: vec![ContentPart::Text("hi".to_string())],
            }],
            params: Default::default(),
            stream: false,
            tools: Vec::new(),
            tool_choice: None,
            parallel_tool_calls: None,
        };
        let encoded = ClaudeCodec.encode_request(&request, "claude-haiku").unwrap();
        let value: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value["model"], "claude-haiku");
        assert_eq!(value["max_tokens"], request::DEFAULT_MAX_TOKENS);
        assert!(value.get("stream").is_none());
    }

    #[test]
    fn error_value_uses_anthropic_shape() {
        let value = ClaudeCodec.error_value(429, "slow down");
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"]["type"], "rate_limit_error");
        assert_eq!(value["error"]["message"], "slow down");
    }
}
