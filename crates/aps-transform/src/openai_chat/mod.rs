pub mod request;
pub mod response;
pub mod stream;

use aps_protocol::ProtocolKind;
use aps_protocol::openai::create_chat_completions::request::CreateChatCompletionRequestBody;
use aps_protocol::openai::create_chat_completions::response::CreateChatCompletionResponse;
use aps_protocol::openai::error::ErrorResponse;
use bytes::Bytes;
use serde_json::Value;

use crate::codec::{ProtocolCodec, StreamDecoder, StreamEncoder};
use crate::error::TransformError;
use crate::ir::{ChatRequest, ChatResponse};

pub use stream::{OpenAIChatStreamDecoder, OpenAIChatStreamEncoder};

/// Codec for the OpenAI chat-completions protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAIChatCodec;

fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

impl ProtocolCodec for OpenAIChatCodec {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::OpenAI
    }

    fn decode_request(&self, raw: &[u8]) -> Result<ChatRequest, TransformError> {
        let body: CreateChatCompletionRequestBody = serde_json::from_slice(raw)?;
        Ok(request::decode_request(body))
    }

    fn encode_request(&self, request: &ChatRequest, model: &str) -> Result<Bytes, TransformError> {
        let body = request::encode_request(request, model);
        Ok(Bytes::from(serde_json::to_vec(&body)?))
    }

    fn decode_response(&self, raw: &[u8]) -> Result<ChatResponse, TransformError> {
        let body: CreateChatCompletionResponse = serde_json::from_slice(raw)?;
        response::decode_response(body)
    }

    fn encode_response(&self, response: &ChatResponse) -> Result<Bytes, TransformError> {
        let body = response::encode_response(response, unix_now());
        Ok(Bytes::from(serde_json::to_vec(&body)?))
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(OpenAIChatStreamDecoder::new())
    }

    fn stream_encoder(&self) -> Box<dyn StreamEncoder> {
        Box::new(OpenAIChatStreamEncoder::new(unix_now()))
    }

    fn error_value(&self, status: u16, message: &str) -> Value {
        serde_json::to_value(ErrorResponse::for_status(status, message)).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claude::ClaudeCodec;
    use crate::ir::{ContentPart, Role, StopReason, ToolChoice};
    use serde_json::json;

    #[test]
    fn folds_system_developer_and_tool_messages() {
        let raw = json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "rule one"},
                {"role": "developer", "content": [{"type": "text", "text": "rule two"}]},
                {"role": "user", "content": "what time is it?"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "clock", "arguments": "{\"tz\":\"UTC\"}"}},
                    {"id": "call_2", "type": "function", "function": {"name": "clock", "arguments": "{\"tz\":\"CET\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "12:00"},
                {"role": "tool", "tool_call_id": "call_2", "content": "13:00"},
                {"role": "user", "content": "thanks"}
            ],
            "max_completion_tokens": 300,
            "stop": "END",
            "tool_choice": "required"
        });
        let request = OpenAIChatCodec
            .decode_request(&serde_json::to_vec(&raw).unwrap())
            .unwrap();

        assert_eq!(request.system.as_deref(), Some("rule one\nrule two"));
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[2].role, Role::User);
        assert_eq!(request.messages[2].content.len(), 3);
        assert!(matches!(
            &request.messages[2].content[2],
            ContentPart::Text(text) if text == "thanks"
        ));
        assert_eq!(
            request.messages[1].content[0],
            ContentPart::ToolUse {
                id: "call_1".to_string(),
                name: "clock".to_string(),
                input: json!({"tz": "UTC"}),
            }
        );
        assert_eq!(request.params.max_tokens, Some(300));
        assert_eq!(request.params.stop_sequences, vec!["END".to_string()]);
        assert_eq!(request.tool_choice, Some(ToolChoice::Any));
    }

    #[test]
    fn anthropic_request_keeps_roles_content_and_sampling_through_openai() {
        let raw = json!({
            "model": "claude-sonnet-4",
            "max_tokens": 256,
            "system": "be brief",
            "temperature": 0.3,
            "top_p": 0.8,
            "stop_sequences": ["STOP"],
            "messages": [
                {"role": "user", "content": "look this up"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "on it"},
                    {"type": "tool_use", "id": "toolu_9", "name": "search", "input": {"q": "rust"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_9", "content": [{"type": "text", "text": "found"}]}
                ]}
            ]
        });
        let original = ClaudeCodec
            .decode_request(&serde_json::to_vec(&raw).unwrap())
            .unwrap();

        let openai_body = OpenAIChatCodec
            .encode_request(&original, "gpt-4o-mini")
            .unwrap();
        let via_openai = OpenAIChatCodec.decode_request(&openai_body).unwrap();
        let claude_body = ClaudeCodec
            .encode_request(&via_openai, "claude-sonnet-4")
            .unwrap();
        let back = ClaudeCodec.decode_request(&claude_body).unwrap();

        assert_eq!(back.system, original.system);
        assert_eq!(back.messages, original.messages);
        assert_eq!(back.params, original.params);
        assert_eq!(back.model, "claude-sonnet-4");
    }

    #[test]
    fn response_maps_tool_calls_and_finish_reason() {
        let raw = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "clock", "arguments": "{}"}}
                ]},
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let response = OpenAIChatCodec
            .decode_response(&serde_json::to_vec(&raw).unwrap())
            .unwrap();
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage.input_tokens, 10);

        let claude = ClaudeCodec.encode_response(&response).unwrap();
        let value: Value = serde_json::from_slice(&claude).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["stop_reason"], "tool_use");
        assert_eq!(value["content"][0]["type"], "tool_use");
        assert_eq!(value["content"][0]["input"], json!({}));
    }

    #[test]
    fn empty_choices_is_an_error() {
        let raw = br#"{"id":"x","model":"m","choices":[]}"#;
        assert!(matches!(
            OpenAIChatCodec.decode_response(raw),
            Err(TransformError::EmptyChoices)
        ));
    }
}
