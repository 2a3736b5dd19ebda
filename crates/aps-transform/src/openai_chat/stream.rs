use std::collections::{BTreeMap, BTreeSet};

use aps_protocol::openai::create_chat_completions::stream::{
    ChatCompletionChunk, ChatCompletionStreamChoice, ChatCompletionStreamDelta, FunctionCallChunk,
    ToolCallChunk,
};
use aps_protocol::openai::create_chat_completions::types::{CompletionUsage, STREAM_DONE_MARKER};
use aps_protocol::openai::error::ErrorResponse;
use aps_protocol::sse::{SseEvent, encode_sse};
use bytes::Bytes;

use crate::codec::{StreamDecoder, StreamEncoder};
use crate::error::TransformError;
use crate::ir::{StopReason, StreamEvent, Usage};
use crate::openai_chat::response::{stop_reason_from_openai, stop_reason_to_openai};

/// Reads chat-completion chunks.
///
/// The finish reason and the usage chunk may arrive separately; `Finish` is emitted
/// once both are known, or at `[DONE]`.
#[derive(Debug, Default)]
pub struct OpenAIChatStreamDecoder {
    started: bool,
    finished: bool,
    tool_calls: BTreeSet<u32>,
    pending_finish: Option<StopReason>,
    usage: Option<Usage>,
}

impl OpenAIChatStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_finish(&mut self) -> Option<StreamEvent> {
        if self.finished || !self.started {
            return None;
        }
        self.finished = true;
        Some(StreamEvent::Finish {
            stop_reason: self.pending_finish.take(),
            usage: self.usage.take(),
        })
    }
}

impl StreamDecoder for OpenAIChatStreamDecoder {
    fn decode(&mut self, event: SseEvent) -> Result<Vec<StreamEvent>, TransformError> {
        let data = event.data.trim();
        if data.is_empty() {
            return Ok(Vec::new());
        }
        if data == STREAM_DONE_MARKER {
            return Ok(self.take_finish().into_iter().collect());
        }

        let value: serde_json::Value = serde_json::from_str(data)?;
        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(|message| message.as_str())
                .unwrap_or("upstream stream error")
                .to_string();
            let kind = error
                .get("type")
                .and_then(|kind| kind.as_str())
                .unwrap_or("api_error")
                .to_string();
            return Ok(vec![StreamEvent::Error { kind, message }]);
        }
        let chunk: ChatCompletionChunk = serde_json::from_value(value)?;

        let mut out = Vec::new();
        if !self.started {
            self.started = true;
            out.push(StreamEvent::Start {
                id: chunk.id.clone(),
                model: chunk.model.clone(),
                input_tokens: None,
            });
        }

        if let Some(choice) = chunk.choices.into_iter().next() {
            let delta = choice.delta;
            if let Some(reasoning) = delta.reasoning_content.filter(|text| !text.is_empty()) {
                out.push(StreamEvent::ThinkingDelta(reasoning));
            }
            if let Some(content) = delta.content.filter(|text| !text.is_empty()) {
                out.push(StreamEvent::TextDelta(content));
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let function = call.function.unwrap_or_default();
                if self.tool_calls.insert(call.index) {
                    out.push(StreamEvent::ToolCallStart {
                        index: call.index,
                        id: call
                            .id
                            .unwrap_or_else(|| format!("call_proxy_{}", call.index)),
                        name: function.name.unwrap_or_default(),
                    });
                }
                if let Some(arguments) = function.arguments.filter(|args| !args.is_empty()) {
                    out.push(StreamEvent::ToolCallDelta {
                        index: call.index,
                        arguments,
                    });
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.pending_finish = Some(stop_reason_from_openai(reason));
            }
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            });
        }

        if self.pending_finish.is_some() && self.usage.is_some() {
            out.extend(self.take_finish());
        }

        Ok(out)
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        if self.pending_finish.is_some() {
            return self.take_finish().into_iter().collect();
        }
        Vec::new()
    }
}

/// Re-frames intermediate events as chat-completion chunks.
#[derive(Debug)]
pub struct OpenAIChatStreamEncoder {
    id: String,
    model: String,
    created: i64,
    started: bool,
    finished: bool,
    /// Intermediate tool index -> chunk tool index.
    tool_indexes: BTreeMap<u32, u32>,
}

impl OpenAIChatStreamEncoder {
    pub fn new(created: i64) -> Self {
        Self {
            id: "chatcmpl-proxy".to_string(),
            model: "unknown".to_string(),
            created,
            started: false,
            finished: false,
            tool_indexes: BTreeMap::new(),
        }
    }

    fn chunk(
        &self,
        delta: ChatCompletionStreamDelta,
        finish_reason: Option<StopReason>,
        usage: Option<CompletionUsage>,
    ) -> Bytes {
        let choices = if usage.is_some() && finish_reason.is_none() {
            Vec::new()
        } else {
            vec![ChatCompletionStreamChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(stop_reason_to_openai),
            }]
        };
        let chunk = ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices,
            usage,
        };
        let data = serde_json::to_string(&chunk).unwrap_or_else(|_| "{}".to_string());
        encode_sse(None, &data)
    }

    fn role_chunk(&mut self, out: &mut Vec<Bytes>) {
        if self.started {
            return;
        }
        self.started = true;
        out.push(self.chunk(
            ChatCompletionStreamDelta {
                role: Some("assistant".to_string()),
                content: Some(String::new()),
                ..Default::default()
            },
            None,
            None,
        ));
    }

    fn tool_index(&mut self, index: u32) -> u32 {
        let next = self.tool_indexes.len() as u32;
        *self.tool_indexes.entry(index).or_insert(next)
    }

    fn done(&mut self, out: &mut Vec<Bytes>) {
        out.push(encode_sse(None, STREAM_DONE_MARKER));
        self.finished = true;
    }
}

impl StreamEncoder for OpenAIChatStreamEncoder {
    fn encode(&mut self, event: StreamEvent) -> Vec<Bytes> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        match event {
            StreamEvent::Start { id, model, .. } => {
                if !self.started {
                    self.id = id;
                    self.model = model;
                }
                self.role_chunk(&mut out);
            }
            StreamEvent::TextDelta(text) => {
                self.role_chunk(&mut out);
                out.push(self.chunk(
                    ChatCompletionStreamDelta {
                        content: Some(text),
                        ..Default::default()
                    },
                    None,
                    None,
                ));
            }
            StreamEvent::ThinkingDelta(text) => {
                self.role_chunk(&mut out);
                out.push(self.chunk(
                    ChatCompletionStreamDelta {
                        reasoning_content: Some(text),
                        ..Default::default()
                    },
                    None,
                    None,
                ));
            }
            StreamEvent::ToolCallStart { index, id, name } => {
                self.role_chunk(&mut out);
                let index = self.tool_index(index);
                out.push(self.chunk(
                    ChatCompletionStreamDelta {
                        tool_calls: Some(vec![ToolCallChunk {
                            index,
                            id: Some(id),
                            r#type: Some("function".to_string()),
                            function: Some(FunctionCallChunk {
                                name: Some(name),
                                arguments: Some(String::new()),
                            }),
                        }]),
                        ..Default::default()
                    },
                    None,
                    None,
                ));
            }
            StreamEvent::ToolCallDelta { index, arguments } => {
                self.role_chunk(&mut out);
                let index = self.tool_index(index);
                out.push(self.chunk(
                    ChatCompletionStreamDelta {
                        tool_calls: Some(vec![ToolCallChunk {
                            index,
                            id: None,
                            r#type: None,
                            function: Some(FunctionCallChunk {
                                name: None,
                                arguments: Some(arguments),
                            }),
                        }]),
                        ..Default::default()
                    },
                    None,
                    None,
                ));
            }
            StreamEvent::BlockStop => {}
            StreamEvent::Finish { stop_reason, usage } => {
                self.role_chunk(&mut out);
                let stop_reason = stop_reason.unwrap_or(if self.tool_indexes.is_empty() {
                    StopReason::EndTurn
                } else {
                    StopReason::ToolUse
                });
                out.push(self.chunk(ChatCompletionStreamDelta::default(), Some(stop_reason), None));
                if let Some(usage) = usage {
                    out.push(self.chunk(
                        ChatCompletionStreamDelta::default(),
                        None,
                        Some(CompletionUsage {
                            prompt_tokens: usage.input_tokens,
                            completion_tokens: usage.output_tokens,
                            total_tokens: usage.input_tokens + usage.output_tokens,
                        }),
                    ));
                }
                self.done(&mut out);
            }
            StreamEvent::Error { kind, message } => {
                let body = ErrorResponse::new(kind, None, message);
                let data = serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string());
                out.push(encode_sse(None, &data));
                self.done(&mut out);
            }
        }
        out
    }

    fn finish(&mut self) -> Vec<Bytes> {
        if self.finished || !self.started {
            return Vec::new();
        }
        self.encode(StreamEvent::Finish {
            stop_reason: None,
            usage: None,
        })
    }

    fn error(&mut self, message: &str) -> Vec<Bytes> {
        self.encode(StreamEvent::Error {
            kind: "server_error".to_string(),
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(data: &str) -> SseEvent {
        SseEvent {
            event: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn waits_for_usage_chunk_before_finishing() {
        let mut decoder = OpenAIChatStreamDecoder::new();
        let mut events = Vec::new();
        for data in [
            r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"gpt","choices":[{"index":0,"delta":{"role":"assistant","content":"Hi"},"finish_reason":null}]}"#,
            r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"gpt","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        ] {
            events.extend(decoder.decode(sse(data)).unwrap());
        }
        assert_eq!(events.len(), 2);

        let tail = decoder
            .decode(sse(
                r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"gpt","choices":[],"usage":{"prompt_tokens":7,"completion_tokens":2,"total_tokens":9}}"#,
            ))
            .unwrap();
        assert_eq!(
            tail,
            vec![StreamEvent::Finish {
                stop_reason: Some(StopReason::EndTurn),
                usage: Some(Usage {
                    input_tokens: 7,
                    output_tokens: 2,
                }),
            }]
        );
        assert!(decoder.decode(sse("[DONE]")).unwrap().is_empty());
    }

    #[test]
    fn decodes_streamed_tool_call_arguments() {
        let mut decoder = OpenAIChatStreamDecoder::new();
        let mut events = Vec::new();
        for data in [
            r#"{"id":"c2","created":1,"model":"gpt","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_a","type":"function","function":{"name":"lookup","arguments":""}}]}}]}"#,
            r#"{"id":"c2","created":1,"model":"gpt","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"q\":1}"}}]}}]}"#,
            r#"{"id":"c2","created":1,"model":"gpt","choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
            "[DONE]",
        ] {
            events.extend(decoder.decode(sse(data)).unwrap());
        }
        assert_eq!(
            events[1..],
            [
                StreamEvent::ToolCallStart {
                    index: 0,
                    id: "call_a".to_string(),
                    name: "lookup".to_string(),
                },
                StreamEvent::ToolCallDelta {
                    index: 0,
                    arguments: "{\"q\":1}".to_string(),
                },
                StreamEvent::Finish {
                    stop_reason: Some(StopReason::ToolUse),
                    usage: None,
                },
            ]
        );
    }

    #[test]
    fn encoder_ends_with_done_marker() {
        let mut encoder = OpenAIChatStreamEncoder::new(1_700_000_000);
        let mut frames = encoder.encode(StreamEvent::Start {
            id: "msg_1".to_string(),
            model: "claude".to_string(),
            input_tokens: Some(3),
        });
        frames.extend(encoder.encode(StreamEvent::TextDelta("ok".to_string())));
        frames.extend(encoder.encode(StreamEvent::Finish {
            stop_reason: Some(StopReason::MaxTokens),
            usage: Some(Usage {
                input_tokens: 3,
                output_tokens: 1,
            }),
        }));
        assert!(encoder.encode(StreamEvent::TextDelta("late".to_string())).is_empty());

        let text: String = frames
            .iter()
            .map(|frame| std::str::from_utf8(frame).unwrap().to_string())
            .collect();
        assert!(text.contains("\"role\":\"assistant\""));
        assert!(text.contains("\"finish_reason\":\"length\""));
        assert!(text.contains("\"total_tokens\":4"));
        assert!(text.ends_with("data: [DONE]\n\n"));
    }

    #[test]
    fn upstream_error_payload_becomes_error_event() {
        let mut decoder = OpenAIChatStreamDecoder::new();
        let events = decoder
            .decode(sse(r#"{"error":{"message":"overloaded","type":"server_error"}}"#))
            .unwrap();
        assert_eq!(
            events,
            vec![StreamEvent::Error {
                kind: "server_error".to_string(),
                message: "overloaded".to_string(),
            }]
        );
    }
}
