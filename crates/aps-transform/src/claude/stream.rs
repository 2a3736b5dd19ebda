use std::collections::BTreeMap;

use aps_protocol::claude::create_message::response::CreateMessageResponse;
use aps_protocol::claude::create_message::stream::{
    StreamContentBlockDelta, StreamEvent as ClaudeStreamEvent, StreamMessageDelta, StreamUsage,
};
use aps_protocol::claude::create_message::types::{
    ContentBlock, MessageRole, StopReason as ClaudeStopReason, Usage as ClaudeUsage,
};
use aps_protocol::claude::error::ErrorDetail;
use aps_protocol::sse::{SseEvent, encode_sse};
use bytes::Bytes;
use serde_json::json;

use crate::claude::response::{stop_reason_from_claude, stop_reason_to_claude};
use crate::codec::{StreamDecoder, StreamEncoder};
use crate::error::TransformError;
use crate::ir::{StopReason, StreamEvent, Usage};

#[derive(Debug, Default)]
pub struct ClaudeStreamDecoder {
    input_tokens: Option<u64>,
    /// Claude block index -> tool call index, for `tool_use` blocks.
    tool_blocks: BTreeMap<u32, u32>,
    next_tool_index: u32,
    finished: bool,
}

impl ClaudeStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamDecoder for ClaudeStreamDecoder {
    fn decode(&mut self, event: SseEvent) -> Result<Vec<StreamEvent>, TransformError> {
        if event.data.trim().is_empty() {
            return Ok(Vec::new());
        }
        let parsed: ClaudeStreamEvent = serde_json::from_str(&event.data)?;
        let mut out = Vec::new();

        match parsed {
            ClaudeStreamEvent::MessageStart { message } => {
                self.input_tokens = Some(message.usage.input_tokens);
                out.push(StreamEvent::Start {
                    id: message.id,
                    model: message.model,
                    input_tokens: self.input_tokens,
                });
            }
            ClaudeStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlock::Text { text } => {
                    if !text.is_empty() {
                        out.push(StreamEvent::TextDelta(text));
                    }
                }
                ContentBlock::Thinking { thinking, .. } => {
                    if !thinking.is_empty() {
                        out.push(StreamEvent::ThinkingDelta(thinking));
                    }
                }
                ContentBlock::ToolUse { id, name, input } => {
                    let tool_index = self.next_tool_index;
                    self.next_tool_index += 1;
                    self.tool_blocks.insert(index, tool_index);
                    out.push(StreamEvent::ToolCallStart {
                        index: tool_index,
                        id,
                        name,
                    });
                    if input.as_object().is_some_and(|object| !object.is_empty()) {
                        out.push(StreamEvent::ToolCallDelta {
                            index: tool_index,
                            arguments: input.to_string(),
                        });
                    }
                }
                ContentBlock::RedactedThinking { .. } | ContentBlock::Unsupported => {}
            },
            ClaudeStreamEvent::ContentBlockDelta { index, delta } => match delta {
                StreamContentBlockDelta::TextDelta { text } => {
                    out.push(StreamEvent::TextDelta(text));
                }
                StreamContentBlockDelta::ThinkingDelta { thinking } => {
                    out.push(StreamEvent::ThinkingDelta(thinking));
                }
                StreamContentBlockDelta::InputJsonDelta { partial_json } => {
                    if let Some(tool_index) = self.tool_blocks.get(&index) {
                        out.push(StreamEvent::ToolCallDelta {
                            index: *tool_index,
                            arguments: partial_json,
                        });
                    }
                }
                StreamContentBlockDelta::SignatureDelta { .. }
                | StreamContentBlockDelta::Unsupported => {}
            },
            ClaudeStreamEvent::ContentBlockStop { .. } => out.push(StreamEvent::BlockStop),
            ClaudeStreamEvent::MessageDelta { delta, usage } => {
                self.finished = true;
                out.push(StreamEvent::Finish {
                    stop_reason: delta.stop_reason.map(stop_reason_from_claude),
                    usage: Some(Usage {
                        input_tokens: usage.input_tokens.or(self.input_tokens).unwrap_or(0),
                        output_tokens: usage.output_tokens.unwrap_or(0),
                    }),
                });
            }
            ClaudeStreamEvent::MessageStop => {
                if !self.finished {
                    self.finished = true;
                    out.push(StreamEvent::Finish {
                        stop_reason: None,
                        usage: None,
                    });
                }
            }
            ClaudeStreamEvent::Ping => {}
            ClaudeStreamEvent::Error { error } => out.push(StreamEvent::Error {
                kind: error.r#type,
                message: error.message,
            }),
        }

        Ok(out)
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text,
    Thinking,
    Tool(u32),
}

/// Re-frames intermediate events as create-message SSE.
#[derive(Debug, Default)]
pub struct ClaudeStreamEncoder {
    started: bool,
    finished: bool,
    next_block_index: u32,
    open: Option<(u32, OpenBlock)>,
    /// Tool call index -> Claude block index.
    tool_blocks: BTreeMap<u32, u32>,
    saw_tool_call: bool,
    input_tokens: u64,
}

impl ClaudeStreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn frame(event: &ClaudeStreamEvent) -> Bytes {
        let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
        encode_sse(Some(event.event_name()), &data)
    }

    fn start(&mut self, id: String, model: String, input_tokens: Option<u64>) -> Vec<Bytes> {
        self.started = true;
        self.input_tokens = input_tokens.unwrap_or(0);
        vec![Self::frame(&ClaudeStreamEvent::MessageStart {
            message: CreateMessageResponse {
                id,
                r#type: "message".to_string(),
                role: MessageRole::Assistant,
                model,
                content: Vec::new(),
                stop_reason: None,
                stop_sequence: None,
                usage: ClaudeUsage {
                    input_tokens: self.input_tokens,
                    output_tokens: 0,
                    cache_creation_input_tokens: None,
                    cache_read_input_tokens: None,
                },
            },
        })]
    }

    fn ensure_started(&mut self, out: &mut Vec<Bytes>) {
        if !self.started {
            out.extend(self.start("msg_proxy".to_string(), "unknown".to_string(), None));
        }
    }

    fn close_open(&mut self, out: &mut Vec<Bytes>) {
        if let Some((index, _)) = self.open.take() {
            out.push(Self::frame(&ClaudeStreamEvent::ContentBlockStop { index }));
        }
    }

    fn open_block(
        &mut self,
        kind: OpenBlock,
        content_block: ContentBlock,
        out: &mut Vec<Bytes>,
    ) -> u32 {
        if let Some((index, open)) = self.open
            && open == kind
        {
            return index;
        }
        self.close_open(out);
        let index = self.next_block_index;
        self.next_block_index += 1;
        self.open = Some((index, kind));
        out.push(Self::frame(&ClaudeStreamEvent::ContentBlockStart {
            index,
            content_block,
        }));
        index
    }

    fn finish_message(
        &mut self,
        stop_reason: Option<StopReason>,
        usage: Option<Usage>,
        out: &mut Vec<Bytes>,
    ) {
        self.close_open(out);
        let stop_reason = match stop_reason {
            Some(reason) => stop_reason_to_claude(reason),
            None if self.saw_tool_call => ClaudeStopReason::ToolUse,
            None => ClaudeStopReason::EndTurn,
        };
        out.push(Self::frame(&ClaudeStreamEvent::MessageDelta {
            delta: StreamMessageDelta {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
            },
            usage: StreamUsage {
                input_tokens: usage.map(|usage| usage.input_tokens),
                output_tokens: Some(usage.map(|usage| usage.output_tokens).unwrap_or(0)),
            },
        }));
        out.push(Self::frame(&ClaudeStreamEvent::MessageStop));
        self.finished = true;
    }
}

impl StreamEncoder for ClaudeStreamEncoder {
    fn encode(&mut self, event: StreamEvent) -> Vec<Bytes> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        match event {
            StreamEvent::Start {
                id,
                model,
                input_tokens,
            } => {
                if !self.started {
                    out.extend(self.start(id, model, input_tokens));
                }
            }
            StreamEvent::TextDelta(text) => {
                self.ensure_started(&mut out);
                let index = self.open_block(
                    OpenBlock::Text,
                    ContentBlock::Text {
                        text: String::new(),
                    },
                    &mut out,
                );
                out.push(Self::frame(&ClaudeStreamEvent::ContentBlockDelta {
                    index,
                    delta: StreamContentBlockDelta::TextDelta { text },
                }));
            }
            StreamEvent::ThinkingDelta(thinking) => {
                self.ensure_started(&mut out);
                let index = self.open_block(
                    OpenBlock::Thinking,
                    ContentBlock::Thinking {
                        thinking: String::new(),
                        signature: None,
                    },
                    &mut out,
                );
                out.push(Self::frame(&ClaudeStreamEvent::ContentBlockDelta {
                    index,
                    delta: StreamContentBlockDelta::ThinkingDelta { thinking },
                }));
            }
            StreamEvent::ToolCallStart { index, id, name } => {
                self.ensure_started(&mut out);
                self.saw_tool_call = true;
                self.close_open(&mut out);
                let block = self.open_block(
                    OpenBlock::Tool(index),
                    ContentBlock::ToolUse {
                        id,
                        name,
                        input: json!({}),
                    },
                    &mut out,
                );
                self.tool_blocks.insert(index, block);
            }
            StreamEvent::ToolCallDelta { index, arguments } => {
                self.ensure_started(&mut out);
                let block = match self.tool_blocks.get(&index) {
                    Some(block) => *block,
                    None => {
                        self.saw_tool_call = true;
                        let block = self.open_block(
                            OpenBlock::Tool(index),
                            ContentBlock::ToolUse {
                                id: format!("toolu_proxy_{index}"),
                                name: String::new(),
                                input: json!({}),
                            },
                            &mut out,
                        );
                        self.tool_blocks.insert(index, block);
                        block
                    }
                };
                out.push(Self::frame(&ClaudeStreamEvent::ContentBlockDelta {
                    index: block,
                    delta: StreamContentBlockDelta::InputJsonDelta {
                        partial_json: arguments,
                    },
                }));
            }
            StreamEvent::BlockStop => self.close_open(&mut out),
            StreamEvent::Finish { stop_reason, usage } => {
                self.ensure_started(&mut out);
                self.finish_message(stop_reason, usage, &mut out);
            }
            StreamEvent::Error { kind, message } => {
                self.finished = true;
                out.push(Self::frame(&ClaudeStreamEvent::Error {
                    error: ErrorDetail {
                        r#type: kind,
                        message,
                    },
                }));
            }
        }
        out
    }

    fn finish(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        if self.started && !self.finished {
            self.finish_message(None, None, &mut out);
        }
        out
    }

    fn error(&mut self, message: &str) -> Vec<Bytes> {
        self.encode(StreamEvent::Error {
            kind: "api_error".to_string(),
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
    fn decodes_tool_use_block_into_call_events() {
        let mut decoder = ClaudeStreamDecoder::new();
        let mut events = Vec::new();
        for data in [
            r#"{"type":"message_start","message":{"id":"msg_1","type":"message","role":"assistant","model":"m","content":[],"stop_reason":null,"usage":{"input_tokens":12,"output_tokens":1}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_1","name":"get_weather","input":{}}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"city\":"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"\"Paris\"}"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use","stop_sequence":null},"usage":{"output_tokens":20}}"#,
            r#"{"type":"message_stop"}"#,
        ] {
            events.extend(decoder.decode(sse(data)).unwrap());
        }

        assert_eq!(
            events,
            vec![
                StreamEvent::Start {
                    id: "msg_1".to_string(),
                    model: "m".to_string(),
                    input_tokens: Some(12),
                },
                StreamEvent::ToolCallStart {
                    index: 0,
                    id: "toolu_1".to_string(),
                    name: "get_weather".to_string(),
                },
                StreamEvent::ToolCallDelta {
                    index: 0,
                    arguments: "{\"city\":".to_string(),
                },
                StreamEvent::ToolCallDelta {
                    index: 0,
                    arguments: "\"Paris\"}".to_string(),
                },
                StreamEvent::BlockStop,
                StreamEvent::Finish {
                    stop_reason: Some(StopReason::ToolUse),
                    usage: Some(Usage {
                        input_tokens: 12,
                        output_tokens: 20,
                    }),
                },
            ]
        );
    }

    #[test]
    fn encoder_opens_and_closes_blocks_in_order() {
        let mut encoder = ClaudeStreamEncoder::new();
        let mut frames = Vec::new();
        frames.extend(encoder.encode(StreamEvent::Start {
            id: "chatcmpl-1".to_string(),
            model: "gpt".to_string(),
            input_tokens: None,
        }));
        frames.extend(encoder.encode(StreamEvent::TextDelta("Hel".to_string())));
        frames.extend(encoder.encode(StreamEvent::TextDelta("lo".to_string())));
        frames.extend(encoder.encode(StreamEvent::ToolCallStart {
            index: 0,
            id: "call_1".to_string(),
            name: "lookup".to_string(),
        }));
        frames.extend(encoder.encode(StreamEvent::ToolCallDelta {
            index: 0,
            arguments: "{}".to_string(),
        }));
        frames.extend(encoder.encode(StreamEvent::Finish {
            stop_reason: None,
            usage: None,
        }));
        assert!(encoder.finish().is_empty());

        let names: Vec<String> = frames
            .iter()
            .map(|frame| {
                let text = std::str::from_utf8(frame).unwrap();
                text.lines().next().unwrap().trim_start_matches("event: ").to_string()
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        let delta = std::str::from_utf8(&frames[8]).unwrap();
        assert!(delta.contains("\"stop_reason\":\"tool_use\""));
    }
}
