use aps_protocol::claude::create_message::request::CreateMessageRequestBody;
use aps_protocol::claude::create_message::types::{
    ContentBlockParam, ImageSource as ClaudeImageSource, MessageContent, MessageParam,
    MessageRole, SystemParam, Tool, ToolChoice as ClaudeToolChoice, ToolResultBlock,
    ToolResultContent,
};
use serde_json::json;

use crate::ir::{
    ChatRequest, ContentPart, ImageSource, Message, Role, SamplingParams, ToolChoice,
    ToolDefinition,
};

/// `max_tokens` is mandatory for create-message; used when the client sent none.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

pub fn decode_request(body: CreateMessageRequestBody) -> ChatRequest {
    let system = body
        .system
        .as_ref()
        .map(SystemParam::joined_text)
        .filter(|text| !text.is_empty());

    let messages = body
        .messages
        .into_iter()
        .map(|message| Message {
            role: match message.role {
                MessageRole::User => Role::User,
                MessageRole::Assistant => Role::Assistant,
            },
            content: decode_content(message.content),
        })
        .collect();

    let tools = body
        .tools
        .unwrap_or_default()
        .into_iter()
        .filter_map(|tool| {
            // Server tools carry no schema and cannot be forwarded elsewhere.
            let input_schema = tool.input_schema?;
            Some(ToolDefinition {
                name: tool.name,
                description: tool.description,
                input_schema,
            })
        })
        .collect();

    let (tool_choice, parallel_tool_calls) = match body.tool_choice {
        Some(ClaudeToolChoice::Auto {
            disable_parallel_tool_use,
        }) => (Some(ToolChoice::Auto), disable_parallel_tool_use.map(|v| !v)),
        Some(ClaudeToolChoice::Any {
            disable_parallel_tool_use,
        }) => (Some(ToolChoice::Any), disable_parallel_tool_use.map(|v| !v)),
        Some(ClaudeToolChoice::Tool {
            name,
            disable_parallel_tool_use,
        }) => (
            Some(ToolChoice::Tool(name)),
            disable_parallel_tool_use.map(|v| !v),
        ),
        Some(ClaudeToolChoice::None) => (Some(ToolChoice::None), None),
        None => (None, None),
    };

    ChatRequest {
        model: body.model,
        system,
        messages,
        params: SamplingParams {
            temperature: body.temperature,
            top_p: body.top_p,
            top_k: body.top_k,
            max_tokens: body.max_tokens,
            stop_sequences: body.stop_sequences.unwrap_or_default(),
        },
        stream: body.stream.unwrap_or(false),
        tools,
        tool_choice,
        parallel_tool_calls,
    }
}

fn decode_content(content: MessageContent) -> Vec<ContentPart> {
    match content {
        MessageContent::Text(text) => vec![ContentPart::Text(text)],
        MessageContent::Blocks(blocks) => blocks.into_iter().filter_map(decode_block).collect(),
    }
}

fn decode_block(block: ContentBlockParam) -> Option<ContentPart> {
    match block {
        ContentBlockParam::Text { text } => Some(ContentPart::Text(text)),
        ContentBlockParam::Image { source } => Some(ContentPart::Image(decode_image(source))),
        ContentBlockParam::ToolUse { id, name, input } => {
            Some(ContentPart::ToolUse { id, name, input })
        }
        ContentBlockParam::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => Some(ContentPart::ToolResult {
            tool_use_id,
            content: match content {
                None => Vec::new(),
                Some(ToolResultContent::Text(text)) => vec![ContentPart::Text(text)],
                Some(ToolResultContent::Blocks(blocks)) => blocks
                    .into_iter()
                    .filter_map(|block| match block {
                        ToolResultBlock::Text { text } => Some(ContentPart::Text(text)),
                        ToolResultBlock::Image { source } => {
                            Some(ContentPart::Image(decode_image(source)))
                        }
                        ToolResultBlock::Unsupported => None,
                    })
                    .collect(),
            },
            is_error: is_error.unwrap_or(false),
        }),
        ContentBlockParam::Thinking {
            thinking,
            signature,
        } => Some(ContentPart::Thinking {
            text: thinking,
            signature,
        }),
        ContentBlockParam::RedactedThinking { .. } | ContentBlockParam::Unsupported => None,
    }
}

fn decode_image(source: ClaudeImageSource) -> ImageSource {
    match source {
        ClaudeImageSource::Base64 { media_type, data } => ImageSource::Base64 { media_type, data },
        ClaudeImageSource::Url { url } => ImageSource::Url(url),
    }
}

pub fn encode_request(request: &ChatRequest, model: &str) -> CreateMessageRequestBody {
    let messages = request
        .messages
        .iter()
        .filter_map(|message| {
            let blocks: Vec<ContentBlockParam> =
                message.content.iter().filter_map(encode_part).collect();
            if blocks.is_empty() {
                return None;
            }
            Some(MessageParam {
                role: match message.role {
                    Role::User => MessageRole::User,
                    Role::Assistant => MessageRole::Assistant,
                },
                content: MessageContent::Blocks(blocks),
            })
        })
        .collect();

    let disable_parallel_tool_use = request.parallel_tool_calls.map(|v| !v);
    let tool_choice = match (&request.tool_choice, disable_parallel_tool_use) {
        (Some(ToolChoice::Auto), disable) => Some(ClaudeToolChoice::Auto {
            disable_parallel_tool_use: disable,
        }),
        (Some(ToolChoice::Any), disable) => Some(ClaudeToolChoice::Any {
            disable_parallel_tool_use: disable,
        }),
        (Some(ToolChoice::Tool(name)), disable) => Some(ClaudeToolChoice::Tool {
            name: name.clone(),
            disable_parallel_tool_use: disable,
        }),
        (Some(ToolChoice::None), _) => Some(ClaudeToolChoice::None),
        (None, Some(true)) if !request.tools.is_empty() => Some(ClaudeToolChoice::Auto {
            disable_parallel_tool_use: Some(true),
        }),
        (None, _) => None,
    };

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(
            request
                .tools
                .iter()
                .map(|tool| Tool {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: Some(tool.input_schema.clone()),
                    r#type: None,
                })
                .collect(),
        )
    };

    CreateMessageRequestBody {
        model: model.to_string(),
        messages,
        max_tokens: Some(request.params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        system: request.system.clone().map(SystemParam::Text),
        metadata: None,
        stop_sequences: if request.params.stop_sequences.is_empty() {
            None
        } else {
            Some(request.params.stop_sequences.clone())
        },
        stream: request.stream.then_some(true),
        temperature: request.params.temperature,
        top_p: request.params.top_p,
        top_k: request.params.top_k,
        tools,
        tool_choice,
    }
}

fn encode_part(part: &ContentPart) -> Option<ContentBlockParam> {
    match part {
        ContentPart::Text(text) => Some(ContentBlockParam::Text { text: text.clone() }),
        ContentPart::Image(source) => Some(ContentBlockParam::Image {
            source: encode_image(source),
        }),
        ContentPart::ToolUse { id, name, input } => Some(ContentBlockParam::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: if input.is_object() {
                input.clone()
            } else {
                json!({ "input": input })
            },
        }),
        ContentPart::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let blocks: Vec<ToolResultBlock> = content
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text(text) => Some(ToolResultBlock::Text { text: text.clone() }),
                    ContentPart::Image(source) => Some(ToolResultBlock::Image {
                        source: encode_image(source),
                    }),
                    _ => None,
                })
                .collect();
            Some(ContentBlockParam::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: if blocks.is_empty() {
                    None
                } else {
                    Some(ToolResultContent::Blocks(blocks))
                },
                is_error: is_error.then_some(true),
            })
        }
        // Unsigned reasoning from another vendor is rejected by the messages API.
        ContentPart::Thinking {
            text,
            signature: Some(signature),
        } => Some(ContentBlockParam::Thinking {
            thinking: text.clone(),
            signature: Some(signature.clone()),
        }),
        ContentPart::Thinking { signature: None, .. } => None,
    }
}

fn encode_image(source: &ImageSource) -> ClaudeImageSource {
    match source {
        ImageSource::Base64 { media_type, data } => ClaudeImageSource::Base64 {
            media_type: media_type.clone(),
            data: data.clone(),
        },
        ImageSource::Url(url) => ClaudeImageSource::Url { url: url.clone() },
    }
}
