use aps_protocol::openai::create_chat_completions::request::CreateChatCompletionRequestBody;
use aps_protocol::openai::create_chat_completions::types::{
    ChatMessage, ChatTool, FunctionCall, FunctionDefinition, ImageUrl, MessageText,
    NamedFunction, NamedToolChoice, StopConfiguration, StreamOptions, ToolCall, ToolChoiceMode,
    ToolChoiceOption, UserContent, UserContentPart,
};
use serde_json::{Value, json};

use crate::ir::{
    ChatRequest, ContentPart, ImageSource, Message, Role, SamplingParams, ToolChoice,
    ToolDefinition,
};

pub fn decode_request(body: CreateChatCompletionRequestBody) -> ChatRequest {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<Message> = Vec::new();

    for message in body.messages {
        match message {
            ChatMessage::System { content, .. } | ChatMessage::Developer { content, .. } => {
                let text = content.joined_text();
                if !text.is_empty() {
                    system_parts.push(text);
                }
            }
            ChatMessage::User { content, .. } => {
                let parts = decode_user_content(content);
                push_user_parts(&mut messages, parts);
            }
            ChatMessage::Assistant {
                content,
                reasoning_content,
                tool_calls,
                ..
            } => {
                let mut parts = Vec::new();
                if let Some(reasoning) = reasoning_content.filter(|text| !text.is_empty()) {
                    parts.push(ContentPart::Thinking {
                        text: reasoning,
                        signature: None,
                    });
                }
                if let Some(text) = content
                    .map(|content| content.joined_text())
                    .filter(|text| !text.is_empty())
                {
                    parts.push(ContentPart::Text(text));
                }
                for call in tool_calls.unwrap_or_default() {
                    parts.push(ContentPart::ToolUse {
                        id: call.id,
                        name: call.function.name,
                        input: parse_arguments(&call.function.arguments),
                    });
                }
                messages.push(Message {
                    role: Role::Assistant,
                    content: parts,
                });
            }
            ChatMessage::Tool {
                content,
                tool_call_id,
            } => {
                let text = content.joined_text();
                let result = ContentPart::ToolResult {
                    tool_use_id: tool_call_id,
                    content: if text.is_empty() {
                        Vec::new()
                    } else {
                        vec![ContentPart::Text(text)]
                    },
                    is_error: false,
                };
                match messages.last_mut() {
                    Some(last) if last.is_tool_results() => last.content.push(result),
                    _ => messages.push(Message {
                        role: Role::User,
                        content: vec![result],
                    }),
                }
            }
        }
    }

    let tools = body
        .tools
        .unwrap_or_default()
        .into_iter()
        .map(|tool| ToolDefinition {
            name: tool.function.name,
            description: tool.function.description,
            input_schema: tool
                .function
                .parameters
                .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
        })
        .collect();

    let tool_choice = body.tool_choice.map(|choice| match choice {
        ToolChoiceOption::Mode(ToolChoiceMode::Auto) => ToolChoice::Auto,
        ToolChoiceOption::Mode(ToolChoiceMode::Required) => ToolChoice::Any,
        ToolChoiceOption::Mode(ToolChoiceMode::None) => ToolChoice::None,
        ToolChoiceOption::Named(named) => ToolChoice::Tool(named.function.name),
    });

    ChatRequest {
        model: body.model,
        system: if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n"))
        },
        messages,
        params: SamplingParams {
            temperature: body.temperature,
            top_p: body.top_p,
            top_k: None,
            max_tokens: body.max_completion_tokens.or(body.max_tokens),
            stop_sequences: body.stop.map(|stop| stop.into_vec()).unwrap_or_default(),
        },
        stream: body.stream.unwrap_or(false),
        tools,
        tool_choice,
        parallel_tool_calls: body.parallel_tool_calls,
    }
}

/// Tool results and the user text that follows them share one user turn.
fn push_user_parts(messages: &mut Vec<Message>, parts: Vec<ContentPart>) {
    if parts.is_empty() {
        return;
    }
    match messages.last_mut() {
        Some(last) if last.is_tool_results() => last.content.extend(parts),
        _ => messages.push(Message {
            role: Role::User,
            content: parts,
        }),
    }
}

fn decode_user_content(content: UserContent) -> Vec<ContentPart> {
    match content {
        UserContent::Text(text) => vec![ContentPart::Text(text)],
        UserContent::Parts(parts) => parts
            .into_iter()
            .filter_map(|part| match part {
                UserContentPart::Text { text } => Some(ContentPart::Text(text)),
                UserContentPart::ImageUrl { image_url } => {
                    Some(ContentPart::Image(decode_image_url(&image_url.url)))
                }
                UserContentPart::Unsupported => None,
            })
            .collect(),
    }
}

/// `data:<media>;base64,<payload>` becomes inline base64, anything else stays a URL.
pub fn decode_image_url(url: &str) -> ImageSource {
    if let Some(rest) = url.strip_prefix("data:")
        && let Some((meta, data)) = rest.split_once(',')
        && let Some(media_type) = meta.strip_suffix(";base64")
    {
        return ImageSource::Base64 {
            media_type: media_type.to_string(),
            data: data.to_string(),
        };
    }
    ImageSource::Url(url.to_string())
}

pub fn encode_image_url(source: &ImageSource) -> String {
    match source {
        ImageSource::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
        ImageSource::Url(url) => url.clone(),
    }
}

/// Tool arguments arrive as a JSON string that may be empty or malformed.
pub fn parse_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| Value::String(arguments.to_string()))
}

fn encode_arguments(input: &Value) -> String {
    match input {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

pub fn encode_request(request: &ChatRequest, model: &str) -> CreateChatCompletionRequestBody {
    let mut messages = Vec::new();
    if let Some(system) = &request.system {
        messages.push(ChatMessage::System {
            content: MessageText::Text(system.clone()),
            name: None,
        });
    }

    for message in &request.messages {
        match message.role {
            Role::User => encode_user_message(message, &mut messages),
            Role::Assistant => encode_assistant_message(message, &mut messages),
        }
    }

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(
            request
                .tools
                .iter()
                .map(|tool| ChatTool {
                    r#type: "function".to_string(),
                    function: FunctionDefinition {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: Some(tool.input_schema.clone()),
                        strict: None,
                    },
                })
                .collect(),
        )
    };

    let tool_choice = request.tool_choice.as_ref().map(|choice| match choice {
        ToolChoice::Auto => ToolChoiceOption::Mode(ToolChoiceMode::Auto),
        ToolChoice::Any => ToolChoiceOption::Mode(ToolChoiceMode::Required),
        ToolChoice::None => ToolChoiceOption::Mode(ToolChoiceMode::None),
        ToolChoice::Tool(name) => ToolChoiceOption::Named(NamedToolChoice {
            r#type: "function".to_string(),
            function: NamedFunction { name: name.clone() },
        }),
    });

    CreateChatCompletionRequestBody {
        model: model.to_string(),
        messages,
        temperature: request.params.temperature,
        top_p: request.params.top_p,
        max_tokens: request.params.max_tokens,
        max_completion_tokens: None,
        stop: if request.params.stop_sequences.is_empty() {
            None
        } else {
            Some(StopConfiguration::Many(
                request.params.stop_sequences.clone(),
            ))
        },
        stream: request.stream.then_some(true),
        stream_options: request.stream.then_some(StreamOptions {
            include_usage: Some(true),
        }),
        parallel_tool_calls: if tools.is_some() {
            request.parallel_tool_calls
        } else {
            None
        },
        tools,
        tool_choice,
        user: None,
    }
}

fn encode_user_message(message: &Message, out: &mut Vec<ChatMessage>) {
    let mut parts = Vec::new();
    for part in &message.content {
        match part {
            ContentPart::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let text = content
                    .iter()
                    .filter_map(|part| match part {
                        ContentPart::Text(text) => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                let text = if *is_error {
                    format!("[tool error] {text}")
                } else {
                    text
                };
                out.push(ChatMessage::Tool {
                    content: MessageText::Text(text),
                    tool_call_id: tool_use_id.clone(),
                });
            }
            ContentPart::Text(text) => parts.push(UserContentPart::Text { text: text.clone() }),
            ContentPart::Image(source) => parts.push(UserContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: encode_image_url(source),
                    detail: None,
                },
            }),
            ContentPart::ToolUse { .. } | ContentPart::Thinking { .. } => {}
        }
    }

    if parts.is_empty() {
        return;
    }
    let content = match parts.as_slice() {
        [UserContentPart::Text { text }] => UserContent::Text(text.clone()),
        _ => UserContent::Parts(parts),
    };
    out.push(ChatMessage::User {
        content,
        name: None,
    });
}

fn encode_assistant_message(message: &Message, out: &mut Vec<ChatMessage>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in &message.content {
        match part {
            ContentPart::Text(value) => text.push_str(value),
            ContentPart::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id: id.clone(),
                r#type: "function".to_string(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: encode_arguments(input),
                },
            }),
            ContentPart::Thinking { .. }
            | ContentPart::Image(_)
            | ContentPart::ToolResult { .. } => {}
        }
    }

    if text.is_empty() && tool_calls.is_empty() {
        return;
    }
    out.push(ChatMessage::Assistant {
        content: if text.is_empty() {
            None
        } else {
            Some(MessageText::Text(text))
        },
        reasoning_content: None,
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        name: None,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_urls_become_inline_images() {
        assert_eq!(
            decode_image_url("data:image/png;base64,AAAA"),
            ImageSource::Base64 {
                media_type: "image/png".to_string(),
                data: "AAAA".to_string(),
            }
        );
        assert_eq!(
            decode_image_url("https://example.com/cat.png"),
            ImageSource::Url("https://example.com/cat.png".to_string())
        );
    }

    #[test]
    fn malformed_arguments_are_kept_verbatim() {
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(parse_arguments("{\"a\":"), Value::String("{\"a\":".to_string()));
    }
}
