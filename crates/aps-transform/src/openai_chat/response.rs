use aps_protocol::openai::create_chat_completions::response::{
    ChatCompletionChoice, ChatCompletionMessage, CreateChatCompletionResponse,
};
use aps_protocol::openai::create_chat_completions::types::{
    CompletionUsage, FinishReason, FunctionCall, ToolCall,
};

use crate::error::TransformError;
use crate::ir::{ChatResponse, ContentPart, StopReason, Usage};
use crate::openai_chat::request::parse_arguments;

pub fn decode_response(body: CreateChatCompletionResponse) -> Result<ChatResponse, TransformError> {
    let Some(choice) = body.choices.into_iter().next() else {
        return Err(TransformError::EmptyChoices);
    };

    let mut content = Vec::new();
    if let Some(reasoning) = choice
        .message
        .reasoning_content
        .filter(|text| !text.is_empty())
    {
        content.push(ContentPart::Thinking {
            text: reasoning,
            signature: None,
        });
    }
    if let Some(text) = choice.message.content.filter(|text| !text.is_empty()) {
        content.push(ContentPart::Text(text));
    }
    for call in choice.message.tool_calls.unwrap_or_default() {
        content.push(ContentPart::ToolUse {
            id: call.id,
            name: call.function.name,
            input: parse_arguments(&call.function.arguments),
        });
    }

    let usage = body.usage.unwrap_or_default();
    Ok(ChatResponse {
        id: body.id,
        model: body.model,
        content,
        stop_reason: choice.finish_reason.map(stop_reason_from_openai),
        usage: Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    })
}

pub fn encode_response(response: &ChatResponse, created: i64) -> CreateChatCompletionResponse {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();
    for part in &response.content {
        match part {
            ContentPart::Text(value) => text.push_str(value),
            ContentPart::Thinking { text: value, .. } => reasoning.push_str(value),
            ContentPart::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id: id.clone(),
                r#type: "function".to_string(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
            ContentPart::Image(_) | ContentPart::ToolResult { .. } => {}
        }
    }

    let finish_reason = match response.stop_reason {
        Some(reason) => stop_reason_to_openai(reason),
        None if !tool_calls.is_empty() => FinishReason::ToolCalls,
        None => FinishReason::Stop,
    };

    CreateChatCompletionResponse {
        id: response.id.clone(),
        object: "chat.completion".to_string(),
        created,
        model: response.model.clone(),
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ChatCompletionMessage {
                role: "assistant".to_string(),
                content: if text.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(text)
                },
                reasoning_content: if reasoning.is_empty() {
                    None
                } else {
                    Some(reasoning)
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason: Some(finish_reason),
        }],
        usage: Some(CompletionUsage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
        }),
    }
}

pub fn stop_reason_from_openai(reason: FinishReason) -> StopReason {
    match reason {
        FinishReason::Length => StopReason::MaxTokens,
        FinishReason::ToolCalls | FinishReason::FunctionCall => StopReason::ToolUse,
        FinishReason::ContentFilter => StopReason::Refusal,
        FinishReason::Stop | FinishReason::Unknown => StopReason::EndTurn,
    }
}

pub fn stop_reason_to_openai(reason: StopReason) -> FinishReason {
    match reason {
        StopReason::EndTurn | StopReason::StopSequence => FinishReason::Stop,
        StopReason::MaxTokens => FinishReason::Length,
        StopReason::ToolUse => FinishReason::ToolCalls,
        StopReason::Refusal => FinishReason::ContentFilter,
    }
}
