use aps_protocol::claude::create_message::response::CreateMessageResponse;
use aps_protocol::claude::create_message::types::{
    ContentBlock, MessageRole, StopReason as ClaudeStopReason, Usage as ClaudeUsage,
};

use crate::ir::{ChatResponse, ContentPart, StopReason, Usage};

pub fn decode_response(body: CreateMessageResponse) -> ChatResponse {
    let content = body
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(ContentPart::Text(text)),
            ContentBlock::ToolUse { id, name, input } => {
                Some(ContentPart::ToolUse { id, name, input })
            }
            ContentBlock::Thinking {
                thinking,
                signature,
            } => Some(ContentPart::Thinking {
                text: thinking,
                signature,
            }),
            ContentBlock::RedactedThinking { .. } | ContentBlock::Unsupported => None,
        })
        .collect();

    ChatResponse {
        id: body.id,
        model: body.model,
        content,
        stop_reason: body.stop_reason.map(stop_reason_from_claude),
        usage: Usage {
            input_tokens: body.usage.input_tokens,
            output_tokens: body.usage.output_tokens,
        },
    }
}

pub fn encode_response(response: &ChatResponse) -> CreateMessageResponse {
    let content = response
        .content
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text(text) => Some(ContentBlock::Text { text: text.clone() }),
            ContentPart::ToolUse { id, name, input } => Some(ContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            ContentPart::Thinking { text, signature } => Some(ContentBlock::Thinking {
                thinking: text.clone(),
                signature: signature.clone(),
            }),
            ContentPart::Image(_) | ContentPart::ToolResult { .. } => None,
        })
        .collect();

    CreateMessageResponse {
        id: response.id.clone(),
        r#type: "message".to_string(),
        role: MessageRole::Assistant,
        model: response.model.clone(),
        content,
        stop_reason: Some(stop_reason_to_claude(
            response.stop_reason.unwrap_or(StopReason::EndTurn),
        )),
        stop_sequence: None,
        usage: ClaudeUsage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: None,
        },
    }
}

pub fn stop_reason_from_claude(reason: ClaudeStopReason) -> StopReason {
    match reason {
        ClaudeStopReason::MaxTokens => StopReason::MaxTokens,
        ClaudeStopReason::StopSequence => StopReason::StopSequence,
        ClaudeStopReason::ToolUse => StopReason::ToolUse,
        ClaudeStopReason::Refusal => StopReason::Refusal,
        ClaudeStopReason::EndTurn | ClaudeStopReason::PauseTurn | ClaudeStopReason::Unknown => {
            StopReason::EndTurn
        }
    }
}

pub fn stop_reason_to_claude(reason: StopReason) -> ClaudeStopReason {
    match reason {
        StopReason::EndTurn => ClaudeStopReason::EndTurn,
        StopReason::MaxTokens => ClaudeStopReason::MaxTokens,
        StopReason::StopSequence => ClaudeStopReason::StopSequence,
        StopReason::ToolUse => ClaudeStopReason::ToolUse,
        StopReason::Refusal => ClaudeStopReason::Refusal,
    }
}
