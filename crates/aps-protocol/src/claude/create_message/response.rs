use serde::{Deserialize, Serialize};

use crate::claude::create_message::types::{ContentBlock, MessageRole, StopReason, Usage};
use crate::claude::types::Model;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMessageResponse {
    pub id: String,
    #[serde(rename = "type", default = "message_type")]
    pub r#type: String,
    pub role: MessageRole,
    pub model: Model,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

fn message_type() -> String {
    "message".to_string()
}
