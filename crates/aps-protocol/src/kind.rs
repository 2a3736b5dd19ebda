use serde::{Deserialize, Serialize};

use crate::claude::types::CREATE_MESSAGE_PATH;
use crate::openai::create_chat_completions::types::CHAT_COMPLETIONS_PATH;

/// Wire protocol spoken by a client or an upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    #[serde(alias = "claude")]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
}

impl ProtocolKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAI),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAI => "openai",
        }
    }

    /// Request path of the generation endpoint for this protocol.
    pub fn endpoint_path(self) -> &'static str {
        match self {
            Self::Anthropic => CREATE_MESSAGE_PATH,
            Self::OpenAI => CHAT_COMPLETIONS_PATH,
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
