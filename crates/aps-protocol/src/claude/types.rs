pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const ANTHROPIC_VERSION_HEADER: &str = "anthropic-version";
pub const ANTHROPIC_BETA_HEADER: &str = "anthropic-beta";
pub const API_KEY_HEADER: &str = "x-api-key";

/// Path appended to a provider base URL for create-message calls.
pub const CREATE_MESSAGE_PATH: &str = "/v1/messages";

pub type JsonValue = serde_json::Value;
pub type Model = String;
