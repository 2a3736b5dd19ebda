use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub message: String,
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

impl ErrorResponse {
    pub fn new(kind: impl Into<String>, code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorObject {
                message: message.into(),
                r#type: kind.into(),
                param: None,
                code: code.map(str::to_string),
            },
        }
    }

    pub fn for_status(status: u16, message: impl Into<String>) -> Self {
        let (kind, code) = error_type_for_status(status);
        Self::new(kind, Some(code), message)
    }
}

/// `(type, code)` pair used for proxy-originated errors.
pub fn error_type_for_status(status: u16) -> (&'static str, &'static str) {
    match status {
        400 | 422 => ("invalid_request_error", "invalid_request"),
        401 => ("invalid_request_error", "invalid_api_key"),
        403 => ("invalid_request_error", "permission_denied"),
        404 => ("invalid_request_error", "not_found"),
        429 => ("rate_limit_exceeded", "rate_limit_exceeded"),
        503 => ("server_error", "service_unavailable"),
        _ => ("server_error", "upstream_error"),
    }
}
