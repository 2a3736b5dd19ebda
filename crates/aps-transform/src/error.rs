#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error("upstream response has no choices")]
    EmptyChoices,
    #[error("upstream stream error: {0}")]
    Stream(String),
}
