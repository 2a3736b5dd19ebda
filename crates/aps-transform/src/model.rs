use bytes::Bytes;
use serde_json::Value;

use crate::error::TransformError;

/// Replaces the top-level `model` of a raw JSON request, leaving every other field untouched.
pub fn rewrite_model(raw: &[u8], model: &str) -> Result<Bytes, TransformError> {
    let mut body: Value = serde_json::from_slice(raw)?;
    let Some(object) = body.as_object_mut() else {
        return Err(TransformError::NotAnObject);
    };
    object.insert("model".to_string(), Value::String(model.to_string()));
    Ok(Bytes::from(serde_json::to_vec(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_model_and_keeps_unknown_fields() {
        let raw = br#"{"model":"claude-3-5-sonnet","metadata":{"user_id":"u"},"thinking":{"type":"enabled","budget_tokens":1024}}"#;
        let out = rewrite_model(raw, "glm-4.6").unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["model"], "glm-4.6");
        assert_eq!(value["metadata"]["user_id"], "u");
        assert_eq!(value["thinking"]["budget_tokens"], 1024);
    }

    #[test]
    fn rejects_non_object_body() {
        assert!(matches!(
            rewrite_model(b"[1,2]", "m"),
            Err(TransformError::NotAnObject)
        ));
    }
}
