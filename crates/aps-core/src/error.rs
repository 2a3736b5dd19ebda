use aps_protocol::ProtocolKind;
use aps_provider_core::{Headers, UpstreamBody, UpstreamHttpResponse, header_set};
use aps_transform::codec_for;
use bytes::Bytes;
use serde_json::Value;

/// An error produced by the proxy itself, rendered in the client's protocol.
#[derive(Debug)]
pub struct ProxyError {
    pub status: u16,
    pub protocol: ProtocolKind,
    pub message: String,
    /// Extra top-level fields merged into the error body.
    pub extra: Vec<(String, Value)>,
}

impl ProxyError {
    pub fn new(protocol: ProtocolKind, status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            protocol,
            message: message.into(),
            extra: Vec::new(),
        }
    }

    pub fn bad_request(protocol: ProtocolKind, message: impl Into<String>) -> Self {
        Self::new(protocol, 400, message)
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.extra.push((key.to_string(), value));
        self
    }

    pub fn body(&self) -> Value {
        let mut body = codec_for(self.protocol).error_value(self.status, &self.message);
        if let Some(object) = body.as_object_mut() {
            for (key, value) in &self.extra {
                object.insert(key.clone(), value.clone());
            }
        }
        body
    }

    pub fn into_response(self) -> UpstreamHttpResponse {
        let mut headers: Headers = Vec::new();
        header_set(&mut headers, "content-type", "application/json");
        let bytes = Bytes::from(serde_json::to_vec(&self.body()).unwrap_or_default());
        UpstreamHttpResponse {
            status: self.status,
            headers,
            body: UpstreamBody::Bytes(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_in_client_protocol_with_extra_fields() {
        let err = ProxyError::new(ProtocolKind::OpenAI, 503, "all providers failed")
            .with_field("attempts", json!([]));
        let body = err.body();
        assert_eq!(body["error"]["message"], "all providers failed");
        assert_eq!(body["attempts"], json!([]));

        let claude = ProxyError::bad_request(ProtocolKind::Anthropic, "bad json").body();
        assert_eq!(claude["type"], "error");
        assert_eq!(claude["error"]["type"], "invalid_request_error");
    }
}
