use std::time::Duration;

use aps_protocol::ProtocolKind;
use aps_protocol::claude::types::{
    ANTHROPIC_BETA_HEADER, ANTHROPIC_VERSION, ANTHROPIC_VERSION_HEADER, API_KEY_HEADER,
};
use bytes::Bytes;

use crate::headers::{Headers, header_get, header_set, is_sensitive_header};
use crate::provider::Provider;

/// Body chunks of a streamed upstream response; an `Err` ends the stream.
pub type UpstreamByteStream = tokio::sync::mpsc::Receiver<Result<Bytes, UpstreamFailure>>;

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(UpstreamByteStream),
}

#[derive(Debug)]
pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

/// One outbound POST to a provider.
#[derive(Clone)]
pub struct UpstreamHttpRequest {
    pub provider: String,
    pub url: String,
    pub headers: Headers,
    pub body: Bytes,
    pub is_stream: bool,
    pub timeout: Duration,
}

impl std::fmt::Debug for UpstreamHttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(name, value)| {
                if is_sensitive_header(name) {
                    (name.as_str(), "<redacted>")
                } else {
                    (name.as_str(), value.as_str())
                }
            })
            .collect();
        f.debug_struct("UpstreamHttpRequest")
            .field("provider", &self.provider)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("body_len", &self.body.len())
            .field("is_stream", &self.is_stream)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamTransportErrorKind {
    Timeout,
    ReadTimeout,
    Connect,
    Other,
}

impl UpstreamTransportErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ReadTimeout => "read_timeout",
            Self::Connect => "connect",
            Self::Other => "transport",
        }
    }
}

#[derive(Debug, Clone)]
pub enum UpstreamFailure {
    /// No HTTP response was received.
    Transport {
        kind: UpstreamTransportErrorKind,
        message: String,
    },
    /// Non-2xx response, body fully buffered.
    Http {
        status: u16,
        headers: Headers,
        body: Bytes,
    },
}

impl std::fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamFailure::Transport { kind, message } => {
                write!(f, "{} error: {message}", kind.as_str())
            }
            UpstreamFailure::Http { status, .. } => write!(f, "upstream status {status}"),
        }
    }
}

/// Builds the outbound request for `provider`.
///
/// `anthropic-version` and `anthropic-beta` from the client are forwarded only
/// when both sides speak the Anthropic protocol.
pub fn build_upstream_request(
    provider: &Provider,
    client_protocol: ProtocolKind,
    client_headers: &Headers,
    body: Bytes,
    is_stream: bool,
) -> UpstreamHttpRequest {
    let mut headers: Headers = Vec::new();
    header_set(&mut headers, "content-type", "application/json");
    header_set(
        &mut headers,
        "accept",
        if is_stream {
            "text/event-stream"
        } else {
            "application/json"
        },
    );

    match provider.protocol {
        ProtocolKind::Anthropic => {
            header_set(&mut headers, API_KEY_HEADER, provider.api_key.as_str());
            let passthrough = client_protocol == ProtocolKind::Anthropic;
            let version = header_get(client_headers, ANTHROPIC_VERSION_HEADER)
                .filter(|_| passthrough)
                .unwrap_or(ANTHROPIC_VERSION);
            header_set(&mut headers, ANTHROPIC_VERSION_HEADER, version);
            if passthrough
                && let Some(beta) = header_get(client_headers, ANTHROPIC_BETA_HEADER)
            {
                header_set(&mut headers, ANTHROPIC_BETA_HEADER, beta);
            }
        }
        ProtocolKind::OpenAI => {
            header_set(
                &mut headers,
                "authorization",
                format!("Bearer {}", provider.api_key),
            );
        }
    }

    UpstreamHttpRequest {
        provider: provider.name.clone(),
        url: provider.endpoint_url(),
        headers,
        body,
        is_stream,
        timeout: provider.timeout,
    }
}
