use std::sync::Arc;

use aps_protocol::ProtocolKind;
use aps_provider_core::{Headers, Provider, UpstreamFailure, UpstreamHttpResponse};
use aps_transform::ir::ChatRequest;
use bytes::Bytes;
use serde_json::{Value, json};

/// One inbound generation request as received from the client.
#[derive(Clone)]
pub struct ProxyCall {
    pub trace_id: String,
    pub protocol: ProtocolKind,
    pub headers: Headers,
    pub body: Bytes,
}

/// Per-request routing state, built once when the request arrives.
pub(crate) struct RequestContext {
    pub trace_id: String,
    pub client_protocol: ProtocolKind,
    pub client_headers: Headers,
    pub model: String,
    pub is_stream: bool,
    pub request: ChatRequest,
    /// Client body, relayed with only the model rewritten when protocols match.
    pub raw: Bytes,
    /// Eligible providers at request start, in priority order.
    pub candidates: Vec<Arc<Provider>>,
    pub cursor: usize,
    pub attempts: Vec<AttemptRecord>,
}

/// Why an attempt was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Transport(String),
    Status(u16),
    /// 2xx whose body could not be decoded.
    Undecodable(String),
    /// 2xx stream that closed or failed before its first chunk.
    EmptyStream(String),
    /// The request could not be expressed in the provider's protocol.
    Unencodable(String),
}

impl FailureReason {
    pub fn status(&self) -> Option<u16> {
        match self {
            FailureReason::Status(status) => Some(*status),
            _ => None,
        }
    }

    pub fn from_failure(failure: &UpstreamFailure) -> Self {
        match failure {
            UpstreamFailure::Transport { .. } => FailureReason::Transport(failure.to_string()),
            UpstreamFailure::Http { status, .. } => FailureReason::Status(*status),
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Transport(message) => write!(f, "{message}"),
            FailureReason::Status(status) => write!(f, "upstream status {status}"),
            FailureReason::Undecodable(message) => write!(f, "undecodable response: {message}"),
            FailureReason::EmptyStream(message) => write!(f, "stream failed before first chunk: {message}"),
            FailureReason::Unencodable(message) => write!(f, "request not translatable: {message}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub provider: String,
    pub reason: FailureReason,
    /// Zero when the provider was not put into cooldown.
    pub cooldown_secs: u64,
}

impl AttemptRecord {
    pub fn to_json(&self) -> Value {
        json!({
            "provider": self.provider,
            "reason": self.reason.to_string(),
            "status": self.reason.status(),
            "cooldown_secs": self.cooldown_secs,
        })
    }
}

pub(crate) enum AttemptOutcome {
    /// Final answer for the client: a success, or a non-retryable upstream error.
    Done(UpstreamHttpResponse),
    Failed(AttemptRecord),
}

/// Router states for one request.
pub(crate) enum RouteState {
    Selecting,
    Attempting(Arc<Provider>),
    Retrying,
    Succeeded(UpstreamHttpResponse),
    Exhausted,
}
