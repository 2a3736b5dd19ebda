use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;
use uuid::Uuid;

use aps_protocol::ProtocolKind;
use aps_protocol::sse::encode_keep_alive;
use aps_provider_core::{Headers, UpstreamBody, UpstreamByteStream, UpstreamHttpResponse};

use crate::proxy_engine::{ProxyCall, ProxyEngine};

const SSE_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
pub const TRACE_ID_HEADER: &str = "x-aps-trace-id";

pub async fn messages_handler(
    State(engine): State<Arc<ProxyEngine>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy(engine, ProtocolKind::Anthropic, headers, body).await
}

pub async fn chat_completions_handler(
    State(engine): State<Arc<ProxyEngine>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy(engine, ProtocolKind::OpenAI, headers, body).await
}

/// Token counting is not proxied; clients only probe that the route exists.
pub async fn count_tokens_handler() -> Response {
    Json(json!({ "input_tokens": 0 })).into_response()
}

pub async fn health_handler(State(engine): State<Arc<ProxyEngine>>) -> Response {
    let state = engine.state();
    Json(json!({
        "status": "ok",
        "providers": state.registry.len(),
        "cooldowns": state.health.cooldown_count(),
    }))
    .into_response()
}

async fn proxy(
    engine: Arc<ProxyEngine>,
    protocol: ProtocolKind,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let trace_id = Uuid::new_v4().to_string();
    let started_at = Instant::now();
    info!(
        event = "downstream_received",
        trace_id = %trace_id,
        protocol = %protocol,
        path = protocol.endpoint_path(),
        body_len = body.len()
    );

    let call = ProxyCall {
        trace_id: trace_id.clone(),
        protocol,
        headers: headers_to_vec(&headers),
        body,
    };
    let resp = engine.handle(call).await;

    info!(
        event = "downstream_responded",
        trace_id = %trace_id,
        protocol = %protocol,
        status = resp.status,
        elapsed_ms = started_at.elapsed().as_millis(),
        is_stream = matches!(resp.body, UpstreamBody::Stream(_))
    );
    to_axum_response(resp, &trace_id)
}

pub fn to_axum_response(resp: UpstreamHttpResponse, trace_id: &str) -> Response {
    let sse_stream =
        has_sse_content_type(&resp.headers) && matches!(&resp.body, UpstreamBody::Stream(_));
    let mut builder = Response::builder().status(resp.status);
    if let Some(h) = builder.headers_mut() {
        for (k, v) in resp.headers {
            // Hyper sets framing itself; bodies are relayed decoded.
            if is_hop_by_hop_or_framing_header(&k) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(&v),
            ) {
                h.append(name, value);
            }
        }
        if sse_stream {
            h.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            h.entry(HeaderName::from_static("x-accel-buffering"))
                .or_insert(HeaderValue::from_static("no"));
        }
        if let Ok(value) = HeaderValue::from_str(trace_id) {
            h.insert(TRACE_ID_HEADER, value);
        }
    }

    let body = match resp.body {
        UpstreamBody::Bytes(b) => Body::from(b),
        UpstreamBody::Stream(rx) => {
            let rx = forward_stream(rx, sse_stream);
            let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
            Body::from_stream(stream)
        }
    };

    builder.body(body).unwrap_or_else(|_| {
        (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response()
    })
}

fn has_sse_content_type(headers: &Headers) -> bool {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.to_ascii_lowercase().contains("text/event-stream"))
        .unwrap_or(false)
}

/// Pumps relay output into the response body.
///
/// With `heartbeat` set, an SSE comment goes out after each quiet interval, but
/// only between complete events. Dropping the returned receiver (client gone)
/// stops the pump and, through it, the upstream read.
fn forward_stream(
    mut upstream_rx: UpstreamByteStream,
    heartbeat: bool,
) -> tokio::sync::mpsc::Receiver<Bytes> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SSE_HEARTBEAT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip immediate tick; first heartbeat should be sent after the interval.
        ticker.tick().await;
        let mut at_event_boundary = true;

        loop {
            tokio::select! {
                maybe_chunk = upstream_rx.recv() => {
                    let Some(Ok(chunk)) = maybe_chunk else {
                        break;
                    };
                    at_event_boundary = ends_event(&chunk);
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                    ticker.reset();
                }
                _ = ticker.tick(), if heartbeat && at_event_boundary => {
                    if tx.send(encode_keep_alive()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

fn ends_event(chunk: &[u8]) -> bool {
    chunk.ends_with(b"\n\n") || chunk.ends_with(b"\r\n\r\n")
}

fn is_hop_by_hop_or_framing_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length")
        || name.eq_ignore_ascii_case("content-encoding")
        || name.eq_ignore_ascii_case("transfer-encoding")
        || name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("keep-alive")
        || name.eq_ignore_ascii_case("proxy-authenticate")
        || name.eq_ignore_ascii_case("proxy-authorization")
        || name.eq_ignore_ascii_case("te")
        || name.eq_ignore_ascii_case("trailer")
        || name.eq_ignore_ascii_case("upgrade")
}

fn headers_to_vec(headers: &HeaderMap) -> Headers {
    let mut out: Headers = Vec::new();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            out.push((name.as_str().to_string(), v.to_string()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn strips_framing_headers_and_marks_sse() {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        drop(tx);
        let resp = UpstreamHttpResponse {
            status: 200,
            headers: vec![
                ("content-type".to_string(), "text/event-stream".to_string()),
                ("content-length".to_string(), "42".to_string()),
                ("transfer-encoding".to_string(), "chunked".to_string()),
                ("x-request-id".to_string(), "req_1".to_string()),
            ],
            body: UpstreamBody::Stream(rx),
        };
        let out = to_axum_response(resp, "trace-1");
        let headers = out.headers();
        assert!(headers.get("content-length").is_none());
        assert!(headers.get("transfer-encoding").is_none());
        assert_eq!(headers.get("x-request-id").unwrap(), "req_1");
        assert_eq!(headers.get("cache-control").unwrap(), "no-cache");
        assert_eq!(headers.get("x-accel-buffering").unwrap(), "no");
        assert_eq!(headers.get(TRACE_ID_HEADER).unwrap(), "trace-1");
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_after_quiet_interval() {
        let (upstream_tx, upstream_rx) = tokio::sync::mpsc::channel(4);
        let mut out = forward_stream(upstream_rx, true);

        upstream_tx
            .send(Ok(Bytes::from_static(b"data: {}\n\n")))
            .await
            .unwrap();
        assert_eq!(out.recv().await.unwrap(), Bytes::from_static(b"data: {}\n\n"));

        let started = tokio::time::Instant::now();
        assert_eq!(out.recv().await.unwrap(), encode_keep_alive());
        assert!(started.elapsed() >= SSE_HEARTBEAT_INTERVAL);
        drop(upstream_tx);
        assert!(out.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_waits_for_event_boundary() {
        let (upstream_tx, upstream_rx) = tokio::sync::mpsc::channel(4);
        let mut out = forward_stream(upstream_rx, true);

        upstream_tx
            .send(Ok(Bytes::from_static(b"data: {\"partial\"")))
            .await
            .unwrap();
        out.recv().await.unwrap();
        let quiet = tokio::time::timeout(SSE_HEARTBEAT_INTERVAL * 4, out.recv()).await;
        assert!(quiet.is_err());

        upstream_tx
            .send(Ok(Bytes::from_static(b":1}\n\n")))
            .await
            .unwrap();
        assert_eq!(out.recv().await.unwrap(), Bytes::from_static(b":1}\n\n"));
        assert_eq!(out.recv().await.unwrap(), encode_keep_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn no_keep_alive_for_plain_streams() {
        let (upstream_tx, upstream_rx) = tokio::sync::mpsc::channel::<Result<Bytes, _>>(4);
        let mut out = forward_stream(upstream_rx, false);
        let quiet = tokio::time::timeout(SSE_HEARTBEAT_INTERVAL * 2, out.recv()).await;
        assert!(quiet.is_err());
        drop(upstream_tx);
    }

    #[test]
    fn event_boundary_detection() {
        assert!(ends_event(b"data: {}\n\n"));
        assert!(ends_event(b"data: {}\r\n\r\n"));
        assert!(!ends_event(b"data: {\"partial\""));
    }
}
