//! Failover routing for one client request.
//!
//! Every request walks the eligible providers in priority order. A transport
//! error, a 403/429/5xx, an undecodable 2xx body or a stream that dies before
//! its first chunk cools the provider down and moves on; anything else is the
//! client's answer.

use std::sync::Arc;
use std::time::Duration;

use aps_provider_core::{
    Provider, UpstreamBody, UpstreamByteStream, UpstreamFailure, UpstreamHttpResponse,
    build_upstream_request, derive_cooldown, header_remove, header_set,
};
use aps_transform::{
    TransformError, from_intermediate, intermediate_to_client, rewrite_model,
    to_intermediate, upstream_response_to_intermediate,
};
use bytes::{Bytes, BytesMut};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::classify::{StatusClass, classify_status};
use crate::error::ProxyError;
use crate::state::AppState;
use crate::upstream_client::UpstreamClient;

mod stream;
mod types;

pub use types::{AttemptRecord, FailureReason, ProxyCall};

use stream::{RelayMode, StreamRelay};
use types::{AttemptOutcome, RequestContext, RouteState};

const LOG_BODY_SNIPPET_CHARS: usize = 512;

pub struct ProxyEngine {
    state: Arc<AppState>,
    client: Arc<dyn UpstreamClient>,
}

impl ProxyEngine {
    pub fn new(state: Arc<AppState>, client: Arc<dyn UpstreamClient>) -> Self {
        Self { state, client }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub async fn handle(&self, call: ProxyCall) -> UpstreamHttpResponse {
        let request = match to_intermediate(call.protocol, &call.body) {
            Ok(request) => request,
            Err(err) => return self.reject(&call, err),
        };
        if request.model.trim().is_empty() {
            return ProxyError::bad_request(call.protocol, "model is required").into_response();
        }

        let mut ctx = RequestContext {
            trace_id: call.trace_id,
            client_protocol: call.protocol,
            client_headers: call.headers,
            model: request.model.clone(),
            is_stream: request.stream,
            request,
            raw: call.body,
            candidates: Vec::new(),
            cursor: 0,
            attempts: Vec::new(),
        };

        let mut state = RouteState::Selecting;
        loop {
            state = match state {
                RouteState::Selecting => {
                    let registry = &self.state.registry;
                    ctx.candidates = self
                        .state
                        .health
                        .eligible_now(registry.providers_by_priority());
                    debug!(
                        event = "candidates_selected",
                        trace_id = %ctx.trace_id,
                        eligible = ctx.candidates.len(),
                        configured = registry.len()
                    );
                    self.next_candidate(&mut ctx)
                }
                RouteState::Attempting(provider) => match self.attempt(&ctx, &provider).await {
                    AttemptOutcome::Done(resp) => RouteState::Succeeded(resp),
                    AttemptOutcome::Failed(record) => {
                        ctx.attempts.push(record);
                        RouteState::Retrying
                    }
                },
                RouteState::Retrying => self.next_candidate(&mut ctx),
                RouteState::Succeeded(resp) => return resp,
                RouteState::Exhausted => return self.exhausted(&ctx),
            };
        }
    }

    fn reject(&self, call: &ProxyCall, err: TransformError) -> UpstreamHttpResponse {
        warn!(
            event = "downstream_rejected",
            trace_id = %call.trace_id,
            protocol = %call.protocol,
            error = %err
        );
        ProxyError::bad_request(call.protocol, format!("invalid request body: {err}"))
            .into_response()
    }

    /// Next snapshot entry that has not been tried and is not cooling down now.
    fn next_candidate(&self, ctx: &mut RequestContext) -> RouteState {
        while let Some(provider) = ctx.candidates.get(ctx.cursor).cloned() {
            ctx.cursor += 1;
            if self.state.health.is_in_cooldown(&provider.name) {
                debug!(
                    event = "provider_skipped",
                    trace_id = %ctx.trace_id,
                    provider = %provider.name,
                    reason = "cooldown"
                );
                continue;
            }
            return RouteState::Attempting(provider);
        }
        RouteState::Exhausted
    }

    async fn attempt(&self, ctx: &RequestContext, provider: &Arc<Provider>) -> AttemptOutcome {
        let model = provider.map_model(&ctx.model);
        let body = if provider.protocol == ctx.client_protocol {
            rewrite_model(&ctx.raw, model)
        } else {
            from_intermediate(provider.protocol, &ctx.request, model)
        };
        let body = match body {
            Ok(body) => body,
            Err(err) => {
                warn!(
                    event = "upstream_request_encode_failed",
                    trace_id = %ctx.trace_id,
                    provider = %provider.name,
                    error = %err
                );
                return AttemptOutcome::Failed(AttemptRecord {
                    provider: provider.name.clone(),
                    reason: FailureReason::Unencodable(err.to_string()),
                    cooldown_secs: 0,
                });
            }
        };

        let req = build_upstream_request(
            provider,
            ctx.client_protocol,
            &ctx.client_headers,
            body,
            ctx.is_stream,
        );
        info!(
            event = "upstream_attempt",
            trace_id = %ctx.trace_id,
            provider = %provider.name,
            protocol = %provider.protocol,
            model = %model,
            attempt = ctx.attempts.len() + 1,
            is_stream = ctx.is_stream
        );
        let started_at = std::time::Instant::now();

        let resp = match self.client.send(req).await {
            Ok(resp) => resp,
            Err(failure) => {
                let cooldown = self.default_cooldown(provider);
                return self.fail(ctx, provider, FailureReason::from_failure(&failure), cooldown);
            }
        };

        let status = resp.status;
        match classify_status(status) {
            StatusClass::Success => {}
            StatusClass::Retryable => {
                let body = collect_body(resp.body).await.unwrap_or_default();
                let cooldown = derive_cooldown(
                    status,
                    &resp.headers,
                    &body,
                    self.state.cooldown.fallback_secs(provider, Some(status)),
                );
                debug!(
                    event = "upstream_error_body",
                    trace_id = %ctx.trace_id,
                    provider = %provider.name,
                    status = status,
                    body = %body_snippet(&body)
                );
                return self.fail(ctx, provider, FailureReason::Status(status), cooldown);
            }
            StatusClass::Passthrough => {
                info!(
                    event = "upstream_responded",
                    trace_id = %ctx.trace_id,
                    provider = %provider.name,
                    status = status,
                    elapsed_ms = started_at.elapsed().as_millis(),
                    passthrough = true
                );
                return AttemptOutcome::Done(resp);
            }
        }

        let outcome = if ctx.is_stream {
            self.commit_stream(ctx, provider, resp).await
        } else {
            self.finish_buffered(ctx, provider, resp).await
        };
        if matches!(outcome, AttemptOutcome::Done(_)) {
            info!(
                event = "upstream_responded",
                trace_id = %ctx.trace_id,
                provider = %provider.name,
                status = status,
                elapsed_ms = started_at.elapsed().as_millis(),
                passthrough = false
            );
        }
        outcome
    }

    async fn finish_buffered(
        &self,
        ctx: &RequestContext,
        provider: &Arc<Provider>,
        resp: UpstreamHttpResponse,
    ) -> AttemptOutcome {
        let UpstreamHttpResponse {
            status,
            mut headers,
            body,
        } = resp;
        let body = match collect_body(body).await {
            Ok(body) => body,
            Err(failure) => {
                let cooldown = self.default_cooldown(provider);
                return self.fail(ctx, provider, FailureReason::from_failure(&failure), cooldown);
            }
        };

        let translated = if provider.protocol == ctx.client_protocol {
            match serde_json::from_slice::<Value>(&body) {
                Ok(Value::Object(_)) => Ok(body),
                Ok(_) => Err(TransformError::NotAnObject),
                Err(err) => Err(TransformError::from(err)),
            }
        } else {
            upstream_response_to_intermediate(provider.protocol, &body)
                .and_then(|response| intermediate_to_client(ctx.client_protocol, &response))
        };

        match translated {
            Ok(body) => {
                header_remove(&mut headers, "content-length");
                header_remove(&mut headers, "content-encoding");
                header_set(&mut headers, "content-type", "application/json");
                AttemptOutcome::Done(UpstreamHttpResponse {
                    status,
                    headers,
                    body: UpstreamBody::Bytes(body),
                })
            }
            Err(err) => {
                let cooldown = self.default_cooldown(provider);
                self.fail(ctx, provider, FailureReason::Undecodable(err.to_string()), cooldown)
            }
        }
    }

    /// Waits for the first non-empty chunk; only then is the provider committed.
    async fn commit_stream(
        &self,
        ctx: &RequestContext,
        provider: &Arc<Provider>,
        resp: UpstreamHttpResponse,
    ) -> AttemptOutcome {
        let UpstreamHttpResponse {
            status,
            mut headers,
            body,
        } = resp;
        let mut upstream = into_byte_stream(body);

        let first = loop {
            match upstream.recv().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => break chunk,
                Some(Err(failure)) => {
                    let cooldown = self.default_cooldown(provider);
                    let reason = FailureReason::EmptyStream(failure.to_string());
                    return self.fail(ctx, provider, reason, cooldown);
                }
                None => {
                    let cooldown = self.default_cooldown(provider);
                    let reason = FailureReason::EmptyStream("closed without data".to_string());
                    return self.fail(ctx, provider, reason, cooldown);
                }
            }
        };

        let relay = StreamRelay {
            trace_id: ctx.trace_id.clone(),
            provider: provider.clone(),
            health: self.state.health.clone(),
            cooldown: self.default_cooldown(provider),
            client_protocol: ctx.client_protocol,
            mode: RelayMode::new(provider.protocol, ctx.client_protocol),
            cooled_down: false,
        };
        let stream = relay.spawn(first, upstream);

        header_remove(&mut headers, "content-length");
        header_remove(&mut headers, "content-encoding");
        header_set(&mut headers, "content-type", "text/event-stream");
        AttemptOutcome::Done(UpstreamHttpResponse {
            status,
            headers,
            body: UpstreamBody::Stream(stream),
        })
    }

    fn default_cooldown(&self, provider: &Provider) -> Duration {
        Duration::from_secs(self.state.cooldown.fallback_secs(provider, None))
    }

    fn fail(
        &self,
        ctx: &RequestContext,
        provider: &Provider,
        reason: FailureReason,
        cooldown: Duration,
    ) -> AttemptOutcome {
        self.state
            .health
            .mark_cooldown(&provider.name, Instant::now() + cooldown);
        warn!(
            event = "upstream_failed",
            trace_id = %ctx.trace_id,
            provider = %provider.name,
            status = ?reason.status(),
            reason = %reason,
            cooldown_secs = cooldown.as_secs()
        );
        AttemptOutcome::Failed(AttemptRecord {
            provider: provider.name.clone(),
            reason,
            cooldown_secs: cooldown.as_secs(),
        })
    }

    fn exhausted(&self, ctx: &RequestContext) -> UpstreamHttpResponse {
        let status = ctx
            .attempts
            .last()
            .and_then(|record| record.reason.status())
            .unwrap_or(503);
        let message = if ctx.attempts.is_empty() {
            format!(
                "no provider available: all {} configured providers are cooling down",
                self.state.registry.len()
            )
        } else {
            let tried: Vec<&str> = ctx
                .attempts
                .iter()
                .map(|record| record.provider.as_str())
                .collect();
            format!("all providers failed (tried: {})", tried.join(", "))
        };
        warn!(
            event = "providers_exhausted",
            trace_id = %ctx.trace_id,
            attempts = ctx.attempts.len(),
            status = status
        );
        let attempts = ctx.attempts.iter().map(AttemptRecord::to_json).collect();
        ProxyError::new(ctx.client_protocol, status, message)
            .with_field("attempts", Value::Array(attempts))
            .into_response()
    }
}

async fn collect_body(body: UpstreamBody) -> Result<Bytes, UpstreamFailure> {
    match body {
        UpstreamBody::Bytes(bytes) => Ok(bytes),
        UpstreamBody::Stream(mut rx) => {
            let mut buf = BytesMut::new();
            while let Some(chunk) = rx.recv().await {
                buf.extend_from_slice(&chunk?);
            }
            Ok(buf.freeze())
        }
    }
}

fn into_byte_stream(body: UpstreamBody) -> UpstreamByteStream {
    match body {
        UpstreamBody::Stream(rx) => rx,
        UpstreamBody::Bytes(bytes) => {
            let (tx, rx) = tokio::sync::mpsc::channel(1);
            let _ = tx.try_send(Ok(bytes));
            rx
        }
    }
}

fn body_snippet(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(LOG_BODY_SNIPPET_CHARS)
        .collect()
}
