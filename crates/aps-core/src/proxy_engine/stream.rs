use std::sync::Arc;
use std::time::Duration;

use aps_protocol::ProtocolKind;
use aps_provider_core::{HealthTracker, Provider, UpstreamByteStream, UpstreamFailure};
use aps_transform::stream::error_frames;
use aps_transform::{StreamConverter, StreamErrorWatch};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

type ClientSender = mpsc::Sender<Result<Bytes, UpstreamFailure>>;

pub(crate) enum RelayMode {
    /// Same protocol on both sides: bytes pass untouched.
    Passthrough(StreamErrorWatch),
    Convert(StreamConverter),
}

impl RelayMode {
    pub fn new(upstream: ProtocolKind, client: ProtocolKind) -> Self {
        if upstream == client {
            RelayMode::Passthrough(StreamErrorWatch::new(upstream))
        } else {
            RelayMode::Convert(StreamConverter::new(upstream, client))
        }
    }
}

/// Relays a committed upstream stream to the client.
///
/// Nothing is retried once this runs. A transport failure ends the client
/// stream with an error event; an error event sent by the upstream is relayed
/// as is. Both cool the provider down.
pub(crate) struct StreamRelay {
    pub trace_id: String,
    pub provider: Arc<Provider>,
    pub health: Arc<HealthTracker>,
    pub cooldown: Duration,
    pub client_protocol: ProtocolKind,
    pub mode: RelayMode,
    /// Set once the provider has been marked for this stream.
    pub cooled_down: bool,
}

impl StreamRelay {
    pub fn spawn(self, first: Bytes, upstream: UpstreamByteStream) -> UpstreamByteStream {
        let (tx, rx) = mpsc::channel::<Result<Bytes, UpstreamFailure>>(16);
        tokio::spawn(self.run(first, upstream, tx));
        rx
    }

    async fn run(mut self, first: Bytes, mut upstream: UpstreamByteStream, tx: ClientSender) {
        let mut relayed = first.len();
        if !self.forward(&tx, first).await {
            return;
        }
        loop {
            match upstream.recv().await {
                Some(Ok(chunk)) => {
                    relayed += chunk.len();
                    if !self.forward(&tx, chunk).await {
                        return;
                    }
                }
                Some(Err(failure)) => {
                    self.fail(&tx, &failure.to_string()).await;
                    return;
                }
                None => break,
            }
        }

        let (closing, upstream_error) = match &mut self.mode {
            RelayMode::Passthrough(watch) => (Ok(Vec::new()), watch.finish()),
            RelayMode::Convert(converter) => {
                let closing = converter.finish();
                (closing, converter.take_upstream_error())
            }
        };
        if let Some(message) = upstream_error {
            self.upstream_error_event(&message);
        }
        match closing {
            Ok(frames) => {
                if !send_all(&tx, frames).await {
                    return;
                }
            }
            Err(err) => {
                self.fail(&tx, &err.to_string()).await;
                return;
            }
        }
        debug!(
            event = "upstream_stream_completed",
            trace_id = %self.trace_id,
            provider = %self.provider.name,
            bytes = relayed
        );
    }

    /// Returns false when the relay should stop.
    async fn forward(&mut self, tx: &ClientSender, chunk: Bytes) -> bool {
        let (pushed, upstream_error) = match &mut self.mode {
            RelayMode::Passthrough(watch) => {
                let upstream_error = watch.observe(&chunk);
                (Ok(vec![chunk]), upstream_error)
            }
            RelayMode::Convert(converter) => {
                let pushed = converter.push(&chunk);
                (pushed, converter.take_upstream_error())
            }
        };
        if let Some(message) = upstream_error {
            self.upstream_error_event(&message);
        }
        let frames = match pushed {
            Ok(frames) => frames,
            Err(err) => {
                self.fail(tx, &err.to_string()).await;
                return false;
            }
        };
        if send_all(tx, frames).await {
            return true;
        }
        debug!(
            event = "downstream_disconnected",
            trace_id = %self.trace_id,
            provider = %self.provider.name
        );
        false
    }

    /// The upstream reported an error inside the stream; the event itself is
    /// relayed like any other.
    fn upstream_error_event(&mut self, message: &str) {
        if self.cooled_down {
            return;
        }
        self.mark_cooldown();
        warn!(
            event = "upstream_stream_error_event",
            trace_id = %self.trace_id,
            provider = %self.provider.name,
            error = %message,
            cooldown_secs = self.cooldown.as_secs()
        );
    }

    fn mark_cooldown(&mut self) {
        self.cooled_down = true;
        self.health
            .mark_cooldown(&self.provider.name, Instant::now() + self.cooldown);
    }

    async fn fail(&mut self, tx: &ClientSender, message: &str) {
        self.mark_cooldown();
        warn!(
            event = "upstream_stream_failed",
            trace_id = %self.trace_id,
            provider = %self.provider.name,
            error = %message,
            cooldown_secs = self.cooldown.as_secs()
        );
        let client_message = format!("upstream stream from {} failed: {message}", self.provider.name);
        let frames = match &mut self.mode {
            RelayMode::Convert(converter) => converter.error(&client_message),
            RelayMode::Passthrough(_) => error_frames(self.client_protocol, &client_message),
        };
        send_all(tx, frames).await;
    }
}

async fn send_all(tx: &ClientSender, frames: Vec<Bytes>) -> bool {
    for frame in frames {
        if tx.send(Ok(frame)).await.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use aps_common::ProviderConfig;
    use aps_provider_core::ProviderRegistry;

    fn relay(mode: RelayMode) -> (StreamRelay, Arc<HealthTracker>) {
        let registry = ProviderRegistry::load(&[ProviderConfig {
            name: "a".to_string(),
            base_url: "https://a.example.com".to_string(),
            api_key: "k".to_string(),
            ..Default::default()
        }])
        .unwrap();
        let health = Arc::new(HealthTracker::new(&registry));
        let relay = StreamRelay {
            trace_id: "trace".to_string(),
            provider: registry.get("a").unwrap(),
            health: health.clone(),
            cooldown: Duration::from_secs(60),
            client_protocol: ProtocolKind::Anthropic,
            mode,
            cooled_down: false,
        };
        (relay, health)
    }

    #[tokio::test(start_paused = true)]
    async fn client_disconnect_releases_the_upstream() {
        let (relay, health) = relay(RelayMode::new(
            ProtocolKind::Anthropic,
            ProtocolKind::Anthropic,
        ));
        let (upstream_tx, upstream_rx) = mpsc::channel(4);
        let client = relay.spawn(Bytes::from_static(b"event: ping\ndata: {}\n\n"), upstream_rx);
        upstream_tx
            .send(Ok(Bytes::from_static(b"data: {}\n\n")))
            .await
            .unwrap();

        drop(client);
        tokio::time::timeout(Duration::from_secs(5), upstream_tx.closed())
            .await
            .unwrap();
        assert!(upstream_tx.is_closed());
        assert!(upstream_tx.send(Ok(Bytes::new())).await.is_err());
        assert!(!health.is_in_cooldown("a"));
    }

    #[tokio::test]
    async fn relayed_error_event_cools_the_provider_once() {
        let (relay, health) = relay(RelayMode::new(
            ProtocolKind::Anthropic,
            ProtocolKind::Anthropic,
        ));
        let (upstream_tx, upstream_rx) = mpsc::channel(4);
        let error_event = Bytes::from_static(
            b"event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        );
        upstream_tx.send(Ok(error_event.clone())).await.unwrap();
        drop(upstream_tx);

        let ping = Bytes::from_static(b"event: ping\ndata: {\"type\":\"ping\"}\n\n");
        let mut client = relay.spawn(ping, upstream_rx);
        let mut relayed = Vec::new();
        while let Some(Ok(chunk)) = client.recv().await {
            relayed.push(chunk);
        }
        assert_eq!(relayed.last(), Some(&error_event));
        assert!(health.is_in_cooldown("a"));
    }
}
