//! Provider-side building blocks: the static registry, per-provider health,
//! cooldown derivation and the upstream request/response shapes.
//!
//! Nothing here performs IO; `aps-core` owns the HTTP client.

pub mod cooldown;
pub mod headers;
pub mod health;
pub mod provider;
pub mod registry;
pub mod upstream;

pub use cooldown::{CooldownPolicy, MAX_COOLDOWN, derive_cooldown, derive_cooldown_at};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use health::HealthTracker;
pub use provider::Provider;
pub use registry::ProviderRegistry;
pub use upstream::{
    UpstreamBody, UpstreamByteStream, UpstreamFailure, UpstreamHttpRequest, UpstreamHttpResponse,
    UpstreamTransportErrorKind, build_upstream_request,
};
