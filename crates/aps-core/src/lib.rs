pub mod classify;
pub mod core;
pub mod error;
pub mod handler;
pub mod proxy_engine;
pub mod state;
pub mod upstream_client;

pub use classify::{StatusClass, classify_status};
pub use core::Core;
pub use error::ProxyError;
pub use proxy_engine::{AttemptRecord, FailureReason, ProxyCall, ProxyEngine};
pub use state::AppState;
pub use upstream_client::{UpstreamClient, UpstreamClientConfig, WreqUpstreamClient};
