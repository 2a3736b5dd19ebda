use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use aps_protocol::claude::CREATE_MESSAGE_PATH;
use aps_protocol::openai::create_chat_completions::CHAT_COMPLETIONS_PATH;

use crate::handler::{
    chat_completions_handler, count_tokens_handler, health_handler, messages_handler,
};
use crate::proxy_engine::ProxyEngine;
use crate::state::AppState;
use crate::upstream_client::UpstreamClient;

pub const COUNT_TOKENS_PATH: &str = "/v1/messages/count_tokens";
pub const HEALTH_PATH: &str = "/health";

pub struct Core {
    engine: Arc<ProxyEngine>,
}

impl Core {
    pub fn new(state: Arc<AppState>, client: Arc<dyn UpstreamClient>) -> Self {
        Self {
            engine: Arc::new(ProxyEngine::new(state, client)),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(CREATE_MESSAGE_PATH, post(messages_handler))
            .route(CHAT_COMPLETIONS_PATH, post(chat_completions_handler))
            .route(COUNT_TOKENS_PATH, post(count_tokens_handler))
            .route(HEALTH_PATH, get(health_handler))
            .with_state(self.engine.clone())
    }

    pub fn engine(&self) -> Arc<ProxyEngine> {
        self.engine.clone()
    }
}
