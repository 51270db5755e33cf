//! HTTP surface for chat front-ends. The UI itself lives elsewhere; this only exposes
//! `answer(question) -> (sql, answer)` plus schema and conversation management.

mod handlers;
mod registry;
mod router;

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::pipeline::Orchestrator;

pub use registry::{ConversationLimits, Conversations};
pub use router::build_api_router;

pub type ConversationRegistry = Arc<Mutex<Conversations>>;

#[derive(Clone)]
pub struct AppState {
    pub(crate) orchestrator: Arc<Orchestrator>,
    pub(crate) conversations: ConversationRegistry,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self::with_limits(orchestrator, ConversationLimits::default())
    }

    pub fn with_limits(orchestrator: Arc<Orchestrator>, limits: ConversationLimits) -> Self {
        Self {
            orchestrator,
            conversations: Arc::new(Mutex::new(Conversations::new(limits))),
        }
    }
}

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self::with_limits(orchestrator, ConversationLimits::default())
    }

    pub fn with_limits(orchestrator: Arc<Orchestrator>, limits: ConversationLimits) -> Self {
        Self {
            state: AppState::with_limits(orchestrator, limits),
        }
    }

    pub fn router(&self, port: u16) -> Router {
        build_api_router(self.state.clone(), port)
    }

    /// Serves until the process is stopped or Ctrl-C is received.
    pub async fn serve(&self, host: &str, port: u16) -> Result<()> {
        let addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("API Server running at http://{addr}");
        let conversations = self.state.conversations.clone();
        axum::serve(listener, self.router(port))
            .with_graceful_shutdown(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down; cancelling in-flight questions");
                conversations.lock().await.cancel_all();
            })
            .await?;
        Ok(())
    }
}
