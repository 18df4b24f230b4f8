//! HTTP server assembly.

use crate::orchestrator::FsmOrchestrator;
use crate::routes;
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::info;
use tutor_common::deck_store::DeckStore;
use tutor_common::repository::CardRepository;

/// Application state shared across handlers.
pub struct AppState {
    pub orchestrator: Arc<FsmOrchestrator>,
    pub deck_store: DeckStore,
    pub repo: Arc<CardRepository>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<FsmOrchestrator>,
        deck_store: DeckStore,
        repo: Arc<CardRepository>,
    ) -> Self {
        Self {
            orchestrator,
            deck_store,
            repo,
            start_time: Instant::now(),
        }
    }
}

/// Build the full router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .merge(routes::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until shutdown.
pub async fn run(state: AppState, bind_addr: &str) -> Result<()> {
    let app = router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Listening on http://{bind_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
