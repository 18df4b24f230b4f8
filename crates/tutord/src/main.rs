//! tutord entry point.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tutor_common::cache::{Cache, TieredCache, TieredCacheConfig};
use tutor_common::card::MtgCard;
use tutor_common::catalog::CatalogStore;
use tutor_common::deck_store::DeckStore;
use tutor_common::repository::CardRepository;
use tutor_common::vector::{Embedder, HttpEmbedder, VectorIndex};
use tutord::config::TutorConfig;
use tutord::orchestrator::{
    AgentDeckBuilder, DeckLlm, FsmOrchestrator, ModificationExecutor, OpenAiClient,
    QualityAnalyzer,
};
use tutord::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TUTOR_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = TutorConfig::from_env().context("Failed to load configuration")?;
    info!("Starting tutord (model {})", config.model);

    let catalog = CatalogStore::open(Path::new(&config.catalog_path))?;
    let deck_store = DeckStore::open(Path::new(&config.deck_db_path))?;
    let vector = Arc::new(VectorIndex::open(Some(config.vector_path.clone().into()))?);
    info!(
        "Catalog ready: {} cards, {} vector entries",
        catalog.count().unwrap_or(0),
        vector.count()
    );

    let cache: Arc<dyn Cache<Arc<MtgCard>>> = Arc::new(TieredCache::new(TieredCacheConfig {
        l1_max_size: config.cache_l1_size,
        l2_max_size: config.cache_l2_size,
        l3_max_size: config.cache_l3_size,
        promotion_threshold: config.cache_promotion_threshold,
    }));
    let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
        &config.llm_base_url,
        &config.api_key,
        &config.embedding_model,
    ));
    let repo = Arc::new(CardRepository::new(catalog, cache, vector, embedder));

    if !config.warmup_cards.is_empty() {
        match repo.preload(&config.warmup_cards).await {
            Ok(loaded) => info!("Preloaded {loaded}/{} cards", config.warmup_cards.len()),
            Err(err) => warn!("Cache warmup failed: {err:#}"),
        }
    }

    let llm: Arc<dyn DeckLlm> = Arc::new(OpenAiClient::new(
        &config.llm_base_url,
        &config.api_key,
        config.wire_model(),
        config.max_inflight_llm,
    ));
    if !llm.is_available().await {
        warn!("LLM provider is not reachable; deck construction will degrade");
    }

    let builder = Arc::new(AgentDeckBuilder::new(Arc::clone(&repo), Arc::clone(&llm)));
    let analyzer = Arc::new(QualityAnalyzer::new(Some(Arc::clone(&llm))));
    let modifier = Arc::new(ModificationExecutor::new(
        Arc::clone(&repo),
        Arc::clone(&llm),
        Arc::clone(&analyzer),
        Arc::clone(&builder),
    ));
    let orchestrator = Arc::new(FsmOrchestrator::new(
        Arc::clone(&repo),
        builder,
        analyzer,
        modifier,
        Duration::from_secs(config.phase_timeout_secs),
    ));

    let state = AppState::new(orchestrator, deck_store, repo);
    server::run(state, &config.bind_addr).await
}
