//! Unified card lookup facade.
//!
//! Read path: cache first, then catalog; catalog hits are planted in the
//! cold tier so repeated use earns promotion. Negative results are never
//! cached. Semantic search consults the vector index and hydrates ids
//! from the catalog; an unreachable vector index degrades to an empty
//! result rather than failing the caller.

use crate::cache::{Cache, CacheStats, CacheTier};
use crate::card::MtgCard;
use crate::catalog::CatalogStore;
use crate::deck::CardSearchFilters;
use crate::error::TutorError;
use crate::vector::{Embedder, VectorIndex};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// Catalog I/O failures are retryable upstream errors, never silent
/// empties.
fn upstream(err: anyhow::Error) -> anyhow::Error {
    match err.downcast::<TutorError>() {
        Ok(already_typed) => anyhow::Error::new(already_typed),
        Err(err) => anyhow::Error::new(TutorError::UpstreamUnavailable(format!("{err:#}"))),
    }
}

/// How many search results get opportunistically planted in the cache.
const SEARCH_CACHE_DEPTH: usize = 10;

pub struct CardRepository {
    catalog: CatalogStore,
    cache: Arc<dyn Cache<Arc<MtgCard>>>,
    vector: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
}

impl CardRepository {
    pub fn new(
        catalog: CatalogStore,
        cache: Arc<dyn Cache<Arc<MtgCard>>>,
        vector: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            catalog,
            cache,
            vector,
            embedder,
        }
    }

    fn name_key(name: &str) -> String {
        format!("card:{}", name.to_lowercase())
    }

    fn id_key(id: &str) -> String {
        format!("card_id:{id}")
    }

    /// Two-tier lookup by name, case-insensitive.
    pub async fn get_by_name(&self, name: &str) -> Result<Option<Arc<MtgCard>>> {
        let key = Self::name_key(name);
        if let Some(card) = self.cache.get(&key) {
            return Ok(Some(card));
        }
        match self.catalog.get_by_name(name).map_err(upstream)? {
            Some(card) => {
                let card = Arc::new(card);
                self.cache.put_in_tier(&key, Arc::clone(&card), CacheTier::Cold);
                Ok(Some(card))
            }
            None => Ok(None),
        }
    }

    /// Two-tier lookup by id.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Arc<MtgCard>>> {
        let key = Self::id_key(id);
        if let Some(card) = self.cache.get(&key) {
            return Ok(Some(card));
        }
        match self.catalog.get_by_id(id).map_err(upstream)? {
            Some(card) => {
                let card = Arc::new(card);
                self.cache.put_in_tier(&key, Arc::clone(&card), CacheTier::Cold);
                Ok(Some(card))
            }
            None => Ok(None),
        }
    }

    /// Filtered catalog search. Result sets are not cached; the first
    /// few individual cards are planted in the cold tier for later
    /// exact lookups.
    pub async fn search(&self, filters: &CardSearchFilters, limit: usize) -> Result<Vec<MtgCard>> {
        let cards = self.catalog.search(filters, limit).map_err(upstream)?;
        for card in cards.iter().take(SEARCH_CACHE_DEPTH) {
            let key = Self::name_key(&card.name);
            if self.cache.get(&key).is_none() {
                self.cache
                    .put_in_tier(&key, Arc::new(card.clone()), CacheTier::Cold);
            }
        }
        Ok(cards)
    }

    /// Semantic similarity search, hydrated from the catalog. Vector
    /// index failures log a warning and yield an empty list; catalog
    /// errors during hydration still propagate.
    pub async fn semantic_search(
        &self,
        query: &str,
        filters: Option<&CardSearchFilters>,
        limit: usize,
    ) -> Result<Vec<MtgCard>> {
        let hits = match self
            .vector
            .search(query, limit, filters, self.embedder.as_ref())
            .await
        {
            Ok(hits) => hits,
            Err(err) => {
                warn!("Semantic search degraded to empty result: {err:#}");
                return Ok(vec![]);
            }
        };

        let mut cards = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.get_by_id(&hit.card_id).await? {
                Some(card) => cards.push((*card).clone()),
                None => debug!("Vector hit {} has no catalog row", hit.card_id),
            }
        }
        Ok(cards)
    }

    /// Warm the cache with known names. Returns how many resolved.
    pub async fn preload(&self, names: &[String]) -> Result<usize> {
        let mut loaded = 0;
        for name in names {
            if self.get_by_name(name).await?.is_some() {
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn catalog_count(&self) -> Result<u64> {
        self.catalog.count()
    }

    pub fn vector_count(&self) -> usize {
        self.vector.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{TieredCache, TieredCacheConfig};
    use crate::vector::HashEmbedder;
    use std::collections::HashMap;

    fn fixture(id: &str, name: &str) -> MtgCard {
        MtgCard {
            id: id.into(),
            name: name.into(),
            mana_cost: Some("{R}".into()),
            cmc: 1.0,
            colors: vec!["R".into()],
            color_identity: vec!["R".into()],
            type_line: "Instant".into(),
            types: vec!["Instant".into()],
            subtypes: vec![],
            oracle_text: Some(format!("{name} deals 3 damage to any target.")),
            power: None,
            toughness: None,
            loyalty: None,
            set_code: "tst".into(),
            rarity: "common".into(),
            legalities: HashMap::from([("standard".to_string(), "legal".to_string())]),
            keywords: vec![],
        }
    }

    fn repo_with(cards: &[MtgCard]) -> CardRepository {
        let catalog = CatalogStore::open_in_memory().unwrap();
        catalog.upsert_cards(cards).unwrap();
        CardRepository::new(
            catalog,
            Arc::new(TieredCache::new(TieredCacheConfig::default())),
            Arc::new(VectorIndex::in_memory()),
            Arc::new(HashEmbedder::default()),
        )
    }

    #[tokio::test]
    async fn test_get_by_name_miss_then_cache_hit() {
        let repo = repo_with(&[fixture("c1", "Lightning Bolt")]);

        let card = repo.get_by_name("Lightning Bolt").await.unwrap().unwrap();
        assert_eq!(card.id, "c1");
        // First read misses the cache, second hits it.
        let stats = repo.cache_stats();
        assert_eq!(stats.misses, 1);

        repo.get_by_name("lightning bolt").await.unwrap().unwrap();
        let stats = repo.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_negative_results_not_cached() {
        let repo = repo_with(&[]);
        assert!(repo.get_by_name("Ghost Card").await.unwrap().is_none());
        assert!(repo.get_by_name("Ghost Card").await.unwrap().is_none());
        let stats = repo.cache_stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.size, 0);
    }

    #[tokio::test]
    async fn test_get_by_id_uses_separate_key() {
        let repo = repo_with(&[fixture("c1", "Lightning Bolt")]);
        repo.get_by_id("c1").await.unwrap().unwrap();
        // Name lookup still has to hit the catalog once.
        repo.get_by_name("Lightning Bolt").await.unwrap().unwrap();
        let stats = repo.cache_stats();
        assert_eq!(stats.size, 2);
    }

    #[tokio::test]
    async fn test_search_plants_cold_entries() {
        let repo = repo_with(&[fixture("c1", "Lightning Bolt"), fixture("c2", "Shock")]);
        let found = repo
            .search(&CardSearchFilters::default(), 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        // Planted entries serve follow-up lookups from cache.
        repo.get_by_name("Shock").await.unwrap().unwrap();
        assert!(repo.cache_stats().hits >= 1);
    }

    #[tokio::test]
    async fn test_semantic_search_hydrates() {
        let catalog = CatalogStore::open_in_memory().unwrap();
        let bolt = fixture("c1", "Lightning Bolt");
        catalog.upsert_cards(std::slice::from_ref(&bolt)).unwrap();
        let vector = Arc::new(VectorIndex::in_memory());
        let embedder = Arc::new(HashEmbedder::default());
        vector
            .upsert_cards(std::slice::from_ref(&bolt), embedder.as_ref())
            .await
            .unwrap();
        let repo = CardRepository::new(
            catalog,
            Arc::new(TieredCache::new(TieredCacheConfig::default())),
            vector,
            embedder,
        );

        let found = repo
            .semantic_search("damage removal", None, 5)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Lightning Bolt");
    }

    #[tokio::test]
    async fn test_semantic_search_empty_index_is_empty() {
        let repo = repo_with(&[fixture("c1", "Lightning Bolt")]);
        let found = repo.semantic_search("anything", None, 5).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_preload_counts_resolved() {
        let repo = repo_with(&[fixture("c1", "Lightning Bolt")]);
        let loaded = repo
            .preload(&["Lightning Bolt".to_string(), "Missing Card".to_string()])
            .await
            .unwrap();
        assert_eq!(loaded, 1);
    }
}
