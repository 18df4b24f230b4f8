//! Vector similarity index over card descriptors.
//!
//! Embeddings come from an [`Embedder`]: the HTTP implementation talks
//! to an OpenAI-compatible `/embeddings` endpoint, the hash embedder
//! derives deterministic vectors from token hashes and needs no network,
//! which keeps tests and offline runs working. Entries live in memory
//! keyed by card id with a compact metadata record; the index can
//! persist itself to a JSON file between runs.

use crate::card::MtgCard;
use crate::deck::CardSearchFilters;
use crate::tags::embedding_text;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

/// Produces dense embeddings for texts. Batch-oriented; one call per
/// upsert or query.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// OpenAI-compatible embedding client.
pub struct HttpEmbedder {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .context("Failed to reach embedding provider")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding provider returned {status}: {body}");
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Deterministic token-hash embedder. Each lowercase token hashes to a
/// signed bucket; vectors are L2-normalized so cosine math behaves.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t, self.dim)).collect())
    }
}

fn hash_embed(text: &str, dim: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dim];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
    {
        let digest = Sha256::digest(token.as_bytes());
        let bucket = u64::from_le_bytes(digest[0..8].try_into().unwrap()) as usize % dim;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

/// Compact per-entry metadata, enough to post-filter without hydrating
/// the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMeta {
    pub name: String,
    pub cmc: f64,
    /// CSV of color codes.
    pub colors: String,
    /// CSV of card types.
    pub types: String,
    pub rarity: String,
    /// CSV of lowercase formats the card is legal in.
    pub legal_formats: String,
}

impl VectorMeta {
    fn from_card(card: &MtgCard) -> Self {
        let mut legal: Vec<String> = card
            .legalities
            .iter()
            .filter(|(_, v)| v.eq_ignore_ascii_case("legal"))
            .map(|(k, _)| k.to_lowercase())
            .collect();
        legal.sort();
        Self {
            name: card.name.clone(),
            cmc: card.cmc,
            colors: card.colors.join(","),
            types: card.types.join(","),
            rarity: card.rarity.clone(),
            legal_formats: legal.join(","),
        }
    }

    fn matches(&self, filters: &CardSearchFilters) -> bool {
        if let Some(cmc_min) = filters.cmc_min {
            if self.cmc < cmc_min {
                return false;
            }
        }
        if let Some(cmc_max) = filters.cmc_max {
            if self.cmc > cmc_max {
                return false;
            }
        }
        if let Some(rarity) = &filters.rarity {
            if !self.rarity.eq_ignore_ascii_case(rarity) {
                return false;
            }
        }
        if let Some(colors) = &filters.colors {
            let own: Vec<&str> = self.colors.split(',').filter(|s| !s.is_empty()).collect();
            if !own.is_empty() && !own.iter().any(|c| colors.iter().any(|f| f == c)) {
                return false;
            }
        }
        if let Some(types) = &filters.types {
            let own: Vec<&str> = self.types.split(',').filter(|s| !s.is_empty()).collect();
            if !own.iter().any(|t| types.iter().any(|f| f == t)) {
                return false;
            }
        }
        if let Some(format) = &filters.format_legal {
            let wanted = format.to_lowercase();
            if !self
                .legal_formats
                .split(',')
                .any(|f| f == wanted)
            {
                return false;
            }
        }
        true
    }
}

/// One search result.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub card_id: String,
    /// Cosine distance, lower is closer.
    pub distance: f32,
    pub meta: VectorMeta,
}

#[derive(Serialize, Deserialize, Clone)]
struct VectorEntry {
    embedding: Vec<f32>,
    meta: VectorMeta,
}

/// In-memory cosine index with optional JSON persistence.
pub struct VectorIndex {
    entries: RwLock<HashMap<String, VectorEntry>>,
    path: Option<PathBuf>,
}

impl VectorIndex {
    /// Open the index, loading persisted entries when `path` exists.
    pub fn open(path: Option<PathBuf>) -> Result<Self> {
        let entries = match &path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read vector index {p:?}"))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse vector index {p:?}"))?
            }
            _ => HashMap::new(),
        };
        Ok(Self {
            entries: RwLock::new(entries),
            path,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            path: None,
        }
    }

    /// Embed and (re)index cards. Returns how many entries were written.
    pub async fn upsert_cards(&self, cards: &[MtgCard], embedder: &dyn Embedder) -> Result<usize> {
        if cards.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = cards.iter().map(embedding_text).collect();
        let embeddings = embedder.embed(&texts).await?;
        anyhow::ensure!(
            embeddings.len() == cards.len(),
            "Embedding provider returned {} vectors for {} cards",
            embeddings.len(),
            cards.len()
        );

        {
            let mut entries = self.entries.write().unwrap();
            for (card, embedding) in cards.iter().zip(embeddings) {
                entries.insert(
                    card.id.clone(),
                    VectorEntry {
                        embedding,
                        meta: VectorMeta::from_card(card),
                    },
                );
            }
        }
        self.persist()?;
        Ok(cards.len())
    }

    /// Cosine search. Filters are applied as post-predicates; the
    /// returned `k` results all satisfy them.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filters: Option<&CardSearchFilters>,
        embedder: &dyn Embedder,
    ) -> Result<Vec<VectorHit>> {
        let query_vec = embedder
            .embed(std::slice::from_ref(&query.to_string()))
            .await?
            .into_iter()
            .next()
            .context("Embedding provider returned no vector for the query")?;

        let entries = self.entries.read().unwrap();
        let mut hits: Vec<VectorHit> = entries
            .iter()
            .filter(|(_, entry)| {
                filters
                    .map(|f| entry.meta.matches(f))
                    .unwrap_or(true)
            })
            .map(|(id, entry)| VectorHit {
                card_id: id.clone(),
                distance: 1.0 - cosine_similarity(&query_vec, &entry.embedding),
                meta: entry.meta.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.card_id.cmp(&b.card_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    pub fn count(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    fn persist(&self) -> Result<()> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let entries = self.entries.read().unwrap();
            let raw = serde_json::to_string(&*entries)?;
            std::fs::write(path, raw)
                .with_context(|| format!("Failed to write vector index {path:?}"))?;
        }
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn fixture(id: &str, name: &str, text: &str, colors: &[&str]) -> MtgCard {
        MtgCard {
            id: id.into(),
            name: name.into(),
            mana_cost: None,
            cmc: 2.0,
            colors: colors.iter().map(|s| s.to_string()).collect(),
            color_identity: colors.iter().map(|s| s.to_string()).collect(),
            type_line: "Creature — Goblin".into(),
            types: vec!["Creature".into()],
            subtypes: vec!["Goblin".into()],
            oracle_text: Some(text.into()),
            power: Some("2".into()),
            toughness: Some("2".into()),
            loyalty: None,
            set_code: "tst".into(),
            rarity: "common".into(),
            legalities: StdHashMap::from([("standard".to_string(), "legal".to_string())]),
            keywords: vec![],
        }
    }

    #[test]
    fn test_hash_embedder_deterministic_and_normalized() {
        let vec1 = hash_embed("goblin haste attack", 64);
        let vec2 = hash_embed("goblin haste attack", 64);
        assert_eq!(vec1, vec2);
        let norm: f32 = vec1.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        let a = vec![1.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
    }

    #[tokio::test]
    async fn test_upsert_and_search() {
        let index = VectorIndex::in_memory();
        let embedder = HashEmbedder::default();
        let cards = vec![
            fixture("g1", "Goblin Raider", "Goblin attack haste mountain", &["R"]),
            fixture("u1", "Merfolk Scholar", "Draw a card island merfolk", &["U"]),
        ];
        let count = index.upsert_cards(&cards, &embedder).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(index.count(), 2);

        let hits = index
            .search("aggressive goblin haste", 2, None, &embedder)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].card_id, "g1");
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn test_search_respects_filters() {
        let index = VectorIndex::in_memory();
        let embedder = HashEmbedder::default();
        index
            .upsert_cards(
                &[
                    fixture("g1", "Goblin Raider", "Goblin haste", &["R"]),
                    fixture("u1", "Merfolk Scholar", "Goblin studies", &["U"]),
                ],
                &embedder,
            )
            .await
            .unwrap();

        let filters = CardSearchFilters {
            colors: Some(vec!["U".to_string()]),
            ..Default::default()
        };
        let hits = index
            .search("goblin", 5, Some(&filters), &embedder)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].card_id, "u1");
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing() {
        let index = VectorIndex::in_memory();
        let embedder = HashEmbedder::default();
        let card = fixture("g1", "Goblin Raider", "Goblin haste", &["R"]);
        index.upsert_cards(&[card.clone()], &embedder).await.unwrap();
        index.upsert_cards(&[card], &embedder).await.unwrap();
        assert_eq!(index.count(), 1);
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.json");
        let embedder = HashEmbedder::default();

        {
            let index = VectorIndex::open(Some(path.clone())).unwrap();
            index
                .upsert_cards(&[fixture("g1", "Goblin Raider", "Goblin haste", &["R"])], &embedder)
                .await
                .unwrap();
        }

        let reloaded = VectorIndex::open(Some(path)).unwrap();
        assert_eq!(reloaded.count(), 1);
        let hits = reloaded.search("goblin", 1, None, &embedder).await.unwrap();
        assert_eq!(hits[0].card_id, "g1");
        assert_eq!(hits[0].meta.name, "Goblin Raider");
    }

    #[tokio::test]
    async fn test_empty_index_search() {
        let index = VectorIndex::in_memory();
        let embedder = HashEmbedder::default();
        let hits = index.search("anything", 5, None, &embedder).await.unwrap();
        assert!(hits.is_empty());
    }
}
