//! Daemon configuration.
//!
//! Everything comes from the environment with sensible defaults; only
//! the LLM provider key has no default. Paths are explicit rather than
//! derived so test fixtures can point everything at a temp directory.

use anyhow::{Context, Result};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct TutorConfig {
    /// LLM provider API key. Required for live runs.
    pub api_key: String,
    /// OpenAI-compatible base URL for chat completions and embeddings.
    pub llm_base_url: String,
    /// Model identifier, optionally provider-prefixed (`openai:gpt-4o-mini`).
    pub model: String,
    pub embedding_model: String,
    pub catalog_path: String,
    pub deck_db_path: String,
    pub vector_path: String,
    pub bind_addr: String,
    /// Soft per-phase budget for build/verify/refine/modify.
    pub phase_timeout_secs: u64,
    /// Global bound on in-flight LLM calls.
    pub max_inflight_llm: usize,
    pub cache_l1_size: usize,
    pub cache_l2_size: usize,
    pub cache_l3_size: usize,
    pub cache_promotion_threshold: u32,
    /// Card names preloaded into the cache at startup.
    pub warmup_cards: Vec<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring unparseable {key}");
            default
        }),
        Err(_) => default,
    }
}

impl TutorConfig {
    /// Load configuration from the environment. Fails only when the
    /// provider key is missing.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("TUTOR_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .context("TUTOR_API_KEY or OPENAI_API_KEY must be set")?;
        Ok(Self::with_api_key(api_key))
    }

    /// Build a config with defaults and the given key. Used by tests and
    /// by `from_env`.
    pub fn with_api_key(api_key: String) -> Self {
        Self {
            api_key,
            llm_base_url: env_or("TUTOR_LLM_BASE_URL", "https://api.openai.com/v1"),
            model: env_or("TUTOR_MODEL", "openai:gpt-4o-mini"),
            embedding_model: env_or("TUTOR_EMBEDDING_MODEL", "text-embedding-3-small"),
            catalog_path: env_or("TUTOR_CATALOG_PATH", "data/cards.db"),
            deck_db_path: env_or("TUTOR_DECK_DB_PATH", "data/decks.db"),
            vector_path: env_or("TUTOR_VECTOR_PATH", "data/vectors.json"),
            bind_addr: env_or("TUTOR_BIND_ADDR", "127.0.0.1:7870"),
            phase_timeout_secs: env_parse("TUTOR_PHASE_TIMEOUT_SECS", 120),
            max_inflight_llm: env_parse("TUTOR_MAX_INFLIGHT_LLM", 4),
            cache_l1_size: env_parse("TUTOR_CACHE_L1_SIZE", 200),
            cache_l2_size: env_parse("TUTOR_CACHE_L2_SIZE", 1000),
            cache_l3_size: env_parse("TUTOR_CACHE_L3_SIZE", 10000),
            cache_promotion_threshold: env_parse("TUTOR_CACHE_PROMOTION_THRESHOLD", 5),
            warmup_cards: std::env::var("TUTOR_WARMUP_CARDS")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Model name with any provider prefix stripped, as sent on the wire.
    pub fn wire_model(&self) -> &str {
        self.model
            .split_once(':')
            .map(|(_, m)| m)
            .unwrap_or(&self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_model_strips_provider_prefix() {
        let mut config = TutorConfig::with_api_key("k".into());
        config.model = "openai:gpt-4o-mini".into();
        assert_eq!(config.wire_model(), "gpt-4o-mini");
        config.model = "gpt-4o-mini".into();
        assert_eq!(config.wire_model(), "gpt-4o-mini");
    }

    #[test]
    fn test_defaults() {
        let config = TutorConfig::with_api_key("k".into());
        assert_eq!(config.phase_timeout_secs, 120);
        assert_eq!(config.cache_l1_size, 200);
        assert_eq!(config.cache_promotion_threshold, 5);
    }
}
