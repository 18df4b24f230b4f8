//! Shared library for the tutor deck service.
//!
//! Holds everything both the daemon and tooling need: card and deck
//! models, the typed LLM plan schemas, format rule tables, strategic
//! tags, the cache implementations, the SQLite catalog and deck stores,
//! the vector index and the unified card repository.

pub mod cache;
pub mod card;
pub mod catalog;
pub mod deck;
pub mod deck_store;
pub mod error;
pub mod format_rules;
pub mod repository;
pub mod tags;
pub mod vector;

pub use cache::{Cache, CacheStats, CacheTier, LruCache, TieredCache, TieredCacheConfig};
pub use card::{basic_land_name, color_word_to_code, MtgCard};
pub use catalog::CatalogStore;
pub use deck::{
    CardAdjustment, CardChange, CardSearchFilters, CardSelection, Deck, DeckBuildRequest,
    DeckCard, DeckConstructionPlan, ImprovementPlan, IntentKind, IterationRecord, IterationState,
    ModificationIntent, ModificationRequest, QualityMetrics, RefinementAction,
    RefinementActionKind, RefinementPlan,
};
pub use deck_store::{DeckListFilters, DeckPatch, DeckStore, NewDeck, SavedDeck};
pub use error::{ErrorEnvelope, TutorError};
pub use repository::CardRepository;
pub use vector::{Embedder, HashEmbedder, HttpEmbedder, VectorHit, VectorIndex, VectorMeta};
