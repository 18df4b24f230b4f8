//! Deck, quality and plan models.
//!
//! Every LLM response schema used by the daemon is declared here as a
//! typed struct (construction plan, refinement plan, improvement plan,
//! modification intent) so callers never handle loose JSON maps.

use crate::card::MtgCard;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A card with its quantity in a deck. Quantity is always >= 1; stacks
/// that drop to zero are removed from the deck instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckCard {
    pub card: MtgCard,
    pub quantity: u32,
}

/// A deck under construction or persisted. Card order is not meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deck {
    #[serde(default)]
    pub cards: Vec<DeckCard>,
    pub format: String,
    #[serde(default)]
    pub archetype: Option<String>,
    /// Derived color identity, superset of the union over cards.
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub total_cards: u32,
}

impl Default for Deck {
    fn default() -> Self {
        Deck::new("Standard", None, vec![])
    }
}

impl Deck {
    pub fn new(format: &str, archetype: Option<&str>, colors: Vec<String>) -> Self {
        Self {
            cards: vec![],
            format: format.to_string(),
            archetype: archetype.map(|s| s.to_string()),
            colors,
            total_cards: 0,
        }
    }

    /// Recompute total card count and derived color identity.
    pub fn recalculate(&mut self) {
        self.cards.retain(|dc| dc.quantity > 0);
        self.total_cards = self.cards.iter().map(|dc| dc.quantity).sum();

        let mut identity: BTreeSet<String> = self.colors.iter().cloned().collect();
        for dc in &self.cards {
            for c in &dc.card.color_identity {
                identity.insert(c.clone());
            }
        }
        self.colors = identity.into_iter().collect();
    }

    pub fn lands(&self) -> impl Iterator<Item = &DeckCard> {
        self.cards.iter().filter(|dc| dc.card.is_land())
    }

    pub fn nonlands(&self) -> impl Iterator<Item = &DeckCard> {
        self.cards.iter().filter(|dc| !dc.card.is_land())
    }

    pub fn land_count(&self) -> u32 {
        self.lands().map(|dc| dc.quantity).sum()
    }

    pub fn nonland_count(&self) -> u32 {
        self.nonlands().map(|dc| dc.quantity).sum()
    }

    /// Current quantity of a card by name, case-insensitive.
    pub fn quantity_of(&self, name: &str) -> u32 {
        self.cards
            .iter()
            .filter(|dc| dc.card.name.eq_ignore_ascii_case(name))
            .map(|dc| dc.quantity)
            .sum()
    }

    /// Add copies of a card, merging with an existing stack.
    pub fn add_card(&mut self, card: MtgCard, quantity: u32) {
        if quantity == 0 {
            return;
        }
        if let Some(existing) = self
            .cards
            .iter_mut()
            .find(|dc| dc.card.name.eq_ignore_ascii_case(&card.name))
        {
            existing.quantity += quantity;
        } else {
            self.cards.push(DeckCard { card, quantity });
        }
    }

    /// Remove up to `quantity` copies by name. Returns how many were
    /// actually removed.
    pub fn remove_card(&mut self, name: &str, quantity: u32) -> u32 {
        let mut removed = 0;
        for dc in &mut self.cards {
            if removed >= quantity {
                break;
            }
            if dc.card.name.eq_ignore_ascii_case(name) {
                let take = dc.quantity.min(quantity - removed);
                dc.quantity -= take;
                removed += take;
            }
        }
        self.cards.retain(|dc| dc.quantity > 0);
        removed
    }
}

/// Quality metrics for a verified deck. Sub-scores and overall are all
/// in [0, 1]; overall is the arithmetic mean of the four sub-scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub mana_curve_score: f64,
    pub land_ratio_score: f64,
    pub synergy_score: f64,
    pub consistency_score: f64,
    pub overall_score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Present only when the analyzer's LLM call succeeded.
    #[serde(default)]
    pub improvement_plan: Option<ImprovementPlan>,
}

impl QualityMetrics {
    pub fn calculate_overall(&mut self) {
        self.overall_score = (self.mana_curve_score
            + self.land_ratio_score
            + self.synergy_score
            + self.consistency_score)
            / 4.0;
    }
}

/// One card adjustment inside an improvement plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardAdjustment {
    pub card_name: String,
    pub quantity: u32,
    pub reason: String,
}

/// Structured LLM output from the analyzer: what to cut, what to add,
/// and a free-text read of the deck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementPlan {
    #[serde(default)]
    pub removals: Vec<CardAdjustment>,
    #[serde(default)]
    pub additions: Vec<CardAdjustment>,
    #[serde(default)]
    pub analysis: String,
}

/// One spell selection inside a construction plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardSelection {
    pub card_name: String,
    pub quantity: u32,
    #[serde(default)]
    pub reasoning: String,
}

/// Structured LLM output for initial construction. Lands are never part
/// of the plan; the builder fills them afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeckConstructionPlan {
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub card_selections: Vec<CardSelection>,
}

/// Kind of a single refinement action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefinementActionKind {
    Add,
    Remove,
    Replace,
}

/// One refinement action. `replacement` is only meaningful for Replace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementAction {
    #[serde(rename = "type")]
    pub kind: RefinementActionKind,
    pub card_name: String,
    pub quantity: u32,
    #[serde(default)]
    pub replacement: Option<String>,
    #[serde(default)]
    pub reasoning: String,
}

/// Structured LLM output for a refinement pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefinementPlan {
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub actions: Vec<RefinementAction>,
}

/// Classified user intent for a deck modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentKind {
    Add,
    Remove,
    Replace,
    Optimize,
    StrategyShift,
}

/// One extracted card change inside a modification intent. Specific
/// requests carry `card_name`; abstract ones carry `search_query`;
/// predicate removals carry `cmc_min`/`cmc_max`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardChange {
    #[serde(default)]
    pub card_name: Option<String>,
    #[serde(default)]
    pub replacement: Option<String>,
    #[serde(default = "default_change_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub search_query: Option<String>,
    #[serde(default)]
    pub cmc_min: Option<f64>,
    #[serde(default)]
    pub cmc_max: Option<f64>,
}

fn default_change_quantity() -> u32 {
    1
}

/// Structured LLM output of intent classification. Confidence is stored
/// and logged but never gates execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationIntent {
    pub intent_type: IntentKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub card_changes: Vec<CardChange>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

/// A single recorded FSM iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub deck_snapshot: Deck,
    pub quality_metrics: QualityMetrics,
    #[serde(default)]
    pub improvements_applied: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Iteration bookkeeping across the build/verify/refine loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationState {
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub quality_threshold: f64,
    #[serde(default)]
    pub history: Vec<IterationRecord>,
}

impl IterationState {
    pub fn new(max_iterations: u32, quality_threshold: f64) -> Self {
        Self {
            iteration_count: 0,
            max_iterations,
            quality_threshold,
            history: vec![],
        }
    }

    /// Whether the loop should run another refinement pass.
    pub fn should_continue(&self, current_quality: f64) -> bool {
        self.iteration_count < self.max_iterations && current_quality < self.quality_threshold
    }

    pub fn add_record(&mut self, record: IterationRecord) {
        self.history.push(record);
    }
}

/// Parameters for a new-deck build, extracted from the chat message or
/// supplied directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckBuildRequest {
    pub format: String,
    pub colors: Vec<String>,
    pub archetype: String,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

pub fn default_quality_threshold() -> f64 {
    0.7
}

pub fn default_max_iterations() -> u32 {
    5
}

/// Parameters for a single-pass modification of an existing deck.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModificationRequest {
    pub existing_deck: Deck,
    pub user_prompt: String,
    #[serde(default)]
    pub run_quality_check: bool,
    /// Abstract ADD requests stop after this many distinct additions.
    #[serde(default = "default_max_changes")]
    pub max_changes: u32,
}

fn default_max_changes() -> u32 {
    4
}

/// Search filters shared by the catalog, the repository and the builder
/// tool surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardSearchFilters {
    #[serde(default)]
    pub colors: Option<Vec<String>>,
    #[serde(default)]
    pub types: Option<Vec<String>>,
    #[serde(default)]
    pub cmc_min: Option<f64>,
    #[serde(default)]
    pub cmc_max: Option<f64>,
    #[serde(default)]
    pub rarity: Option<String>,
    #[serde(default)]
    pub format_legal: Option<String>,
    #[serde(default)]
    pub text_query: Option<String>,
}
