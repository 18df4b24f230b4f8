//! Deck quality analysis.
//!
//! Four deterministic sub-scores (curve, lands, synergy, consistency)
//! averaged into the overall score, plus an LLM improvement plan. The
//! numeric scores are authoritative; the LLM call may add narrative and
//! a plan but never changes a number, and its failure never fails
//! verification.

use super::llm::DeckLlm;
use super::prompts;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use tutor_common::deck::{Deck, QualityMetrics};
use tutor_common::format_rules;
use tutor_common::tags::strategic_tags;

/// Sub-scores below this produce an issue and a suggestion.
const WARN_THRESHOLD: f64 = 0.6;

/// Land counts within this many cards of ideal score 1.0.
const LAND_EPSILON: f64 = 2.0;

pub struct QualityAnalyzer {
    llm: Option<Arc<dyn DeckLlm>>,
}

impl QualityAnalyzer {
    pub fn new(llm: Option<Arc<dyn DeckLlm>>) -> Self {
        Self { llm }
    }

    /// Score a deck and, when an LLM is wired in, attach an improvement
    /// plan.
    pub async fn verify_deck(&self, deck: &Deck, format: &str) -> QualityMetrics {
        let archetype = deck.archetype.as_deref().unwrap_or("Midrange");

        let mut metrics = QualityMetrics {
            mana_curve_score: mana_curve_score(deck, format),
            land_ratio_score: land_ratio_score(deck, format, archetype),
            synergy_score: synergy_score(deck),
            consistency_score: consistency_score(deck, format),
            overall_score: 0.0,
            issues: vec![],
            suggestions: vec![],
            improvement_plan: None,
        };
        metrics.calculate_overall();

        self.collect_findings(deck, format, &mut metrics);

        if let Some(llm) = &self.llm {
            let system = prompts::analyzer_system_prompt(format);
            let user = format!(
                "Analyze this {} {} deck.\n\nColors: {}\nCurrent metrics: curve {:.2}, lands {:.2}, synergy {:.2}, consistency {:.2}\n\nDecklist:\n{}",
                format,
                archetype,
                deck.colors.join(", "),
                metrics.mana_curve_score,
                metrics.land_ratio_score,
                metrics.synergy_score,
                metrics.consistency_score,
                prompts::render_decklist(deck),
            );
            match llm.improvement_plan(&system, &user).await {
                Ok((plan, _raw)) => {
                    if !plan.analysis.is_empty() {
                        metrics.suggestions.push(format!("Analysis: {}", plan.analysis));
                    }
                    for addition in &plan.additions {
                        metrics.suggestions.push(format!(
                            "Add {}x {}: {}",
                            addition.quantity, addition.card_name, addition.reason
                        ));
                    }
                    for removal in &plan.removals {
                        metrics.suggestions.push(format!(
                            "Remove {}x {}: {}",
                            removal.quantity, removal.card_name, removal.reason
                        ));
                    }
                    metrics.improvement_plan = Some(plan);
                }
                Err(err) => {
                    // Numeric metrics stand alone; the plan is absent.
                    warn!("Improvement-plan call failed, keeping numeric metrics: {err:#}");
                }
            }
        }

        debug!(
            "Verified deck: overall {:.2} (curve {:.2}, lands {:.2}, synergy {:.2}, consistency {:.2})",
            metrics.overall_score,
            metrics.mana_curve_score,
            metrics.land_ratio_score,
            metrics.synergy_score,
            metrics.consistency_score
        );
        metrics
    }

    fn collect_findings(&self, deck: &Deck, format: &str, metrics: &mut QualityMetrics) {
        let deck_size = format_rules::deck_size(format);
        if deck.total_cards != deck_size {
            metrics.issues.push(format!(
                "Deck size is {}, expected {}",
                deck.total_cards, deck_size
            ));
        }

        if metrics.mana_curve_score < WARN_THRESHOLD {
            metrics
                .issues
                .push("Mana curve deviates from the format's ideal shape".to_string());
            metrics
                .suggestions
                .push("Rebalance toward the 2-3 CMC range".to_string());
        }
        if metrics.land_ratio_score < WARN_THRESHOLD {
            let archetype = deck.archetype.as_deref().unwrap_or("Midrange");
            let ideal = format_rules::land_count(format, archetype);
            let actual = deck.land_count();
            metrics.issues.push(format!(
                "Land count {actual} is off the {ideal} target for this archetype"
            ));
            if actual < ideal {
                metrics
                    .suggestions
                    .push(format!("Add {} more lands", ideal - actual));
            } else {
                metrics
                    .suggestions
                    .push(format!("Cut {} lands", actual - ideal));
            }
        }
        if metrics.synergy_score < WARN_THRESHOLD {
            metrics
                .issues
                .push("Cards lack shared tribes, keywords or mechanics".to_string());
            metrics
                .suggestions
                .push("Add cards with overlapping keywords or tribal themes".to_string());
        }
        if metrics.consistency_score < WARN_THRESHOLD {
            metrics
                .issues
                .push("Too many one-ofs and two-ofs reduce consistency".to_string());
            metrics
                .suggestions
                .push("Run 3-4 copies of the deck's key cards".to_string());
        }
    }
}

/// Normalized CMC histogram versus the format's ideal buckets, scored as
/// 1 - L1/2.
pub fn mana_curve_score(deck: &Deck, format: &str) -> f64 {
    let total: u32 = deck.nonlands().map(|dc| dc.quantity).sum();
    if total == 0 {
        return 0.0;
    }

    let buckets = format_rules::curve_buckets(format);
    let mut actual = vec![0.0f64; buckets.len()];
    for dc in deck.nonlands() {
        let cmc = dc.card.cmc.max(0.0) as u32;
        for (i, bucket) in buckets.iter().enumerate() {
            if cmc >= bucket.min && bucket.max.map(|m| cmc <= m).unwrap_or(true) {
                actual[i] += dc.quantity as f64 / total as f64;
                break;
            }
        }
    }

    let l1: f64 = buckets
        .iter()
        .zip(&actual)
        .map(|(bucket, share)| (share - bucket.fraction).abs())
        .sum();
    (1.0 - l1 / 2.0).clamp(0.0, 1.0)
}

/// Distance from the archetype's ideal land count, with full credit
/// inside a small epsilon and linear decay over 20% of the deck size.
pub fn land_ratio_score(deck: &Deck, format: &str, archetype: &str) -> f64 {
    let deck_size = format_rules::deck_size(format) as f64;
    let ideal = format_rules::land_count(format, archetype) as f64;
    let actual = deck.land_count() as f64;

    let diff = (actual - ideal).abs();
    if diff <= LAND_EPSILON {
        return 1.0;
    }
    let band = deck_size * 0.2;
    if band <= LAND_EPSILON {
        return 0.0;
    }
    (1.0 - (diff - LAND_EPSILON) / (band - LAND_EPSILON)).clamp(0.0, 1.0)
}

/// Tag-clustering synergy: shared tribes, keywords and mechanic tags,
/// with thresholds scaled to deck size.
pub fn synergy_score(deck: &Deck) -> f64 {
    if deck.cards.is_empty() {
        return 0.0;
    }

    let mut keyword_counts: HashMap<String, u32> = HashMap::new();
    let mut tribe_counts: HashMap<String, u32> = HashMap::new();
    let mut tag_counts: HashMap<String, u32> = HashMap::new();

    for dc in &deck.cards {
        for keyword in &dc.card.keywords {
            *keyword_counts.entry(keyword.to_lowercase()).or_default() += dc.quantity;
        }
        if dc.card.is_creature() {
            for subtype in &dc.card.subtypes {
                *tribe_counts.entry(subtype.to_lowercase()).or_default() += dc.quantity;
            }
        }
        for tag in strategic_tags(&dc.card) {
            if tag.starts_with("synergy:") {
                *tag_counts.entry(tag).or_default() += dc.quantity;
            }
        }
    }

    let scale = (deck.total_cards.max(1) as f64 / 60.0).max(1.0);
    let keyword_threshold = (4.0 * scale).ceil() as u32;
    let tribal_threshold = (8.0 * scale).ceil() as u32;

    let strong_keywords = keyword_counts
        .values()
        .filter(|&&count| count >= keyword_threshold)
        .count() as f64;
    let strong_tribes = tribe_counts
        .values()
        .filter(|&&count| count >= tribal_threshold)
        .count() as f64;
    let strong_tags = tag_counts
        .values()
        .filter(|&&count| count >= keyword_threshold)
        .count() as f64;

    let score = (strong_keywords * 0.15).min(0.4)
        + (strong_tribes * 0.25).min(0.4)
        + (strong_tags * 0.1).min(0.2);
    score.min(1.0)
}

/// Playset-shaped quantities score high; stray one-ofs score low unless
/// the format is singleton or the card is a legendary utility one-of.
pub fn consistency_score(deck: &Deck, format: &str) -> f64 {
    if format_rules::is_singleton(format) {
        return 1.0;
    }
    let stacks: Vec<_> = deck.nonlands().collect();
    if stacks.is_empty() {
        return 0.0;
    }
    let total: f64 = stacks
        .iter()
        .map(|dc| match dc.quantity {
            q if q >= 4 => 1.0,
            3 => 0.75,
            2 => 0.5,
            _ => {
                if dc.card.is_legendary() {
                    1.0
                } else {
                    0.25
                }
            }
        })
        .sum();
    (total / stacks.len() as f64).min(1.0)
}
