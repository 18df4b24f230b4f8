//! Deck size and copy-rule balancing.
//!
//! Shared by the builder (post-materialization), the refinement pass and
//! the modification executor's auto-fix step.

use std::sync::Arc;
use tracing::{debug, warn};
use tutor_common::card::{basic_land_name, MtgCard};
use tutor_common::deck::Deck;
use tutor_common::format_rules;
use tutor_common::repository::CardRepository;

/// Fill the deck up to `target` with basic lands in the declared colors,
/// distributed proportionally to how often each color appears in the
/// nonland portion. Falls back to an even split for an empty spell
/// suite.
pub async fn fill_with_basic_lands(
    deck: &mut Deck,
    target: u32,
    colors: &[String],
    repo: &Arc<CardRepository>,
) -> anyhow::Result<()> {
    deck.recalculate();
    if deck.total_cards >= target {
        return Ok(());
    }
    let remaining = target - deck.total_cards;

    let colors: Vec<String> = if colors.is_empty() {
        vec!["R".to_string()]
    } else {
        colors.to_vec()
    };

    // Weight each color by its presence in the nonland portion.
    let mut weights: Vec<f64> = colors
        .iter()
        .map(|color| {
            deck.nonlands()
                .filter(|dc| dc.card.color_identity.contains(color))
                .map(|dc| dc.quantity as f64)
                .sum()
        })
        .collect();
    if weights.iter().all(|w| *w == 0.0) {
        weights = vec![1.0; colors.len()];
    }
    let total_weight: f64 = weights.iter().sum();

    // Largest-remainder apportionment keeps the split deterministic.
    let exact: Vec<f64> = weights
        .iter()
        .map(|w| remaining as f64 * w / total_weight)
        .collect();
    let mut counts: Vec<u32> = exact.iter().map(|e| e.floor() as u32).collect();
    let mut leftover = remaining - counts.iter().sum::<u32>();
    let mut order: Vec<usize> = (0..colors.len()).collect();
    order.sort_by(|&a, &b| {
        let fa = exact[a] - exact[a].floor();
        let fb = exact[b] - exact[b].floor();
        fb.partial_cmp(&fa).unwrap_or(std::cmp::Ordering::Equal)
    });
    for idx in order {
        if leftover == 0 {
            break;
        }
        counts[idx] += 1;
        leftover -= 1;
    }

    for (color, count) in colors.iter().zip(counts) {
        if count == 0 {
            continue;
        }
        let land = resolve_basic_land(repo, color).await?;
        debug!("Filling {}x {}", count, land.name);
        deck.add_card(land, count);
    }
    deck.recalculate();
    Ok(())
}

/// Prefer the catalog's record for a basic land; synthesize one when the
/// catalog has no row (empty repository, fixtures).
async fn resolve_basic_land(repo: &Arc<CardRepository>, color: &str) -> anyhow::Result<MtgCard> {
    let name = basic_land_name(color);
    match repo.get_by_name(name).await? {
        Some(card) => Ok((*card).clone()),
        None => Ok(MtgCard::basic_land(color)),
    }
}

/// Trim the deck down to `target`, cutting the lowest-impact stacks
/// first: lowest quantity, ties broken by highest CMC. Lands are only
/// touched when no nonland remains.
pub fn trim_to_size(deck: &mut Deck, target: u32) -> Vec<String> {
    deck.recalculate();
    let mut trimmed = Vec::new();
    while deck.total_cards > target {
        let excess = deck.total_cards - target;
        let victim = deck
            .cards
            .iter()
            .enumerate()
            .filter(|(_, dc)| !dc.card.is_land())
            .min_by(|(_, a), (_, b)| {
                a.quantity
                    .cmp(&b.quantity)
                    .then_with(|| {
                        b.card
                            .cmc
                            .partial_cmp(&a.card.cmc)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
            })
            .map(|(idx, _)| idx)
            .or_else(|| {
                // Lands only: trim the largest land stack.
                deck.cards
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, dc)| dc.quantity)
                    .map(|(idx, _)| idx)
            });
        let Some(idx) = victim else { break };
        let take = deck.cards[idx].quantity.min(excess);
        deck.cards[idx].quantity -= take;
        trimmed.push(format!("Trimmed {}x {}", take, deck.cards[idx].card.name));
        deck.recalculate();
    }
    trimmed
}

/// Clamp stacks that exceed the format's copy rules. Returns one message
/// per clamped stack; an empty result means the deck was already legal.
pub fn enforce_copy_caps(deck: &mut Deck, format: &str) -> Vec<String> {
    let mut violations = Vec::new();
    for dc in &mut deck.cards {
        let cap = format_rules::copy_cap(format, dc.card.is_basic_land(), dc.card.is_legendary());
        if dc.quantity > cap {
            violations.push(format!(
                "Reduced {} from {} to the limit of {}",
                dc.card.name, dc.quantity, cap
            ));
            warn!(
                "Copy rule violation: {}x {} (limit {})",
                dc.quantity, dc.card.name, cap
            );
            dc.quantity = cap;
        }
    }
    deck.recalculate();
    violations
}
