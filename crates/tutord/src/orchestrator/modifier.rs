//! Single-pass deck modification.
//!
//! Classifies the user's prompt into a typed intent, executes one branch
//! per intent kind, then auto-fixes deck size and copy rules. Quality
//! re-checking is optional and never triggers further mutation.

use super::analyzer::QualityAnalyzer;
use super::builder::AgentDeckBuilder;
use super::llm::DeckLlm;
use super::{balance, prompts};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tutor_common::deck::{
    CardChange, CardSearchFilters, Deck, DeckBuildRequest, IntentKind, ModificationIntent,
    ModificationRequest, QualityMetrics,
};
use tutor_common::error::TutorError;
use tutor_common::format_rules;
use tutor_common::repository::CardRepository;

/// Result of one modification pass.
#[derive(Debug, Clone)]
pub struct ModificationOutcome {
    pub deck: Deck,
    pub intent: ModificationIntent,
    pub changes: Vec<String>,
    pub errors: Vec<String>,
    pub quality: Option<QualityMetrics>,
}

pub struct ModificationExecutor {
    repo: Arc<CardRepository>,
    llm: Arc<dyn DeckLlm>,
    analyzer: Arc<QualityAnalyzer>,
    builder: Arc<AgentDeckBuilder>,
}

impl ModificationExecutor {
    pub fn new(
        repo: Arc<CardRepository>,
        llm: Arc<dyn DeckLlm>,
        analyzer: Arc<QualityAnalyzer>,
        builder: Arc<AgentDeckBuilder>,
    ) -> Self {
        Self {
            repo,
            llm,
            analyzer,
            builder,
        }
    }

    pub async fn execute(&self, request: &ModificationRequest) -> Result<ModificationOutcome> {
        let format = request.existing_deck.format.clone();
        let system = prompts::intent_parser_prompt(&format);
        let user = format!(
            "User request: {}\n\nCurrent deck:\n{}",
            request.user_prompt,
            prompts::render_decklist(&request.existing_deck),
        );

        let (intent, _raw) = self.llm.classify_intent(&system, &user).await?;
        // Confidence is informational only; execution never gates on it.
        debug!(
            "Classified intent {:?} (confidence {:.2}): {}",
            intent.intent_type, intent.confidence, intent.description
        );

        let mut deck = request.existing_deck.clone();
        let mut changes = Vec::new();
        let mut errors = Vec::new();

        match intent.intent_type {
            IntentKind::Add => {
                self.execute_add(&mut deck, &intent, request, &mut changes, &mut errors)
                    .await?;
            }
            IntentKind::Remove => {
                execute_remove(&mut deck, &intent, &mut changes, &mut errors);
            }
            IntentKind::Replace => {
                self.execute_replace(&mut deck, &intent, &mut changes, &mut errors)
                    .await?;
            }
            IntentKind::Optimize => {
                self.execute_optimize(&mut deck, &mut changes, &mut errors)
                    .await?;
            }
            IntentKind::StrategyShift => {
                deck = self
                    .execute_strategy_shift(&deck, &intent, request, &mut changes)
                    .await?;
            }
        }

        // Auto-fix: copy rules first, then bring the deck back to size.
        let deck_size = format_rules::deck_size(&format);
        errors.extend(balance::enforce_copy_caps(&mut deck, &format));
        let colors = deck.colors.clone();
        balance::fill_with_basic_lands(&mut deck, deck_size, &colors, &self.repo).await?;
        changes.extend(balance::trim_to_size(&mut deck, deck_size));
        deck.recalculate();

        if deck.total_cards != deck_size {
            return Err(anyhow::Error::new(TutorError::InvariantViolation(format!(
                "Deck could not be brought to {deck_size} cards (is {})",
                deck.total_cards
            ))));
        }

        let quality = if request.run_quality_check {
            Some(self.analyzer.verify_deck(&deck, &format).await)
        } else {
            None
        };

        info!(
            "Modification applied: {} changes, {} errors",
            changes.len(),
            errors.len()
        );
        Ok(ModificationOutcome {
            deck,
            intent,
            changes,
            errors,
            quality,
        })
    }

    async fn execute_add(
        &self,
        deck: &mut Deck,
        intent: &ModificationIntent,
        request: &ModificationRequest,
        changes: &mut Vec<String>,
        errors: &mut Vec<String>,
    ) -> Result<()> {
        let format = deck.format.clone();
        let mut card_changes = intent.card_changes.clone();
        if card_changes.is_empty() {
            // Abstract request with no extracted changes: search on the
            // intent description.
            card_changes.push(CardChange {
                card_name: None,
                replacement: None,
                quantity: format_rules::copy_limit(&format),
                search_query: Some(if intent.description.is_empty() {
                    request.user_prompt.clone()
                } else {
                    intent.description.clone()
                }),
                cmc_min: None,
                cmc_max: None,
            });
        }

        for change in &card_changes {
            if let Some(name) = &change.card_name {
                match self.repo.get_by_name(name).await? {
                    Some(card) => {
                        let cap = format_rules::copy_cap(
                            &format,
                            card.is_basic_land(),
                            card.is_legendary(),
                        );
                        let quantity = change
                            .quantity
                            .min(cap.saturating_sub(deck.quantity_of(&card.name)));
                        if quantity > 0 {
                            deck.add_card((*card).clone(), quantity);
                            changes.push(format!("Added {}x {}", quantity, card.name));
                        }
                    }
                    None => errors.push(format!("Card '{name}' not found")),
                }
            } else if let Some(query) = &change.search_query {
                let filters = CardSearchFilters {
                    colors: Some(deck.colors.clone()),
                    format_legal: Some(format.clone()),
                    cmc_min: change.cmc_min,
                    cmc_max: change.cmc_max,
                    ..Default::default()
                };
                let candidates = self
                    .repo
                    .semantic_search(query, Some(&filters), request.max_changes as usize * 2)
                    .await?;
                if candidates.is_empty() {
                    errors.push(format!("No cards found for '{query}'"));
                    continue;
                }
                let mut added = 0;
                for card in candidates {
                    if added >= request.max_changes {
                        break;
                    }
                    if card.is_land() || !card.identity_within(&deck.colors) {
                        continue;
                    }
                    let cap =
                        format_rules::copy_cap(&format, card.is_basic_land(), card.is_legendary());
                    let quantity = change
                        .quantity
                        .min(cap.saturating_sub(deck.quantity_of(&card.name)));
                    if quantity == 0 {
                        continue;
                    }
                    changes.push(format!("Added {}x {}", quantity, card.name));
                    deck.add_card(card, quantity);
                    added += 1;
                }
            }
        }
        Ok(())
    }

    async fn execute_replace(
        &self,
        deck: &mut Deck,
        intent: &ModificationIntent,
        changes: &mut Vec<String>,
        errors: &mut Vec<String>,
    ) -> Result<()> {
        let format = deck.format.clone();
        for change in &intent.card_changes {
            let (Some(old_name), Some(new_name)) = (&change.card_name, &change.replacement) else {
                continue;
            };
            let current = deck.quantity_of(old_name);
            if current == 0 {
                errors.push(format!("Card '{old_name}' is not in the deck"));
                continue;
            }
            let original = deck
                .cards
                .iter()
                .find(|dc| dc.card.name.eq_ignore_ascii_case(old_name))
                .map(|dc| dc.card.clone());
            let take = if change.quantity == 0 {
                current
            } else {
                change.quantity.min(current)
            };
            let removed = deck.remove_card(old_name, take);

            match self.repo.get_by_name(new_name).await? {
                Some(card) => {
                    let cap =
                        format_rules::copy_cap(&format, card.is_basic_land(), card.is_legendary());
                    let quantity = removed.min(cap.saturating_sub(deck.quantity_of(&card.name)));
                    deck.add_card((*card).clone(), quantity);
                    changes.push(format!(
                        "Replaced {}x {} with {}x {}",
                        removed, old_name, quantity, card.name
                    ));
                }
                None => {
                    // Leave the original in place and record the miss.
                    if let Some(card) = original {
                        deck.add_card(card, removed);
                    }
                    errors.push(format!(
                        "Replacement '{new_name}' not found; kept {old_name}"
                    ));
                }
            }
        }
        Ok(())
    }

    async fn execute_optimize(
        &self,
        deck: &mut Deck,
        changes: &mut Vec<String>,
        errors: &mut Vec<String>,
    ) -> Result<()> {
        let format = deck.format.clone();
        let metrics = self.analyzer.verify_deck(deck, &format).await;
        let Some(plan) = metrics.improvement_plan else {
            errors.push("No improvement plan available".to_string());
            return Ok(());
        };

        for removal in &plan.removals {
            let removed = deck.remove_card(&removal.card_name, removal.quantity);
            if removed > 0 {
                changes.push(format!("Removed {}x {}", removed, removal.card_name));
            }
        }
        for addition in &plan.additions {
            match self.repo.get_by_name(&addition.card_name).await? {
                Some(card) => {
                    let cap =
                        format_rules::copy_cap(&format, card.is_basic_land(), card.is_legendary());
                    let quantity = addition
                        .quantity
                        .min(cap.saturating_sub(deck.quantity_of(&card.name)));
                    if quantity > 0 {
                        deck.add_card((*card).clone(), quantity);
                        changes.push(format!("Added {}x {}", quantity, card.name));
                    }
                }
                None => {
                    warn!("Skipping unresolvable plan addition '{}'", addition.card_name);
                    errors.push(format!("Card '{}' not found", addition.card_name));
                }
            }
        }
        Ok(())
    }

    async fn execute_strategy_shift(
        &self,
        deck: &Deck,
        intent: &ModificationIntent,
        request: &ModificationRequest,
        changes: &mut Vec<String>,
    ) -> Result<Deck> {
        let build_request = DeckBuildRequest {
            format: deck.format.clone(),
            colors: deck.colors.clone(),
            archetype: deck
                .archetype
                .clone()
                .unwrap_or_else(|| "Midrange".to_string()),
            strategy: Some(intent.description.clone()),
            quality_threshold: 0.7,
            max_iterations: 1,
        };
        let suggestions = vec![
            request.user_prompt.clone(),
            intent.description.clone(),
            "Lower the mana curve: prefer spells costing 3 or less".to_string(),
        ];
        let shifted = self
            .builder
            .refine_deck(deck, &suggestions, &build_request, None)
            .await?;
        changes.push(format!("Shifted strategy: {}", intent.description));
        Ok(shifted)
    }
}

/// Removals run without repository access: by name or by CMC predicate.
fn execute_remove(
    deck: &mut Deck,
    intent: &ModificationIntent,
    changes: &mut Vec<String>,
    errors: &mut Vec<String>,
) {
    for change in &intent.card_changes {
        if let Some(name) = &change.card_name {
            let current = deck.quantity_of(name);
            if current == 0 {
                errors.push(format!("Card '{name}' is not in the deck"));
                continue;
            }
            let take = if change.quantity == 0 {
                current
            } else {
                change.quantity.min(current)
            };
            let removed = deck.remove_card(name, take);
            changes.push(format!("Removed {removed}x {name}"));
        } else if change.cmc_min.is_some() || change.cmc_max.is_some() {
            let min = change.cmc_min.unwrap_or(f64::MIN);
            let max = change.cmc_max.unwrap_or(f64::MAX);
            let victims: Vec<(String, u32)> = deck
                .nonlands()
                .filter(|dc| dc.card.cmc >= min && dc.card.cmc <= max)
                .map(|dc| (dc.card.name.clone(), dc.quantity))
                .collect();
            if victims.is_empty() {
                errors.push("No cards match the removal condition".to_string());
                continue;
            }
            for (name, quantity) in victims {
                deck.remove_card(&name, quantity);
                changes.push(format!("Removed {quantity}x {name}"));
            }
        }
    }
    deck.recalculate();
}

#[cfg(test)]
mod tests {
    use super::super::llm::FakeDeckLlm;
    use super::*;
    use std::collections::HashMap;
    use tutor_common::cache::TieredCache;
    use tutor_common::card::MtgCard;
    use tutor_common::catalog::CatalogStore;
    use tutor_common::deck::{CardAdjustment, DeckCard, ImprovementPlan};
    use tutor_common::vector::{HashEmbedder, VectorIndex};

    fn spell(name: &str, cmc: f64) -> MtgCard {
        MtgCard {
            id: name.to_lowercase().replace(' ', "-"),
            name: name.into(),
            mana_cost: None,
            cmc,
            colors: vec!["R".into()],
            color_identity: vec!["R".into()],
            type_line: "Creature — Goblin".into(),
            types: vec!["Creature".into()],
            subtypes: vec![],
            oracle_text: Some("Haste".into()),
            power: Some("2".into()),
            toughness: Some("1".into()),
            loyalty: None,
            set_code: "tst".into(),
            rarity: "common".into(),
            legalities: HashMap::from([("standard".to_string(), "legal".to_string())]),
            keywords: vec![],
        }
    }

    /// 60-card aggro deck: 22 Mountains, 32 cheap spells, 6 expensive.
    fn aggro_deck() -> Deck {
        let mut deck = Deck::new("Standard", Some("Aggro"), vec!["R".to_string()]);
        deck.cards.push(DeckCard {
            card: MtgCard::basic_land("R"),
            quantity: 22,
        });
        for i in 0..8 {
            deck.cards.push(DeckCard {
                card: spell(&format!("Cheap {i}"), 2.0),
                quantity: 4,
            });
        }
        deck.cards.push(DeckCard {
            card: spell("Huge Dragon", 7.0),
            quantity: 4,
        });
        deck.cards.push(DeckCard {
            card: spell("Vast Leviathan", 8.0),
            quantity: 2,
        });
        deck.recalculate();
        assert_eq!(deck.total_cards, 60);
        deck
    }

    fn executor_with(
        catalog_cards: &[MtgCard],
        llm: Arc<FakeDeckLlm>,
    ) -> ModificationExecutor {
        let catalog = CatalogStore::open_in_memory().unwrap();
        catalog.upsert_cards(catalog_cards).unwrap();
        let repo = Arc::new(CardRepository::new(
            catalog,
            Arc::new(TieredCache::default()),
            Arc::new(VectorIndex::in_memory()),
            Arc::new(HashEmbedder::default()),
        ));
        let dyn_llm: Arc<dyn DeckLlm> = llm.clone();
        let analyzer = Arc::new(QualityAnalyzer::new(Some(Arc::clone(&dyn_llm))));
        let builder = Arc::new(AgentDeckBuilder::new(
            Arc::clone(&repo),
            Arc::clone(&dyn_llm),
        ));
        ModificationExecutor::new(repo, dyn_llm, analyzer, builder)
    }

    fn intent(kind: IntentKind, card_changes: Vec<CardChange>) -> ModificationIntent {
        ModificationIntent {
            intent_type: kind,
            description: "test".into(),
            card_changes,
            constraints: vec![],
            confidence: 0.9,
        }
    }

    fn mod_request(deck: Deck, prompt: &str) -> ModificationRequest {
        ModificationRequest {
            existing_deck: deck,
            user_prompt: prompt.into(),
            run_quality_check: false,
            max_changes: 4,
        }
    }

    #[tokio::test]
    async fn test_remove_by_cmc_predicate_rebalances_with_lands() {
        let llm = Arc::new(
            FakeDeckLlm::builder()
                .intent_response(intent(
                    IntentKind::Remove,
                    vec![CardChange {
                        card_name: None,
                        replacement: None,
                        quantity: 0,
                        search_query: None,
                        cmc_min: Some(6.0),
                        cmc_max: None,
                    }],
                ))
                .build(),
        );
        let executor = executor_with(&[], llm);
        let outcome = executor
            .execute(&mod_request(aggro_deck(), "Remove all cards with CMC >= 6"))
            .await
            .unwrap();

        assert_eq!(outcome.deck.total_cards, 60);
        assert!(outcome
            .deck
            .nonlands()
            .all(|dc| dc.card.cmc < 6.0));
        // The six removed spells came back as lands.
        assert_eq!(outcome.deck.quantity_of("Mountain"), 28);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_add_specific_card_capped() {
        let bolt = spell("Lightning Bolt", 1.0);
        let llm = Arc::new(
            FakeDeckLlm::builder()
                .intent_response(intent(
                    IntentKind::Add,
                    vec![CardChange {
                        card_name: Some("Lightning Bolt".into()),
                        replacement: None,
                        quantity: 9,
                        search_query: None,
                        cmc_min: None,
                        cmc_max: None,
                    }],
                ))
                .build(),
        );
        let executor = executor_with(std::slice::from_ref(&bolt), llm);
        let outcome = executor
            .execute(&mod_request(aggro_deck(), "Add Lightning Bolt"))
            .await
            .unwrap();

        assert_eq!(outcome.deck.quantity_of("Lightning Bolt"), 4);
        assert_eq!(outcome.deck.total_cards, 60);
    }

    #[tokio::test]
    async fn test_replace_unresolvable_keeps_original() {
        let llm = Arc::new(
            FakeDeckLlm::builder()
                .intent_response(intent(
                    IntentKind::Replace,
                    vec![CardChange {
                        card_name: Some("Huge Dragon".into()),
                        replacement: Some("Imaginary Card".into()),
                        quantity: 0,
                        search_query: None,
                        cmc_min: None,
                        cmc_max: None,
                    }],
                ))
                .build(),
        );
        let executor = executor_with(&[], llm);
        let outcome = executor
            .execute(&mod_request(aggro_deck(), "Swap the dragons"))
            .await
            .unwrap();

        assert_eq!(outcome.deck.quantity_of("Huge Dragon"), 4);
        assert_eq!(outcome.deck.total_cards, 60);
        assert!(!outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_replace_resolvable() {
        let shock = spell("Shock", 1.0);
        let llm = Arc::new(
            FakeDeckLlm::builder()
                .intent_response(intent(
                    IntentKind::Replace,
                    vec![CardChange {
                        card_name: Some("Huge Dragon".into()),
                        replacement: Some("Shock".into()),
                        quantity: 0,
                        search_query: None,
                        cmc_min: None,
                        cmc_max: None,
                    }],
                ))
                .build(),
        );
        let executor = executor_with(std::slice::from_ref(&shock), llm);
        let outcome = executor
            .execute(&mod_request(aggro_deck(), "Replace Huge Dragon with Shock"))
            .await
            .unwrap();

        assert_eq!(outcome.deck.quantity_of("Huge Dragon"), 0);
        assert_eq!(outcome.deck.quantity_of("Shock"), 4);
        assert_eq!(outcome.deck.total_cards, 60);
    }

    #[tokio::test]
    async fn test_optimize_applies_improvement_plan() {
        let bolt = spell("Lightning Bolt", 1.0);
        let plan = ImprovementPlan {
            removals: vec![CardAdjustment {
                card_name: "Huge Dragon".into(),
                quantity: 4,
                reason: "too slow".into(),
            }],
            additions: vec![CardAdjustment {
                card_name: "Lightning Bolt".into(),
                quantity: 4,
                reason: "efficient".into(),
            }],
            analysis: "lower curve".into(),
        };
        let llm = Arc::new(
            FakeDeckLlm::builder()
                .intent_response(intent(IntentKind::Optimize, vec![]))
                .default_improvement_plan(plan)
                .build(),
        );
        let executor = executor_with(std::slice::from_ref(&bolt), llm);
        let outcome = executor
            .execute(&mod_request(aggro_deck(), "Make this deck better"))
            .await
            .unwrap();

        assert_eq!(outcome.deck.quantity_of("Huge Dragon"), 0);
        assert_eq!(outcome.deck.quantity_of("Lightning Bolt"), 4);
        assert_eq!(outcome.deck.total_cards, 60);
    }

    #[tokio::test]
    async fn test_quality_check_flag() {
        let llm = Arc::new(
            FakeDeckLlm::builder()
                .intent_response(intent(IntentKind::Remove, vec![CardChange {
                    card_name: Some("Huge Dragon".into()),
                    replacement: None,
                    quantity: 0,
                    search_query: None,
                    cmc_min: None,
                    cmc_max: None,
                }]))
                .build(),
        );
        let executor = executor_with(&[], llm);
        let mut request = mod_request(aggro_deck(), "Cut the dragons");
        request.run_quality_check = true;
        let outcome = executor.execute(&request).await.unwrap();
        let quality = outcome.quality.unwrap();
        assert!((0.0..=1.0).contains(&quality.overall_score));
    }

    #[tokio::test]
    async fn test_intent_failure_propagates() {
        let executor = executor_with(&[], Arc::new(FakeDeckLlm::parse_failing()));
        let err = executor
            .execute(&mod_request(aggro_deck(), "do something"))
            .await
            .unwrap_err();
        assert_eq!(err.downcast::<TutorError>().unwrap().kind(), "parse_failure");
    }
}
