//! End-to-end orchestration tests with a scripted LLM.
//!
//! These drive the full FSM (build → verify → refine → verify) and the
//! modification flow against an in-memory catalog.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tutor_common::cache::TieredCache;
use tutor_common::card::MtgCard;
use tutor_common::catalog::CatalogStore;
use tutor_common::deck::{
    CardChange, CardSelection, Deck, DeckBuildRequest, DeckCard, DeckConstructionPlan, IntentKind,
    ModificationIntent, ModificationRequest, RefinementAction, RefinementActionKind,
    RefinementPlan,
};
use tutor_common::repository::CardRepository;
use tutor_common::vector::{HashEmbedder, VectorIndex};
use tutord::orchestrator::llm::{BuilderResponse, RefineResponse};
use tutord::orchestrator::{
    parse_build_request, AgentDeckBuilder, DeckLlm, FakeDeckLlm, FsmOrchestrator,
    ModificationExecutor, QualityAnalyzer,
};

fn goblin(name: &str, cmc: f64) -> MtgCard {
    MtgCard {
        id: name.to_lowercase().replace(' ', "-"),
        name: name.into(),
        mana_cost: Some(format!("{{{}}}{{R}}", cmc.max(1.0) as u32 - 1)),
        cmc,
        colors: vec!["R".into()],
        color_identity: vec!["R".into()],
        type_line: "Creature — Goblin".into(),
        types: vec!["Creature".into()],
        subtypes: vec!["Goblin".into()],
        oracle_text: Some("Haste".into()),
        power: Some("2".into()),
        toughness: Some("2".into()),
        loyalty: None,
        set_code: "tst".into(),
        rarity: "common".into(),
        legalities: HashMap::from([
            ("standard".to_string(), "legal".to_string()),
            ("commander".to_string(), "legal".to_string()),
        ]),
        keywords: vec!["Haste".into()],
    }
}

/// Eleven spell stacks shaped to the Standard curve ideal: 38 cards.
fn curve_spells() -> Vec<(MtgCard, u32)> {
    vec![
        (goblin("One Drop", 1.0), 4),
        (goblin("One Drop B", 1.0), 2),
        (goblin("Two Drop", 2.0), 4),
        (goblin("Two Drop B", 2.0), 4),
        (goblin("Three Drop", 3.0), 4),
        (goblin("Three Drop B", 3.0), 3),
        (goblin("Four Drop", 4.0), 4),
        (goblin("Four Drop B", 4.0), 4),
        (goblin("Five Drop", 5.0), 3),
        (goblin("Six Drop", 6.0), 4),
        (goblin("Seven Drop", 7.0), 2),
    ]
}

fn orchestrator_with(llm: Arc<FakeDeckLlm>, cards: Vec<MtgCard>) -> FsmOrchestrator {
    let catalog = CatalogStore::open_in_memory().unwrap();
    catalog.upsert_cards(&cards).unwrap();
    let repo = Arc::new(CardRepository::new(
        catalog,
        Arc::new(TieredCache::default()),
        Arc::new(VectorIndex::in_memory()),
        Arc::new(HashEmbedder::default()),
    ));
    let dyn_llm: Arc<dyn DeckLlm> = llm;
    let builder = Arc::new(AgentDeckBuilder::new(
        Arc::clone(&repo),
        Arc::clone(&dyn_llm),
    ));
    let analyzer = Arc::new(QualityAnalyzer::new(None));
    let modifier = Arc::new(ModificationExecutor::new(
        Arc::clone(&repo),
        Arc::clone(&dyn_llm),
        Arc::clone(&analyzer),
        Arc::clone(&builder),
    ));
    FsmOrchestrator::new(repo, builder, analyzer, modifier, Duration::from_secs(60))
}

#[tokio::test]
async fn test_build_converges_after_second_iteration() {
    // First build yields an all-lands deck (score 0), the refinement
    // replaces lands with a curve-shaped goblin suite that clears the
    // 0.7 threshold. The loop must stop after exactly two iterations.
    let refine_actions: Vec<RefinementAction> = std::iter::once(RefinementAction {
        kind: RefinementActionKind::Remove,
        card_name: "Mountain".into(),
        quantity: 38,
        replacement: None,
        reasoning: String::new(),
    })
    .chain(curve_spells().into_iter().map(|(card, quantity)| {
        RefinementAction {
            kind: RefinementActionKind::Add,
            card_name: card.name,
            quantity,
            replacement: None,
            reasoning: String::new(),
        }
    }))
    .collect();

    let llm = Arc::new(
        FakeDeckLlm::builder()
            .builder_response(BuilderResponse {
                tool_requests: vec![],
                plan: Some(DeckConstructionPlan::default()),
            })
            .refine_response(RefineResponse {
                tool_requests: vec![],
                plan: Some(RefinementPlan {
                    analysis: "replace lands with a real curve".into(),
                    actions: refine_actions,
                }),
            })
            .build(),
    );
    let cards: Vec<MtgCard> = curve_spells().into_iter().map(|(card, _)| card).collect();
    let orch = orchestrator_with(llm.clone(), cards);

    let request = DeckBuildRequest {
        format: "Standard".into(),
        colors: vec!["R".into()],
        archetype: "Aggro".into(),
        strategy: None,
        quality_threshold: 0.7,
        max_iterations: 5,
    };
    let outcome = orch.execute_build(request).await.unwrap();

    assert_eq!(outcome.iteration_count, 2);
    assert_eq!(outcome.history.len(), 2);
    assert!(outcome.history[0].quality_score < 0.7);
    assert!(outcome.history[1].quality_score >= 0.7);
    assert_eq!(outcome.deck.total_cards, 60);
    assert_eq!(outcome.deck.quantity_of("Mountain"), 22);
    assert_eq!(llm.refine_calls(), 1);
}

#[tokio::test]
async fn test_commander_build_is_singleton_and_hundred_cards() {
    let cards: Vec<MtgCard> = (0..12).map(|i| goblin(&format!("Goblin {i}"), 2.0)).collect();
    let plan = DeckConstructionPlan {
        strategy: "goblins".into(),
        card_selections: cards
            .iter()
            .map(|card| CardSelection {
                card_name: card.name.clone(),
                quantity: 4,
                reasoning: String::new(),
            })
            .collect(),
    };
    let llm = Arc::new(FakeDeckLlm::with_construction_plan(plan));
    let orch = orchestrator_with(llm, cards);

    let request = DeckBuildRequest {
        format: "Commander".into(),
        colors: vec!["R".into()],
        archetype: "Aggro".into(),
        strategy: None,
        quality_threshold: 0.7,
        max_iterations: 0,
    };
    let outcome = orch.execute_build(request).await.unwrap();

    assert_eq!(outcome.deck.total_cards, 100);
    for dc in outcome.deck.cards.iter().filter(|dc| !dc.card.is_basic_land()) {
        assert_eq!(dc.quantity, 1, "{}", dc.card.name);
    }
}

#[tokio::test]
async fn test_empty_repository_builds_all_basic_lands() {
    let llm = Arc::new(FakeDeckLlm::builder().build());
    let orch = orchestrator_with(llm, vec![]);

    let request = parse_build_request("Build a Standard red aggro deck", None);
    let outcome = orch.execute_build(request).await.unwrap();
    assert_eq!(outcome.deck.total_cards, 60);
    assert!(outcome.deck.cards.iter().all(|dc| dc.card.is_basic_land()));
}

#[tokio::test]
async fn test_modification_remove_high_cmc_rebalances() {
    // Existing 60-card aggro deck with six 6+ CMC cards; the prompt
    // removes them and lands restore the total.
    let mut deck = Deck::new("Standard", Some("Aggro"), vec!["R".to_string()]);
    deck.cards.push(DeckCard {
        card: MtgCard::basic_land("R"),
        quantity: 22,
    });
    for (card, quantity) in curve_spells() {
        deck.cards.push(DeckCard { card, quantity });
    }
    deck.recalculate();
    assert_eq!(deck.total_cards, 60);

    let llm = Arc::new(
        FakeDeckLlm::builder()
            .intent_response(ModificationIntent {
                intent_type: IntentKind::Remove,
                description: "remove expensive cards".into(),
                card_changes: vec![CardChange {
                    card_name: None,
                    replacement: None,
                    quantity: 0,
                    search_query: None,
                    cmc_min: Some(6.0),
                    cmc_max: None,
                }],
                constraints: vec![],
                confidence: 0.95,
            })
            .build(),
    );
    let orch = orchestrator_with(llm, vec![]);

    let outcome = orch
        .execute_modification(ModificationRequest {
            existing_deck: deck,
            user_prompt: "Remove all cards with CMC >= 6".into(),
            run_quality_check: false,
            max_changes: 4,
        })
        .await
        .unwrap();

    assert_eq!(outcome.deck.total_cards, 60);
    assert!(outcome.deck.nonlands().all(|dc| dc.card.cmc < 6.0));
    assert_eq!(outcome.deck.quantity_of("Mountain"), 28);
}

#[tokio::test]
async fn test_parse_unknown_format_defaults_and_echoes_standard() {
    let request = parse_build_request("Build me a Penny Dreadful deck", None);
    assert_eq!(request.format, "Standard");

    let llm = Arc::new(FakeDeckLlm::builder().build());
    let orch = orchestrator_with(llm, vec![]);
    let outcome = orch.execute_build(request).await.unwrap();
    assert_eq!(outcome.deck.format, "Standard");
}

#[tokio::test]
async fn test_parse_failure_surfaces_kind_for_modification() {
    let mut deck = Deck::new("Standard", Some("Aggro"), vec!["R".to_string()]);
    deck.cards.push(DeckCard {
        card: MtgCard::basic_land("R"),
        quantity: 60,
    });
    deck.recalculate();

    let orch = orchestrator_with(Arc::new(FakeDeckLlm::parse_failing()), vec![]);
    let err = orch
        .execute_modification(ModificationRequest {
            existing_deck: deck,
            user_prompt: "???".into(),
            run_quality_check: false,
            max_changes: 4,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "parse_failure");
}
