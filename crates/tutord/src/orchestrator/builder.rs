//! Agent-driven deck construction and refinement.
//!
//! The builder drives the model through a bounded tool-call loop: each
//! turn the model may request `search_cards` / `get_card_details`
//! lookups, whose results are appended to the conversation as evidence,
//! until it commits to a plan. Plans are then materialized against the
//! repository with copy, singleton, legendary and color-identity rules
//! enforced, and the deck is balanced to the format's exact size.

use super::balance;
use super::llm::{BuilderResponse, DeckLlm, RefineResponse, ToolRequest};
use super::prompts;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tutor_common::deck::{
    Deck, DeckBuildRequest, DeckConstructionPlan, ImprovementPlan, RefinementActionKind,
    RefinementPlan, CardSearchFilters,
};
use tutor_common::error::TutorError;
use tutor_common::format_rules;
use tutor_common::repository::CardRepository;

/// Tool-call turns before the builder gives up on the model.
const MAX_TOOL_TURNS: usize = 3;

/// Hard bound on results per search tool call.
const TOOL_SEARCH_LIMIT: usize = 50;

/// Tool requests honored per turn.
const MAX_TOOLS_PER_TURN: usize = 5;

pub struct AgentDeckBuilder {
    repo: Arc<CardRepository>,
    llm: Arc<dyn DeckLlm>,
}

impl AgentDeckBuilder {
    pub fn new(repo: Arc<CardRepository>, llm: Arc<dyn DeckLlm>) -> Self {
        Self { repo, llm }
    }

    /// Build the initial deck for a request. Model parse failures fall
    /// back to a heuristic build; provider outages propagate.
    pub async fn build_initial_deck(&self, request: &DeckBuildRequest) -> Result<Deck> {
        let system = prompts::builder_system_prompt(&request.format, &request.archetype);
        let mut user = format!(
            "Build a {} deck for {}.\nColors: {}\nStrategy: {}\n\nSelect spells only; lands are added automatically.",
            request.archetype,
            request.format,
            request.colors.join(", "),
            request.strategy.as_deref().unwrap_or("none given"),
        );

        for turn in 0..MAX_TOOL_TURNS {
            let response: BuilderResponse = match self.llm.builder_turn(&system, &user).await {
                Ok((response, _raw)) => response,
                Err(err) if is_parse_failure(&err) => {
                    warn!("Builder LLM unusable, degrading to heuristic build: {err:#}");
                    return self.materialize_plan(&DeckConstructionPlan::default(), request, true).await;
                }
                Err(err) => return Err(err),
            };

            if !response.tool_requests.is_empty() {
                let evidence = self
                    .run_tools(&response.tool_requests, &request.format)
                    .await?;
                user.push_str(&format!("\n\nTOOL RESULTS (turn {}):\n{}", turn + 1, evidence));
            }

            if let Some(plan) = response.plan {
                info!(
                    "Construction plan: {} selections ({})",
                    plan.card_selections.len(),
                    plan.strategy
                );
                return self.materialize_plan(&plan, request, false).await;
            }

            if response.tool_requests.is_empty() {
                // Neither tools nor a plan; nothing more to feed the model.
                break;
            }
        }

        warn!("Builder produced no plan within {MAX_TOOL_TURNS} turns, degrading");
        self.materialize_plan(&DeckConstructionPlan::default(), request, true)
            .await
    }

    /// Refine an existing deck. On model failure the current deck is
    /// returned unchanged.
    pub async fn refine_deck(
        &self,
        deck: &Deck,
        suggestions: &[String],
        request: &DeckBuildRequest,
        improvement_plan: Option<&ImprovementPlan>,
    ) -> Result<Deck> {
        let deck_size = format_rules::deck_size(&request.format);
        let system = prompts::refine_system_prompt(&request.format);
        let mut user = format!(
            "Refine this {} {} deck.\n\nCurrent deck ({} cards, target {}):\n{}",
            request.format,
            request.archetype,
            deck.total_cards,
            deck_size,
            prompts::render_decklist(deck),
        );
        if !suggestions.is_empty() {
            user.push_str(&format!("\n\nSuggestions:\n{}", suggestions.join("\n")));
        }
        if let Some(plan) = improvement_plan {
            user.push_str(&format!("\n\nImprovement plan: {}", plan.analysis));
            for removal in &plan.removals {
                user.push_str(&format!(
                    "\n- Remove {}x {}: {}",
                    removal.quantity, removal.card_name, removal.reason
                ));
            }
            for addition in &plan.additions {
                user.push_str(&format!(
                    "\n- Add {}x {}: {}",
                    addition.quantity, addition.card_name, addition.reason
                ));
            }
        }

        for turn in 0..MAX_TOOL_TURNS {
            let response: RefineResponse = match self.llm.refine_turn(&system, &user).await {
                Ok((response, _raw)) => response,
                Err(err) if is_parse_failure(&err) => {
                    warn!("Refine LLM unusable, keeping current deck: {err:#}");
                    return Ok(deck.clone());
                }
                Err(err) => return Err(err),
            };

            if !response.tool_requests.is_empty() {
                let evidence = self
                    .run_tools(&response.tool_requests, &request.format)
                    .await?;
                user.push_str(&format!("\n\nTOOL RESULTS (turn {}):\n{}", turn + 1, evidence));
            }

            if let Some(plan) = response.plan {
                info!("Refinement plan: {} actions", plan.actions.len());
                return self.apply_refinement(deck, &plan, request).await;
            }

            if response.tool_requests.is_empty() {
                break;
            }
        }

        warn!("Refiner produced no plan within {MAX_TOOL_TURNS} turns, keeping current deck");
        Ok(deck.clone())
    }

    /// Resolve a construction plan into a deck: plan spells (capped and
    /// color-checked), optional heuristic filler, then basic lands up to
    /// the format size.
    async fn materialize_plan(
        &self,
        plan: &DeckConstructionPlan,
        request: &DeckBuildRequest,
        heuristic_fill: bool,
    ) -> Result<Deck> {
        let deck_size = format_rules::deck_size(&request.format);
        let land_target = format_rules::land_count(&request.format, &request.archetype);
        let spell_target = deck_size - land_target;

        let mut deck = Deck::new(
            &request.format,
            Some(&request.archetype),
            request.colors.clone(),
        );

        let mut spells_added = 0u32;
        for selection in &plan.card_selections {
            if spells_added >= spell_target {
                break;
            }
            let Some(card) = self.repo.get_by_name(&selection.card_name).await? else {
                warn!("Skipping unresolvable card '{}'", selection.card_name);
                continue;
            };
            if card.is_land() {
                debug!("Skipping land '{}' from plan; lands are filled later", card.name);
                continue;
            }
            if !card.identity_within(&request.colors) {
                warn!(
                    "Skipping '{}': color identity outside {:?}",
                    card.name, request.colors
                );
                continue;
            }
            let cap = format_rules::copy_cap(&request.format, false, card.is_legendary());
            let allowed = selection
                .quantity
                .min(cap.saturating_sub(deck.quantity_of(&card.name)))
                .min(spell_target - spells_added);
            if allowed == 0 {
                continue;
            }
            deck.add_card((*card).clone(), allowed);
            spells_added += allowed;
        }

        if heuristic_fill && spells_added < spell_target {
            spells_added += self
                .heuristic_spell_fill(&mut deck, request, spell_target - spells_added)
                .await?;
            debug!("Heuristic filler brought spells to {spells_added}/{spell_target}");
        }

        balance::fill_with_basic_lands(&mut deck, deck_size, &request.colors, &self.repo).await?;
        deck.recalculate();
        info!(
            "Materialized deck: {} cards ({} spells, {} lands)",
            deck.total_cards,
            deck.nonland_count(),
            deck.land_count()
        );
        Ok(deck)
    }

    /// Fill spell slots from plain repository search when the model gave
    /// us nothing: cheap creatures in the declared colors.
    async fn heuristic_spell_fill(
        &self,
        deck: &mut Deck,
        request: &DeckBuildRequest,
        mut remaining: u32,
    ) -> Result<u32> {
        let filters = CardSearchFilters {
            colors: Some(request.colors.clone()),
            types: Some(vec!["Creature".to_string()]),
            cmc_max: Some(3.0),
            format_legal: Some(request.format.clone()),
            ..Default::default()
        };
        let candidates = self.repo.search(&filters, TOOL_SEARCH_LIMIT).await?;
        let mut added = 0;
        for card in candidates {
            if remaining == 0 {
                break;
            }
            if card.is_land() || !card.identity_within(&request.colors) {
                continue;
            }
            let cap = format_rules::copy_cap(&request.format, false, card.is_legendary());
            let quantity = cap
                .min(4)
                .saturating_sub(deck.quantity_of(&card.name))
                .min(remaining);
            if quantity == 0 {
                continue;
            }
            deck.add_card(card, quantity);
            remaining -= quantity;
            added += quantity;
        }
        Ok(added)
    }

    /// Apply a refinement plan: removals, then replacements, then
    /// additions, then rebalance to the format size.
    async fn apply_refinement(
        &self,
        deck: &Deck,
        plan: &RefinementPlan,
        request: &DeckBuildRequest,
    ) -> Result<Deck> {
        let deck_size = format_rules::deck_size(&request.format);
        let mut deck = deck.clone();

        for action in plan
            .actions
            .iter()
            .filter(|a| a.kind == RefinementActionKind::Remove)
        {
            let removed = deck.remove_card(&action.card_name, action.quantity);
            debug!("Refinement removed {}x {}", removed, action.card_name);
        }

        for action in plan
            .actions
            .iter()
            .filter(|a| a.kind == RefinementActionKind::Replace)
        {
            let original = deck
                .cards
                .iter()
                .find(|dc| dc.card.name.eq_ignore_ascii_case(&action.card_name))
                .map(|dc| dc.card.clone());
            let removed = deck.remove_card(&action.card_name, action.quantity);
            if removed == 0 {
                continue;
            }
            let replacement = match &action.replacement {
                Some(name) => self.repo.get_by_name(name).await?,
                None => None,
            };
            match replacement {
                Some(card) => {
                    let cap =
                        format_rules::copy_cap(&request.format, card.is_basic_land(), card.is_legendary());
                    let quantity = removed.min(cap.saturating_sub(deck.quantity_of(&card.name)));
                    deck.add_card((*card).clone(), quantity);
                }
                None => {
                    // Unresolvable replacement leaves the original alone.
                    warn!(
                        "Replacement for '{}' not found, restoring original",
                        action.card_name
                    );
                    if let Some(card) = original {
                        deck.add_card(card, removed);
                    }
                }
            }
        }

        for action in plan
            .actions
            .iter()
            .filter(|a| a.kind == RefinementActionKind::Add)
        {
            let Some(card) = self.repo.get_by_name(&action.card_name).await? else {
                warn!("Skipping unresolvable addition '{}'", action.card_name);
                continue;
            };
            if !card.identity_within(&request.colors) {
                warn!("Skipping off-color addition '{}'", card.name);
                continue;
            }
            let cap =
                format_rules::copy_cap(&request.format, card.is_basic_land(), card.is_legendary());
            let quantity = action
                .quantity
                .min(cap.saturating_sub(deck.quantity_of(&card.name)));
            if quantity > 0 {
                deck.add_card((*card).clone(), quantity);
            }
        }

        balance::enforce_copy_caps(&mut deck, &request.format);
        balance::fill_with_basic_lands(&mut deck, deck_size, &request.colors, &self.repo).await?;
        balance::trim_to_size(&mut deck, deck_size);
        deck.recalculate();
        Ok(deck)
    }

    /// Execute the model's tool requests and render evidence text.
    async fn run_tools(&self, requests: &[ToolRequest], format: &str) -> Result<String> {
        let mut evidence = String::new();
        for request in requests.iter().take(MAX_TOOLS_PER_TURN) {
            match request {
                ToolRequest::SearchCards {
                    semantic_query,
                    filters,
                    limit,
                } => {
                    let mut filters = filters.clone();
                    if filters.format_legal.is_none() {
                        filters.format_legal = Some(format.to_string());
                    }
                    let limit = (*limit).clamp(1, TOOL_SEARCH_LIMIT);
                    let cards = match semantic_query {
                        Some(query) => {
                            self.repo
                                .semantic_search(query, Some(&filters), limit)
                                .await?
                        }
                        None => self.repo.search(&filters, limit).await?,
                    };
                    evidence.push_str(&format!(
                        "search_cards ({}) -> {} results:\n",
                        semantic_query.as_deref().unwrap_or("filters only"),
                        cards.len()
                    ));
                    for card in &cards {
                        let excerpt: String = card
                            .oracle_text
                            .as_deref()
                            .unwrap_or("")
                            .chars()
                            .take(80)
                            .collect();
                        evidence.push_str(&format!(
                            "- {} | CMC {} | {} | {} | {}\n",
                            card.name,
                            card.cmc,
                            card.colors.join(""),
                            card.type_line,
                            excerpt
                        ));
                    }
                }
                ToolRequest::GetCardDetails { name_or_id } => {
                    let card = match self.repo.get_by_name(name_or_id).await? {
                        Some(card) => Some(card),
                        None => self.repo.get_by_id(name_or_id).await?,
                    };
                    match card {
                        Some(card) => evidence.push_str(&format!(
                            "get_card_details({name_or_id}):\n  {} | {} | CMC {} | {} | {}\n  {}\n",
                            card.name,
                            card.mana_cost.as_deref().unwrap_or("-"),
                            card.cmc,
                            card.type_line,
                            card.rarity,
                            card.oracle_text.as_deref().unwrap_or(""),
                        )),
                        None => evidence
                            .push_str(&format!("get_card_details({name_or_id}): not found\n")),
                    }
                }
            }
        }
        Ok(evidence)
    }
}

fn is_parse_failure(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<TutorError>(),
        Some(TutorError::ParseFailure(_))
    )
}
