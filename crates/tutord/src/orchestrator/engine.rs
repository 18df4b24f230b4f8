//! FSM orchestration.
//!
//! New-deck flow: ParseRequest → BuildInitial → VerifyQuality, looping
//! through RefineDeck until the quality threshold or the iteration cap
//! is reached. Modification flow: one UserModification pass. This is the
//! single boundary that converts component errors into typed
//! [`TutorError`] kinds; every phase runs under a soft timeout.

use super::analyzer::QualityAnalyzer;
use super::balance;
use super::builder::AgentDeckBuilder;
use super::modifier::{ModificationExecutor, ModificationOutcome};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tutor_common::deck::{
    Deck, DeckBuildRequest, IterationRecord, IterationState, ModificationRequest, QualityMetrics,
};
use tutor_common::error::TutorError;
use tutor_common::format_rules;
use tutor_common::repository::CardRepository;

/// Condensed per-iteration record returned to the API layer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IterationSummary {
    pub iteration: u32,
    pub quality_score: f64,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
}

/// Final result of the new-deck flow.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub deck: Deck,
    pub quality: QualityMetrics,
    pub iteration_count: u32,
    pub history: Vec<IterationSummary>,
}

pub struct FsmOrchestrator {
    repo: Arc<CardRepository>,
    builder: Arc<AgentDeckBuilder>,
    analyzer: Arc<QualityAnalyzer>,
    modifier: Arc<ModificationExecutor>,
    phase_timeout: Duration,
}

impl FsmOrchestrator {
    pub fn new(
        repo: Arc<CardRepository>,
        builder: Arc<AgentDeckBuilder>,
        analyzer: Arc<QualityAnalyzer>,
        modifier: Arc<ModificationExecutor>,
        phase_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            builder,
            analyzer,
            modifier,
            phase_timeout,
        }
    }

    /// Run the build/verify/refine loop for a new deck.
    pub async fn execute_build(
        &self,
        request: DeckBuildRequest,
    ) -> Result<BuildOutcome, TutorError> {
        // ParseRequest: validate extracted parameters.
        if request.colors.is_empty() {
            return Err(TutorError::InvalidInput("No deck colors given".to_string()));
        }
        for color in &request.colors {
            if !matches!(color.as_str(), "W" | "U" | "B" | "R" | "G") {
                return Err(TutorError::InvalidInput(format!(
                    "Unknown color code '{color}'"
                )));
            }
        }
        if !(0.0..=1.0).contains(&request.quality_threshold) {
            return Err(TutorError::InvalidInput(
                "Quality threshold must be within [0, 1]".to_string(),
            ));
        }

        let mut state = IterationState::new(request.max_iterations, request.quality_threshold);

        // BuildInitial.
        state.iteration_count += 1;
        info!(
            "Building initial {} {} deck (threshold {:.2}, max {} iterations)",
            request.format, request.archetype, state.quality_threshold, state.max_iterations
        );
        let mut deck = self
            .run_phase("build", self.builder.build_initial_deck(&request))
            .await?;

        loop {
            // VerifyQuality.
            let metrics = tokio::time::timeout(
                self.phase_timeout,
                self.analyzer.verify_deck(&deck, &request.format),
            )
            .await
            .map_err(|_| TutorError::Timeout("Quality verification timed out".to_string()))?;

            state.add_record(IterationRecord {
                iteration: state.iteration_count,
                deck_snapshot: deck.clone(),
                quality_metrics: metrics.clone(),
                improvements_applied: metrics.suggestions.clone(),
                timestamp: Utc::now(),
            });
            info!(
                "Iteration {}/{}: quality {:.2}",
                state.iteration_count, state.max_iterations, metrics.overall_score
            );

            if !state.should_continue(metrics.overall_score) {
                // Terminal.
                let history = state
                    .history
                    .iter()
                    .map(|record| IterationSummary {
                        iteration: record.iteration,
                        quality_score: record.quality_metrics.overall_score,
                        issues: record.quality_metrics.issues.clone(),
                        suggestions: record.quality_metrics.suggestions.clone(),
                    })
                    .collect();
                return Ok(BuildOutcome {
                    deck,
                    quality: metrics,
                    iteration_count: state.iteration_count,
                    history,
                });
            }

            // RefineDeck.
            state.iteration_count += 1;
            deck = self
                .run_phase(
                    "refine",
                    self.builder.refine_deck(
                        &deck,
                        &metrics.suggestions,
                        &request,
                        metrics.improvement_plan.as_ref(),
                    ),
                )
                .await?;
            self.ensure_deck_size(&mut deck, &request).await?;
        }
    }

    /// Run the single-pass modification flow.
    pub async fn execute_modification(
        &self,
        request: ModificationRequest,
    ) -> Result<ModificationOutcome, TutorError> {
        if request.existing_deck.cards.is_empty() {
            return Err(TutorError::InvalidInput(
                "Existing deck has no cards".to_string(),
            ));
        }
        self.run_phase("modify", self.modifier.execute(&request))
            .await
    }

    /// End-of-iteration deck size enforcement: auto-fix once, then fail
    /// deterministically.
    async fn ensure_deck_size(
        &self,
        deck: &mut Deck,
        request: &DeckBuildRequest,
    ) -> Result<(), TutorError> {
        let deck_size = format_rules::deck_size(&request.format);
        if deck.total_cards == deck_size {
            return Ok(());
        }
        warn!(
            "Deck left an iteration at {} cards (target {deck_size}), auto-fixing",
            deck.total_cards
        );
        balance::fill_with_basic_lands(deck, deck_size, &request.colors, &self.repo)
            .await
            .map_err(to_tutor_error)?;
        balance::trim_to_size(deck, deck_size);
        if deck.total_cards != deck_size {
            return Err(TutorError::InvariantViolation(format!(
                "Deck stuck at {} cards, target {deck_size}",
                deck.total_cards
            )));
        }
        Ok(())
    }

    async fn run_phase<T>(
        &self,
        phase: &str,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, TutorError> {
        match tokio::time::timeout(self.phase_timeout, fut).await {
            Ok(result) => result.map_err(to_tutor_error),
            Err(_) => Err(TutorError::Timeout(format!("Phase '{phase}' timed out"))),
        }
    }
}

fn to_tutor_error(err: anyhow::Error) -> TutorError {
    match err.downcast::<TutorError>() {
        Ok(tutor) => tutor,
        Err(other) => TutorError::Internal(format!("{other:#}")),
    }
}
