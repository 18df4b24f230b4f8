//! HTTP handlers.
//!
//! Every non-health response is JSON with a `success` flag. Controlled
//! failures keep HTTP 200 with an error envelope; unknown deck ids are
//! 404; uncaught faults are 500.

use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};
use tutor_common::deck::{Deck, ModificationRequest};
use tutor_common::deck_store::{DeckListFilters, DeckPatch, NewDeck};
use tutor_common::error::{ErrorEnvelope, TutorError};

use crate::orchestrator::parse_build_request;

type AppStateArc = Arc<AppState>;

pub fn api_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/decks", post(save_deck).get(list_decks))
        .route(
            "/api/decks/:id",
            get(get_deck).put(update_deck).delete(delete_deck),
        )
        .route("/api/stats", get(stats))
}

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/health", get(health))
}

// ============================================================================
// Chat
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    context: Option<Value>,
    #[serde(default)]
    existing_deck: Option<Deck>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    success: bool,
    message: String,
    deck: Option<Deck>,
    error: Option<String>,
}

/// Unified chat endpoint: builds a new deck unless `existing_deck` is
/// present, in which case the message is a modification request.
async fn chat(
    State(state): State<AppStateArc>,
    Json(request): Json<ChatRequest>,
) -> (StatusCode, Json<Value>) {
    if request.message.trim().is_empty() {
        return error_response(&TutorError::InvalidInput(
            "Chat message is empty".to_string(),
        ));
    }

    match request.existing_deck {
        Some(existing_deck) => {
            let run_quality_check = request
                .context
                .as_ref()
                .and_then(|c| c.get("run_quality_check"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let modification = ModificationRequest {
                existing_deck,
                user_prompt: request.message,
                run_quality_check,
                max_changes: 4,
            };
            match state.orchestrator.execute_modification(modification).await {
                Ok(outcome) => {
                    let mut parts = vec![format!(
                        "Applied modification ({:?}): {}",
                        outcome.intent.intent_type, outcome.intent.description
                    )];
                    for change in outcome.changes.iter().take(6) {
                        parts.push(format!("- {change}"));
                    }
                    for err in outcome.errors.iter().take(3) {
                        parts.push(format!("! {err}"));
                    }
                    if let Some(quality) = &outcome.quality {
                        parts.push(format!("Quality Score: {:.2}", quality.overall_score));
                    }
                    let response = ChatResponse {
                        success: true,
                        message: parts.join("\n"),
                        deck: Some(outcome.deck),
                        error: None,
                    };
                    (StatusCode::OK, Json(json!(response)))
                }
                Err(err) => error_response(&err),
            }
        }
        None => {
            let build_request = parse_build_request(&request.message, request.context.as_ref());
            info!(
                "Chat build request: {} {} {:?}",
                build_request.format, build_request.archetype, build_request.colors
            );
            match state.orchestrator.execute_build(build_request).await {
                Ok(outcome) => {
                    let mut parts = vec![
                        format!(
                            "Built a {} {} deck.",
                            outcome.deck.format,
                            outcome.deck.archetype.as_deref().unwrap_or("custom")
                        ),
                        format!("Quality Score: {:.2}", outcome.quality.overall_score),
                        format!("Iterations: {}", outcome.iteration_count),
                        format!("Total Cards: {}", outcome.deck.total_cards),
                    ];
                    if !outcome.quality.issues.is_empty() {
                        parts.push("Issues:".to_string());
                        for issue in outcome.quality.issues.iter().take(3) {
                            parts.push(format!("- {issue}"));
                        }
                    }
                    if !outcome.quality.suggestions.is_empty() {
                        parts.push("Suggestions:".to_string());
                        for suggestion in outcome.quality.suggestions.iter().take(3) {
                            parts.push(format!("- {suggestion}"));
                        }
                    }
                    let response = ChatResponse {
                        success: true,
                        message: parts.join("\n"),
                        deck: Some(outcome.deck),
                        error: None,
                    };
                    (StatusCode::OK, Json(json!(response)))
                }
                Err(err) => error_response(&err),
            }
        }
    }
}

// ============================================================================
// Deck CRUD
// ============================================================================

#[derive(Debug, Deserialize)]
struct SaveDeckRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    deck: Deck,
    #[serde(default)]
    quality_score: Option<f64>,
    #[serde(default)]
    improvement_notes: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

async fn save_deck(
    State(state): State<AppStateArc>,
    Json(request): Json<SaveDeckRequest>,
) -> (StatusCode, Json<Value>) {
    let mut deck = request.deck;
    deck.recalculate();
    let new = NewDeck {
        name: request
            .name
            .unwrap_or_else(|| format!("{} deck", deck.format)),
        description: request.description,
        deck,
        quality_score: request.quality_score,
        improvement_notes: request.improvement_notes,
        user_id: request.user_id,
    };
    match state.deck_store.save(&new) {
        Ok(deck_id) => {
            info!("Saved deck {deck_id}");
            (StatusCode::OK, Json(json!({"success": true, "deck_id": deck_id})))
        }
        Err(err) => internal_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct ListDecksParams {
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    archetype: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

async fn list_decks(
    State(state): State<AppStateArc>,
    Query(params): Query<ListDecksParams>,
) -> (StatusCode, Json<Value>) {
    let filters = DeckListFilters {
        format: params.format,
        archetype: params.archetype,
        user_id: None,
    };
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    let offset = params.offset.unwrap_or(0);
    let decks = match state.deck_store.list(&filters, limit, offset) {
        Ok(decks) => decks,
        Err(err) => return internal_error(err),
    };
    let total = match state.deck_store.count(&filters) {
        Ok(total) => total,
        Err(err) => return internal_error(err),
    };
    (
        StatusCode::OK,
        Json(json!({"success": true, "decks": decks, "total": total})),
    )
}

async fn get_deck(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.deck_store.get_by_id(&id) {
        Ok(Some(deck)) => (StatusCode::OK, Json(json!({"success": true, "deck": deck}))),
        Ok(None) => not_found(&id),
        Err(err) => internal_error(err),
    }
}

async fn update_deck(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
    Json(patch): Json<DeckPatch>,
) -> (StatusCode, Json<Value>) {
    match state.deck_store.update(&id, &patch) {
        Ok(true) => match state.deck_store.get_by_id(&id) {
            Ok(Some(deck)) => (StatusCode::OK, Json(json!({"success": true, "deck": deck}))),
            Ok(None) => not_found(&id),
            Err(err) => internal_error(err),
        },
        Ok(false) => not_found(&id),
        Err(err) => internal_error(err),
    }
}

async fn delete_deck(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.deck_store.delete(&id) {
        Ok(true) => (StatusCode::OK, Json(json!({"success": true}))),
        Ok(false) => not_found(&id),
        Err(err) => internal_error(err),
    }
}

// ============================================================================
// Health and stats
// ============================================================================

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

async fn stats(State(state): State<AppStateArc>) -> (StatusCode, Json<Value>) {
    let cache = state.repo.cache_stats();
    let catalog_cards = match state.repo.catalog_count() {
        Ok(count) => count,
        Err(err) => return internal_error(err),
    };
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "cache": {
                "hits": cache.hits,
                "misses": cache.misses,
                "evictions": cache.evictions,
                "size": cache.size,
                "hit_rate": cache.hit_rate(),
            },
            "catalog_cards": catalog_cards,
            "vector_entries": state.repo.vector_count(),
            "uptime_seconds": state.start_time.elapsed().as_secs(),
        })),
    )
}

// ============================================================================
// Envelope helpers
// ============================================================================

fn error_response(err: &TutorError) -> (StatusCode, Json<Value>) {
    let status = match err {
        TutorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        TutorError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::OK,
    };
    error!("Request failed ({}): {err}", err.kind());
    (status, Json(json!(ErrorEnvelope::from_error(err))))
}

fn not_found(id: &str) -> (StatusCode, Json<Value>) {
    error_response(&TutorError::NotFound(format!("Deck '{id}' does not exist")))
}

fn internal_error(err: anyhow::Error) -> (StatusCode, Json<Value>) {
    error_response(&TutorError::Internal(format!("{err:#}")))
}
