//! LLM client abstraction.
//!
//! The daemon drives the model through four structured-output calls:
//! a builder turn (tool requests and/or a construction plan), a refine
//! turn, an improvement plan, and intent classification. `DeckLlm` is
//! the trait boundary; production uses [`OpenAiClient`], tests use
//! [`FakeDeckLlm`] with queued responses.
//!
//! Parsing is deliberately forgiving. Models wrap JSON in prose, emit
//! `name` instead of `card_name`, send quantities as strings, or nest a
//! plan at the top level. Each parser tries the strict shape first and
//! falls back to a field-by-field read of the JSON value.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use tutor_common::deck::{
    CardChange, CardSearchFilters, CardSelection, DeckConstructionPlan, ImprovementPlan,
    IntentKind, ModificationIntent, RefinementAction, RefinementActionKind, RefinementPlan,
};
use tutor_common::error::TutorError;

/// Backoff before the single parse-failure retry.
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// A tool invocation requested by the model during a builder or refine
/// turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolRequest {
    SearchCards {
        #[serde(default)]
        semantic_query: Option<String>,
        #[serde(default)]
        filters: CardSearchFilters,
        #[serde(default = "default_tool_limit")]
        limit: usize,
    },
    GetCardDetails { name_or_id: String },
}

fn default_tool_limit() -> usize {
    20
}

/// One builder turn: either more tool requests, a finished plan, or both
/// (tools are executed first, the plan is used on a later turn).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuilderResponse {
    #[serde(default)]
    pub tool_requests: Vec<ToolRequest>,
    #[serde(default)]
    pub plan: Option<DeckConstructionPlan>,
}

/// One refine turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefineResponse {
    #[serde(default)]
    pub tool_requests: Vec<ToolRequest>,
    #[serde(default)]
    pub plan: Option<RefinementPlan>,
}

/// Trait boundary over the LLM provider. Every method returns the parsed
/// response plus the raw text for trace logging.
#[async_trait]
pub trait DeckLlm: Send + Sync {
    fn model(&self) -> &str;

    async fn is_available(&self) -> bool;

    async fn builder_turn(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<(BuilderResponse, String)>;

    async fn refine_turn(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<(RefineResponse, String)>;

    async fn improvement_plan(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<(ImprovementPlan, String)>;

    async fn classify_intent(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<(ModificationIntent, String)>;
}

// ============================================================================
// OpenAI-compatible client
// ============================================================================

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    /// Global bound on concurrent LLM calls.
    semaphore: Arc<Semaphore>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: &str, model: &str, max_inflight: usize) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            semaphore: Arc::new(Semaphore::new(max_inflight.max(1))),
        }
    }

    /// Raw chat call requesting a JSON object response.
    async fn chat_json(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .context("LLM semaphore closed")?;

        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: user_prompt },
            ],
            response_format: ResponseFormat { kind: "json_object" },
        };

        info!(
            "[>] LLM call [{}] (system {} chars, user {} chars)",
            self.model,
            system_prompt.len(),
            user_prompt.len()
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                anyhow::Error::new(TutorError::UpstreamUnavailable(format!(
                    "LLM provider unreachable: {e}"
                )))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::Error::new(TutorError::UpstreamUnavailable(
                format!("LLM provider returned {status}: {body}"),
            )));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| {
                anyhow::Error::new(TutorError::UpstreamUnavailable(format!(
                    "Malformed completion envelope: {e}"
                )))
            })?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        debug!("[<] LLM response ({} chars)", content.len());
        Ok(content)
    }

    /// Call and parse with a single retry on parse failure.
    async fn call_parsed<T, F>(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        parse: F,
    ) -> Result<(T, String)>
    where
        F: Fn(&str) -> Result<T>,
    {
        let text = self.chat_json(system_prompt, user_prompt).await?;
        match parse(&text) {
            Ok(parsed) => Ok((parsed, text)),
            Err(first_err) => {
                warn!("Structured output parse failed, retrying once: {first_err:#}");
                tokio::time::sleep(RETRY_BACKOFF).await;
                let text = self.chat_json(system_prompt, user_prompt).await?;
                match parse(&text) {
                    Ok(parsed) => Ok((parsed, text)),
                    Err(second_err) => Err(anyhow::Error::new(TutorError::ParseFailure(
                        format!("LLM output unparseable after retry: {second_err:#}"),
                    ))),
                }
            }
        }
    }
}

#[async_trait]
impl DeckLlm for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        self.http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn builder_turn(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<(BuilderResponse, String)> {
        self.call_parsed(system_prompt, user_prompt, parse_builder_response)
            .await
    }

    async fn refine_turn(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<(RefineResponse, String)> {
        self.call_parsed(system_prompt, user_prompt, parse_refine_response)
            .await
    }

    async fn improvement_plan(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<(ImprovementPlan, String)> {
        self.call_parsed(system_prompt, user_prompt, parse_improvement_plan)
            .await
    }

    async fn classify_intent(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<(ModificationIntent, String)> {
        self.call_parsed(system_prompt, user_prompt, parse_modification_intent)
            .await
    }
}

// ============================================================================
// Flexible parsing
// ============================================================================

/// Cut the JSON object out of text that may have prose around it.
fn extract_json(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

fn lenient_value(text: &str) -> Result<Value> {
    serde_json::from_str(text)
        .or_else(|_| serde_json::from_str(extract_json(text)))
        .context("Response is not JSON")
}

fn str_field(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| v.get(*k))
        .and_then(|x| x.as_str())
        .map(|s| s.to_string())
}

fn u32_field(v: &Value, keys: &[&str], default: u32) -> u32 {
    for key in keys {
        if let Some(raw) = v.get(*key) {
            if let Some(n) = raw.as_u64() {
                return n as u32;
            }
            if let Some(f) = raw.as_f64() {
                return f.max(0.0) as u32;
            }
            if let Some(s) = raw.as_str() {
                if let Ok(n) = s.parse::<u32>() {
                    return n;
                }
            }
        }
    }
    default
}

fn f64_field(v: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| v.get(*k)).and_then(|x| x.as_f64())
}

fn parse_tool_requests(v: &Value) -> Vec<ToolRequest> {
    let Some(items) = v.get("tool_requests").and_then(|x| x.as_array()) else {
        return vec![];
    };
    items
        .iter()
        .filter_map(|item| {
            let tool = str_field(item, &["tool", "name"])?;
            match tool.as_str() {
                "search_cards" => Some(ToolRequest::SearchCards {
                    semantic_query: str_field(item, &["semantic_query", "query"]),
                    filters: CardSearchFilters {
                        colors: item
                            .get("colors")
                            .and_then(|x| x.as_array())
                            .map(|arr| {
                                arr.iter()
                                    .filter_map(|c| c.as_str().map(|s| s.to_string()))
                                    .collect()
                            }),
                        types: item
                            .get("types")
                            .and_then(|x| x.as_array())
                            .map(|arr| {
                                arr.iter()
                                    .filter_map(|t| t.as_str().map(|s| s.to_string()))
                                    .collect()
                            }),
                        cmc_min: f64_field(item, &["cmc_min"]),
                        cmc_max: f64_field(item, &["cmc_max"]),
                        rarity: str_field(item, &["rarity"]),
                        format_legal: str_field(item, &["format_legal", "format"]),
                        text_query: str_field(item, &["text_query"]),
                    },
                    limit: u32_field(item, &["limit"], default_tool_limit() as u32) as usize,
                }),
                "get_card_details" => Some(ToolRequest::GetCardDetails {
                    name_or_id: str_field(item, &["name_or_id", "card_name", "card"])?,
                }),
                other => {
                    warn!("Rejecting unknown tool request '{other}'");
                    None
                }
            }
        })
        .collect()
}

fn parse_card_selections(v: &Value) -> Vec<CardSelection> {
    v.get("card_selections")
        .and_then(|x| x.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    // Models sometimes emit "name" instead of "card_name".
                    let card_name = str_field(item, &["card_name", "name"])?;
                    Some(CardSelection {
                        card_name,
                        quantity: u32_field(item, &["quantity", "count"], 1),
                        reasoning: str_field(item, &["reasoning", "reason"]).unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_builder_response(text: &str) -> Result<BuilderResponse> {
    let v = lenient_value(text)?;

    let tool_requests = parse_tool_requests(&v);

    // The plan may sit under "plan" or at the top level.
    let plan_source = v.get("plan").filter(|p| p.is_object()).unwrap_or(&v);
    let selections = parse_card_selections(plan_source);
    let plan = if !selections.is_empty() || plan_source.get("strategy").is_some() {
        Some(DeckConstructionPlan {
            strategy: str_field(plan_source, &["strategy"]).unwrap_or_default(),
            card_selections: selections,
        })
    } else {
        None
    };

    if tool_requests.is_empty() && plan.is_none() {
        anyhow::bail!("Builder response carries neither tool requests nor a plan");
    }
    Ok(BuilderResponse { tool_requests, plan })
}

pub fn parse_refine_response(text: &str) -> Result<RefineResponse> {
    let v = lenient_value(text)?;

    let tool_requests = parse_tool_requests(&v);

    let plan_source = v.get("plan").filter(|p| p.is_object()).unwrap_or(&v);
    let actions: Vec<RefinementAction> = plan_source
        .get("actions")
        .and_then(|x| x.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let kind = match str_field(item, &["type", "action"])?.to_lowercase().as_str() {
                        "add" => RefinementActionKind::Add,
                        "remove" | "cut" => RefinementActionKind::Remove,
                        "replace" | "swap" => RefinementActionKind::Replace,
                        other => {
                            warn!("Skipping refinement action with unknown type '{other}'");
                            return None;
                        }
                    };
                    Some(RefinementAction {
                        kind,
                        card_name: str_field(item, &["card_name", "name"])?,
                        quantity: u32_field(item, &["quantity", "count"], 1),
                        replacement: str_field(item, &["replacement", "new_card", "with"]),
                        reasoning: str_field(item, &["reasoning", "reason"]).unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let plan = if !actions.is_empty() || plan_source.get("analysis").is_some() {
        Some(RefinementPlan {
            analysis: str_field(plan_source, &["analysis"]).unwrap_or_default(),
            actions,
        })
    } else {
        None
    };

    if tool_requests.is_empty() && plan.is_none() {
        anyhow::bail!("Refine response carries neither tool requests nor a plan");
    }
    Ok(RefineResponse { tool_requests, plan })
}

fn parse_adjustments(v: &Value, key: &str) -> Vec<tutor_common::deck::CardAdjustment> {
    v.get(key)
        .and_then(|x| x.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let card_name = str_field(item, &["card_name", "name"])?;
                    Some(tutor_common::deck::CardAdjustment {
                        card_name,
                        quantity: u32_field(item, &["quantity", "count"], 1),
                        reason: str_field(item, &["reason", "reasoning"]).unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_improvement_plan(text: &str) -> Result<ImprovementPlan> {
    let v = lenient_value(text)?;
    let source = v.get("plan").filter(|p| p.is_object()).unwrap_or(&v);

    let removals = parse_adjustments(source, "removals");
    let additions = parse_adjustments(source, "additions");
    let analysis = str_field(source, &["analysis"]).unwrap_or_default();

    if removals.is_empty() && additions.is_empty() && analysis.is_empty() {
        anyhow::bail!("Improvement plan carries no removals, additions or analysis");
    }
    Ok(ImprovementPlan { removals, additions, analysis })
}

pub fn parse_modification_intent(text: &str) -> Result<ModificationIntent> {
    let v = lenient_value(text)?;

    let intent_type = match str_field(&v, &["intent_type", "intent"])
        .unwrap_or_default()
        .to_uppercase()
        .as_str()
    {
        "ADD" => IntentKind::Add,
        "REMOVE" => IntentKind::Remove,
        "REPLACE" => IntentKind::Replace,
        "OPTIMIZE" => IntentKind::Optimize,
        "STRATEGY_SHIFT" => IntentKind::StrategyShift,
        "" => anyhow::bail!("Intent response missing intent_type"),
        other => {
            // Unknown intents degrade to a conservative optimize.
            warn!("Unknown intent_type '{other}', treating as OPTIMIZE");
            IntentKind::Optimize
        }
    };

    let card_changes = v
        .get("card_changes")
        .and_then(|x| x.as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| CardChange {
                    card_name: str_field(item, &["card_name", "name"]),
                    replacement: str_field(item, &["replacement", "new_card", "with"]),
                    quantity: u32_field(item, &["quantity", "count"], 1),
                    search_query: str_field(item, &["search_query", "query", "category"]),
                    cmc_min: f64_field(item, &["cmc_min"]),
                    cmc_max: f64_field(item, &["cmc_max"]),
                })
                .collect()
        })
        .unwrap_or_default();

    let constraints = v
        .get("constraints")
        .and_then(|x| x.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|c| c.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    Ok(ModificationIntent {
        intent_type,
        description: str_field(&v, &["description"]).unwrap_or_default(),
        card_changes,
        constraints,
        confidence: f64_field(&v, &["confidence"]).unwrap_or(0.5).clamp(0.0, 1.0),
    })
}

// ============================================================================
// Fake LLM for deterministic tests
// ============================================================================

/// Scripted LLM. Queued responses are consumed in order; when a queue is
/// empty the default for that call is returned. Call counts are tracked
/// for assertions.
pub struct FakeDeckLlm {
    model: String,
    available: bool,
    /// When set, every call fails as an upstream error.
    fail_upstream: bool,
    /// When set, every call fails as a parse failure.
    fail_parse: bool,
    builder_queue: Mutex<VecDeque<BuilderResponse>>,
    refine_queue: Mutex<VecDeque<RefineResponse>>,
    improvement_queue: Mutex<VecDeque<ImprovementPlan>>,
    intent_queue: Mutex<VecDeque<ModificationIntent>>,
    default_builder: BuilderResponse,
    default_refine: RefineResponse,
    default_improvement: Option<ImprovementPlan>,
    default_intent: ModificationIntent,
    builder_calls: AtomicUsize,
    refine_calls: AtomicUsize,
    improvement_calls: AtomicUsize,
    intent_calls: AtomicUsize,
}

impl FakeDeckLlm {
    pub fn builder() -> FakeDeckLlmBuilder {
        FakeDeckLlmBuilder::default()
    }

    /// A fake whose builder turn immediately returns the given plan.
    pub fn with_construction_plan(plan: DeckConstructionPlan) -> Self {
        Self::builder().default_construction_plan(plan).build()
    }

    /// A fake that fails every call as an upstream error.
    pub fn failing() -> Self {
        let mut fake = Self::builder().build();
        fake.fail_upstream = true;
        fake
    }

    /// A fake that fails every call as a parse failure (post-retry).
    pub fn parse_failing() -> Self {
        let mut fake = Self::builder().build();
        fake.fail_parse = true;
        fake
    }

    pub fn builder_calls(&self) -> usize {
        self.builder_calls.load(Ordering::Relaxed)
    }

    pub fn refine_calls(&self) -> usize {
        self.refine_calls.load(Ordering::Relaxed)
    }

    pub fn improvement_calls(&self) -> usize {
        self.improvement_calls.load(Ordering::Relaxed)
    }

    pub fn intent_calls(&self) -> usize {
        self.intent_calls.load(Ordering::Relaxed)
    }

    fn check_failure(&self) -> Result<()> {
        if self.fail_upstream {
            return Err(anyhow::Error::new(TutorError::UpstreamUnavailable(
                "fake upstream failure".to_string(),
            )));
        }
        if self.fail_parse {
            return Err(anyhow::Error::new(TutorError::ParseFailure(
                "fake parse failure".to_string(),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DeckLlm for FakeDeckLlm {
    fn model(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn builder_turn(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<(BuilderResponse, String)> {
        self.builder_calls.fetch_add(1, Ordering::Relaxed);
        self.check_failure()?;
        let response = self
            .builder_queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_builder.clone());
        let raw = serde_json::to_string(&response).unwrap_or_default();
        Ok((response, raw))
    }

    async fn refine_turn(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<(RefineResponse, String)> {
        self.refine_calls.fetch_add(1, Ordering::Relaxed);
        self.check_failure()?;
        let response = self
            .refine_queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_refine.clone());
        let raw = serde_json::to_string(&response).unwrap_or_default();
        Ok((response, raw))
    }

    async fn improvement_plan(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<(ImprovementPlan, String)> {
        self.improvement_calls.fetch_add(1, Ordering::Relaxed);
        self.check_failure()?;
        let plan = self
            .improvement_queue
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.default_improvement.clone())
            .ok_or_else(|| {
                anyhow::Error::new(TutorError::ParseFailure(
                    "fake has no improvement plan".to_string(),
                ))
            })?;
        let raw = serde_json::to_string(&plan).unwrap_or_default();
        Ok((plan, raw))
    }

    async fn classify_intent(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<(ModificationIntent, String)> {
        self.intent_calls.fetch_add(1, Ordering::Relaxed);
        self.check_failure()?;
        let intent = self
            .intent_queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_intent.clone());
        let raw = serde_json::to_string(&intent).unwrap_or_default();
        Ok((intent, raw))
    }
}

/// Builder for [`FakeDeckLlm`].
pub struct FakeDeckLlmBuilder {
    available: bool,
    builder_queue: VecDeque<BuilderResponse>,
    refine_queue: VecDeque<RefineResponse>,
    improvement_queue: VecDeque<ImprovementPlan>,
    intent_queue: VecDeque<ModificationIntent>,
    default_builder: BuilderResponse,
    default_refine: RefineResponse,
    default_improvement: Option<ImprovementPlan>,
    default_intent: ModificationIntent,
}

impl Default for FakeDeckLlmBuilder {
    fn default() -> Self {
        Self {
            available: true,
            builder_queue: VecDeque::new(),
            refine_queue: VecDeque::new(),
            improvement_queue: VecDeque::new(),
            intent_queue: VecDeque::new(),
            default_builder: BuilderResponse {
                tool_requests: vec![],
                plan: Some(DeckConstructionPlan::default()),
            },
            default_refine: RefineResponse {
                tool_requests: vec![],
                plan: Some(RefinementPlan::default()),
            },
            default_improvement: None,
            default_intent: ModificationIntent {
                intent_type: IntentKind::Optimize,
                description: String::new(),
                card_changes: vec![],
                constraints: vec![],
                confidence: 0.5,
            },
        }
    }
}

impl FakeDeckLlmBuilder {
    pub fn available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn builder_response(mut self, response: BuilderResponse) -> Self {
        self.builder_queue.push_back(response);
        self
    }

    pub fn refine_response(mut self, response: RefineResponse) -> Self {
        self.refine_queue.push_back(response);
        self
    }

    pub fn improvement_response(mut self, plan: ImprovementPlan) -> Self {
        self.improvement_queue.push_back(plan);
        self
    }

    pub fn intent_response(mut self, intent: ModificationIntent) -> Self {
        self.intent_queue.push_back(intent);
        self
    }

    pub fn default_construction_plan(mut self, plan: DeckConstructionPlan) -> Self {
        self.default_builder = BuilderResponse {
            tool_requests: vec![],
            plan: Some(plan),
        };
        self
    }

    pub fn default_refine_plan(mut self, plan: RefinementPlan) -> Self {
        self.default_refine = RefineResponse {
            tool_requests: vec![],
            plan: Some(plan),
        };
        self
    }

    pub fn default_improvement_plan(mut self, plan: ImprovementPlan) -> Self {
        self.default_improvement = Some(plan);
        self
    }

    pub fn default_intent(mut self, intent: ModificationIntent) -> Self {
        self.default_intent = intent;
        self
    }

    pub fn build(self) -> FakeDeckLlm {
        FakeDeckLlm {
            model: "fake-deck-llm".to_string(),
            available: self.available,
            fail_upstream: false,
            fail_parse: false,
            builder_queue: Mutex::new(self.builder_queue),
            refine_queue: Mutex::new(self.refine_queue),
            improvement_queue: Mutex::new(self.improvement_queue),
            intent_queue: Mutex::new(self.intent_queue),
            default_builder: self.default_builder,
            default_refine: self.default_refine,
            default_improvement: self.default_improvement,
            default_intent: self.default_intent,
            builder_calls: AtomicUsize::new(0),
            refine_calls: AtomicUsize::new(0),
            improvement_calls: AtomicUsize::new(0),
            intent_calls: AtomicUsize::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_builder_plan_with_name_alias() {
        let text = r#"{
            "strategy": "fast red",
            "card_selections": [
                {"name": "Goblin Guide", "quantity": 4, "reasoning": "one drop"},
                {"card_name": "Lightning Bolt", "quantity": "4"}
            ]
        }"#;
        let response = parse_builder_response(text).unwrap();
        let plan = response.plan.unwrap();
        assert_eq!(plan.strategy, "fast red");
        assert_eq!(plan.card_selections.len(), 2);
        assert_eq!(plan.card_selections[0].card_name, "Goblin Guide");
        assert_eq!(plan.card_selections[1].quantity, 4);
    }

    #[test]
    fn test_parse_builder_tool_requests() {
        let text = r#"{
            "tool_requests": [
                {"tool": "search_cards", "semantic_query": "cheap removal", "colors": ["R"], "cmc_max": 2},
                {"tool": "get_card_details", "name_or_id": "Lightning Bolt"},
                {"tool": "launch_missiles"}
            ]
        }"#;
        let response = parse_builder_response(text).unwrap();
        assert_eq!(response.tool_requests.len(), 2);
        assert!(response.plan.is_none());
        match &response.tool_requests[0] {
            ToolRequest::SearchCards { semantic_query, filters, .. } => {
                assert_eq!(semantic_query.as_deref(), Some("cheap removal"));
                assert_eq!(filters.cmc_max, Some(2.0));
            }
            other => panic!("unexpected tool: {other:?}"),
        }
    }

    #[test]
    fn test_parse_builder_json_wrapped_in_prose() {
        let text = "Here is my plan:\n{\"strategy\": \"x\", \"card_selections\": []}\nEnjoy!";
        let response = parse_builder_response(text).unwrap();
        assert_eq!(response.plan.unwrap().strategy, "x");
    }

    #[test]
    fn test_parse_builder_garbage_is_error() {
        assert!(parse_builder_response("not even json").is_err());
        assert!(parse_builder_response("{}").is_err());
    }

    #[test]
    fn test_parse_refine_actions() {
        let text = r#"{
            "analysis": "curve too high",
            "actions": [
                {"type": "remove", "card_name": "Big Dragon", "quantity": 2},
                {"type": "replace", "card_name": "Shock", "quantity": 2, "replacement": "Lightning Bolt"},
                {"type": "add", "card_name": "Monastery Swiftspear", "quantity": 4},
                {"type": "transmogrify", "card_name": "Island"}
            ]
        }"#;
        let response = parse_refine_response(text).unwrap();
        let plan = response.plan.unwrap();
        assert_eq!(plan.actions.len(), 3);
        assert_eq!(plan.actions[1].kind, RefinementActionKind::Replace);
        assert_eq!(plan.actions[1].replacement.as_deref(), Some("Lightning Bolt"));
    }

    #[test]
    fn test_parse_improvement_plan() {
        let text = r#"{
            "removals": [{"card_name": "Weak Card", "reason": "too slow", "quantity": 2}],
            "additions": [{"name": "Lightning Bolt", "reason": "efficient", "quantity": 4}],
            "analysis": "needs speed"
        }"#;
        let plan = parse_improvement_plan(text).unwrap();
        assert_eq!(plan.removals.len(), 1);
        assert_eq!(plan.additions[0].card_name, "Lightning Bolt");
        assert_eq!(plan.analysis, "needs speed");
    }

    #[test]
    fn test_parse_intent_remove_with_predicate() {
        let text = r#"{
            "intent_type": "REMOVE",
            "description": "remove expensive cards",
            "card_changes": [{"cmc_min": 6}],
            "constraints": [],
            "confidence": 0.9
        }"#;
        let intent = parse_modification_intent(text).unwrap();
        assert_eq!(intent.intent_type, IntentKind::Remove);
        assert_eq!(intent.card_changes[0].cmc_min, Some(6.0));
        assert!(intent.card_changes[0].card_name.is_none());
    }

    #[test]
    fn test_parse_intent_unknown_kind_degrades_to_optimize() {
        let text = r#"{"intent_type": "EMBIGGEN", "confidence": 0.2}"#;
        let intent = parse_modification_intent(text).unwrap();
        assert_eq!(intent.intent_type, IntentKind::Optimize);
    }

    #[test]
    fn test_parse_intent_missing_kind_is_error() {
        assert!(parse_modification_intent(r#"{"confidence": 0.9}"#).is_err());
    }

    #[tokio::test]
    async fn test_fake_queued_then_default() {
        let fake = FakeDeckLlm::builder()
            .builder_response(BuilderResponse {
                tool_requests: vec![ToolRequest::GetCardDetails {
                    name_or_id: "Shock".to_string(),
                }],
                plan: None,
            })
            .build();

        let (first, _) = fake.builder_turn("s", "u").await.unwrap();
        assert_eq!(first.tool_requests.len(), 1);
        assert!(first.plan.is_none());

        let (second, _) = fake.builder_turn("s", "u").await.unwrap();
        assert!(second.plan.is_some());
        assert_eq!(fake.builder_calls(), 2);
    }

    #[tokio::test]
    async fn test_fake_failure_modes() {
        let failing = FakeDeckLlm::failing();
        let err = failing.builder_turn("s", "u").await.unwrap_err();
        let tutor = err.downcast::<TutorError>().unwrap();
        assert_eq!(tutor.kind(), "upstream_unavailable");

        let parse_failing = FakeDeckLlm::parse_failing();
        let err = parse_failing.refine_turn("s", "u").await.unwrap_err();
        let tutor = err.downcast::<TutorError>().unwrap();
        assert_eq!(tutor.kind(), "parse_failure");
    }
}
