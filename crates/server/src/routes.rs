//! JSON API surface. Handlers translate between the wire shapes and the
//! engine/catalog, and map every [`DispatchError`] onto its HTTP status
//! and a `{ "error": { "code", "message" } }` envelope.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use agora_core::domain::customization::CustomizationId;
use agora_core::domain::overrides::OverrideSet;
use agora_core::domain::template::{AgentTemplate, ModelId, TemplateId, UserId};
use agora_core::domain::usage::UsagePeriod;
use agora_core::errors::DispatchError;
use agora_db::repositories::{
    ConversationLogRepository, CustomizationRepository, RevenueRepository, TemplateFilters,
};
use agora_db::{AccountingView, CatalogStore, NewCustomization};
use agora_runtime::{CallerDirectory, ChatRequest, DispatchEngine};

use crate::webhook;

/// Public history page size; requests may only shrink it.
const HISTORY_PAGE_LIMIT: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DispatchEngine>,
    pub catalog: Arc<CatalogStore>,
    pub accounting: Arc<AccountingView>,
    pub customizations: Arc<dyn CustomizationRepository>,
    pub log: Arc<dyn ConversationLogRepository>,
    pub revenue: Arc<dyn RevenueRepository>,
    pub directory: Arc<dyn CallerDirectory>,
    pub webhook_secret: Option<SecretString>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat", post(chat))
        .route("/v1/catalog", get(catalog))
        .route("/v1/customizations", post(create_customization))
        .route("/v1/customizations/{id}/rotate-key", post(rotate_key))
        .route("/v1/customizations/{id}/history", get(history))
        .route("/v1/payments/webhook", post(webhook::handle))
        .route("/v1/accounting", get(accounting))
        .with_state(state)
}

pub fn error_response(error: &DispatchError) -> Response {
    let status = match error {
        DispatchError::InvalidRequest(_)
        | DispatchError::InvalidOverride(_)
        | DispatchError::ModelNotPermitted(_) => StatusCode::BAD_REQUEST,
        DispatchError::AuthorizationDenied => StatusCode::FORBIDDEN,
        DispatchError::CustomizationNotFound | DispatchError::TemplateUnavailable => {
            StatusCode::NOT_FOUND
        }
        DispatchError::QuotaExceeded { .. } | DispatchError::UpstreamRateLimited => {
            StatusCode::TOO_MANY_REQUESTS
        }
        DispatchError::ModelUnavailable(_)
        | DispatchError::UpstreamError
        | DispatchError::UpstreamEmpty => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        DispatchError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let body = serde_json::json!({
        "error": { "code": error.code(), "message": error.user_message() }
    });
    (status, Json(body)).into_response()
}

#[derive(Deserialize)]
struct ChatBody {
    customization_id: Option<String>,
    api_key: Option<String>,
    message: String,
    conversation_id: Option<String>,
    #[serde(default)]
    context: BTreeMap<String, String>,
    timeout_secs: Option<u64>,
}

#[derive(Serialize)]
struct ChatResponse {
    reply: String,
    conversation_id: String,
    model_used: String,
    latency_seconds: f64,
    tokens: u32,
}

async fn chat(State(state): State<AppState>, Json(body): Json<ChatBody>) -> Response {
    let request = ChatRequest {
        customization_id: body.customization_id,
        api_key: body.api_key,
        message: body.message,
        conversation_id: body.conversation_id,
        context: body.context,
        deadline: body.timeout_secs.map(Duration::from_secs),
    };

    match state.engine.chat(request).await {
        Ok(reply) => Json(ChatResponse {
            reply: reply.reply,
            conversation_id: reply.conversation_id,
            model_used: reply.model_used,
            latency_seconds: reply.latency.as_secs_f64(),
            tokens: reply.tokens,
        })
        .into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Deserialize)]
struct CatalogQuery {
    user_id: Option<String>,
    category: Option<String>,
}

#[derive(Serialize)]
struct CatalogEntry {
    id: String,
    name: String,
    category: String,
    description: String,
    tier: &'static str,
    default_model: String,
    permitted_models: Vec<String>,
    base_price_cents: i64,
    recurring_price_cents: i64,
}

impl From<AgentTemplate> for CatalogEntry {
    fn from(template: AgentTemplate) -> Self {
        Self {
            id: template.id.0,
            name: template.name,
            category: template.category,
            description: template.description,
            tier: template.tier.as_str(),
            default_model: template.default_model.0,
            permitted_models: template.permitted_models.into_iter().map(|m| m.0).collect(),
            base_price_cents: template.base_price_cents,
            recurring_price_cents: template.recurring_price_cents,
        }
    }
}

async fn catalog(State(state): State<AppState>, Query(query): Query<CatalogQuery>) -> Response {
    let plan = match &query.user_id {
        Some(user_id) => state.directory.plan_for(&UserId(user_id.clone())).await,
        None => agora_core::policy::CallerPlan::Free,
    };

    let filters = TemplateFilters { category: query.category, plan: Some(plan) };
    match state.catalog.list_templates(filters).await {
        Ok(templates) => {
            let entries: Vec<CatalogEntry> =
                templates.into_iter().map(CatalogEntry::from).collect();
            Json(serde_json::json!({ "templates": entries })).into_response()
        }
        Err(error) => error_response(&error),
    }
}

#[derive(Deserialize)]
struct CreateCustomizationBody {
    template_id: String,
    user_id: String,
    display_name: Option<String>,
    instruction_override: Option<String>,
    model: Option<String>,
    style: Option<String>,
    focus: Option<String>,
    mode: Option<String>,
    language: Option<String>,
}

#[derive(Serialize)]
struct CreateCustomizationResponse {
    customization_id: String,
    /// Shown exactly once; only a digest is stored.
    api_key: String,
    active_model: String,
}

fn parse_overrides(body: &CreateCustomizationBody) -> Result<OverrideSet, DispatchError> {
    let mut overrides = OverrideSet::default();
    if let Some(style) = &body.style {
        overrides.style = style.parse().map_err(DispatchError::from)?;
    }
    if let Some(focus) = &body.focus {
        overrides.focus = focus.parse().map_err(DispatchError::from)?;
    }
    if let Some(mode) = &body.mode {
        overrides.mode = mode.parse().map_err(DispatchError::from)?;
    }
    if let Some(language) = &body.language {
        overrides.language = language.parse().map_err(DispatchError::from)?;
    }
    Ok(overrides)
}

async fn create_customization(
    State(state): State<AppState>,
    Json(body): Json<CreateCustomizationBody>,
) -> Response {
    let overrides = match parse_overrides(&body) {
        Ok(overrides) => overrides,
        Err(error) => return error_response(&error),
    };

    let user_id = UserId(body.user_id.clone());
    let plan = state.directory.plan_for(&user_id).await;
    let request = NewCustomization {
        template_id: TemplateId(body.template_id),
        user_id,
        display_name: body.display_name,
        instruction_override: body.instruction_override,
        model: body.model.map(ModelId),
        overrides,
    };

    match state.catalog.create_customization(plan, request).await {
        Ok(created) => (
            StatusCode::CREATED,
            Json(CreateCustomizationResponse {
                customization_id: created.customization.id.0,
                api_key: created.api_key,
                active_model: created.customization.model.0,
            }),
        )
            .into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Deserialize)]
struct RotateKeyBody {
    user_id: String,
}

async fn rotate_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RotateKeyBody>,
) -> Response {
    match state
        .catalog
        .rotate_key(&CustomizationId(id), &UserId(body.user_id))
        .await
    {
        Ok(key) => Json(serde_json::json!({ "api_key": key.raw })).into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Deserialize)]
struct HistoryQuery {
    user_id: String,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HistoryTurn {
    conversation_id: String,
    user_text: String,
    agent_text: String,
    model_used: String,
    outcome: &'static str,
    tokens: u32,
    created_at: String,
}

async fn history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let customization_id = CustomizationId(id);
    let customization = match state.customizations.find_by_id(&customization_id).await {
        Ok(Some(customization)) => customization,
        Ok(None) => return error_response(&DispatchError::CustomizationNotFound),
        Err(_) => return error_response(&DispatchError::Internal),
    };
    // A non-owner gets the same answer as a missing id.
    if customization.user_id.0 != query.user_id {
        return error_response(&DispatchError::CustomizationNotFound);
    }

    let limit = query.limit.unwrap_or(HISTORY_PAGE_LIMIT).min(HISTORY_PAGE_LIMIT);
    match state.log.history(&customization_id, limit).await {
        Ok(turns) => {
            let turns: Vec<HistoryTurn> = turns
                .into_iter()
                .map(|turn| HistoryTurn {
                    conversation_id: turn.conversation_id.0,
                    user_text: turn.user_text,
                    agent_text: turn.agent_text,
                    model_used: turn.model_used.0,
                    outcome: turn.outcome.as_str(),
                    tokens: turn.tokens,
                    created_at: turn.created_at.to_rfc3339(),
                })
                .collect();
            Json(serde_json::json!({ "turns": turns })).into_response()
        }
        Err(_) => error_response(&DispatchError::Internal),
    }
}

#[derive(Deserialize)]
struct AccountingQuery {
    period: Option<String>,
}

fn parse_period(raw: &str) -> Option<UsagePeriod> {
    let (year, month) = raw.split_once('-')?;
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    (1..=12).contains(&month).then_some(UsagePeriod { year, month })
}

async fn accounting(
    State(state): State<AppState>,
    Query(query): Query<AccountingQuery>,
) -> Response {
    let period = match &query.period {
        Some(raw) => match parse_period(raw) {
            Some(period) => period,
            None => {
                return error_response(&DispatchError::InvalidRequest(format!(
                    "period `{raw}` is not of the form YYYY-MM"
                )))
            }
        },
        None => UsagePeriod::current(),
    };

    match state.accounting.report(period).await {
        Ok(report) => Json(report).into_response(),
        Err(_) => error_response(&DispatchError::Internal),
    }
}
