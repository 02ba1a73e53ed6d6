//! REST endpoints for campaigns, messages, follow-ups, and the
//! conversational webhook.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use super::AppState;
use super::error::ApiError;
use crate::campaign::export::{self, ExportFormat};
use crate::campaign::model::{MessageStatus, Tone};
use crate::error::ErrorCode;
use crate::followup::{FollowUpRule, TriggerType};
use crate::generator::GenerationContext;
use crate::pipeline::RunRequest;

const DEFAULT_LIST_LIMIT: usize = 50;

/// REST routes. State is applied by [`super::app`].
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/campaigns", post(create_campaign).get(list_campaigns))
        .route("/api/campaigns/{id}", get(campaign_status))
        .route("/api/campaigns/{id}/messages", get(campaign_messages))
        .route("/api/campaigns/{id}/approve-all", post(approve_all))
        .route("/api/campaigns/{id}/send-all", post(send_all))
        .route("/api/campaigns/{id}/cancel", post(cancel_campaign))
        .route("/api/campaigns/{id}/export", get(export_campaign))
        .route("/api/campaigns/{id}/follow-ups/rules", post(add_rule))
        .route("/api/follow-ups/run", post(run_follow_ups))
        .route("/api/follow-ups/rules/{id}/pause", post(pause_rule))
        .route("/api/follow-ups/rules/{id}/resume", post(resume_rule))
        .route("/api/messages/{id}/approve", post(approve_message))
        .route("/api/messages/{id}/reject", post(reject_message))
        .route("/api/messages/{id}/send", post(send_message))
        .route("/api/messages/{id}/reset", post(reset_message))
        .route("/api/messages/{id}/edit", post(edit_message))
        .route("/api/messages/{id}/regenerate", post(regenerate_message))
        .route("/api/messages/{id}/events", post(record_event))
        .route("/api/messages/{id}/follow-up", post(fire_follow_up))
        .route("/webhook/conversation", post(conversation_webhook))
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "outreach"
    }))
}

// ── Campaigns ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateCampaignRequest {
    input: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    context: Option<GenerationContext>,
}

async fn create_campaign(
    State(state): State<AppState>,
    Json(body): Json<CreateCampaignRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.input.trim().is_empty() {
        return Err(ApiError::bad_request("input must not be empty"));
    }
    let request = RunRequest {
        input: body.input,
        user_id: body.user_id,
        context: body.context,
        settings: None,
    };
    let response = state.service.create(request).await;
    let status = if response.success {
        StatusCode::CREATED
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(response)))
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn list_campaigns(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    Json(state.service.list(query.user_id.as_deref(), limit).await)
}

async fn campaign_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .service
        .status(id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Campaign {id}")))?;
    Ok(Json(view))
}

async fn campaign_messages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let campaign = state
        .service
        .book()
        .get(id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Campaign {id}")))?;
    Ok(Json(campaign.messages().to_vec()))
}

async fn approve_all(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.service.book().approve_all(id).await?;
    info!(campaign_id = %id, approved = outcome.succeeded.len(), "Bulk approve via REST");
    Ok(Json(outcome))
}

async fn send_all(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.service.book().send_all(id).await?;
    info!(
        campaign_id = %id,
        sent = outcome.succeeded.len(),
        failed = outcome.failed.len(),
        "Bulk send via REST"
    );
    Ok(Json(outcome))
}

async fn cancel_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let campaign = state.service.book().cancel(id).await?;
    Ok(Json(json!({
        "campaign_id": campaign.id,
        "status": campaign.status,
    })))
}

#[derive(Deserialize)]
struct ExportQuery {
    #[serde(default)]
    format: Option<String>,
}

async fn export_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let format = match query.format.as_deref() {
        Some(raw) => raw.parse::<ExportFormat>().map_err(ApiError::bad_request)?,
        None => ExportFormat::default(),
    };
    let campaign = state
        .service
        .book()
        .get(id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Campaign {id}")))?;
    let body = export::render(&campaign, format).map_err(|e| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InvalidRequest,
            e.to_string(),
        )
    })?;
    debug!(campaign_id = %id, format = %format, bytes = body.len(), "Campaign exported");
    Ok(([(header::CONTENT_TYPE, format.content_type())], body))
}

// ── Follow-ups ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AddRuleRequest {
    trigger: TriggerType,
    #[serde(default)]
    delay_hours: Option<u32>,
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    body_template: Option<String>,
    #[serde(default)]
    tone: Option<Tone>,
}

async fn add_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AddRuleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let campaign = state
        .service
        .book()
        .get(id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Campaign {id}")))?;

    let mut rule = FollowUpRule::new(
        id,
        body.trigger,
        body.delay_hours
            .unwrap_or(campaign.settings.follow_up_delay_hours),
        body.max_attempts
            .unwrap_or(campaign.settings.max_follow_up_attempts),
    )
    .with_tone(body.tone.unwrap_or(campaign.intent.tone));
    if let Some(template) = body.body_template {
        rule = rule.with_template(template);
    }

    let rule = state.service.follow_ups().add_rule(rule).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn pause_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let rule = state.service.follow_ups().pause_rule(id).await?;
    Ok(Json(rule))
}

async fn resume_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let rule = state.service.follow_ups().resume_rule(id).await?;
    Ok(Json(rule))
}

async fn run_follow_ups(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let report = state.service.follow_ups().tick(Utc::now()).await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct FireFollowUpRequest {
    rule_id: Uuid,
}

async fn fire_follow_up(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<FireFollowUpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let action = state
        .service
        .follow_ups()
        .fire_manual(body.rule_id, id, Utc::now())
        .await?;
    Ok(match action {
        Some(action) => (StatusCode::ACCEPTED, Json(json!({ "queued": true, "action": action }))),
        None => (StatusCode::OK, Json(json!({ "queued": false }))),
    })
}

// ── Messages ────────────────────────────────────────────────────────────

async fn approve_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.book().approve(id).await?))
}

async fn reject_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.book().reject(id).await?))
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.book().send(id).await?))
}

async fn reset_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.book().reset_to_draft(id).await?))
}

#[derive(Deserialize)]
struct EditRequest {
    body: String,
    #[serde(default)]
    subject: Option<String>,
}

async fn edit_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<EditRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.body.trim().is_empty() {
        return Err(ApiError::bad_request("body must not be empty"));
    }
    Ok(Json(
        state
            .service
            .book()
            .edit(id, body.body, body.subject)
            .await?,
    ))
}

#[derive(Deserialize, Default)]
struct RegenerateRequest {
    #[serde(default)]
    tone: Option<Tone>,
}

async fn regenerate_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<RegenerateRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.unwrap_or_default();
    Ok(Json(state.service.regenerate(id, body.tone).await?))
}

#[derive(Deserialize)]
struct EventRequest {
    event: String,
    #[serde(default)]
    at: Option<DateTime<Utc>>,
}

async fn record_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<EventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let status = body
        .event
        .parse::<MessageStatus>()
        .map_err(ApiError::bad_request)?;
    Ok(Json(
        state.service.book().record_event(id, status, body.at).await?,
    ))
}

// ── Conversation ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ConversationRequest {
    from: String,
    body: String,
}

async fn conversation_webhook(
    State(state): State<AppState>,
    Json(body): Json<ConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.from.trim().is_empty() {
        return Err(ApiError::bad_request("from must not be empty"));
    }
    let reply = state
        .conversation
        .handle(&body.from, &body.body, Utc::now())
        .await;
    Ok(Json(json!({ "reply": reply })))
}
