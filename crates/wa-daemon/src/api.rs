//! HTTP handlers for the campaign control plane (`spec.md` §4.K).

use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use wa_core::campaign::{Campaign, CampaignStatus, Pacing, Progress, Recipient};
use wa_core::ids::{CampaignId, ScheduledMessageId};
use wa_core::quota::AccountPlan;
use wa_core::scheduled::{ScheduledMessage, ScheduledStatus};
use wa_core::template::Template;
use wa_error::{CoreError, ErrorCode};
use wa_template::ProcessedMessage;
use wa_tracker::{ExportFormat, Stats};

/// Wraps a [`CoreError`] so it can be returned directly from a handler.
pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.code {
            ErrorCode::ValidationFailed => StatusCode::BAD_REQUEST,
            ErrorCode::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::GatewayTransient | ErrorCode::GatewayPermanent => StatusCode::BAD_GATEWAY,
            ErrorCode::StorageError | ErrorCode::Internal | ErrorCode::ConfigInvalid => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::LeaseLost | ErrorCode::LeaseConflict | ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
        };
        let dto: wa_error::CoreErrorDto = (&self.0).into();
        (status, Json(serde_json::json!({ "error": dto }))).into_response()
    }
}

/// `GET /health`.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "time": Utc::now() }))
}

// ---------------------------------------------------------------------------
// Campaigns
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub account_id: String,
    pub name: String,
    pub template_raw: String,
    pub recipients: Vec<Recipient>,
    #[serde(default)]
    pub pacing: Pacing,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    pub plan: AccountPlan,
}

#[derive(Debug, Serialize)]
pub struct CreateCampaignResponse {
    pub id: CampaignId,
}

/// `POST /campaigns`.
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCampaignRequest>,
) -> Result<Json<CreateCampaignResponse>, ApiError> {
    let total = body.recipients.len();
    let campaign = Campaign {
        id: CampaignId::new(),
        account_id: wa_core::ids::AccountId::new(body.account_id),
        name: body.name,
        template_raw: body.template_raw,
        recipients: body.recipients,
        pacing: body.pacing,
        created_at: Utc::now(),
        starts_at: body.starts_at,
        status: CampaignStatus::Scheduled,
        progress: Progress::new(total),
        last_error: None,
    };
    let id = state.control_plane.create_campaign(campaign, body.plan).await?;
    Ok(Json(CreateCampaignResponse { id }))
}

/// `POST /campaigns/{id}/pause`.
pub async fn pause_campaign(State(state): State<Arc<AppState>>, Path(id): Path<uuid::Uuid>) -> Result<StatusCode, ApiError> {
    state.control_plane.pause(CampaignId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /campaigns/{id}/resume`.
pub async fn resume_campaign(State(state): State<Arc<AppState>>, Path(id): Path<uuid::Uuid>) -> Result<StatusCode, ApiError> {
    state.control_plane.resume(CampaignId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /campaigns/{id}/cancel`.
pub async fn cancel_campaign(State(state): State<Arc<AppState>>, Path(id): Path<uuid::Uuid>) -> Result<StatusCode, ApiError> {
    state.control_plane.cancel(CampaignId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /campaigns/{id}/progress`.
pub async fn campaign_progress(State(state): State<Arc<AppState>>, Path(id): Path<uuid::Uuid>) -> Result<Json<Progress>, ApiError> {
    let progress = state.control_plane.progress(CampaignId(id)).await?;
    Ok(Json(progress))
}

/// `GET /campaigns/{id}/stats`.
pub async fn campaign_stats(State(state): State<Arc<AppState>>, Path(id): Path<uuid::Uuid>) -> Json<Stats> {
    let stats = state.control_plane.campaign_stats(CampaignId(id), Utc::now()).await;
    Json(stats)
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: Option<String>,
}

/// `GET /campaigns/{id}/export`.
pub async fn export_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let (format, content_type) = match query.format.as_deref() {
        Some("csv") => (ExportFormat::Csv, "text/csv"),
        _ => (ExportFormat::Json, "application/json"),
    };
    let bytes = state.control_plane.export_campaign(CampaignId(id), format).await?;
    Ok(([("content-type", content_type)], bytes).into_response())
}

// ---------------------------------------------------------------------------
// Scheduled messages
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ScheduleMessageRequest {
    pub account_id: String,
    pub template_raw: String,
    pub recipient: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    pub run_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ScheduleMessageResponse {
    pub id: ScheduledMessageId,
}

/// `POST /messages/schedule`.
pub async fn schedule_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScheduleMessageRequest>,
) -> Result<Json<ScheduleMessageResponse>, ApiError> {
    let message = ScheduledMessage {
        id: ScheduledMessageId::new(),
        account_id: wa_core::ids::AccountId::new(body.account_id),
        template_raw: body.template_raw,
        recipient: body.recipient,
        variables: body.variables,
        run_at: body.run_at,
        status: ScheduledStatus::Pending,
        attempts: 0,
        last_error: None,
    };
    let id = state.control_plane.schedule_message(message).await?;
    Ok(Json(ScheduleMessageResponse { id }))
}

#[derive(Debug, Serialize)]
pub struct CancelScheduledResponse {
    pub cancelled: bool,
}

/// `DELETE /messages/{id}`.
pub async fn cancel_scheduled(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
) -> Result<Json<CancelScheduledResponse>, ApiError> {
    let cancelled = state.control_plane.cancel_scheduled(ScheduledMessageId(id)).await?;
    Ok(Json(CancelScheduledResponse { cancelled }))
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ValidateTemplateRequest {
    pub raw: String,
}

/// `POST /templates/validate`.
pub async fn validate_template(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ValidateTemplateRequest>,
) -> Json<Template> {
    Json(state.control_plane.validate_template(&body.raw))
}

#[derive(Debug, Deserialize)]
pub struct PreviewTemplateRequest {
    pub raw: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default = "default_preview_count")]
    pub count: usize,
}

fn default_preview_count() -> usize {
    3
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub final_text: String,
    pub success: bool,
    pub applied_variables: Vec<String>,
    pub missing_variables: Vec<String>,
}

impl From<&ProcessedMessage> for PreviewResponse {
    fn from(msg: &ProcessedMessage) -> Self {
        Self {
            final_text: msg.final_text.clone(),
            success: msg.success,
            applied_variables: msg.applied_variables.clone(),
            missing_variables: msg.missing_variables.clone(),
        }
    }
}

/// `POST /templates/preview`.
pub async fn preview_template(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PreviewTemplateRequest>,
) -> Json<Vec<PreviewResponse>> {
    let previews = state.control_plane.preview_template(&body.raw, &body.variables, body.count);
    Json(previews.iter().map(PreviewResponse::from).collect())
}
