//! HTTP处理器

use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use queue_core::{CheckIn, CheckInStatus, ErrorKind, NewCheckIn, PriorityTier, QueueError};
use queue_workflow::{effective_tier, DepartmentView, QueueStats};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

const DEFAULT_HISTORY_LIMIT: usize = 50;

/// API错误，映射为带状态码的JSON响应
#[derive(Debug)]
pub struct ApiError(pub QueueError);

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::InvalidTransition => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// 错误处理
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        let body = Json(json!({
            "error": true,
            "kind": self.0.kind(),
            "message": self.0.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// 记录被拒绝的请求并转换为API错误
fn reject(state: &AppState, err: QueueError) -> ApiError {
    if err.is_rejection() || err.kind() == ErrorKind::Validation {
        state.metrics.record_rejection(err.kind());
    }
    ApiError(err)
}

/// 状态更新请求
#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: CheckInStatus,
}

/// 优先级修正请求，`tier` 为空表示恢复按预约类型分级
#[derive(Debug, Deserialize)]
pub struct PriorityUpdate {
    #[serde(default)]
    pub tier: Option<PriorityTier>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

/// 健康检查处理器
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus指标
pub async fn metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    state
        .metrics
        .set_live_subscribers(state.engine.publisher().total_subscribers());
    let body = state
        .metrics
        .render()
        .map_err(|e| QueueError::Internal(e.to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

/// 患者登记
pub async fn create_check_in(
    State(state): State<AppState>,
    Json(request): Json<NewCheckIn>,
) -> ApiResult<(StatusCode, Json<CheckIn>)> {
    info!(
        "Check-in request for patient {} in {}",
        request.patient_id, request.department
    );

    let record = state
        .engine
        .check_in(request)
        .await
        .map_err(|e| reject(&state, e))?;
    state.metrics.record_check_in(effective_tier(&record));

    Ok((StatusCode::CREATED, Json(record)))
}

/// 查询单条登记记录
pub async fn get_check_in(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CheckIn>> {
    let record = state.engine.get(id).await?;
    Ok(Json(record))
}

/// 更新候诊状态
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult<Json<CheckIn>> {
    let record = state
        .engine
        .update_status(id, update.status)
        .await
        .map_err(|e| reject(&state, e))?;
    state.metrics.record_transition(record.status);

    Ok(Json(record))
}

/// 修正优先级
pub async fn correct_priority(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<PriorityUpdate>,
) -> ApiResult<Json<CheckIn>> {
    let record = state
        .engine
        .correct_priority(id, update.tier)
        .await
        .map_err(|e| reject(&state, e))?;
    Ok(Json(record))
}

/// 科室当前队列
pub async fn department_queue(
    State(state): State<AppState>,
    Path(department): Path<String>,
) -> ApiResult<Json<DepartmentView>> {
    let view = state.engine.current_view(&department).await?;
    Ok(Json(view))
}

/// 科室统计
pub async fn department_stats(
    State(state): State<AppState>,
    Path(department): Path<String>,
) -> ApiResult<Json<QueueStats>> {
    let stats = state.engine.stats(&department).await?;
    Ok(Json(stats))
}

/// 科室历史记录
pub async fn department_history(
    State(state): State<AppState>,
    Path(department): Path<String>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<impl IntoResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let records = state.engine.history(&department, limit).await?;

    Ok(Json(json!({
        "department": department,
        "records": records,
        "total": records.len(),
        "limit": limit
    })))
}
