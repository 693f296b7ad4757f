use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::domain::{a025_kpi_source, a026_kpi_metric, a027_kpi_definition, a028_kpi_dashboard, SaveError};
use crate::shared::config::engine_settings;
use crate::shared::data::db::get_connection;
use crate::shared::kpi_engine::{KpiEngine, KpiError, SqlDataSource, SqliteConfigStore};
use contracts::domain::a025_kpi_source::aggregate::{KpiSource, KpiSourceId};
use contracts::domain::a026_kpi_metric::aggregate::{KpiMetric, KpiMetricId, WindowSpec};
use contracts::domain::a027_kpi_definition::aggregate::{KpiDefinition, KpiDefinitionId};
use contracts::domain::a028_kpi_dashboard::aggregate::{KpiDashboard, KpiDashboardId};
use contracts::domain::common::{AggregateId, AggregateRoot};
use contracts::shared::kpi::{
    EvaluateDefinitionRequest, EvaluateMetricRequest, EvaluationResult, OwnerQuery, ValidationReport,
};

/// Ошибка HTTP слоя KPI
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Engine(KpiError),
    Invalid(ValidationReport),
    NotFound,
    Internal(String),
}

impl From<KpiError> for ApiError {
    fn from(e: KpiError) -> Self {
        ApiError::Engine(e)
    }
}

impl From<SaveError> for ApiError {
    fn from(e: SaveError) -> Self {
        match e {
            SaveError::Rejected(message) => ApiError::BadRequest(message),
            SaveError::Invalid(report) => ApiError::Invalid(report),
            SaveError::Engine(e) => ApiError::Engine(e),
            SaveError::Db(e) => ApiError::Internal(e.to_string()),
        }
    }
}

/// Код ответа для ошибки движка
pub fn kpi_status(e: &KpiError) -> StatusCode {
    match e {
        KpiError::NotFound { .. } => StatusCode::NOT_FOUND,
        KpiError::SourceUnavailable { .. } | KpiError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
            }
            ApiError::Engine(e) => (kpi_status(&e), Json(e.to_dto())).into_response(),
            ApiError::Invalid(report) => (StatusCode::UNPROCESSABLE_ENTITY, Json(report)).into_response(),
            ApiError::NotFound => StatusCode::NOT_FOUND.into_response(),
            ApiError::Internal(message) => {
                tracing::error!("KPI request failed: {}", message);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

fn parse_id<T: AggregateId>(raw: &str) -> Result<T, ApiError> {
    T::from_string(raw).map_err(ApiError::BadRequest)
}

/// Движок поверх общей БД: конфигурация и строки берутся из одного соединения
fn engine() -> Result<KpiEngine, ApiError> {
    let db = get_connection().map_err(|e| KpiError::StoreUnavailable(e.to_string()))?;
    let settings = engine_settings();
    Ok(KpiEngine::new(
        Arc::new(SqliteConfigStore::new(db.clone())),
        Arc::new(SqlDataSource::new(db.clone(), settings.utc_offset)),
        settings,
    ))
}

fn db() -> Result<&'static sea_orm::DatabaseConnection, ApiError> {
    get_connection().map_err(|e| ApiError::Engine(KpiError::StoreUnavailable(e.to_string())))
}

/// Запись видна компании-владельцу; шаблоны видны всем
fn visible<T: AggregateRoot>(record: Option<T>, query: &OwnerQuery) -> Result<Json<T>, ApiError> {
    match record {
        Some(r) if r.owner().is_none() || r.is_owned_by(&query.owner_id) => Ok(Json(r)),
        _ => Err(ApiError::NotFound),
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// POST /api/kpi/definitions/:id/evaluate
pub async fn evaluate_definition(
    Path(id): Path<String>,
    Json(req): Json<EvaluateDefinitionRequest>,
) -> Result<Json<EvaluationResult>, ApiError> {
    let id: KpiDefinitionId = parse_id(&id)?;
    let engine = engine()?;
    let at = req.at.unwrap_or_else(|| engine.now());
    let result = engine
        .evaluate_definition(&id, &req.owner_id, at, req.widget_id.as_ref())
        .await?;
    Ok(Json(result))
}

/// POST /api/kpi/metrics/:id/evaluate
pub async fn evaluate_metric(
    Path(id): Path<String>,
    Json(req): Json<EvaluateMetricRequest>,
) -> Result<Json<EvaluationResult>, ApiError> {
    let id: KpiMetricId = parse_id(&id)?;
    let engine = engine()?;
    let at = req.at.unwrap_or_else(|| engine.now());
    let window = req.window.map(|window| WindowSpec {
        window,
        custom_start: req.custom_start,
        custom_end: req.custom_end,
    });
    let result = engine
        .evaluate_metric(&id, &req.owner_id, at, window, req.dimension)
        .await?;
    Ok(Json(result))
}

/// GET /api/kpi/definitions/:id/validate?owner_id=
pub async fn validate_definition(
    Path(id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<ValidationReport>, ApiError> {
    let id: KpiDefinitionId = parse_id(&id)?;
    let report = engine()?.validate_definition(&id, &query.owner_id).await?;
    Ok(Json(report))
}

// ============================================================================
// Configuration
// ============================================================================

/// POST /api/kpi/sources
pub async fn upsert_source(Json(source): Json<KpiSource>) -> Result<Json<serde_json::Value>, ApiError> {
    let id = a025_kpi_source::service::save(db()?, source).await?;
    Ok(Json(json!({ "id": id.as_string() })))
}

/// GET /api/kpi/sources/:id?owner_id=
pub async fn get_source(
    Path(id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<KpiSource>, ApiError> {
    let id: KpiSourceId = parse_id(&id)?;
    let record = a025_kpi_source::service::get(db()?, &id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    visible(record, &query)
}

/// POST /api/kpi/metrics
pub async fn upsert_metric(Json(metric): Json<KpiMetric>) -> Result<Json<serde_json::Value>, ApiError> {
    let id = a026_kpi_metric::service::save(db()?, metric).await?;
    Ok(Json(json!({ "id": id.as_string() })))
}

/// GET /api/kpi/metrics/:id?owner_id=
pub async fn get_metric(
    Path(id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<KpiMetric>, ApiError> {
    let id: KpiMetricId = parse_id(&id)?;
    let record = a026_kpi_metric::service::get(db()?, &id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    visible(record, &query)
}

/// POST /api/kpi/definitions
pub async fn upsert_definition(
    Json(definition): Json<KpiDefinition>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = a027_kpi_definition::service::save(db()?, definition).await?;
    Ok(Json(json!({ "id": id.as_string() })))
}

/// GET /api/kpi/definitions/:id?owner_id=
pub async fn get_definition(
    Path(id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<KpiDefinition>, ApiError> {
    let id: KpiDefinitionId = parse_id(&id)?;
    let record = a027_kpi_definition::service::get(db()?, &id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    visible(record, &query)
}

/// POST /api/kpi/dashboards
pub async fn upsert_dashboard(
    Json(dashboard): Json<KpiDashboard>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = a028_kpi_dashboard::service::save(db()?, dashboard).await?;
    Ok(Json(json!({ "id": id.as_string() })))
}

/// GET /api/kpi/dashboards/:id?owner_id=
pub async fn get_dashboard(
    Path(id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<KpiDashboard>, ApiError> {
    let id: KpiDashboardId = parse_id(&id)?;
    let record = a028_kpi_dashboard::service::get(db()?, &id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    visible(record, &query)
}
