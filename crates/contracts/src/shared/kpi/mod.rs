//! DTO движка KPI: запросы вычисления, результаты и ошибки.

pub mod validation;

pub use validation::{ValidationReport, Violation, ViolationRule};

use crate::domain::a026_kpi_metric::aggregate::{MetricDimension, TimeWindow};
use crate::domain::a028_kpi_dashboard::aggregate::KpiWidgetId;
use crate::domain::common::OwnerId;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateDefinitionRequest {
    pub owner_id: OwnerId,
    /// Момент вычисления; по умолчанию "сейчас" в часовом поясе компании
    #[serde(default)]
    pub at: Option<NaiveDateTime>,
    #[serde(default)]
    pub widget_id: Option<KpiWidgetId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateMetricRequest {
    pub owner_id: OwnerId,
    #[serde(default)]
    pub at: Option<NaiveDateTime>,
    #[serde(default)]
    pub window: Option<TimeWindow>,
    #[serde(default)]
    pub custom_start: Option<NaiveDate>,
    #[serde(default)]
    pub custom_end: Option<NaiveDate>,
    #[serde(default)]
    pub dimension: Option<MetricDimension>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerQuery {
    pub owner_id: OwnerId,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Конкретный интервал `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedInterval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarResult {
    /// `None` когда значение не определено (например, avg по пустому набору)
    pub value: Option<f64>,
    pub previous_value: Option<f64>,
    pub delta: Option<f64>,
    /// Изменение в процентах; `None` при нулевом предыдущем значении
    pub delta_pct: Option<f64>,
    pub baseline_value: Option<f64>,
    pub formatted_value: String,
    /// Отсутствует для `all_time`
    pub window: Option<ResolvedInterval>,
    pub previous_window: Option<ResolvedInterval>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub key: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesResult {
    pub series: Vec<SeriesPoint>,
    pub window: Option<ResolvedInterval>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationResult {
    Scalar(ScalarResult),
    Series(SeriesResult),
}

impl EvaluationResult {
    pub fn as_scalar(&self) -> Option<&ScalarResult> {
        match self {
            EvaluationResult::Scalar(s) => Some(s),
            EvaluationResult::Series(_) => None,
        }
    }

    pub fn as_series(&self) -> Option<&SeriesResult> {
        match self {
            EvaluationResult::Series(s) => Some(s),
            EvaluationResult::Scalar(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiErrorKind {
    InvalidConfiguration,
    InvalidFilterValue,
    FieldNotInSource,
    InvalidWindowConfig,
    UnknownAlias,
    MalformedExpression,
    SourceUnavailable,
    UnknownAggregation,
    MissingValueField,
    NotFound,
    StoreUnavailable,
}

/// Структурированная ошибка вычисления
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiErrorDto {
    pub kind: KpiErrorKind,
    pub message: String,
    /// Ссылки на сущности/поля, вызвавшие ошибку
    #[serde(default)]
    pub references: Vec<String>,
    /// Заполняется только для `invalid_configuration`
    #[serde(default)]
    pub violations: Vec<Violation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_result_is_tagged_by_kind() {
        let result = EvaluationResult::Series(SeriesResult {
            series: vec![SeriesPoint {
                key: "2024-03".into(),
                value: Some(10.0),
            }],
            window: None,
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["kind"], "series");
        assert_eq!(json["series"][0]["key"], "2024-03");
        assert!(result.as_scalar().is_none());
    }

    #[test]
    fn test_metric_request_defaults() {
        let owner = OwnerId::new_v4();
        let body = format!("{{\"owner_id\":\"{}\"}}", owner);
        let req: EvaluateMetricRequest = serde_json::from_str(&body).unwrap();
        assert_eq!(req.owner_id, owner);
        assert!(req.at.is_none() && req.window.is_none() && req.dimension.is_none());
    }
}
