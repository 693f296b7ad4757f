use contracts::shared::kpi::{KpiErrorDto, KpiErrorKind, ValidationReport};
use thiserror::Error;

/// Ошибки движка KPI
#[derive(Debug, Error, Clone, PartialEq)]
pub enum KpiError {
    #[error("configuration is invalid: {} violation(s)", .0.len())]
    InvalidConfiguration(ValidationReport),

    #[error("invalid value for filter on '{field}': {message}")]
    InvalidFilterValue { field: String, message: String },

    #[error("field {field} does not belong to source '{source_code}'")]
    FieldNotInSource { field: String, source_code: String },

    #[error("invalid time window: {0}")]
    InvalidWindowConfig(String),

    #[error("unknown alias '{0}' in expression")]
    UnknownAlias(String),

    #[error("malformed expression: {0}")]
    MalformedExpression(String),

    #[error("data source '{source_code}' unavailable: {message}")]
    SourceUnavailable { source_code: String, message: String },

    #[error("unknown aggregation '{0}'")]
    UnknownAggregation(String),

    #[error("metric '{0}' requires a value field")]
    MissingValueField(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("configuration store unavailable: {0}")]
    StoreUnavailable(String),
}

impl KpiError {
    pub fn kind(&self) -> KpiErrorKind {
        match self {
            KpiError::InvalidConfiguration(_) => KpiErrorKind::InvalidConfiguration,
            KpiError::InvalidFilterValue { .. } => KpiErrorKind::InvalidFilterValue,
            KpiError::FieldNotInSource { .. } => KpiErrorKind::FieldNotInSource,
            KpiError::InvalidWindowConfig(_) => KpiErrorKind::InvalidWindowConfig,
            KpiError::UnknownAlias(_) => KpiErrorKind::UnknownAlias,
            KpiError::MalformedExpression(_) => KpiErrorKind::MalformedExpression,
            KpiError::SourceUnavailable { .. } => KpiErrorKind::SourceUnavailable,
            KpiError::UnknownAggregation(_) => KpiErrorKind::UnknownAggregation,
            KpiError::MissingValueField(_) => KpiErrorKind::MissingValueField,
            KpiError::NotFound { .. } => KpiErrorKind::NotFound,
            KpiError::StoreUnavailable(_) => KpiErrorKind::StoreUnavailable,
        }
    }

    /// Сущности и поля, на которые ссылается ошибка
    pub fn references(&self) -> Vec<String> {
        match self {
            KpiError::InvalidConfiguration(report) => {
                report.violations.iter().map(|v| v.path.clone()).collect()
            }
            KpiError::InvalidFilterValue { field, .. } => vec![field.clone()],
            KpiError::FieldNotInSource { field, source_code } => {
                vec![field.clone(), source_code.clone()]
            }
            KpiError::UnknownAlias(alias) => vec![alias.clone()],
            KpiError::SourceUnavailable { source_code, .. } => vec![source_code.clone()],
            KpiError::MissingValueField(metric) => vec![metric.clone()],
            KpiError::NotFound { id, .. } => vec![id.clone()],
            KpiError::InvalidWindowConfig(_)
            | KpiError::MalformedExpression(_)
            | KpiError::UnknownAggregation(_)
            | KpiError::StoreUnavailable(_) => vec![],
        }
    }

    pub fn to_dto(&self) -> KpiErrorDto {
        let violations = match self {
            KpiError::InvalidConfiguration(report) => report.violations.clone(),
            _ => vec![],
        };
        KpiErrorDto {
            kind: self.kind(),
            message: self.to_string(),
            references: self.references(),
            violations,
        }
    }
}

impl From<KpiError> for KpiErrorDto {
    fn from(e: KpiError) -> Self {
        e.to_dto()
    }
}

/// Ошибка адаптера источника данных
#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("entity '{0}' is not available")]
    UnknownEntity(String),

    #[error("unsupported field path '{0}'")]
    UnsupportedPath(String),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("cannot decode column '{column}': {message}")]
    Decode { column: String, message: String },
}
