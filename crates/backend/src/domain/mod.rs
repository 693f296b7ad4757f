pub mod a025_kpi_source;
pub mod a026_kpi_metric;
pub mod a027_kpi_definition;
pub mod a028_kpi_dashboard;

use chrono::{DateTime, Utc};
use contracts::domain::common::{BaseAggregate, EntityMetadata, OwnerId};
use contracts::shared::kpi::ValidationReport;
use sea_orm::DbErr;
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::shared::kpi_engine::KpiError;

/// Отказ при сохранении агрегата
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    /// Обязательные поля не заполнены или код уже занят
    #[error("{0}")]
    Rejected(String),
    #[error("configuration is invalid: {} violation(s)", .0.len())]
    Invalid(ValidationReport),
    #[error(transparent)]
    Engine(#[from] KpiError),
    #[error(transparent)]
    Db(#[from] DbErr),
}

// ============================================================================
// Write helpers shared by the services
// ============================================================================

pub(crate) fn reject_invalid(report: ValidationReport) -> Result<(), SaveError> {
    if report.is_valid() {
        Ok(())
    } else {
        tracing::warn!("Save refused: {} violation(s)", report.len());
        Err(SaveError::Invalid(report))
    }
}

/// Код уникален в пределах владельца
pub(crate) fn ensure_unique_code<Id: PartialEq>(
    base: &BaseAggregate<Id>,
    holder: Option<&BaseAggregate<Id>>,
) -> Result<(), SaveError> {
    match holder {
        Some(other) if other.id != base.id => Err(SaveError::Rejected(format!(
            "Код '{}' уже используется",
            base.code
        ))),
        _ => Ok(()),
    }
}

/// Подготовка к записи: перенос метаданных сохранённой версии.
/// Сменить владельца существующей записи нельзя.
pub(crate) fn prepare_write<Id>(
    base: &mut BaseAggregate<Id>,
    stored: Option<&BaseAggregate<Id>>,
) -> Result<(), SaveError> {
    match stored {
        Some(stored) if stored.owner != base.owner => Err(SaveError::Rejected(
            "Нельзя изменить владельца записи".into(),
        )),
        Some(stored) => {
            base.metadata = EntityMetadata {
                is_deleted: false,
                ..stored.metadata.clone()
            };
            base.touch();
            Ok(())
        }
        None => {
            base.metadata = EntityMetadata::new();
            base.touch();
            Ok(())
        }
    }
}

// ============================================================================
// Row helpers shared by the repositories
// ============================================================================

/// Ошибка чтения агрегата из БД.
/// Нечитаемые значения колонок не заменяются значениями по умолчанию.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Db(#[from] DbErr),
    #[error("{entity} {id}: column {column} cannot be decoded: {message}")]
    Unreadable {
        entity: &'static str,
        id: String,
        column: &'static str,
        message: String,
    },
    #[error("unknown aggregation '{0}'")]
    UnknownAggregation(String),
    #[error("unknown time window '{0}'")]
    UnknownTimeWindow(String),
}

impl From<LoadError> for SaveError {
    fn from(e: LoadError) -> Self {
        SaveError::Engine(e.into())
    }
}

/// Контекст строки: сущность и её id для сообщений об ошибках
#[derive(Debug, Clone, Copy)]
pub(crate) struct RowRef<'a> {
    pub entity: &'static str,
    pub id: &'a str,
}

impl<'a> RowRef<'a> {
    pub fn new(entity: &'static str, id: &'a str) -> Self {
        Self { entity, id }
    }

    pub fn unreadable(&self, column: &'static str, message: impl ToString) -> LoadError {
        tracing::warn!("Cannot decode {}.{} of {}", self.entity, column, self.id);
        LoadError::Unreadable {
            entity: self.entity,
            id: self.id.to_string(),
            column,
            message: message.to_string(),
        }
    }

    pub fn uuid(&self, column: &'static str, raw: &str) -> Result<Uuid, LoadError> {
        Uuid::parse_str(raw).map_err(|e| self.unreadable(column, e))
    }

    pub fn optional_uuid(&self, column: &'static str, raw: Option<&str>) -> Result<Option<Uuid>, LoadError> {
        raw.map(|s| self.uuid(column, s)).transpose()
    }

    pub fn owner(&self, raw: Option<&str>) -> Result<Option<OwnerId>, LoadError> {
        Ok(self.optional_uuid("owner_id", raw)?.map(OwnerId::new))
    }

    /// JSON-колонка с дочерними записями
    pub fn json<T: DeserializeOwned>(&self, column: &'static str, raw: &str) -> Result<T, LoadError> {
        serde_json::from_str(raw).map_err(|e| self.unreadable(column, e))
    }
}

pub(crate) fn metadata_from(
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    is_deleted: bool,
    version: i32,
) -> EntityMetadata {
    EntityMetadata {
        created_at: created_at.unwrap_or_else(Utc::now),
        updated_at: updated_at.unwrap_or_else(Utc::now),
        is_deleted,
        version,
    }
}

pub(crate) fn to_json<T: Serialize>(value: &T, empty: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| empty.to_string())
}
