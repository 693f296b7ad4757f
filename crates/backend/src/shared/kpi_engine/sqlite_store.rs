//! [`ConfigStore`] поверх sea-orm репозиториев a025-a028.

use async_trait::async_trait;
use contracts::domain::a025_kpi_source::aggregate::{KpiSource, KpiSourceId};
use contracts::domain::a026_kpi_metric::aggregate::{KpiMetric, KpiMetricId};
use contracts::domain::a027_kpi_definition::aggregate::{KpiDefinition, KpiDefinitionId};
use contracts::domain::a028_kpi_dashboard::aggregate::{KpiDashboard, KpiWidgetId};
use contracts::domain::common::AggregateRoot;
use contracts::shared::kpi::{ValidationReport, ViolationRule};
use sea_orm::{DatabaseConnection, DbErr};

use super::config_store::ConfigStore;
use super::error::KpiError;
use crate::domain::{a025_kpi_source, a026_kpi_metric, a027_kpi_definition, a028_kpi_dashboard, LoadError};

#[derive(Clone)]
pub struct SqliteConfigStore {
    db: DatabaseConnection,
}

impl SqliteConfigStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn store_error(e: DbErr) -> KpiError {
    tracing::warn!("KPI config store failed: {}", e);
    KpiError::StoreUnavailable(e.to_string())
}

/// Испорченная запись конфигурации - ошибка конфигурации, а не пустое значение
impl From<LoadError> for KpiError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::Db(e) => store_error(e),
            LoadError::UnknownAggregation(s) => KpiError::UnknownAggregation(s),
            LoadError::UnknownTimeWindow(s) => {
                KpiError::InvalidWindowConfig(format!("unknown time window '{}'", s))
            }
            LoadError::Unreadable {
                entity,
                id,
                column,
                message,
            } => {
                let mut report = ValidationReport::new();
                report.push(
                    format!("{}.{}", entity, column),
                    ViolationRule::UnreadableRecord,
                    format!("{} {}: {}", entity, id, message),
                );
                KpiError::InvalidConfiguration(report)
            }
        }
    }
}

/// Мягко удалённые записи для движка не существуют
fn live<T: AggregateRoot>(record: Option<T>) -> Option<T> {
    record.filter(|r| !r.metadata().is_deleted)
}

#[async_trait]
impl ConfigStore for SqliteConfigStore {
    async fn source(&self, id: &KpiSourceId) -> Result<Option<KpiSource>, KpiError> {
        Ok(live(a025_kpi_source::repository::find_by_id(&self.db, id).await?))
    }

    async fn metric(&self, id: &KpiMetricId) -> Result<Option<KpiMetric>, KpiError> {
        Ok(live(a026_kpi_metric::repository::find_by_id(&self.db, id).await?))
    }

    async fn definition(&self, id: &KpiDefinitionId) -> Result<Option<KpiDefinition>, KpiError> {
        Ok(live(a027_kpi_definition::repository::find_by_id(&self.db, id).await?))
    }

    async fn dashboard_for_widget(&self, id: &KpiWidgetId) -> Result<Option<KpiDashboard>, KpiError> {
        Ok(a028_kpi_dashboard::repository::find_by_widget(&self.db, id).await?)
    }
}
