use super::repository;
use contracts::domain::a026_kpi_metric::aggregate::{KpiMetric, KpiMetricId};
use sea_orm::DatabaseConnection;

use crate::domain::{ensure_unique_code, prepare_write, reject_invalid, SaveError};
use crate::shared::kpi_engine::engine::load_metric_graph;
use crate::shared::kpi_engine::{validator, KpiError, SqliteConfigStore};

/// Создание или обновление метрики.
///
/// Метрика проверяется вместе со своим источником теми же правилами,
/// что и перед вычислением.
pub async fn save(db: &DatabaseConnection, mut metric: KpiMetric) -> Result<KpiMetricId, SaveError> {
    if metric.base.id.is_nil() {
        metric.base.id = KpiMetricId::new_v4();
    }
    metric.validate().map_err(SaveError::Rejected)?;

    let store = SqliteConfigStore::new(db.clone());
    let graph = load_metric_graph(&store, &metric).await?;
    reject_invalid(validator::check_metric(&metric, &graph))?;

    let holder = repository::find_by_code(db, metric.base.owner.as_ref(), &metric.base.code)
        .await
        .map_err(KpiError::from)?;
    ensure_unique_code(&metric.base, holder.as_ref().map(|m| &m.base))?;

    let stored = repository::find_by_id(db, &metric.base.id)
        .await
        .map_err(KpiError::from)?;
    prepare_write(&mut metric.base, stored.as_ref().map(|m| &m.base))?;

    if stored.is_some() {
        repository::update(db, &metric).await?;
    } else {
        repository::insert(db, &metric).await?;
    }
    tracing::info!("Saved KPI metric {} ({})", metric.base.code, metric.base.id);
    Ok(metric.base.id)
}

/// Получить метрику; мягко удалённые не возвращаются
pub async fn get(db: &DatabaseConnection, id: &KpiMetricId) -> anyhow::Result<Option<KpiMetric>> {
    Ok(repository::find_by_id(db, id)
        .await?
        .filter(|m| !m.base.metadata.is_deleted))
}
