use super::repository;
use contracts::domain::a025_kpi_source::aggregate::{KpiSource, KpiSourceId};
use sea_orm::DatabaseConnection;

use crate::domain::{ensure_unique_code, prepare_write, reject_invalid, SaveError};
use crate::shared::kpi_engine::validator;

/// Создание или обновление источника KPI
pub async fn save(db: &DatabaseConnection, mut source: KpiSource) -> Result<KpiSourceId, SaveError> {
    if source.base.id.is_nil() {
        source.base.id = KpiSourceId::new_v4();
    }
    source.validate().map_err(SaveError::Rejected)?;
    reject_invalid(validator::check_source(&source))?;

    let holder = repository::find_by_code(db, source.base.owner.as_ref(), &source.base.code).await?;
    ensure_unique_code(&source.base, holder.as_ref().map(|s| &s.base))?;

    let stored = repository::find_by_id(db, &source.base.id).await?;
    prepare_write(&mut source.base, stored.as_ref().map(|s| &s.base))?;

    if stored.is_some() {
        repository::update(db, &source).await?;
    } else {
        repository::insert(db, &source).await?;
    }
    tracing::info!("Saved KPI source {} ({})", source.base.code, source.base.id);
    Ok(source.base.id)
}

/// Получить источник; мягко удалённые не возвращаются
pub async fn get(db: &DatabaseConnection, id: &KpiSourceId) -> anyhow::Result<Option<KpiSource>> {
    Ok(repository::find_by_id(db, id)
        .await?
        .filter(|s| !s.base.metadata.is_deleted))
}
