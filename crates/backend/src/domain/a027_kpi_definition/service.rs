use super::repository;
use contracts::domain::a027_kpi_definition::aggregate::{KpiDefinition, KpiDefinitionId};
use sea_orm::DatabaseConnection;

use crate::domain::{ensure_unique_code, prepare_write, reject_invalid, SaveError};
use crate::shared::kpi_engine::engine::load_definition_graph;
use crate::shared::kpi_engine::{validator, SqliteConfigStore};

/// Создание или обновление определения KPI
pub async fn save(db: &DatabaseConnection, mut definition: KpiDefinition) -> Result<KpiDefinitionId, SaveError> {
    if definition.base.id.is_nil() {
        definition.base.id = KpiDefinitionId::new_v4();
    }
    definition.validate().map_err(SaveError::Rejected)?;

    let store = SqliteConfigStore::new(db.clone());
    let graph = load_definition_graph(&store, &definition).await?;
    reject_invalid(validator::check_definition(&definition, None, &graph))?;

    let holder = repository::find_by_code(db, definition.base.owner.as_ref(), &definition.base.code).await?;
    ensure_unique_code(&definition.base, holder.as_ref().map(|d| &d.base))?;

    let stored = repository::find_by_id(db, &definition.base.id).await?;
    prepare_write(&mut definition.base, stored.as_ref().map(|d| &d.base))?;

    if stored.is_some() {
        repository::update(db, &definition).await?;
    } else {
        repository::insert(db, &definition).await?;
    }
    tracing::info!(
        "Saved KPI definition {} ({})",
        definition.base.code,
        definition.base.id
    );
    Ok(definition.base.id)
}

/// Получить определение; мягко удалённые не возвращаются
pub async fn get(db: &DatabaseConnection, id: &KpiDefinitionId) -> anyhow::Result<Option<KpiDefinition>> {
    Ok(repository::find_by_id(db, id)
        .await?
        .filter(|d| !d.base.metadata.is_deleted))
}
