use std::collections::HashSet;

use super::repository;
use contracts::domain::a028_kpi_dashboard::aggregate::{KpiDashboard, KpiDashboardId};
use contracts::shared::kpi::{ValidationReport, ViolationRule};
use sea_orm::DatabaseConnection;

use crate::domain::{ensure_unique_code, prepare_write, reject_invalid, SaveError};
use crate::shared::kpi_engine::engine::load_definition_graph;
use crate::shared::kpi_engine::{validator, ConfigStore, SqliteConfigStore};

/// Создание или обновление дашборда.
///
/// Каждый виджет проверяется так же, как при вычислении через него:
/// определение, переопределение окна и фильтры виджета.
pub async fn save(db: &DatabaseConnection, mut dashboard: KpiDashboard) -> Result<KpiDashboardId, SaveError> {
    if dashboard.base.id.is_nil() {
        dashboard.base.id = KpiDashboardId::new_v4();
    }
    dashboard.validate().map_err(SaveError::Rejected)?;

    let mut ids = HashSet::new();
    for widget in &dashboard.widgets {
        if !ids.insert(widget.id) {
            return Err(SaveError::Rejected(format!("Виджет {} указан дважды", widget.id)));
        }
        if let Some(other) = repository::find_by_widget(db, &widget.id).await? {
            if other.base.id != dashboard.base.id {
                return Err(SaveError::Rejected(format!(
                    "Виджет {} уже размещён на дашборде '{}'",
                    widget.id, other.base.code
                )));
            }
        }
    }

    reject_invalid(check_widgets(db, &dashboard).await?)?;

    let holder = repository::find_by_code(db, dashboard.base.owner.as_ref(), &dashboard.base.code).await?;
    ensure_unique_code(&dashboard.base, holder.as_ref().map(|d| &d.base))?;

    let stored = repository::find_by_id(db, &dashboard.base.id).await?;
    prepare_write(&mut dashboard.base, stored.as_ref().map(|d| &d.base))?;

    if stored.is_some() {
        repository::update(db, &dashboard).await?;
    } else {
        repository::insert(db, &dashboard).await?;
    }
    tracing::info!(
        "Saved KPI dashboard {} ({}), {} widget(s)",
        dashboard.base.code,
        dashboard.base.id,
        dashboard.widgets.len()
    );
    Ok(dashboard.base.id)
}

async fn check_widgets(db: &DatabaseConnection, dashboard: &KpiDashboard) -> Result<ValidationReport, SaveError> {
    let store = SqliteConfigStore::new(db.clone());
    let mut report = ValidationReport::new();

    for (i, widget) in dashboard.widgets.iter().enumerate() {
        let prefix = format!("widgets[{}]", i);
        let Some(definition) = store.definition(&widget.definition).await? else {
            report.push(
                format!("{}.definition", prefix),
                ViolationRule::MissingReference,
                format!("definition {} does not exist", widget.definition),
            );
            continue;
        };
        let graph = load_definition_graph(&store, &definition).await?;
        let found = validator::check_definition(&definition, Some((widget, dashboard)), &graph);
        for mut violation in found.violations {
            violation.path = format!("{}.{}", prefix, violation.path);
            report.violations.push(violation);
        }
    }
    Ok(report)
}

/// Получить дашборд; мягко удалённые не возвращаются
pub async fn get(db: &DatabaseConnection, id: &KpiDashboardId) -> anyhow::Result<Option<KpiDashboard>> {
    Ok(repository::find_by_id(db, id)
        .await?
        .filter(|d| !d.base.metadata.is_deleted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{a025_kpi_source, a026_kpi_metric, a027_kpi_definition};
    use crate::shared::data::db::memory_connection;
    use crate::shared::kpi_engine::testing::Orders;
    use contracts::domain::a026_kpi_metric::aggregate::{Aggregation, TimeWindow};
    use contracts::domain::a027_kpi_definition::aggregate::{KpiDefinition, KpiDefinitionId};
    use contracts::domain::a028_kpi_dashboard::aggregate::KpiWidget;
    use contracts::domain::common::OwnerId;

    async fn definition(db: &DatabaseConnection, fx: &Orders) -> KpiDefinitionId {
        a025_kpi_source::service::save(db, fx.source.clone()).await.unwrap();
        let revenue = a026_kpi_metric::service::save(db, fx.metric("revenue", Aggregation::Sum))
            .await
            .unwrap();
        a027_kpi_definition::service::save(
            db,
            KpiDefinition::new_metric(fx.owner, "rev".into(), "Revenue".into(), revenue),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_widgets_are_validated_with_paths() {
        let db = memory_connection().await;
        let fx = Orders::new();
        let definition = definition(&db, &fx).await;

        let mut ok = KpiWidget::new(definition);
        ok.time_window_override = Some(TimeWindow::Today);
        let mut inverted = KpiWidget::new(definition);
        inverted.time_window_override = Some(TimeWindow::Custom);
        inverted.custom_start_override = chrono::NaiveDate::from_ymd_opt(2024, 5, 2);
        inverted.custom_end_override = chrono::NaiveDate::from_ymd_opt(2024, 5, 1);
        let dangling = KpiWidget::new(KpiDefinitionId::new_v4());

        let mut dashboard = KpiDashboard::new_for_insert(fx.owner, "main".into(), "Main".into());
        dashboard.widgets = vec![ok.clone(), inverted, dangling];
        match save(&db, dashboard.clone()).await.unwrap_err() {
            SaveError::Invalid(report) => {
                let paths: Vec<&str> = report.violations.iter().map(|v| v.path.as_str()).collect();
                assert_eq!(
                    paths,
                    vec!["widgets[1].widget.custom_end_override", "widgets[2].definition"]
                );
            }
            other => panic!("expected invalid, got {:?}", other),
        }

        dashboard.widgets = vec![ok];
        let id = save(&db, dashboard).await.unwrap();
        assert_eq!(get(&db, &id).await.unwrap().unwrap().widgets.len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_dashboard_cannot_host_the_definition() {
        let db = memory_connection().await;
        let fx = Orders::new();
        let definition = definition(&db, &fx).await;

        let mut dashboard = KpiDashboard::new_for_insert(OwnerId::new_v4(), "main".into(), "Main".into());
        dashboard.widgets.push(KpiWidget::new(definition));
        match save(&db, dashboard).await.unwrap_err() {
            SaveError::Invalid(report) => assert!(report.has_rule(ViolationRule::WidgetOwnerMismatch)),
            other => panic!("expected invalid, got {:?}", other),
        }
    }
}
