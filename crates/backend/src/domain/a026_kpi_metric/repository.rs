use contracts::domain::a025_kpi_source::aggregate::{KpiFieldId, KpiSourceId};
use contracts::domain::a026_kpi_metric::aggregate::{Aggregation, KpiMetric, KpiMetricId, TimeWindow};
use contracts::domain::common::{AggregateId, BaseAggregate, OwnerId};
use sea_orm::entity::prelude::*;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};

use crate::domain::{metadata_from, to_json, LoadError, RowRef};

mod kpi_metric {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "a026_kpi_metric")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub owner_id: Option<String>,
        pub code: String,
        pub description: String,
        pub comment: Option<String>,
        pub is_template: bool,
        pub source_id: String,
        pub aggregation: String,
        pub value_field_id: Option<String>,
        pub date_field_id: Option<String>,
        pub time_window: String,
        pub custom_start: Option<chrono::NaiveDate>,
        pub custom_end: Option<chrono::NaiveDate>,
        pub compare_against_previous: bool,
        pub extra_config_json: String,
        pub sort_order: i32,
        pub filters_json: String,
        pub dimensions_json: String,
        pub is_deleted: bool,
        pub created_at: Option<chrono::DateTime<chrono::Utc>>,
        pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
        pub version: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

impl TryFrom<kpi_metric::Model> for KpiMetric {
    type Error = LoadError;

    fn try_from(m: kpi_metric::Model) -> Result<Self, Self::Error> {
        let row = RowRef::new("metric", &m.id);
        let aggregation = Aggregation::from_str(&m.aggregation)
            .map_err(|_| LoadError::UnknownAggregation(m.aggregation.clone()))?;
        let time_window = TimeWindow::from_str(&m.time_window)
            .map_err(|_| LoadError::UnknownTimeWindow(m.time_window.clone()))?;

        Ok(KpiMetric {
            base: BaseAggregate {
                id: KpiMetricId::new(row.uuid("id", &m.id)?),
                owner: row.owner(m.owner_id.as_deref())?,
                code: m.code,
                description: m.description,
                comment: m.comment,
                is_template: m.is_template,
                metadata: metadata_from(m.created_at, m.updated_at, m.is_deleted, m.version),
            },
            source: KpiSourceId::new(row.uuid("source_id", &m.source_id)?),
            aggregation,
            value_field: row
                .optional_uuid("value_field_id", m.value_field_id.as_deref())?
                .map(KpiFieldId::new),
            date_field: row
                .optional_uuid("date_field_id", m.date_field_id.as_deref())?
                .map(KpiFieldId::new),
            time_window,
            custom_start: m.custom_start,
            custom_end: m.custom_end,
            compare_against_previous: m.compare_against_previous,
            extra_config: row.json("extra_config_json", &m.extra_config_json)?,
            order: m.sort_order,
            filters: row.json("filters_json", &m.filters_json)?,
            dimensions: row.json("dimensions_json", &m.dimensions_json)?,
        })
    }
}

fn active_model(metric: &KpiMetric) -> kpi_metric::ActiveModel {
    let meta = &metric.base.metadata;
    kpi_metric::ActiveModel {
        id: Set(metric.base.id.as_string()),
        owner_id: Set(metric.base.owner.map(|o| o.as_string())),
        code: Set(metric.base.code.clone()),
        description: Set(metric.base.description.clone()),
        comment: Set(metric.base.comment.clone()),
        is_template: Set(metric.base.is_template),
        source_id: Set(metric.source.as_string()),
        aggregation: Set(metric.aggregation.as_str().to_string()),
        value_field_id: Set(metric.value_field.map(|f| f.as_string())),
        date_field_id: Set(metric.date_field.map(|f| f.as_string())),
        time_window: Set(metric.time_window.as_str().to_string()),
        custom_start: Set(metric.custom_start),
        custom_end: Set(metric.custom_end),
        compare_against_previous: Set(metric.compare_against_previous),
        extra_config_json: Set(to_json(&metric.extra_config, "{}")),
        sort_order: Set(metric.order),
        filters_json: Set(to_json(&metric.filters, "[]")),
        dimensions_json: Set(to_json(&metric.dimensions, "[]")),
        is_deleted: Set(meta.is_deleted),
        created_at: Set(Some(meta.created_at)),
        updated_at: Set(Some(meta.updated_at)),
        version: Set(meta.version),
    }
}

// ============================================================================
// Repository functions
// ============================================================================

/// Найти метрику по ID
pub async fn find_by_id(db: &DatabaseConnection, id: &KpiMetricId) -> Result<Option<KpiMetric>, LoadError> {
    kpi_metric::Entity::find_by_id(id.as_string())
        .one(db)
        .await?
        .map(KpiMetric::try_from)
        .transpose()
}

/// Найти метрику по коду в пределах владельца (`None` - шаблоны)
pub async fn find_by_code(
    db: &DatabaseConnection,
    owner: Option<&OwnerId>,
    code: &str,
) -> Result<Option<KpiMetric>, LoadError> {
    let query = kpi_metric::Entity::find()
        .filter(kpi_metric::Column::IsDeleted.eq(false))
        .filter(kpi_metric::Column::Code.eq(code));
    let query = match owner {
        Some(owner) => query.filter(kpi_metric::Column::OwnerId.eq(owner.as_string())),
        None => query.filter(kpi_metric::Column::OwnerId.is_null()),
    };
    query.one(db).await?.map(KpiMetric::try_from).transpose()
}

/// Вставить новую метрику
pub async fn insert(db: &DatabaseConnection, metric: &KpiMetric) -> Result<(), DbErr> {
    active_model(metric).insert(db).await?;
    Ok(())
}

/// Обновить метрику
pub async fn update(db: &DatabaseConnection, metric: &KpiMetric) -> Result<(), DbErr> {
    kpi_metric::Entity::update(active_model(metric)).exec(db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::data::db::memory_connection;
    use chrono::NaiveDate;
    use contracts::domain::a026_kpi_metric::aggregate::{FilterOperator, Granularity, MetricDimension, MetricFilter};
    use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
    use serde_json::json;

    fn sample(owner: OwnerId) -> KpiMetric {
        let mut metric = KpiMetric::new_for_insert(
            owner,
            "revenue".into(),
            "Revenue".into(),
            KpiSourceId::new_v4(),
            Aggregation::Sum,
        );
        metric.value_field = Some(KpiFieldId::new_v4());
        metric.date_field = Some(KpiFieldId::new_v4());
        metric.time_window = TimeWindow::Custom;
        metric.custom_start = NaiveDate::from_ymd_opt(2024, 1, 1);
        metric.custom_end = NaiveDate::from_ymd_opt(2024, 3, 31);
        metric.filters.push(
            MetricFilter::new(KpiFieldId::new_v4(), FilterOperator::In, Some(json!(["a", "b"]))).or(),
        );
        metric.dimensions.push(MetricDimension {
            field: KpiFieldId::new_v4(),
            granularity: Granularity::Week,
            limit: Some(5),
            order: 0,
        });
        metric
    }

    #[tokio::test]
    async fn test_metric_survives_storage() {
        let db = memory_connection().await;
        let owner = OwnerId::new_v4();
        let metric = sample(owner);
        insert(&db, &metric).await.unwrap();

        let loaded = find_by_id(&db, &metric.base.id).await.unwrap().unwrap();
        assert_eq!(loaded, metric_with_stored_metadata(&metric, &loaded));
        assert!(find_by_code(&db, Some(&owner), "revenue").await.unwrap().is_some());
        assert!(find_by_code(&db, Some(&OwnerId::new_v4()), "revenue").await.unwrap().is_none());
    }

    /// Временные метки проходят через текст, сравниваем всё остальное
    fn metric_with_stored_metadata(metric: &KpiMetric, loaded: &KpiMetric) -> KpiMetric {
        let mut expected = metric.clone();
        expected.base.metadata = loaded.base.metadata.clone();
        expected
    }

    #[tokio::test]
    async fn test_unknown_aggregation_is_reported() {
        let db = memory_connection().await;
        let metric = sample(OwnerId::new_v4());
        insert(&db, &metric).await.unwrap();
        db.execute(Statement::from_sql_and_values(
            DatabaseBackend::Sqlite,
            "UPDATE a026_kpi_metric SET aggregation = 'median' WHERE id = ?",
            [metric.base.id.as_string().into()],
        ))
        .await
        .unwrap();

        let err = find_by_id(&db, &metric.base.id).await.unwrap_err();
        assert!(matches!(err, LoadError::UnknownAggregation(ref s) if s == "median"));
    }
}
