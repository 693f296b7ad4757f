use contracts::domain::a026_kpi_metric::aggregate::KpiMetricId;
use contracts::domain::a027_kpi_definition::aggregate::{
    CalculationType, FormatType, KpiDefinition, KpiDefinitionId,
};
use contracts::domain::common::{AggregateId, BaseAggregate, OwnerId};
use sea_orm::entity::prelude::*;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};

use crate::domain::{metadata_from, to_json, LoadError, RowRef};

mod kpi_definition {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "a027_kpi_definition")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub owner_id: Option<String>,
        pub code: String,
        pub description: String,
        pub comment: Option<String>,
        pub is_template: bool,
        pub calculation_type: String,
        pub metric_id: Option<String>,
        pub expression: Option<String>,
        pub format_type: String,
        pub baseline_metric_id: Option<String>,
        pub extra_config_json: String,
        pub components_json: String,
        pub is_deleted: bool,
        pub created_at: Option<chrono::DateTime<chrono::Utc>>,
        pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
        pub version: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

impl TryFrom<kpi_definition::Model> for KpiDefinition {
    type Error = LoadError;

    fn try_from(m: kpi_definition::Model) -> Result<Self, Self::Error> {
        let row = RowRef::new("definition", &m.id);
        let calculation_type =
            CalculationType::from_str(&m.calculation_type).map_err(|e| row.unreadable("calculation_type", e))?;
        let format_type = FormatType::from_str(&m.format_type).map_err(|e| row.unreadable("format_type", e))?;

        Ok(KpiDefinition {
            base: BaseAggregate {
                id: KpiDefinitionId::new(row.uuid("id", &m.id)?),
                owner: row.owner(m.owner_id.as_deref())?,
                code: m.code,
                description: m.description,
                comment: m.comment,
                is_template: m.is_template,
                metadata: metadata_from(m.created_at, m.updated_at, m.is_deleted, m.version),
            },
            calculation_type,
            metric: row
                .optional_uuid("metric_id", m.metric_id.as_deref())?
                .map(KpiMetricId::new),
            expression: m.expression,
            format_type,
            baseline_metric: row
                .optional_uuid("baseline_metric_id", m.baseline_metric_id.as_deref())?
                .map(KpiMetricId::new),
            extra_config: row.json("extra_config_json", &m.extra_config_json)?,
            components: row.json("components_json", &m.components_json)?,
        })
    }
}

fn active_model(definition: &KpiDefinition) -> kpi_definition::ActiveModel {
    let meta = &definition.base.metadata;
    kpi_definition::ActiveModel {
        id: Set(definition.base.id.as_string()),
        owner_id: Set(definition.base.owner.map(|o| o.as_string())),
        code: Set(definition.base.code.clone()),
        description: Set(definition.base.description.clone()),
        comment: Set(definition.base.comment.clone()),
        is_template: Set(definition.base.is_template),
        calculation_type: Set(definition.calculation_type.as_str().to_string()),
        metric_id: Set(definition.metric.map(|m| m.as_string())),
        expression: Set(definition.expression.clone()),
        format_type: Set(definition.format_type.as_str().to_string()),
        baseline_metric_id: Set(definition.baseline_metric.map(|m| m.as_string())),
        extra_config_json: Set(to_json(&definition.extra_config, "{}")),
        components_json: Set(to_json(&definition.components, "[]")),
        is_deleted: Set(meta.is_deleted),
        created_at: Set(Some(meta.created_at)),
        updated_at: Set(Some(meta.updated_at)),
        version: Set(meta.version),
    }
}

// ============================================================================
// Repository functions
// ============================================================================

/// Найти определение по ID
pub async fn find_by_id(
    db: &DatabaseConnection,
    id: &KpiDefinitionId,
) -> Result<Option<KpiDefinition>, LoadError> {
    let model = kpi_definition::Entity::find_by_id(id.as_string()).one(db).await?;
    model.map(KpiDefinition::try_from).transpose()
}

/// Найти определение по коду в пределах владельца (`None` - шаблоны)
pub async fn find_by_code(
    db: &DatabaseConnection,
    owner: Option<&OwnerId>,
    code: &str,
) -> Result<Option<KpiDefinition>, LoadError> {
    let query = kpi_definition::Entity::find()
        .filter(kpi_definition::Column::IsDeleted.eq(false))
        .filter(kpi_definition::Column::Code.eq(code));
    let query = match owner {
        Some(owner) => query.filter(kpi_definition::Column::OwnerId.eq(owner.as_string())),
        None => query.filter(kpi_definition::Column::OwnerId.is_null()),
    };
    query.one(db).await?.map(KpiDefinition::try_from).transpose()
}

/// Вставить новое определение
pub async fn insert(db: &DatabaseConnection, definition: &KpiDefinition) -> Result<(), DbErr> {
    active_model(definition).insert(db).await?;
    Ok(())
}

/// Обновить определение
pub async fn update(db: &DatabaseConnection, definition: &KpiDefinition) -> Result<(), DbErr> {
    kpi_definition::Entity::update(active_model(definition)).exec(db).await?;
    Ok(())
}
