use contracts::domain::a025_kpi_source::aggregate::{KpiSource, KpiSourceId};
use contracts::domain::common::{AggregateId, BaseAggregate, OwnerId};
use sea_orm::entity::prelude::*;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};

use crate::domain::{metadata_from, to_json, LoadError, RowRef};

mod kpi_source {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "a025_kpi_source")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub owner_id: Option<String>,
        pub code: String,
        pub description: String,
        pub comment: Option<String>,
        pub is_template: bool,
        pub entity: String,
        pub default_date_field: Option<String>,
        pub base_filters_json: String,
        pub extra_config_json: String,
        pub fields_json: String,
        pub is_deleted: bool,
        pub created_at: Option<chrono::DateTime<chrono::Utc>>,
        pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
        pub version: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

impl TryFrom<kpi_source::Model> for KpiSource {
    type Error = LoadError;

    fn try_from(m: kpi_source::Model) -> Result<Self, Self::Error> {
        let row = RowRef::new("source", &m.id);
        Ok(KpiSource {
            base: BaseAggregate {
                id: KpiSourceId::new(row.uuid("id", &m.id)?),
                owner: row.owner(m.owner_id.as_deref())?,
                code: m.code,
                description: m.description,
                comment: m.comment,
                is_template: m.is_template,
                metadata: metadata_from(m.created_at, m.updated_at, m.is_deleted, m.version),
            },
            entity: m.entity,
            default_date_field: m.default_date_field,
            base_filters: row.json("base_filters_json", &m.base_filters_json)?,
            extra_config: row.json("extra_config_json", &m.extra_config_json)?,
            fields: row.json("fields_json", &m.fields_json)?,
        })
    }
}

fn active_model(source: &KpiSource) -> kpi_source::ActiveModel {
    let meta = &source.base.metadata;
    kpi_source::ActiveModel {
        id: Set(source.base.id.as_string()),
        owner_id: Set(source.base.owner.map(|o| o.as_string())),
        code: Set(source.base.code.clone()),
        description: Set(source.base.description.clone()),
        comment: Set(source.base.comment.clone()),
        is_template: Set(source.base.is_template),
        entity: Set(source.entity.clone()),
        default_date_field: Set(source.default_date_field.clone()),
        base_filters_json: Set(to_json(&source.base_filters, "{}")),
        extra_config_json: Set(to_json(&source.extra_config, "{}")),
        fields_json: Set(to_json(&source.fields, "[]")),
        is_deleted: Set(meta.is_deleted),
        created_at: Set(Some(meta.created_at)),
        updated_at: Set(Some(meta.updated_at)),
        version: Set(meta.version),
    }
}

// ============================================================================
// Repository functions
// ============================================================================

/// Найти источник по ID
pub async fn find_by_id(db: &DatabaseConnection, id: &KpiSourceId) -> Result<Option<KpiSource>, LoadError> {
    let model = kpi_source::Entity::find_by_id(id.as_string()).one(db).await?;
    model.map(KpiSource::try_from).transpose()
}

/// Найти источник по коду в пределах владельца (`None` - шаблоны)
pub async fn find_by_code(
    db: &DatabaseConnection,
    owner: Option<&OwnerId>,
    code: &str,
) -> Result<Option<KpiSource>, LoadError> {
    let query = kpi_source::Entity::find()
        .filter(kpi_source::Column::IsDeleted.eq(false))
        .filter(kpi_source::Column::Code.eq(code));
    let query = match owner {
        Some(owner) => query.filter(kpi_source::Column::OwnerId.eq(owner.as_string())),
        None => query.filter(kpi_source::Column::OwnerId.is_null()),
    };
    query.one(db).await?.map(KpiSource::try_from).transpose()
}

/// Вставить новый источник
pub async fn insert(db: &DatabaseConnection, source: &KpiSource) -> Result<(), DbErr> {
    active_model(source).insert(db).await?;
    Ok(())
}

/// Обновить источник
pub async fn update(db: &DatabaseConnection, source: &KpiSource) -> Result<(), DbErr> {
    kpi_source::Entity::update(active_model(source)).exec(db).await?;
    Ok(())
}
