use contracts::domain::a028_kpi_dashboard::aggregate::{KpiDashboard, KpiDashboardId, KpiWidgetId};
use contracts::domain::common::{AggregateId, BaseAggregate, OwnerId};
use sea_orm::entity::prelude::*;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};

use crate::domain::{metadata_from, to_json, LoadError, RowRef};

mod kpi_dashboard {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "a028_kpi_dashboard")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub owner_id: Option<String>,
        pub code: String,
        pub description: String,
        pub comment: Option<String>,
        pub is_template: bool,
        pub is_default: bool,
        pub layout_json: String,
        pub widgets_json: String,
        pub is_deleted: bool,
        pub created_at: Option<chrono::DateTime<chrono::Utc>>,
        pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
        pub version: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

impl TryFrom<kpi_dashboard::Model> for KpiDashboard {
    type Error = LoadError;

    fn try_from(m: kpi_dashboard::Model) -> Result<Self, Self::Error> {
        let row = RowRef::new("dashboard", &m.id);
        Ok(KpiDashboard {
            base: BaseAggregate {
                id: KpiDashboardId::new(row.uuid("id", &m.id)?),
                owner: row.owner(m.owner_id.as_deref())?,
                code: m.code,
                description: m.description,
                comment: m.comment,
                is_template: m.is_template,
                metadata: metadata_from(m.created_at, m.updated_at, m.is_deleted, m.version),
            },
            is_default: m.is_default,
            layout: row.json("layout_json", &m.layout_json)?,
            widgets: row.json("widgets_json", &m.widgets_json)?,
        })
    }
}

fn active_model(dashboard: &KpiDashboard) -> kpi_dashboard::ActiveModel {
    let meta = &dashboard.base.metadata;
    kpi_dashboard::ActiveModel {
        id: Set(dashboard.base.id.as_string()),
        owner_id: Set(dashboard.base.owner.map(|o| o.as_string())),
        code: Set(dashboard.base.code.clone()),
        description: Set(dashboard.base.description.clone()),
        comment: Set(dashboard.base.comment.clone()),
        is_template: Set(dashboard.base.is_template),
        is_default: Set(dashboard.is_default),
        layout_json: Set(to_json(&dashboard.layout, "{}")),
        widgets_json: Set(to_json(&dashboard.widgets, "[]")),
        is_deleted: Set(meta.is_deleted),
        created_at: Set(Some(meta.created_at)),
        updated_at: Set(Some(meta.updated_at)),
        version: Set(meta.version),
    }
}

// ============================================================================
// Repository functions
// ============================================================================

/// Найти дашборд по ID
pub async fn find_by_id(db: &DatabaseConnection, id: &KpiDashboardId) -> Result<Option<KpiDashboard>, LoadError> {
    kpi_dashboard::Entity::find_by_id(id.as_string())
        .one(db)
        .await?
        .map(KpiDashboard::try_from)
        .transpose()
}

/// Найти дашборд по коду (slug) в пределах владельца
pub async fn find_by_code(
    db: &DatabaseConnection,
    owner: Option<&OwnerId>,
    code: &str,
) -> Result<Option<KpiDashboard>, LoadError> {
    let query = kpi_dashboard::Entity::find()
        .filter(kpi_dashboard::Column::IsDeleted.eq(false))
        .filter(kpi_dashboard::Column::Code.eq(code));
    let query = match owner {
        Some(owner) => query.filter(kpi_dashboard::Column::OwnerId.eq(owner.as_string())),
        None => query.filter(kpi_dashboard::Column::OwnerId.is_null()),
    };
    query.one(db).await?.map(KpiDashboard::try_from).transpose()
}

/// Дашборд, на котором размещён виджет.
///
/// Виджеты хранятся в JSON-колонке: сначала отбор по подстроке ID,
/// затем точная проверка после разбора.
pub async fn find_by_widget(
    db: &DatabaseConnection,
    widget_id: &KpiWidgetId,
) -> Result<Option<KpiDashboard>, LoadError> {
    let models = kpi_dashboard::Entity::find()
        .filter(kpi_dashboard::Column::IsDeleted.eq(false))
        .filter(kpi_dashboard::Column::WidgetsJson.contains(widget_id.as_string()))
        .all(db)
        .await?;

    for model in models {
        let dashboard = KpiDashboard::try_from(model)?;
        if dashboard.widget(widget_id).is_some() {
            return Ok(Some(dashboard));
        }
    }
    Ok(None)
}

/// Вставить новый дашборд
pub async fn insert(db: &DatabaseConnection, dashboard: &KpiDashboard) -> Result<(), DbErr> {
    active_model(dashboard).insert(db).await?;
    Ok(())
}

/// Обновить дашборд
pub async fn update(db: &DatabaseConnection, dashboard: &KpiDashboard) -> Result<(), DbErr> {
    kpi_dashboard::Entity::update(active_model(dashboard)).exec(db).await?;
    Ok(())
}
