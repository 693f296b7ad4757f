use crate::domain::a025_kpi_source::aggregate::KpiFieldId;
use crate::domain::a026_kpi_metric::aggregate::{Connector, FilterOperator, TimeWindow, WindowSpec};
use crate::domain::a027_kpi_definition::aggregate::KpiDefinitionId;
use crate::domain::common::{AggregateRoot, BaseAggregate, EntityMetadata, OwnerId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

crate::uuid_id!(
    /// ID типа для агрегата KPI Dashboard
    KpiDashboardId
);

crate::uuid_id!(
    /// ID виджета внутри дашборда
    KpiWidgetId
);

/// Фильтр уровня виджета
///
/// Для формулы `target_alias` указывает компонент, к метрике которого
/// применяется фильтр.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetFilter {
    pub field: KpiFieldId,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub connector: Connector,
    #[serde(default)]
    pub target_alias: Option<String>,
    #[serde(default)]
    pub order: i32,
}

impl WidgetFilter {
    /// Пустой alias равнозначен отсутствию
    pub fn alias(&self) -> Option<&str> {
        self.target_alias
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }
}

/// Виджет: привязка определения KPI к дашборду
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiWidget {
    pub id: KpiWidgetId,
    pub definition: KpiDefinitionId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub size: Map<String, Value>,
    #[serde(default)]
    pub position: Map<String, Value>,
    /// Переопределение окна метрики
    #[serde(default)]
    pub time_window_override: Option<TimeWindow>,
    #[serde(default)]
    pub custom_start_override: Option<NaiveDate>,
    #[serde(default)]
    pub custom_end_override: Option<NaiveDate>,
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default)]
    pub filters: Vec<WidgetFilter>,
}

impl KpiWidget {
    pub fn new(definition: KpiDefinitionId) -> Self {
        Self {
            id: KpiWidgetId::new_v4(),
            definition,
            title: String::new(),
            subtitle: String::new(),
            order: 0,
            size: Map::new(),
            position: Map::new(),
            time_window_override: None,
            custom_start_override: None,
            custom_end_override: None,
            options: Map::new(),
            filters: vec![],
        }
    }

    pub fn window_override(&self) -> Option<WindowSpec> {
        self.time_window_override.map(|window| WindowSpec {
            window,
            custom_start: self.custom_start_override,
            custom_end: self.custom_end_override,
        })
    }

    pub fn ordered_filters(&self) -> Vec<&WidgetFilter> {
        let mut filters: Vec<&WidgetFilter> = self.filters.iter().collect();
        filters.sort_by_key(|f| f.order);
        filters
    }
}

/// Агрегат KPI Dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiDashboard {
    #[serde(flatten)]
    pub base: BaseAggregate<KpiDashboardId>,

    /// Дашборд, открываемый по умолчанию
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub layout: Map<String, Value>,
    #[serde(default)]
    pub widgets: Vec<KpiWidget>,
}

impl KpiDashboard {
    pub fn new_for_insert(owner: OwnerId, slug: String, description: String) -> Self {
        Self {
            base: BaseAggregate::new(KpiDashboardId::new_v4(), Some(owner), slug, description),
            is_default: false,
            layout: Map::new(),
            widgets: vec![],
        }
    }

    pub fn widget(&self, id: &KpiWidgetId) -> Option<&KpiWidget> {
        self.widgets.iter().find(|w| &w.id == id)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.base.validate()
    }

    pub fn before_write(&mut self) {
        self.base.touch();
    }
}

impl AggregateRoot for KpiDashboard {
    type Id = KpiDashboardId;

    fn id(&self) -> Self::Id {
        self.base.id
    }

    fn owner(&self) -> Option<OwnerId> {
        self.base.owner
    }

    fn code(&self) -> &str {
        &self.base.code
    }

    fn metadata(&self) -> &EntityMetadata {
        &self.base.metadata
    }

    fn aggregate_index() -> &'static str {
        "a028"
    }

    fn collection_name() -> &'static str {
        "kpi_dashboard"
    }

    fn element_name() -> &'static str {
        "Дашборд KPI"
    }
}
