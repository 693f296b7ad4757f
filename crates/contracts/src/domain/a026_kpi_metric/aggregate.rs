use crate::domain::a025_kpi_source::aggregate::{KpiFieldId, KpiSourceId};
use crate::domain::common::{AggregateRoot, BaseAggregate, EntityMetadata, OwnerId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

crate::uuid_id!(
    /// ID типа для агрегата KPI Metric
    KpiMetricId
);

// ============================================================================
// Enumerations
// ============================================================================

/// Функция агрегации метрики
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Avg,
    Count,
    Max,
    Min,
    DistinctCount,
}

impl Aggregation {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "sum" => Ok(Aggregation::Sum),
            "avg" => Ok(Aggregation::Avg),
            "count" => Ok(Aggregation::Count),
            "max" => Ok(Aggregation::Max),
            "min" => Ok(Aggregation::Min),
            "distinct_count" => Ok(Aggregation::DistinctCount),
            _ => Err(format!("Unknown aggregation: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Count => "count",
            Aggregation::Max => "max",
            Aggregation::Min => "min",
            Aggregation::DistinctCount => "distinct_count",
        }
    }
}

/// Временное окно метрики
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    AllTime,
    Today,
    Yesterday,
    ThisWeek,
    #[serde(rename = "last_7_days")]
    Last7Days,
    #[default]
    ThisMonth,
    #[serde(rename = "last_30_days")]
    Last30Days,
    ThisYear,
    Custom,
}

impl TimeWindow {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "all_time" => Ok(TimeWindow::AllTime),
            "today" => Ok(TimeWindow::Today),
            "yesterday" => Ok(TimeWindow::Yesterday),
            "this_week" => Ok(TimeWindow::ThisWeek),
            "last_7_days" => Ok(TimeWindow::Last7Days),
            "this_month" => Ok(TimeWindow::ThisMonth),
            "last_30_days" => Ok(TimeWindow::Last30Days),
            "this_year" => Ok(TimeWindow::ThisYear),
            "custom" => Ok(TimeWindow::Custom),
            _ => Err(format!("Unknown time window: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::AllTime => "all_time",
            TimeWindow::Today => "today",
            TimeWindow::Yesterday => "yesterday",
            TimeWindow::ThisWeek => "this_week",
            TimeWindow::Last7Days => "last_7_days",
            TimeWindow::ThisMonth => "this_month",
            TimeWindow::Last30Days => "last_30_days",
            TimeWindow::ThisYear => "this_year",
            TimeWindow::Custom => "custom",
        }
    }
}

/// Оператор фильтра
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Between,
    Contains,
    Icontains,
    #[serde(rename = "startswith")]
    StartsWith,
    #[serde(rename = "endswith")]
    EndsWith,
    IsNull,
    IsNotNull,
}

impl FilterOperator {
    /// Операторы проверки на NULL не принимают значения
    pub fn takes_value(&self) -> bool {
        !matches!(self, FilterOperator::IsNull | FilterOperator::IsNotNull)
    }
}

/// Связка фильтра с предыдущим условием
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Connector {
    #[default]
    And,
    Or,
}

/// Гранулярность разбивки
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Exact,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

// ============================================================================
// Children
// ============================================================================

/// Фильтр метрики. Условия сворачиваются слева направо по `connector`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFilter {
    pub field: KpiFieldId,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub connector: Connector,
    #[serde(default)]
    pub order: i32,
}

impl MetricFilter {
    pub fn new(field: KpiFieldId, operator: FilterOperator, value: Option<Value>) -> Self {
        Self {
            field,
            operator,
            value,
            connector: Connector::And,
            order: 0,
        }
    }

    pub fn or(mut self) -> Self {
        self.connector = Connector::Or;
        self
    }
}

/// Разбивка метрики по полю
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDimension {
    pub field: KpiFieldId,
    #[serde(default)]
    pub granularity: Granularity,
    /// Top-N по значению
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub order: i32,
}

/// Окно вместе с датами пользовательского диапазона
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WindowSpec {
    pub window: TimeWindow,
    #[serde(default)]
    pub custom_start: Option<NaiveDate>,
    #[serde(default)]
    pub custom_end: Option<NaiveDate>,
}

impl WindowSpec {
    pub fn of(window: TimeWindow) -> Self {
        Self {
            window,
            custom_start: None,
            custom_end: None,
        }
    }

    pub fn custom(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            window: TimeWindow::Custom,
            custom_start: Some(start),
            custom_end: Some(end),
        }
    }
}

// ============================================================================
// Aggregate
// ============================================================================

/// Агрегат KPI Metric
///
/// Одна измеримая величина: агрегация поля источника с фильтрами,
/// временным окном и необязательной разбивкой.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiMetric {
    #[serde(flatten)]
    pub base: BaseAggregate<KpiMetricId>,

    pub source: KpiSourceId,
    pub aggregation: Aggregation,
    pub value_field: Option<KpiFieldId>,
    pub date_field: Option<KpiFieldId>,
    #[serde(default)]
    pub time_window: TimeWindow,
    #[serde(default)]
    pub custom_start: Option<NaiveDate>,
    #[serde(default)]
    pub custom_end: Option<NaiveDate>,
    /// Считать изменение относительно предыдущего периода
    #[serde(default)]
    pub compare_against_previous: bool,
    #[serde(default)]
    pub extra_config: Map<String, Value>,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub filters: Vec<MetricFilter>,
    #[serde(default)]
    pub dimensions: Vec<MetricDimension>,
}

impl KpiMetric {
    pub fn new_for_insert(
        owner: OwnerId,
        code: String,
        description: String,
        source: KpiSourceId,
        aggregation: Aggregation,
    ) -> Self {
        Self {
            base: BaseAggregate::new(KpiMetricId::new_v4(), Some(owner), code, description),
            source,
            aggregation,
            value_field: None,
            date_field: None,
            time_window: TimeWindow::AllTime,
            custom_start: None,
            custom_end: None,
            compare_against_previous: false,
            extra_config: Map::new(),
            order: 0,
            filters: vec![],
            dimensions: vec![],
        }
    }

    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec {
            window: self.time_window,
            custom_start: self.custom_start,
            custom_end: self.custom_end,
        }
    }

    /// Фильтры в порядке `order` (стабильно относительно порядка хранения)
    pub fn ordered_filters(&self) -> Vec<&MetricFilter> {
        let mut filters: Vec<&MetricFilter> = self.filters.iter().collect();
        filters.sort_by_key(|f| f.order);
        filters
    }

    /// Активная разбивка: измерение с наименьшим `order`
    pub fn primary_dimension(&self) -> Option<&MetricDimension> {
        self.dimensions.iter().min_by_key(|d| d.order)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.base.validate()
    }

    pub fn before_write(&mut self) {
        self.base.touch();
    }
}

impl AggregateRoot for KpiMetric {
    type Id = KpiMetricId;

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
        "a026"
    }

    fn collection_name() -> &'static str {
        "kpi_metric"
    }

    fn element_name() -> &'static str {
        "Метрика KPI"
    }
}
