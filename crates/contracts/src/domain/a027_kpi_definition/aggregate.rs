use crate::domain::a026_kpi_metric::aggregate::KpiMetricId;
use crate::domain::common::{AggregateRoot, BaseAggregate, EntityMetadata, OwnerId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

crate::uuid_id!(
    /// ID типа для агрегата KPI Definition
    KpiDefinitionId
);

/// Способ расчёта KPI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CalculationType {
    #[default]
    Metric,
    Formula,
}

impl CalculationType {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "metric" => Ok(CalculationType::Metric),
            "formula" => Ok(CalculationType::Formula),
            _ => Err(format!("Unknown calculation type: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CalculationType::Metric => "metric",
            CalculationType::Formula => "formula",
        }
    }
}

/// Формат отображения значения
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FormatType {
    #[default]
    Value,
    Currency,
    Percentage,
    Duration,
}

impl FormatType {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "value" => Ok(FormatType::Value),
            "currency" => Ok(FormatType::Currency),
            "percentage" => Ok(FormatType::Percentage),
            "duration" => Ok(FormatType::Duration),
            _ => Err(format!("Unknown format type: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatType::Value => "value",
            FormatType::Currency => "currency",
            FormatType::Percentage => "percentage",
            FormatType::Duration => "duration",
        }
    }
}

/// Компонент формулы: метрика под именем `alias`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionMetric {
    pub alias: String,
    pub metric: KpiMetricId,
    #[serde(default)]
    pub order: i32,
}

/// Агрегат KPI Definition
///
/// То, что видит дашборд: либо прямая метрика, либо формула над
/// метриками-компонентами.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiDefinition {
    #[serde(flatten)]
    pub base: BaseAggregate<KpiDefinitionId>,

    #[serde(default)]
    pub calculation_type: CalculationType,
    /// Только для `metric`
    pub metric: Option<KpiMetricId>,
    /// Только для `formula`
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub format_type: FormatType,
    /// Метрика сравнения (опционально)
    #[serde(default)]
    pub baseline_metric: Option<KpiMetricId>,
    #[serde(default)]
    pub extra_config: Map<String, Value>,
    #[serde(default)]
    pub components: Vec<DefinitionMetric>,
}

impl KpiDefinition {
    pub fn new_metric(owner: OwnerId, code: String, description: String, metric: KpiMetricId) -> Self {
        Self {
            base: BaseAggregate::new(KpiDefinitionId::new_v4(), Some(owner), code, description),
            calculation_type: CalculationType::Metric,
            metric: Some(metric),
            expression: None,
            format_type: FormatType::Value,
            baseline_metric: None,
            extra_config: Map::new(),
            components: vec![],
        }
    }

    pub fn new_formula(owner: OwnerId, code: String, description: String, expression: &str) -> Self {
        Self {
            base: BaseAggregate::new(KpiDefinitionId::new_v4(), Some(owner), code, description),
            calculation_type: CalculationType::Formula,
            metric: None,
            expression: Some(expression.to_string()),
            format_type: FormatType::Value,
            baseline_metric: None,
            extra_config: Map::new(),
            components: vec![],
        }
    }

    pub fn with_component(mut self, alias: &str, metric: KpiMetricId) -> Self {
        let order = self.components.len() as i32;
        self.components.push(DefinitionMetric {
            alias: alias.to_string(),
            metric,
            order,
        });
        self
    }

    /// Выражение без пробелов по краям; пустая строка считается отсутствием
    pub fn expression_text(&self) -> Option<&str> {
        self.expression
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    pub fn component(&self, alias: &str) -> Option<&DefinitionMetric> {
        self.components.iter().find(|c| c.alias == alias)
    }

    pub fn ordered_components(&self) -> Vec<&DefinitionMetric> {
        let mut components: Vec<&DefinitionMetric> = self.components.iter().collect();
        components.sort_by_key(|c| c.order);
        components
    }

    pub fn validate(&self) -> Result<(), String> {
        self.base.validate()
    }

    pub fn before_write(&mut self) {
        self.base.touch();
    }
}

impl AggregateRoot for KpiDefinition {
    type Id = KpiDefinitionId;

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
        "a027"
    }

    fn collection_name() -> &'static str {
        "kpi_definition"
    }

    fn element_name() -> &'static str {
        "Определение KPI"
    }
}
