//! Проверка согласованности конфигурации KPI.
//!
//! Один проход по графу "определение -> метрики -> источники" собирает
//! все нарушения сразу. Вычисление не начинается, пока список не пуст.

use std::collections::{HashMap, HashSet};

use contracts::domain::a025_kpi_source::aggregate::{FieldType, KpiFieldId, KpiSource};
use contracts::domain::a026_kpi_metric::aggregate::{
    Aggregation, FilterOperator, Granularity, KpiMetric, KpiMetricId, MetricDimension, TimeWindow,
    WindowSpec,
};
use contracts::domain::a027_kpi_definition::aggregate::{CalculationType, KpiDefinition};
use contracts::domain::a028_kpi_dashboard::aggregate::{KpiDashboard, KpiWidget};
use contracts::domain::common::OwnerId;
use contracts::shared::kpi::{ValidationReport, ViolationRule};
use serde_json::Value;

use super::error::KpiError;
use super::formula;
use super::schema_registry::SchemaRegistry;
use super::value::{normalize, utc};

/// Загруженная часть конфигурации, достаточная для проверки и вычисления
#[derive(Debug, Clone, Default)]
pub struct ConfigGraph {
    pub metrics: HashMap<KpiMetricId, KpiMetric>,
    pub sources: SchemaRegistry,
}

impl ConfigGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metric(mut self, metric: KpiMetric) -> Self {
        self.metrics.insert(metric.base.id, metric);
        self
    }

    pub fn with_source(mut self, source: KpiSource) -> Self {
        self.sources.register(source);
        self
    }

    pub fn metric(&self, id: &KpiMetricId) -> Option<&KpiMetric> {
        self.metrics.get(id)
    }
}

/// Превратить отчёт в ошибку, если в нём есть нарушения
pub fn ensure_valid(report: ValidationReport) -> Result<(), KpiError> {
    if report.is_valid() {
        Ok(())
    } else {
        Err(KpiError::InvalidConfiguration(report))
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Структурная проверка источника
pub fn check_source(source: &KpiSource) -> ValidationReport {
    let mut report = ValidationReport::new();
    source_rules(source, &mut report);
    report
}

/// Проверка метрики вместе с её источником
pub fn check_metric(metric: &KpiMetric, graph: &ConfigGraph) -> ValidationReport {
    let mut v = Validator::new(graph);
    v.metric(metric);
    v.report
}

/// Проверка определения (и виджета, если вычисление идёт через него)
pub fn check_definition(
    definition: &KpiDefinition,
    widget: Option<(&KpiWidget, &KpiDashboard)>,
    graph: &ConfigGraph,
) -> ValidationReport {
    let mut v = Validator::new(graph);
    v.definition(definition);
    if let Some((widget, dashboard)) = widget {
        v.widget(widget, dashboard, definition);
    }
    v.report
}

/// Проверка переопределений окна и разбивки при прямом вычислении метрики
pub fn check_metric_overrides(
    metric: &KpiMetric,
    window: Option<&WindowSpec>,
    dimension: Option<&MetricDimension>,
    graph: &ConfigGraph,
) -> ValidationReport {
    let mut v = Validator::new(graph);
    let Some(source) = graph.sources.get(&metric.source) else {
        return v.report;
    };
    if let Some(spec) = window {
        v.custom_range(spec, "window", "custom_start", "custom_end");
        v.override_needs_date(metric, spec.window, "window");
    }
    if let Some(dim) = dimension {
        v.dimension_field(dim, source, "dimension");
    }
    v.report
}

fn source_rules(source: &KpiSource, report: &mut ValidationReport) {
    let prefix = format!("source[{}]", source.base.code);
    let mut seen = HashSet::new();
    for (i, field) in source.fields.iter().enumerate() {
        if !seen.insert(field.path.as_str()) {
            report.push(
                format!("{}.fields[{}].path", prefix, i),
                ViolationRule::DuplicateFieldPath,
                format!("field path '{}' is declared more than once", field.path),
            );
        }
        if field.field_type != FieldType::Numeric && !field.allowed_aggregations.is_empty() {
            report.push(
                format!("{}.fields[{}].allowed_aggregations", prefix, i),
                ViolationRule::AggregationsOnNonNumericField,
                format!(
                    "{} field '{}' cannot declare aggregations",
                    field.field_type.as_str(),
                    field.path
                ),
            );
        }
    }
}

// ============================================================================
// Validator
// ============================================================================

struct Validator<'g> {
    graph: &'g ConfigGraph,
    report: ValidationReport,
    checked_metrics: HashSet<KpiMetricId>,
    checked_sources: HashSet<String>,
}

impl<'g> Validator<'g> {
    fn new(graph: &'g ConfigGraph) -> Self {
        Self {
            graph,
            report: ValidationReport::new(),
            checked_metrics: HashSet::new(),
            checked_sources: HashSet::new(),
        }
    }

    fn push(&mut self, path: String, rule: ViolationRule, message: String) {
        self.report.push(path, rule, message);
    }

    // ------------------------------------------------------------------
    // Metric
    // ------------------------------------------------------------------

    fn metric(&mut self, metric: &KpiMetric) {
        if !self.checked_metrics.insert(metric.base.id) {
            return;
        }
        let graph = self.graph;
        let prefix = format!("metric[{}]", metric.base.code);

        let Some(source) = graph.sources.get(&metric.source) else {
            self.push(
                format!("{}.source", prefix),
                ViolationRule::MissingReference,
                format!("source {} does not exist", metric.source),
            );
            return;
        };
        if self.checked_sources.insert(source.base.code.clone()) {
            source_rules(source, &mut self.report);
        }

        if let Some(source_owner) = source.base.owner {
            if metric.base.owner != Some(source_owner) {
                self.push(
                    format!("{}.source", prefix),
                    ViolationRule::SourceOwnerMismatch,
                    format!("source '{}' belongs to another owner", source.base.code),
                );
            }
        }

        self.aggregation(metric, source, &prefix);

        let spec = metric.window_spec();
        self.custom_range(&spec, &prefix, "custom_start", "custom_end");
        self.date_field(metric, source, &prefix);

        if metric.compare_against_previous && metric.time_window == TimeWindow::AllTime {
            self.push(
                format!("{}.compare_against_previous", prefix),
                ViolationRule::ComparisonUndefined,
                "comparison against the previous period is undefined for all_time".into(),
            );
        }

        for (i, filter) in metric.filters.iter().enumerate() {
            self.filter(
                &filter.field,
                filter.operator,
                filter.value.as_ref(),
                source,
                &format!("{}.filters[{}]", prefix, i),
            );
        }

        let mut seen = HashSet::new();
        for (i, dim) in metric.dimensions.iter().enumerate() {
            let path = format!("{}.dimensions[{}]", prefix, i);
            if !seen.insert((dim.field, dim.granularity)) {
                self.push(
                    path.clone(),
                    ViolationRule::DuplicateDimension,
                    "dimension with this field and granularity already exists".into(),
                );
            }
            self.dimension_field(dim, source, &path);
        }
    }

    fn aggregation(&mut self, metric: &KpiMetric, source: &KpiSource, prefix: &str) {
        let path = format!("{}.value_field", prefix);
        let field = match metric.value_field {
            Some(id) => match source.field(&id) {
                Some(field) => Some(field),
                None => {
                    self.not_in_source(path, &id, source);
                    return;
                }
            },
            None => None,
        };

        match (metric.aggregation, field) {
            (Aggregation::Count, Some(_)) => self.push(
                path,
                ViolationRule::CountForbidsValueField,
                "count does not take a value field".into(),
            ),
            (Aggregation::Count, None) => {}
            (agg, None) => self.push(
                path,
                ViolationRule::ValueFieldRequired,
                format!("{} requires a value field", agg.as_str()),
            ),
            (Aggregation::DistinctCount, Some(_)) => {}
            (agg, Some(field)) => {
                if field.field_type != FieldType::Numeric {
                    self.push(
                        path,
                        ViolationRule::ValueFieldNotNumeric,
                        format!("{} requires a numeric field, '{}' is {}", agg.as_str(), field.path, field.field_type.as_str()),
                    );
                } else if !field.allows(agg) {
                    self.push(
                        format!("{}.aggregation", prefix),
                        ViolationRule::AggregationNotAllowed,
                        format!("field '{}' does not allow {}", field.path, agg.as_str()),
                    );
                }
            }
        }
    }

    fn date_field(&mut self, metric: &KpiMetric, source: &KpiSource, prefix: &str) {
        let path = format!("{}.date_field", prefix);
        match metric.date_field {
            Some(id) => match source.field(&id) {
                None => self.not_in_source(path, &id, source),
                Some(field) if field.field_type != FieldType::Date => self.push(
                    path,
                    ViolationRule::DateFieldNotDate,
                    format!("date field '{}' is {}", field.path, field.field_type.as_str()),
                ),
                Some(_) => {}
            },
            None if metric.time_window != TimeWindow::AllTime => self.push(
                path,
                ViolationRule::DateFieldRequired,
                format!("window {} requires a date field", metric.time_window.as_str()),
            ),
            None => {}
        }
    }

    /// Связка `custom` и дат диапазона
    fn custom_range(&mut self, spec: &WindowSpec, prefix: &str, start_name: &str, end_name: &str) {
        let start_path = format!("{}.{}", prefix, start_name);
        let end_path = format!("{}.{}", prefix, end_name);
        if spec.window == TimeWindow::Custom {
            if spec.custom_start.is_none() {
                self.push(start_path, ViolationRule::CustomRangeRequired, "custom window requires a start date".into());
            }
            match (spec.custom_start, spec.custom_end) {
                (_, None) => self.push(
                    end_path,
                    ViolationRule::CustomRangeRequired,
                    "custom window requires an end date".into(),
                ),
                (Some(start), Some(end)) if start > end => self.push(
                    end_path,
                    ViolationRule::CustomRangeInverted,
                    format!("end date {} is before start date {}", end, start),
                ),
                _ => {}
            }
        } else {
            if spec.custom_start.is_some() {
                self.push(start_path, ViolationRule::CustomRangeForbidden, "custom dates are only allowed with the custom window".into());
            }
            if spec.custom_end.is_some() {
                self.push(end_path, ViolationRule::CustomRangeForbidden, "custom dates are only allowed with the custom window".into());
            }
        }
    }

    /// Ограниченное окно из переопределения требует поля даты у метрики
    fn override_needs_date(&mut self, metric: &KpiMetric, window: TimeWindow, path: &str) {
        if window != TimeWindow::AllTime && metric.date_field.is_none() {
            self.push(
                path.to_string(),
                ViolationRule::DateFieldRequired,
                format!(
                    "window {} requires metric '{}' to have a date field",
                    window.as_str(),
                    metric.base.code
                ),
            );
        }
    }

    fn filter(
        &mut self,
        field_id: &KpiFieldId,
        operator: FilterOperator,
        value: Option<&Value>,
        source: &KpiSource,
        prefix: &str,
    ) {
        let Some(field) = source.field(field_id) else {
            self.not_in_source(format!("{}.field", prefix), field_id, source);
            return;
        };
        let path = format!("{}.value", prefix);
        let value = value.filter(|v| !v.is_null());

        if !operator.takes_value() {
            if value.is_some() {
                self.push(path, ViolationRule::FilterValueForbidden, "null checks do not take a value".into());
            }
            return;
        }
        let Some(value) = value else {
            self.push(path, ViolationRule::FilterValueRequired, "a value is required".into());
            return;
        };

        match operator {
            FilterOperator::In | FilterOperator::NotIn => match value.as_array() {
                Some(items) => {
                    for item in items {
                        self.typed_value(item, field.field_type, &path);
                    }
                }
                None => self.push(path, ViolationRule::ListValueRequired, "expected a list of values".into()),
            },
            FilterOperator::Between => match value.as_array() {
                Some(items) if items.len() == 2 && items.iter().any(Value::is_null) => {
                    self.push(path, ViolationRule::BetweenNeedsTwoBounds, "between bounds cannot be null".into())
                }
                Some(items) if items.len() == 2 => {
                    for item in items {
                        self.typed_value(item, field.field_type, &path);
                    }
                }
                _ => self.push(path, ViolationRule::BetweenNeedsTwoBounds, "between expects exactly two bounds".into()),
            },
            FilterOperator::Contains
            | FilterOperator::Icontains
            | FilterOperator::StartsWith
            | FilterOperator::EndsWith => {
                if value.is_array() || value.is_object() {
                    self.push(path, ViolationRule::ValueTypeMismatch, "expected a text value".into());
                }
            }
            _ => self.typed_value(value, field.field_type, &path),
        }
    }

    fn typed_value(&mut self, value: &Value, field_type: FieldType, path: &str) {
        let result = if value.is_array() || value.is_object() {
            Err(format!("expected a single value, got {}", value))
        } else {
            normalize(value, field_type, utc()).map(|_| ())
        };
        if let Err(message) = result {
            self.push(path.to_string(), ViolationRule::ValueTypeMismatch, message);
        }
    }

    fn dimension_field(&mut self, dim: &MetricDimension, source: &KpiSource, prefix: &str) {
        let Some(field) = source.field(&dim.field) else {
            self.not_in_source(format!("{}.field", prefix), &dim.field, source);
            return;
        };
        let valid = match dim.granularity {
            Granularity::Exact => field.field_type != FieldType::Numeric,
            _ => field.field_type == FieldType::Date,
        };
        if !valid {
            let expected = if dim.granularity == Granularity::Exact {
                "a dimension, boolean or date field"
            } else {
                "a date field"
            };
            self.push(
                format!("{}.granularity", prefix),
                ViolationRule::DimensionFieldType,
                format!("granularity requires {}, '{}' is {}", expected, field.path, field.field_type.as_str()),
            );
        }
    }

    fn not_in_source(&mut self, path: String, id: &KpiFieldId, source: &KpiSource) {
        self.push(
            path,
            ViolationRule::FieldNotInSource,
            format!("field {} does not belong to source '{}'", id, source.base.code),
        );
    }

    // ------------------------------------------------------------------
    // Definition
    // ------------------------------------------------------------------

    fn definition(&mut self, def: &KpiDefinition) {
        let owner = def.base.owner;
        match def.calculation_type {
            CalculationType::Metric => {
                match def.metric {
                    Some(id) => self.referenced_metric(&id, owner, "definition.metric".into()),
                    None => self.push(
                        "definition.metric".into(),
                        ViolationRule::MetricRequired,
                        "metric definitions require a metric".into(),
                    ),
                }
                if def.expression_text().is_some() {
                    self.push(
                        "definition.expression".into(),
                        ViolationRule::ExpressionForbidden,
                        "metric definitions cannot have an expression".into(),
                    );
                }
                if !def.components.is_empty() {
                    self.push(
                        "definition.components".into(),
                        ViolationRule::ComponentsOnMetricDefinition,
                        "components are only valid on formula definitions".into(),
                    );
                }
            }
            CalculationType::Formula => {
                if def.metric.is_some() {
                    self.push(
                        "definition.metric".into(),
                        ViolationRule::MetricForbidden,
                        "formula definitions cannot reference a metric directly".into(),
                    );
                }

                let mut aliases = HashSet::new();
                for (i, component) in def.components.iter().enumerate() {
                    let path = format!("definition.components[{}]", i);
                    if !formula::is_valid_alias(&component.alias) {
                        self.push(
                            format!("{}.alias", path),
                            ViolationRule::InvalidAlias,
                            format!("'{}' is not a valid alias", component.alias),
                        );
                    } else if !aliases.insert(component.alias.as_str()) {
                        self.push(
                            format!("{}.alias", path),
                            ViolationRule::DuplicateAlias,
                            format!("alias '{}' is used more than once", component.alias),
                        );
                    }
                    self.referenced_metric(&component.metric, owner, format!("{}.metric", path));
                }

                match def.expression_text() {
                    None => self.push(
                        "definition.expression".into(),
                        ViolationRule::ExpressionRequired,
                        "formula definitions require an expression".into(),
                    ),
                    Some(text) => match formula::parse(text) {
                        Ok(expr) => {
                            for alias in expr.aliases() {
                                if !aliases.contains(alias) {
                                    self.push(
                                        "definition.expression".into(),
                                        ViolationRule::UnknownAlias,
                                        format!("expression references unknown alias '{}'", alias),
                                    );
                                }
                            }
                        }
                        Err(e) => self.push(
                            "definition.expression".into(),
                            ViolationRule::MalformedExpression,
                            e.to_string(),
                        ),
                    },
                }
            }
        }

        if let Some(baseline) = def.baseline_metric {
            self.referenced_metric(&baseline, owner, "definition.baseline_metric".into());
        }
    }

    fn referenced_metric(&mut self, id: &KpiMetricId, owner: Option<OwnerId>, path: String) {
        let graph = self.graph;
        match graph.metric(id) {
            None => self.push(
                path,
                ViolationRule::MissingReference,
                format!("metric {} does not exist", id),
            ),
            Some(metric) => {
                if metric.base.owner != owner {
                    self.push(
                        path,
                        ViolationRule::MetricOwnerMismatch,
                        format!("metric '{}' belongs to another owner", metric.base.code),
                    );
                }
                self.metric(metric);
            }
        }
    }

    // ------------------------------------------------------------------
    // Widget
    // ------------------------------------------------------------------

    fn widget(&mut self, widget: &KpiWidget, dashboard: &KpiDashboard, def: &KpiDefinition) {
        if def.base.owner != dashboard.base.owner {
            self.push(
                "widget.definition".into(),
                ViolationRule::WidgetOwnerMismatch,
                "definition and dashboard belong to different owners".into(),
            );
        }

        let spec = WindowSpec {
            window: widget.time_window_override.unwrap_or(TimeWindow::AllTime),
            custom_start: widget.custom_start_override,
            custom_end: widget.custom_end_override,
        };
        match widget.time_window_override {
            Some(window) => {
                self.custom_range(&spec, "widget", "custom_start_override", "custom_end_override");
                let graph = self.graph;
                for metric in target_metrics(def, graph) {
                    self.override_needs_date(metric, window, "widget.time_window_override");
                }
            }
            None => {
                // без переопределения даты диапазона запрещены
                self.custom_range(&spec, "widget", "custom_start_override", "custom_end_override");
            }
        }

        for (i, filter) in widget.filters.iter().enumerate() {
            let prefix = format!("widget.filters[{}]", i);
            let target = match (def.calculation_type, filter.alias()) {
                (CalculationType::Metric, None) => def.metric,
                (CalculationType::Metric, Some(_)) => {
                    self.push(
                        format!("{}.target_alias", prefix),
                        ViolationRule::TargetAliasForbidden,
                        "filters on metric definitions cannot target an alias".into(),
                    );
                    continue;
                }
                (CalculationType::Formula, None) => {
                    self.push(
                        format!("{}.target_alias", prefix),
                        ViolationRule::TargetAliasRequired,
                        "filters on formula definitions must target an alias".into(),
                    );
                    continue;
                }
                (CalculationType::Formula, Some(alias)) => match def.component(alias) {
                    Some(component) => Some(component.metric),
                    None => {
                        self.push(
                            format!("{}.target_alias", prefix),
                            ViolationRule::UnknownAlias,
                            format!("alias '{}' is not a component of the definition", alias),
                        );
                        continue;
                    }
                },
            };
            let graph = self.graph;
            let source = target
                .and_then(|id| graph.metric(&id))
                .and_then(|m| graph.sources.get(&m.source));
            if let Some(source) = source {
                self.filter(&filter.field, filter.operator, filter.value.as_ref(), source, &prefix);
            }
        }
    }
}

/// Метрики, к которым применяется окно виджета
fn target_metrics<'g>(def: &KpiDefinition, graph: &'g ConfigGraph) -> Vec<&'g KpiMetric> {
    let ids: Vec<KpiMetricId> = match def.calculation_type {
        CalculationType::Metric => def.metric.into_iter().collect(),
        CalculationType::Formula => def.components.iter().map(|c| c.metric).collect(),
    };
    ids.iter().filter_map(|id| graph.metric(id)).collect()
}
