//! Точки входа движка: вычисление определения, виджета и метрики.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use contracts::domain::a025_kpi_source::aggregate::KpiSource;
use contracts::domain::a026_kpi_metric::aggregate::{KpiMetric, KpiMetricId, MetricDimension, WindowSpec};
use contracts::domain::a027_kpi_definition::aggregate::{CalculationType, FormatType, KpiDefinition, KpiDefinitionId};
use contracts::domain::a028_kpi_dashboard::aggregate::{KpiDashboard, KpiWidget, KpiWidgetId, WidgetFilter};
use contracts::domain::common::{AggregateRoot, OwnerId};
use contracts::shared::kpi::{
    EvaluationResult, ResolvedInterval, ScalarResult, SeriesResult, ValidationReport,
};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::{Map, Value};

use super::config_store::ConfigStore;
use super::data_source::DataSource;
use super::error::KpiError;
use super::filter_compiler::FilterClause;
use super::formula;
use super::metric_evaluator::{deltas, EngineSettings, MetricEvaluator, MetricOutcome, MetricRequest};
use super::time_window;
use super::validator::{self, ensure_valid, ConfigGraph};
use crate::shared::format::format_value;

pub struct KpiEngine {
    store: Arc<dyn ConfigStore>,
    data_source: Arc<dyn DataSource>,
    settings: EngineSettings,
}

impl KpiEngine {
    pub fn new(store: Arc<dyn ConfigStore>, data_source: Arc<dyn DataSource>, settings: EngineSettings) -> Self {
        Self {
            store,
            data_source,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// "Сейчас" по часам компании
    pub fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.settings.utc_offset).naive_local()
    }

    // ------------------------------------------------------------------
    // Definition
    // ------------------------------------------------------------------

    pub async fn evaluate_definition(
        &self,
        id: &KpiDefinitionId,
        owner: &OwnerId,
        at: NaiveDateTime,
        widget_id: Option<&KpiWidgetId>,
    ) -> Result<EvaluationResult, KpiError> {
        tracing::info!(definition = %id, owner = %owner, at = %at, widget = ?widget_id, "evaluating kpi definition");

        let definition = self.owned_definition(id, owner).await?;
        let widget = match widget_id {
            Some(widget_id) => {
                let (widget, dashboard) = self.widget_context(widget_id, owner).await?;
                if widget.definition != definition.base.id {
                    return Err(KpiError::NotFound {
                        entity: "widget",
                        id: widget_id.to_string(),
                    });
                }
                Some((widget, dashboard))
            }
            None => None,
        };

        let graph = load_definition_graph(self.store.as_ref(), &definition).await?;
        let report = validator::check_definition(
            &definition,
            widget.as_ref().map(|(w, d)| (w, d)),
            &graph,
        );
        refuse_if_invalid(report, "definition", &definition.base.code)?;

        let window = widget.as_ref().and_then(|(w, _)| w.window_override());
        let widget_filters: Vec<&WidgetFilter> = widget
            .as_ref()
            .map(|(w, _)| w.ordered_filters())
            .unwrap_or_default();
        let evaluator = MetricEvaluator::new(self.data_source.as_ref(), &self.settings);

        let outcome = match definition.calculation_type {
            CalculationType::Metric => {
                let metric_id = definition.metric.ok_or_else(|| KpiError::NotFound {
                    entity: "metric",
                    id: definition.base.code.clone(),
                })?;
                let (metric, source) = metric_and_source(&graph, &metric_id)?;
                let filters = widget_filters
                    .iter()
                    .filter(|f| f.alias().is_none())
                    .map(|f| FilterClause::from(*f))
                    .collect();
                let request = MetricRequest::new(metric, source, at)
                    .with_window(window)
                    .with_filters(filters);
                evaluator.evaluate(&request).await?
            }
            CalculationType::Formula => {
                self.evaluate_formula(&definition, &graph, at, window, &widget_filters)
                    .await?
            }
        };

        let baseline = match definition.baseline_metric {
            Some(baseline_id) => {
                let (metric, source) = metric_and_source(&graph, &baseline_id)?;
                let request = MetricRequest::new(metric, source, at).with_window(window).scalar();
                evaluator.evaluate(&request).await?.value()
            }
            None => None,
        };

        Ok(into_result(
            outcome,
            baseline,
            definition.format_type,
            &definition.extra_config,
        ))
    }

    /// Виджет вычисляется как его определение с переопределениями виджета
    pub async fn evaluate_widget(
        &self,
        widget_id: &KpiWidgetId,
        owner: &OwnerId,
        at: NaiveDateTime,
    ) -> Result<EvaluationResult, KpiError> {
        let (widget, _) = self.widget_context(widget_id, owner).await?;
        self.evaluate_definition(&widget.definition, owner, at, Some(widget_id))
            .await
    }

    /// Все нарушения конфигурации определения (без вычисления)
    pub async fn validate_definition(
        &self,
        id: &KpiDefinitionId,
        owner: &OwnerId,
    ) -> Result<ValidationReport, KpiError> {
        let definition = self.owned_definition(id, owner).await?;
        let graph = load_definition_graph(self.store.as_ref(), &definition).await?;
        Ok(validator::check_definition(&definition, None, &graph))
    }

    async fn evaluate_formula(
        &self,
        definition: &KpiDefinition,
        graph: &ConfigGraph,
        at: NaiveDateTime,
        window: Option<WindowSpec>,
        widget_filters: &[&WidgetFilter],
    ) -> Result<MetricOutcome, KpiError> {
        let text = definition
            .expression_text()
            .ok_or_else(|| KpiError::MalformedExpression("expression is empty".into()))?;
        let expr = formula::parse(text)?;

        // Каждый компонент владеет своими данными: future не заимствует граф
        let mut components = Vec::new();
        for component in definition.ordered_components() {
            let (metric, source) = metric_and_source(graph, &component.metric)?;
            let filters: Vec<FilterClause> = widget_filters
                .iter()
                .filter(|f| f.alias() == Some(component.alias.as_str()))
                .map(|f| FilterClause::from(*f))
                .collect();
            let alias = component.alias.clone();
            let (metric, source) = (metric.clone(), source.clone());
            let data_source = Arc::clone(&self.data_source);
            let settings = self.settings.clone();
            components.push(async move {
                let request = MetricRequest::new(&metric, &source, at)
                    .with_window(window)
                    .with_filters(filters)
                    .scalar();
                MetricEvaluator::new(data_source.as_ref(), &settings)
                    .evaluate(&request)
                    .await
                    .map(|outcome| (alias, outcome))
            });
        }

        // Первая ошибка прерывает вычисление, незавершённые запросы отбрасываются
        let outcomes: Vec<(String, MetricOutcome)> = stream::iter(components)
            .buffered(self.settings.max_parallel_components.max(1))
            .try_collect()
            .await?;

        let mut current = HashMap::new();
        let mut previous = HashMap::new();
        let mut windows: Vec<Option<ResolvedInterval>> = Vec::new();
        let mut compared = !outcomes.is_empty();
        for (alias, outcome) in outcomes {
            if let MetricOutcome::Scalar {
                value,
                previous: prev,
                window,
                previous_window,
            } = outcome
            {
                compared &= previous_window.is_some();
                current.insert(alias.clone(), value);
                previous.insert(alias, prev);
                windows.push(window);
            }
        }

        let value = expr.eval(&current)?;
        let previous_value = if compared { expr.eval(&previous)? } else { None };
        let window = match windows.split_first() {
            Some((first, rest)) if rest.iter().all(|w| w == first) => *first,
            _ => None,
        };

        Ok(MetricOutcome::Scalar {
            value,
            previous: previous_value,
            window,
            previous_window: window.filter(|_| compared).map(|w| time_window::previous(&w)),
        })
    }

    // ------------------------------------------------------------------
    // Metric
    // ------------------------------------------------------------------

    pub async fn evaluate_metric(
        &self,
        id: &KpiMetricId,
        owner: &OwnerId,
        at: NaiveDateTime,
        window: Option<WindowSpec>,
        dimension: Option<MetricDimension>,
    ) -> Result<EvaluationResult, KpiError> {
        tracing::info!(metric = %id, owner = %owner, at = %at, "evaluating kpi metric");

        let metric = match self.store.metric(id).await? {
            Some(metric) if metric.is_owned_by(owner) => metric,
            _ => {
                return Err(KpiError::NotFound {
                    entity: "metric",
                    id: id.to_string(),
                })
            }
        };

        let graph = load_metric_graph(self.store.as_ref(), &metric).await?;
        let mut report = validator::check_metric(&metric, &graph);
        report.extend(validator::check_metric_overrides(
            &metric,
            window.as_ref(),
            dimension.as_ref(),
            &graph,
        ));
        refuse_if_invalid(report, "metric", &metric.base.code)?;

        let (metric, source) = metric_and_source(&graph, id)?;
        let request = MetricRequest::new(metric, source, at)
            .with_window(window)
            .with_dimension(dimension.as_ref());
        let outcome = MetricEvaluator::new(self.data_source.as_ref(), &self.settings)
            .evaluate(&request)
            .await?;

        Ok(into_result(outcome, None, FormatType::Value, &metric.extra_config))
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    async fn owned_definition(&self, id: &KpiDefinitionId, owner: &OwnerId) -> Result<KpiDefinition, KpiError> {
        match self.store.definition(id).await? {
            Some(definition) if definition.is_owned_by(owner) => Ok(definition),
            _ => Err(KpiError::NotFound {
                entity: "definition",
                id: id.to_string(),
            }),
        }
    }

    async fn widget_context(
        &self,
        widget_id: &KpiWidgetId,
        owner: &OwnerId,
    ) -> Result<(KpiWidget, KpiDashboard), KpiError> {
        let not_found = || KpiError::NotFound {
            entity: "widget",
            id: widget_id.to_string(),
        };
        let dashboard = self
            .store
            .dashboard_for_widget(widget_id)
            .await?
            .filter(|d| d.is_owned_by(owner))
            .ok_or_else(not_found)?;
        let widget = dashboard.widget(widget_id).cloned().ok_or_else(not_found)?;
        Ok((widget, dashboard))
    }
}

fn refuse_if_invalid(report: ValidationReport, entity: &str, code: &str) -> Result<(), KpiError> {
    if !report.is_valid() {
        tracing::warn!(
            entity,
            code,
            violations = report.len(),
            "kpi evaluation refused: configuration is invalid"
        );
    }
    ensure_valid(report)
}

fn metric_and_source<'g>(
    graph: &'g ConfigGraph,
    id: &KpiMetricId,
) -> Result<(&'g KpiMetric, &'g KpiSource), KpiError> {
    let metric = graph.metric(id).ok_or_else(|| KpiError::NotFound {
        entity: "metric",
        id: id.to_string(),
    })?;
    let source = graph.sources.get(&metric.source).ok_or_else(|| KpiError::NotFound {
        entity: "source",
        id: metric.source.to_string(),
    })?;
    Ok((metric, source))
}

fn into_result(
    outcome: MetricOutcome,
    baseline: Option<f64>,
    format_type: FormatType,
    extra_config: &Map<String, Value>,
) -> EvaluationResult {
    match outcome {
        MetricOutcome::Scalar {
            value,
            previous,
            window,
            previous_window,
        } => {
            let (delta, delta_pct) = deltas(value, previous);
            EvaluationResult::Scalar(ScalarResult {
                value,
                previous_value: previous,
                delta,
                delta_pct,
                baseline_value: baseline,
                formatted_value: format_value(value, format_type, extra_config),
                window,
                previous_window,
            })
        }
        MetricOutcome::Series { series, window } => {
            EvaluationResult::Series(SeriesResult { series, window })
        }
    }
}

// ============================================================================
// Graph loading
// ============================================================================

/// Метрика и её источник. Отсутствующий источник не ошибка загрузки:
/// его найдёт валидатор.
pub async fn load_metric_graph(store: &dyn ConfigStore, metric: &KpiMetric) -> Result<ConfigGraph, KpiError> {
    let mut graph = ConfigGraph::new();
    add_metric(store, &mut graph, metric.clone()).await?;
    Ok(graph)
}

/// Метрика определения, компоненты формулы и baseline вместе с источниками
pub async fn load_definition_graph(
    store: &dyn ConfigStore,
    definition: &KpiDefinition,
) -> Result<ConfigGraph, KpiError> {
    let mut graph = ConfigGraph::new();
    let ids = definition
        .metric
        .into_iter()
        .chain(definition.components.iter().map(|c| c.metric))
        .chain(definition.baseline_metric);
    for id in ids {
        if graph.metrics.contains_key(&id) {
            continue;
        }
        if let Some(metric) = store.metric(&id).await? {
            add_metric(store, &mut graph, metric).await?;
        }
    }
    Ok(graph)
}

async fn add_metric(store: &dyn ConfigStore, graph: &mut ConfigGraph, metric: KpiMetric) -> Result<(), KpiError> {
    if !graph.sources.contains(&metric.source) {
        if let Some(source) = store.source(&metric.source).await? {
            graph.sources.register(source);
        }
    }
    graph.metrics.insert(metric.base.id, metric);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::kpi_engine::config_store::MemoryConfigStore;
    use crate::shared::kpi_engine::data_source::MemoryDataSource;
    use crate::shared::kpi_engine::testing::{at, rows, Orders};
    use crate::shared::kpi_engine::value::utc;
    use chrono::NaiveDate;
    use contracts::domain::a025_kpi_source::aggregate::{FieldType, KpiSourceField};
    use contracts::domain::a026_kpi_metric::aggregate::{
        Aggregation, Connector, FilterOperator, Granularity, TimeWindow,
    };
    use contracts::shared::kpi::ViolationRule;
    use serde_json::json;

    fn engine(store: MemoryConfigStore, data_source: MemoryDataSource) -> KpiEngine {
        KpiEngine::new(Arc::new(store), Arc::new(data_source), EngineSettings::default())
    }

    fn scalar(result: &EvaluationResult) -> &ScalarResult {
        match result.as_scalar() {
            Some(s) => s,
            None => panic!("expected scalar, got {:?}", result),
        }
    }

    fn violations(err: KpiError) -> ValidationReport {
        match err {
            KpiError::InvalidConfiguration(report) => report,
            other => panic!("expected invalid configuration, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_metric_definition_with_comparison_and_baseline() {
        let fx = Orders::new();
        let mut revenue = fx.metric("revenue", Aggregation::Sum);
        revenue.compare_against_previous = true;
        let orders = fx.metric("orders", Aggregation::Count);
        let mut definition =
            KpiDefinition::new_metric(fx.owner, "revenue".into(), "Revenue".into(), revenue.base.id);
        definition.format_type = FormatType::Currency;
        definition.baseline_metric = Some(orders.base.id);

        let store = MemoryConfigStore::new()
            .with_source(fx.source.clone())
            .with_metric(revenue)
            .with_metric(orders)
            .with_definition(definition.clone());
        let engine = engine(store, fx.data_source());

        let result = engine
            .evaluate_definition(&definition.base.id, &fx.owner, at(), None)
            .await
            .unwrap();
        let s = scalar(&result);
        assert_eq!(s.value, Some(120.0));
        assert_eq!(s.previous_value, Some(80.0));
        assert_eq!(s.delta, Some(40.0));
        assert_eq!(s.delta_pct, Some(50.0));
        assert_eq!(s.baseline_value, Some(3.0));
        assert_eq!(s.formatted_value, "$120.00");
        assert!(s.window.is_some() && s.previous_window.is_some());
    }

    #[tokio::test]
    async fn test_formula_over_components() {
        let fx = Orders::new();
        let revenue = fx.metric("revenue", Aggregation::Sum);
        let orders = fx.metric("orders", Aggregation::Count);
        let definition = KpiDefinition::new_formula(fx.owner, "avg_ticket".into(), "Avg ticket".into(), "rev / n")
            .with_component("rev", revenue.base.id)
            .with_component("n", orders.base.id);

        let store = MemoryConfigStore::new()
            .with_source(fx.source.clone())
            .with_metric(revenue)
            .with_metric(orders)
            .with_definition(definition.clone());
        let engine = engine(store, fx.data_source());

        let result = engine
            .evaluate_definition(&definition.base.id, &fx.owner, at(), None)
            .await
            .unwrap();
        assert_eq!(scalar(&result).value, Some(40.0));
        assert_eq!(scalar(&result).formatted_value, "40");
    }

    #[tokio::test]
    async fn test_formula_nulls_and_division_by_zero() {
        let fx = Orders::new();
        // январь 2023: строк нет
        let empty_window = |mut metric: KpiMetric| {
            metric.time_window = TimeWindow::Custom;
            metric.custom_start = NaiveDate::from_ymd_opt(2023, 1, 1);
            metric.custom_end = NaiveDate::from_ymd_opt(2023, 1, 31);
            metric
        };
        let avg = empty_window(fx.metric("avg", Aggregation::Avg));
        let empty_count = empty_window(fx.metric("empty", Aggregation::Count));
        let revenue = fx.metric("revenue", Aggregation::Sum);

        let with_null = KpiDefinition::new_formula(fx.owner, "f1".into(), "F1".into(), "a * 2 + r")
            .with_component("a", avg.base.id)
            .with_component("r", revenue.base.id);
        let by_zero = KpiDefinition::new_formula(fx.owner, "f2".into(), "F2".into(), "r / z")
            .with_component("r", revenue.base.id)
            .with_component("z", empty_count.base.id);

        let store = MemoryConfigStore::new()
            .with_source(fx.source.clone())
            .with_metric(avg)
            .with_metric(empty_count)
            .with_metric(revenue)
            .with_definition(with_null.clone())
            .with_definition(by_zero.clone());
        let engine = engine(store, fx.data_source());

        let result = engine
            .evaluate_definition(&with_null.base.id, &fx.owner, at(), None)
            .await
            .unwrap();
        assert_eq!(scalar(&result).value, None);
        assert_eq!(scalar(&result).formatted_value, "—");

        let result = engine
            .evaluate_definition(&by_zero.base.id, &fx.owner, at(), None)
            .await
            .unwrap();
        assert_eq!(scalar(&result).value, None);
    }

    #[tokio::test]
    async fn test_failing_component_aborts_formula() {
        let fx = Orders::new();
        let revenue = fx.metric("revenue", Aggregation::Sum);
        let offline = KpiSource::new_for_insert(Some(fx.owner), "offline".into(), "Offline".into(), "offline".into())
            .with_field(KpiSourceField::new("amount", "Amount", FieldType::Numeric));
        let mut broken = KpiMetric::new_for_insert(
            fx.owner,
            "broken".into(),
            "Broken".into(),
            offline.base.id,
            Aggregation::Sum,
        );
        broken.value_field = Some(offline.fields[0].id);

        let definition = KpiDefinition::new_formula(fx.owner, "sum".into(), "Sum".into(), "a + b")
            .with_component("a", revenue.base.id)
            .with_component("b", broken.base.id);
        let store = MemoryConfigStore::new()
            .with_source(fx.source.clone())
            .with_source(offline)
            .with_metric(revenue)
            .with_metric(broken)
            .with_definition(definition.clone());
        let engine = engine(store, fx.data_source());

        let err = engine
            .evaluate_definition(&definition.base.id, &fx.owner, at(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, KpiError::SourceUnavailable { ref source_code, .. } if source_code == "offline"));
    }

    #[tokio::test]
    async fn test_unavailable_source_aborts_series_and_sequential_formula() {
        let fx = Orders::new();
        let offline = KpiSource::new_for_insert(Some(fx.owner), "offline".into(), "Offline".into(), "offline".into())
            .with_field(KpiSourceField::new("amount", "Amount", FieldType::Numeric))
            .with_field(KpiSourceField::new("region", "Region", FieldType::Dimension));
        let mut by_region = KpiMetric::new_for_insert(
            fx.owner,
            "by_region".into(),
            "By region".into(),
            offline.base.id,
            Aggregation::Sum,
        );
        by_region.value_field = Some(offline.fields[0].id);
        by_region.dimensions.push(MetricDimension {
            field: offline.fields[1].id,
            granularity: Granularity::Exact,
            limit: None,
            order: 0,
        });
        let revenue = fx.metric("revenue", Aggregation::Sum);

        let series = KpiDefinition::new_metric(fx.owner, "regions".into(), "Regions".into(), by_region.base.id);
        let formula = KpiDefinition::new_formula(fx.owner, "f".into(), "F".into(), "b + r")
            .with_component("b", by_region.base.id)
            .with_component("r", revenue.base.id);
        let store = MemoryConfigStore::new()
            .with_source(fx.source.clone())
            .with_source(offline)
            .with_metric(by_region.clone())
            .with_metric(revenue)
            .with_definition(series.clone())
            .with_definition(formula.clone());
        let engine = KpiEngine::new(
            Arc::new(store),
            Arc::new(fx.data_source()),
            EngineSettings {
                max_parallel_components: 1,
                ..EngineSettings::default()
            },
        );
        let is_offline =
            |err: &KpiError| matches!(err, KpiError::SourceUnavailable { source_code, .. } if source_code == "offline");

        let err = engine
            .evaluate_definition(&series.base.id, &fx.owner, at(), None)
            .await
            .unwrap_err();
        assert!(is_offline(&err), "got {:?}", err);

        let err = engine
            .evaluate_metric(&by_region.base.id, &fx.owner, at(), None, None)
            .await
            .unwrap_err();
        assert!(is_offline(&err), "got {:?}", err);

        let err = engine
            .evaluate_definition(&formula.base.id, &fx.owner, at(), None)
            .await
            .unwrap_err();
        assert!(is_offline(&err), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_invalid_configuration_is_refused() {
        let fx = Orders::new();
        let mut metric = fx.metric("revenue", Aggregation::Sum);
        metric.time_window = TimeWindow::Custom;
        metric.custom_start = NaiveDate::from_ymd_opt(2024, 1, 10);
        metric.custom_end = NaiveDate::from_ymd_opt(2024, 1, 5);
        let definition = KpiDefinition::new_metric(fx.owner, "rev".into(), "Rev".into(), metric.base.id);

        let store = MemoryConfigStore::new()
            .with_source(fx.source.clone())
            .with_metric(metric.clone())
            .with_definition(definition.clone());
        let engine = engine(store, fx.data_source());

        let report = violations(
            engine
                .evaluate_definition(&definition.base.id, &fx.owner, at(), None)
                .await
                .unwrap_err(),
        );
        assert!(report.has_rule(ViolationRule::CustomRangeInverted));
        assert!(report.violations.iter().any(|v| v.path.ends_with("custom_end")));

        let report = violations(
            engine
                .evaluate_metric(&metric.base.id, &fx.owner, at(), None, None)
                .await
                .unwrap_err(),
        );
        assert!(report.has_rule(ViolationRule::CustomRangeInverted));

        let report = engine
            .validate_definition(&definition.base.id, &fx.owner)
            .await
            .unwrap();
        assert_eq!(report.len(), 1);
    }

    #[tokio::test]
    async fn test_other_tenant_sees_nothing() {
        let fx = Orders::new();
        let metric = fx.metric("revenue", Aggregation::Sum);
        let definition = KpiDefinition::new_metric(fx.owner, "rev".into(), "Rev".into(), metric.base.id);
        let store = MemoryConfigStore::new()
            .with_source(fx.source.clone())
            .with_metric(metric.clone())
            .with_definition(definition.clone());
        let engine = engine(store, fx.data_source());
        let stranger = OwnerId::new_v4();

        let err = engine
            .evaluate_definition(&definition.base.id, &stranger, at(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, KpiError::NotFound { entity: "definition", .. }));

        let err = engine
            .evaluate_metric(&metric.base.id, &stranger, at(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, KpiError::NotFound { entity: "metric", .. }));
    }

    #[tokio::test]
    async fn test_widget_overrides_window_and_filters() {
        let fx = Orders::new();
        let revenue = fx.metric("revenue", Aggregation::Sum);
        let definition = KpiDefinition::new_metric(fx.owner, "rev".into(), "Rev".into(), revenue.base.id);

        let mut widget = KpiWidget::new(definition.base.id);
        widget.time_window_override = Some(TimeWindow::Custom);
        widget.custom_start_override = NaiveDate::from_ymd_opt(2024, 2, 1);
        widget.custom_end_override = NaiveDate::from_ymd_opt(2024, 2, 29);
        widget.filters.push(WidgetFilter {
            field: fx.field("client"),
            operator: FilterOperator::Eq,
            value: Some(json!("acme")),
            connector: Connector::And,
            target_alias: None,
            order: 0,
        });
        let widget_id = widget.id;
        let mut dashboard = KpiDashboard::new_for_insert(fx.owner, "main".into(), "Main".into());
        dashboard.widgets.push(widget);

        let store = MemoryConfigStore::new()
            .with_source(fx.source.clone())
            .with_metric(revenue)
            .with_definition(definition)
            .with_dashboard(dashboard);
        let engine = engine(store, fx.data_source());

        let result = engine.evaluate_widget(&widget_id, &fx.owner, at()).await.unwrap();
        // февраль: acme 50, globex 30
        assert_eq!(scalar(&result).value, Some(50.0));
    }

    #[tokio::test]
    async fn test_formula_widget_filter_targets() {
        let fx = Orders::new();
        let revenue = fx.metric("revenue", Aggregation::Sum);
        let definition = KpiDefinition::new_formula(fx.owner, "f".into(), "F".into(), "r * 2")
            .with_component("r", revenue.base.id);

        let filter = |alias: Option<&str>| WidgetFilter {
            field: fx.field("client"),
            operator: FilterOperator::Eq,
            value: Some(json!("initech")),
            connector: Connector::And,
            target_alias: alias.map(str::to_string),
            order: 0,
        };
        let mut untargeted = KpiWidget::new(definition.base.id);
        untargeted.filters.push(filter(None));
        let mut unknown = KpiWidget::new(definition.base.id);
        unknown.filters.push(filter(Some("ghost")));
        let mut targeted = KpiWidget::new(definition.base.id);
        targeted.filters.push(filter(Some("r")));
        let ids = (untargeted.id, unknown.id, targeted.id);

        let mut dashboard = KpiDashboard::new_for_insert(fx.owner, "main".into(), "Main".into());
        dashboard.widgets = vec![untargeted, unknown, targeted];
        let store = MemoryConfigStore::new()
            .with_source(fx.source.clone())
            .with_metric(revenue)
            .with_definition(definition)
            .with_dashboard(dashboard);
        let engine = engine(store, fx.data_source());

        let report = violations(engine.evaluate_widget(&ids.0, &fx.owner, at()).await.unwrap_err());
        assert!(report.has_rule(ViolationRule::TargetAliasRequired));

        let report = violations(engine.evaluate_widget(&ids.1, &fx.owner, at()).await.unwrap_err());
        assert!(report.has_rule(ViolationRule::UnknownAlias));

        let result = engine.evaluate_widget(&ids.2, &fx.owner, at()).await.unwrap();
        assert_eq!(scalar(&result).value, Some(120.0));
    }

    #[tokio::test]
    async fn test_metric_dimension_override_returns_series() {
        let fx = Orders::new();
        let mut revenue = fx.metric("revenue", Aggregation::Sum);
        revenue.time_window = TimeWindow::AllTime;
        let store = MemoryConfigStore::new()
            .with_source(fx.source.clone())
            .with_metric(revenue.clone());
        let engine = engine(store, fx.data_source());

        let by_month = MetricDimension {
            field: fx.field("created_at"),
            granularity: Granularity::Month,
            limit: None,
            order: 0,
        };
        let result = engine
            .evaluate_metric(&revenue.base.id, &fx.owner, at(), None, Some(by_month))
            .await
            .unwrap();
        let series = result.as_series().unwrap();
        let keys: Vec<&str> = series.series.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["2024-01", "2024-02", "2024-03"]);
        assert_eq!(series.series[1].value, Some(80.0));

        let numeric_exact = MetricDimension {
            field: fx.field("total"),
            granularity: Granularity::Exact,
            limit: None,
            order: 0,
        };
        let report = violations(
            engine
                .evaluate_metric(&revenue.base.id, &fx.owner, at(), None, Some(numeric_exact))
                .await
                .unwrap_err(),
        );
        assert!(report.has_rule(ViolationRule::DimensionFieldType));
    }

    #[tokio::test]
    async fn test_repeated_evaluation_is_identical() {
        let fx = Orders::new();
        let mut revenue = fx.metric("revenue", Aggregation::Sum);
        revenue.compare_against_previous = true;
        let orders = fx.metric("orders", Aggregation::Count);
        let definition = KpiDefinition::new_formula(fx.owner, "f".into(), "F".into(), "(rev - 20) / n")
            .with_component("rev", revenue.base.id)
            .with_component("n", orders.base.id);
        let store = MemoryConfigStore::new()
            .with_source(fx.source.clone())
            .with_metric(revenue)
            .with_metric(orders)
            .with_definition(definition.clone());
        let engine = KpiEngine::new(
            Arc::new(store),
            Arc::new(MemoryDataSource::new(utc()).with_entity("orders", rows())),
            EngineSettings {
                max_parallel_components: 1,
                ..EngineSettings::default()
            },
        );

        let first = engine
            .evaluate_definition(&definition.base.id, &fx.owner, at(), None)
            .await
            .unwrap();
        let second = engine
            .evaluate_definition(&definition.base.id, &fx.owner, at(), None)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(
            scalar(&first).value.map(f64::to_bits),
            scalar(&second).value.map(f64::to_bits)
        );
        // только одна компонента сравнивается, поэтому предыдущего значения нет
        assert_eq!(scalar(&first).previous_value, None);
    }
}
