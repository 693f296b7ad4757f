//! Вычисление одной метрики: окно, предикат, запрос к источнику, агрегация.

use std::time::Duration;

use chrono::{FixedOffset, NaiveDateTime};
use contracts::domain::a025_kpi_source::aggregate::KpiSource;
use contracts::domain::a026_kpi_metric::aggregate::{Aggregation, KpiMetric, MetricDimension, WindowSpec};
use contracts::shared::kpi::{ResolvedInterval, SeriesPoint};

use super::aggregation::aggregate;
use super::data_source::{DataQuery, DataSource, Row};
use super::dimension::DimensionSpec;
use super::error::KpiError;
use super::filter_compiler::{compile_base_filters, compile_filters, date_range, FilterClause, Predicate};
use super::schema_registry::{FieldRef, SourceSchema};
use super::time_window;
use super::value::utc;

/// Параметры движка из секции `[engine]`
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Смещение часового пояса компании
    pub utc_offset: FixedOffset,
    pub query_timeout: Duration,
    pub max_parallel_components: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            utc_offset: utc(),
            query_timeout: Duration::from_millis(5000),
            max_parallel_components: 4,
        }
    }
}

/// Что именно вычислить для метрики
#[derive(Debug, Clone)]
pub struct MetricRequest<'a> {
    pub metric: &'a KpiMetric,
    pub source: &'a KpiSource,
    pub at: NaiveDateTime,
    /// Переопределение окна (виджет или прямой запрос)
    pub window: Option<WindowSpec>,
    /// Переопределение разбивки
    pub dimension: Option<&'a MetricDimension>,
    /// Условия виджета, дописываемые после фильтров метрики
    pub extra_filters: Vec<FilterClause>,
    /// Компонент формулы или baseline: разбивка игнорируется
    pub scalar_only: bool,
}

impl<'a> MetricRequest<'a> {
    pub fn new(metric: &'a KpiMetric, source: &'a KpiSource, at: NaiveDateTime) -> Self {
        Self {
            metric,
            source,
            at,
            window: None,
            dimension: None,
            extra_filters: vec![],
            scalar_only: false,
        }
    }

    pub fn scalar(mut self) -> Self {
        self.scalar_only = true;
        self
    }

    pub fn with_window(mut self, window: Option<WindowSpec>) -> Self {
        self.window = window;
        self
    }

    pub fn with_dimension(mut self, dimension: Option<&'a MetricDimension>) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_filters(mut self, filters: Vec<FilterClause>) -> Self {
        self.extra_filters = filters;
        self
    }
}

/// Результат метрики до форматирования
#[derive(Debug, Clone, PartialEq)]
pub enum MetricOutcome {
    Scalar {
        value: Option<f64>,
        previous: Option<f64>,
        window: Option<ResolvedInterval>,
        previous_window: Option<ResolvedInterval>,
    },
    Series {
        series: Vec<SeriesPoint>,
        window: Option<ResolvedInterval>,
    },
}

impl MetricOutcome {
    pub fn value(&self) -> Option<f64> {
        match self {
            MetricOutcome::Scalar { value, .. } => *value,
            MetricOutcome::Series { .. } => None,
        }
    }
}

/// Абсолютное и процентное изменение. Процент не определён при нуле.
pub fn deltas(current: Option<f64>, previous: Option<f64>) -> (Option<f64>, Option<f64>) {
    match (current, previous) {
        (Some(cur), Some(prev)) => {
            let delta = cur - prev;
            let pct = if prev == 0.0 {
                None
            } else {
                Some(delta / prev.abs() * 100.0)
            };
            (Some(delta), pct)
        }
        _ => (None, None),
    }
}

#[derive(Clone, Copy)]
pub struct MetricEvaluator<'e> {
    data_source: &'e dyn DataSource,
    settings: &'e EngineSettings,
}

impl<'e> MetricEvaluator<'e> {
    pub fn new(data_source: &'e dyn DataSource, settings: &'e EngineSettings) -> Self {
        Self {
            data_source,
            settings,
        }
    }

    pub async fn evaluate(&self, request: &MetricRequest<'_>) -> Result<MetricOutcome, KpiError> {
        let metric = request.metric;
        let schema = SourceSchema::new(request.source);
        let offset = self.settings.utc_offset;

        let value_field = match (metric.aggregation, metric.value_field) {
            (Aggregation::Count, _) => None,
            (_, Some(id)) => Some(schema.field_ref(&id)?),
            (_, None) => return Err(KpiError::MissingValueField(metric.base.code.clone())),
        };
        let date_field = metric
            .date_field
            .map(|id| schema.field_ref(&id))
            .transpose()?;

        let dimension = if request.scalar_only {
            None
        } else {
            match request.dimension.or_else(|| metric.primary_dimension()) {
                Some(d) => Some(DimensionSpec {
                    field: schema.field_ref(&d.field)?,
                    granularity: d.granularity,
                    limit: d.limit,
                }),
                None => None,
            }
        };

        let spec = request.window.unwrap_or_else(|| metric.window_spec());
        // разбивка не сравнивается с предыдущим периодом
        let compare = metric.compare_against_previous && dimension.is_none();
        let (current, previous) = if compare {
            let (cur, prev) = time_window::resolve_with_previous(&spec, request.at)?;
            (Some(cur), Some(prev))
        } else {
            (time_window::resolve(&spec, request.at)?, None)
        };
        if current.is_some() && date_field.is_none() {
            return Err(KpiError::InvalidWindowConfig(format!(
                "window {} requires metric '{}' to have a date field",
                spec.window.as_str(),
                metric.base.code
            )));
        }

        let base = compile_base_filters(&schema, offset)?;
        let mut clauses: Vec<FilterClause> = metric
            .ordered_filters()
            .into_iter()
            .map(FilterClause::from)
            .collect();
        clauses.extend(request.extra_filters.iter().cloned());
        let filters = compile_filters(&clauses, &schema, offset)?;

        let mut projection: Vec<FieldRef> = Vec::new();
        for field in value_field.iter().chain(dimension.iter().map(|d| &d.field)) {
            if !projection.contains(field) {
                projection.push(field.clone());
            }
        }
        let value_path = value_field.as_ref().map(|f| f.path.as_str());

        let predicate_for = |interval: Option<&ResolvedInterval>| {
            let range = match (interval, &date_field) {
                (Some(interval), Some(field)) => date_range(field.clone(), interval),
                _ => Predicate::True,
            };
            Predicate::all(vec![base.clone(), range, filters.clone()])
        };

        let rows = self
            .fetch(&schema, predicate_for(current.as_ref()), projection.clone())
            .await?;

        if let Some(dimension) = dimension {
            return Ok(MetricOutcome::Series {
                series: dimension.apply(&rows, metric.aggregation, value_path),
                window: current,
            });
        }

        let value = aggregate(metric.aggregation, &rows.iter().collect::<Vec<_>>(), value_path);
        let previous_value = match &previous {
            Some(interval) => {
                let rows = self
                    .fetch(&schema, predicate_for(Some(interval)), projection)
                    .await?;
                aggregate(metric.aggregation, &rows.iter().collect::<Vec<_>>(), value_path)
            }
            None => None,
        };

        Ok(MetricOutcome::Scalar {
            value,
            previous: previous_value,
            window: current,
            previous_window: previous,
        })
    }

    async fn fetch(
        &self,
        schema: &SourceSchema<'_>,
        predicate: Predicate,
        projection: Vec<FieldRef>,
    ) -> Result<Vec<Row>, KpiError> {
        let query = DataQuery {
            source: schema.descriptor(),
            predicate,
            projection,
        };
        let code = &query.source.code;
        let unavailable = |message: String| KpiError::SourceUnavailable {
            source_code: code.clone(),
            message,
        };

        match tokio::time::timeout(self.settings.query_timeout, self.data_source.query(&query)).await {
            Ok(Ok(rows)) => {
                tracing::debug!(source = %code, rows = rows.len(), "kpi source query");
                Ok(rows)
            }
            Ok(Err(e)) => {
                tracing::warn!(source = %code, error = %e, "kpi source query failed");
                Err(unavailable(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(source = %code, "kpi source query timed out");
                Err(unavailable(format!(
                    "query timed out after {} ms",
                    self.settings.query_timeout.as_millis()
                )))
            }
        }
    }
}
