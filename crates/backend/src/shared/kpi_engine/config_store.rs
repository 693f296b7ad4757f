//! Доступ движка к сохранённой конфигурации (только чтение).

#[cfg(test)]
use std::collections::HashMap;

use async_trait::async_trait;
use contracts::domain::a025_kpi_source::aggregate::{KpiSource, KpiSourceId};
use contracts::domain::a026_kpi_metric::aggregate::{KpiMetric, KpiMetricId};
use contracts::domain::a027_kpi_definition::aggregate::{KpiDefinition, KpiDefinitionId};
use contracts::domain::a028_kpi_dashboard::aggregate::{KpiDashboard, KpiWidgetId};
#[cfg(test)]
use contracts::domain::a028_kpi_dashboard::aggregate::KpiDashboardId;

use super::error::KpiError;

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn source(&self, id: &KpiSourceId) -> Result<Option<KpiSource>, KpiError>;
    async fn metric(&self, id: &KpiMetricId) -> Result<Option<KpiMetric>, KpiError>;
    async fn definition(&self, id: &KpiDefinitionId) -> Result<Option<KpiDefinition>, KpiError>;
    /// Дашборд, на котором размещён виджет
    async fn dashboard_for_widget(&self, id: &KpiWidgetId) -> Result<Option<KpiDashboard>, KpiError>;
}

/// Хранилище в памяти для тестов движка
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    sources: HashMap<KpiSourceId, KpiSource>,
    metrics: HashMap<KpiMetricId, KpiMetric>,
    definitions: HashMap<KpiDefinitionId, KpiDefinition>,
    dashboards: HashMap<KpiDashboardId, KpiDashboard>,
}

#[cfg(test)]
impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: KpiSource) -> Self {
        self.sources.insert(source.base.id, source);
        self
    }

    pub fn with_metric(mut self, metric: KpiMetric) -> Self {
        self.metrics.insert(metric.base.id, metric);
        self
    }

    pub fn with_definition(mut self, definition: KpiDefinition) -> Self {
        self.definitions.insert(definition.base.id, definition);
        self
    }

    pub fn with_dashboard(mut self, dashboard: KpiDashboard) -> Self {
        self.dashboards.insert(dashboard.base.id, dashboard);
        self
    }
}

#[cfg(test)]
#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn source(&self, id: &KpiSourceId) -> Result<Option<KpiSource>, KpiError> {
        Ok(self.sources.get(id).cloned())
    }

    async fn metric(&self, id: &KpiMetricId) -> Result<Option<KpiMetric>, KpiError> {
        Ok(self.metrics.get(id).cloned())
    }

    async fn definition(&self, id: &KpiDefinitionId) -> Result<Option<KpiDefinition>, KpiError> {
        Ok(self.definitions.get(id).cloned())
    }

    async fn dashboard_for_widget(&self, id: &KpiWidgetId) -> Result<Option<KpiDashboard>, KpiError> {
        Ok(self
            .dashboards
            .values()
            .find(|d| d.widget(id).is_some())
            .cloned())
    }
}
