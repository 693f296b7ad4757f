//! Общие тестовые данные движка: источник заказов и строки за три месяца.

use chrono::{NaiveDate, NaiveDateTime};
use contracts::domain::a025_kpi_source::aggregate::{FieldType, KpiFieldId, KpiSource, KpiSourceField};
use contracts::domain::a026_kpi_metric::aggregate::{Aggregation, KpiMetric, TimeWindow};
use contracts::domain::common::OwnerId;
use serde_json::{json, Value};

use super::data_source::MemoryDataSource;
use super::value::utc;

pub struct Orders {
    pub owner: OwnerId,
    pub source: KpiSource,
}

impl Orders {
    pub fn new() -> Self {
        let owner = OwnerId::new_v4();
        let mut source = KpiSource::new_for_insert(Some(owner), "orders".into(), "Orders".into(), "orders".into())
            .with_field(KpiSourceField::new("total", "Total", FieldType::Numeric))
            .with_field(KpiSourceField::new("status", "Status", FieldType::Dimension))
            .with_field(KpiSourceField::new("client", "Client", FieldType::Dimension))
            .with_field(KpiSourceField::new("created_at", "Created", FieldType::Date));
        source
            .base_filters
            .insert("is_test".into(), json!(false));
        Self { owner, source }
    }

    pub fn field(&self, path: &str) -> KpiFieldId {
        match self.source.field_by_path(path) {
            Some(field) => field.id,
            None => panic!("no field {}", path),
        }
    }

    /// Метрика за `this_month` по `created_at`
    pub fn metric(&self, code: &str, aggregation: Aggregation) -> KpiMetric {
        let mut metric = KpiMetric::new_for_insert(
            self.owner,
            code.into(),
            code.into(),
            self.source.base.id,
            aggregation,
        );
        if aggregation != Aggregation::Count {
            metric.value_field = Some(self.field("total"));
        }
        metric.date_field = Some(self.field("created_at"));
        metric.time_window = TimeWindow::ThisMonth;
        metric
    }

    pub fn data_source(&self) -> MemoryDataSource {
        MemoryDataSource::new(utc()).with_entity("orders", rows())
    }
}

/// Момент вычисления для тестов: 2024-03-15 12:00
pub fn at() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 15)
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .unwrap()
}

/// Январь 100, февраль 50 + 30, март 40 + 60 + 20 (+ тестовый заказ)
pub fn rows() -> Vec<Value> {
    vec![
        json!({"total": 100, "status": "done", "client": "acme", "created_at": "2024-01-20", "is_test": false}),
        json!({"total": 50, "status": "done", "client": "acme", "created_at": "2024-02-03", "is_test": false}),
        json!({"total": 30, "status": "new", "client": "globex", "created_at": "2024-02-28T23:59:59", "is_test": false}),
        json!({"total": 40, "status": "done", "client": "globex", "created_at": "2024-03-01T00:00:00", "is_test": false}),
        json!({"total": 60, "status": "new", "client": "initech", "created_at": "2024-03-10 10:30:00", "is_test": false}),
        json!({"total": 20, "status": null, "client": "acme", "created_at": "2024-03-15T11:00:00", "is_test": false}),
        json!({"total": 999, "status": "done", "client": "acme", "created_at": "2024-03-05", "is_test": true}),
    ]
}
