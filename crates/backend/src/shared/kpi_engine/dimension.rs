//! Ключи разбивки и порядок групп.

use chrono::{Datelike, Timelike};
use contracts::domain::a026_kpi_metric::aggregate::{Aggregation, Granularity};
use contracts::shared::kpi::SeriesPoint;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::aggregation::aggregate;
use super::data_source::Row;
use super::schema_registry::FieldRef;
use super::value::Scalar;

/// Разрешённая разбивка: поле, гранулярность, top-N
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionSpec {
    pub field: FieldRef,
    pub granularity: Granularity,
    pub limit: Option<u32>,
}

/// Ключ группы для значения. `None` - строка в группировку не попадает.
pub fn group_key(value: &Scalar, granularity: Granularity) -> Option<String> {
    let dt = || value.as_datetime();
    match granularity {
        Granularity::Exact => value.render(),
        Granularity::Hour => dt().map(|d| format!("{}T{:02}:00", d.format("%Y-%m-%d"), d.hour())),
        Granularity::Day => dt().map(|d| d.format("%Y-%m-%d").to_string()),
        Granularity::Week => dt().map(|d| {
            let iso = d.date().iso_week();
            format!("{}-W{:02}", iso.year(), iso.week())
        }),
        Granularity::Month => dt().map(|d| d.format("%Y-%m").to_string()),
        Granularity::Quarter => dt().map(|d| format!("{}-Q{}", d.year(), (d.month() - 1) / 3 + 1)),
        Granularity::Year => dt().map(|d| d.year().to_string()),
    }
}

impl DimensionSpec {
    pub fn is_temporal(&self) -> bool {
        self.granularity != Granularity::Exact
    }

    /// Сгруппировать строки, агрегировать и упорядочить группы
    pub fn apply(&self, rows: &[Row], aggregation: Aggregation, value_path: Option<&str>) -> Vec<SeriesPoint> {
        let mut groups: BTreeMap<String, Vec<&Row>> = BTreeMap::new();
        for row in rows {
            let cell = row.get(&self.field.path).unwrap_or(&Scalar::Null);
            if let Some(key) = group_key(cell, self.granularity) {
                groups.entry(key).or_default().push(row);
            }
        }

        let points: Vec<SeriesPoint> = groups
            .into_iter()
            .map(|(key, members)| SeriesPoint {
                value: aggregate(aggregation, &members, value_path),
                key,
            })
            .collect();

        self.order(points)
    }

    /// С лимитом: по значению убыв., при равенстве по ключу возр., первые N.
    /// Без лимита временные ряды идут по ключу, точные - по значению.
    /// Лимит 0 равнозначен отсутствию лимита.
    pub fn order(&self, mut points: Vec<SeriesPoint>) -> Vec<SeriesPoint> {
        match self.limit.filter(|&limit| limit > 0) {
            Some(limit) => {
                points.sort_by(by_value_desc);
                points.truncate(limit as usize);
            }
            None if self.is_temporal() => points.sort_by(|a, b| a.key.cmp(&b.key)),
            None => points.sort_by(by_value_desc),
        }
        points
    }
}

fn by_value_desc(a: &SeriesPoint, b: &SeriesPoint) -> Ordering {
    let by_value = match (a.value, b.value) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_value.then_with(|| a.key.cmp(&b.key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use contracts::domain::a025_kpi_source::aggregate::FieldType;

    fn dt(s: &str) -> Scalar {
        Scalar::DateTime(NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap())
    }

    fn row(date: &str, total: f64) -> Row {
        let mut row = Row::new();
        row.insert("created_at".into(), dt(date));
        row.insert("total".into(), Scalar::Number(total));
        row
    }

    #[test]
    fn test_temporal_keys() {
        let value = dt("2024-03-15T13:45:00");
        assert_eq!(group_key(&value, Granularity::Hour).as_deref(), Some("2024-03-15T13:00"));
        assert_eq!(group_key(&value, Granularity::Day).as_deref(), Some("2024-03-15"));
        assert_eq!(group_key(&value, Granularity::Week).as_deref(), Some("2024-W11"));
        assert_eq!(group_key(&value, Granularity::Month).as_deref(), Some("2024-03"));
        assert_eq!(group_key(&value, Granularity::Quarter).as_deref(), Some("2024-Q1"));
        assert_eq!(group_key(&value, Granularity::Year).as_deref(), Some("2024"));

        // 2021-01-01 относится к 53-й ISO-неделе 2020 года
        assert_eq!(
            group_key(&dt("2021-01-01T00:00:00"), Granularity::Week).as_deref(),
            Some("2020-W53")
        );
        assert_eq!(group_key(&Scalar::Null, Granularity::Exact), None);
        assert_eq!(group_key(&Scalar::Text("x".into()), Granularity::Month), None);
    }

    #[test]
    fn test_month_top_three_with_tie_on_earliest_month() {
        let spec = DimensionSpec {
            field: FieldRef::new("created_at", FieldType::Date),
            granularity: Granularity::Month,
            limit: Some(3),
        };
        let rows = vec![
            row("2024-01-10T00:00:00", 50.0),
            row("2024-02-10T00:00:00", 80.0),
            row("2024-03-10T00:00:00", 20.0),
            row("2024-04-10T00:00:00", 50.0),
            row("2024-05-10T00:00:00", 10.0),
            row("2024-05-11T00:00:00", 40.0),
        ];
        let series = spec.apply(&rows, Aggregation::Sum, Some("total"));
        let keys: Vec<&str> = series.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["2024-02", "2024-01", "2024-04"]);
    }

    #[test]
    fn test_zero_limit_keeps_every_group() {
        let spec = DimensionSpec {
            field: FieldRef::new("created_at", FieldType::Date),
            granularity: Granularity::Month,
            limit: Some(0),
        };
        let rows = vec![
            row("2024-02-10T00:00:00", 80.0),
            row("2024-01-10T00:00:00", 50.0),
            row("2024-03-10T00:00:00", 20.0),
        ];
        let series = spec.apply(&rows, Aggregation::Sum, Some("total"));
        let keys: Vec<&str> = series.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["2024-01", "2024-02", "2024-03"]);
    }

    #[test]
    fn test_unlimited_temporal_series_is_chronological() {
        let spec = DimensionSpec {
            field: FieldRef::new("created_at", FieldType::Date),
            granularity: Granularity::Day,
            limit: None,
        };
        let rows = vec![
            row("2024-03-02T10:00:00", 1.0),
            row("2024-03-01T10:00:00", 5.0),
            row("2024-03-02T12:00:00", 1.0),
        ];
        let series = spec.apply(&rows, Aggregation::Count, None);
        assert_eq!(series[0].key, "2024-03-01");
        assert_eq!(series[1].value, Some(2.0));
    }

    #[test]
    fn test_exact_series_orders_by_value_and_skips_nulls() {
        let spec = DimensionSpec {
            field: FieldRef::new("status", FieldType::Dimension),
            granularity: Granularity::Exact,
            limit: None,
        };
        let mut rows = Vec::new();
        for status in ["b", "a", "b", "c"] {
            let mut r = Row::new();
            r.insert("status".into(), Scalar::Text(status.into()));
            rows.push(r);
        }
        rows.push(Row::new());
        let series = spec.apply(&rows, Aggregation::Count, None);
        let keys: Vec<&str> = series.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }
}
