use std::collections::HashSet;

use contracts::domain::a026_kpi_metric::aggregate::Aggregation;

use super::data_source::Row;

/// Применить агрегацию к набору строк.
///
/// NULL-значения пропускаются. Пустой набор: `sum` = 0, `count` и
/// `distinct_count` = 0, `avg`/`max`/`min` = `None`.
pub fn aggregate(aggregation: Aggregation, rows: &[&Row], value_path: Option<&str>) -> Option<f64> {
    let cells = rows
        .iter()
        .filter_map(|row| value_path.and_then(|path| row.get(path)))
        .filter(|cell| !cell.is_null());

    match aggregation {
        Aggregation::Count => Some(rows.len() as f64),
        Aggregation::DistinctCount => {
            let distinct: HashSet<String> = cells.filter_map(|c| c.render()).collect();
            Some(distinct.len() as f64)
        }
        Aggregation::Sum => Some(cells.filter_map(|c| c.as_f64()).sum()),
        Aggregation::Avg => {
            let numbers: Vec<f64> = cells.filter_map(|c| c.as_f64()).collect();
            if numbers.is_empty() {
                None
            } else {
                Some(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        Aggregation::Max => cells.filter_map(|c| c.as_f64()).reduce(f64::max),
        Aggregation::Min => cells.filter_map(|c| c.as_f64()).reduce(f64::min),
    }
}
