//! Компиляция фильтров в дерево предикатов.
//!
//! Условия сворачиваются строго слева направо: `c1 C2 c2 C3 c3` означает
//! `((c1 C2 c2) C3 c3)`. Связка первого условия игнорируется.

use chrono::{FixedOffset, NaiveDateTime};
use contracts::domain::a025_kpi_source::aggregate::{FieldType, KpiFieldId};
use contracts::domain::a026_kpi_metric::aggregate::{Connector, FilterOperator, MetricFilter};
use contracts::domain::a028_kpi_dashboard::aggregate::WidgetFilter;
use contracts::shared::kpi::ResolvedInterval;
use serde_json::Value;
#[cfg(test)]
use std::cmp::Ordering;

use super::error::KpiError;
use super::schema_registry::{FieldRef, SourceSchema};
use super::value::{normalize, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOp {
    Contains,
    IContains,
    StartsWith,
    EndsWith,
}

/// Дерево предикатов, которое понимает любой адаптер данных
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    Compare {
        field: FieldRef,
        op: CompareOp,
        value: Scalar,
    },
    InList {
        field: FieldRef,
        values: Vec<Scalar>,
        negated: bool,
    },
    /// Границы включительно
    Between {
        field: FieldRef,
        low: Scalar,
        high: Scalar,
    },
    Text {
        field: FieldRef,
        op: TextOp,
        pattern: String,
    },
    IsNull {
        field: FieldRef,
        negated: bool,
    },
    /// `[start, end)`
    DateRange {
        field: FieldRef,
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Predicate {
    /// Конъюнкция частей: `True` отбрасывается, вложенные `All` раскрываются
    pub fn all(parts: Vec<Predicate>) -> Predicate {
        let mut flat = Vec::new();
        for part in parts {
            match part {
                Predicate::True => {}
                Predicate::All(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Predicate::True,
            1 => flat.pop().unwrap_or(Predicate::True),
            _ => Predicate::All(flat),
        }
    }

    /// Вычислить предикат для строки. `cell` возвращает нормализованное
    /// значение поля; NULL не удовлетворяет ни одному сравнению.
    #[cfg(test)]
    pub fn matches(&self, cell: &dyn Fn(&FieldRef) -> Scalar) -> bool {
        match self {
            Predicate::True => true,
            Predicate::Compare { field, op, value } => {
                let actual = cell(field);
                match actual.compare(value) {
                    Some(ord) => compare_holds(*op, ord),
                    None => false,
                }
            }
            Predicate::InList {
                field,
                values,
                negated,
            } => {
                let actual = cell(field);
                if actual.is_null() {
                    return false;
                }
                let found = values
                    .iter()
                    .any(|v| actual.compare(v) == Some(Ordering::Equal));
                found != *negated
            }
            Predicate::Between { field, low, high } => {
                let actual = cell(field);
                matches!(
                    actual.compare(low),
                    Some(Ordering::Greater | Ordering::Equal)
                ) && matches!(actual.compare(high), Some(Ordering::Less | Ordering::Equal))
            }
            Predicate::Text { field, op, pattern } => match cell(field).render() {
                None => false,
                Some(text) => match op {
                    TextOp::Contains => text.contains(pattern.as_str()),
                    TextOp::IContains => text.to_lowercase().contains(&pattern.to_lowercase()),
                    TextOp::StartsWith => text.starts_with(pattern.as_str()),
                    TextOp::EndsWith => text.ends_with(pattern.as_str()),
                },
            },
            Predicate::IsNull { field, negated } => cell(field).is_null() != *negated,
            Predicate::DateRange { field, start, end } => match cell(field).as_datetime() {
                Some(dt) => dt >= *start && dt < *end,
                None => false,
            },
            Predicate::All(parts) => parts.iter().all(|p| p.matches(cell)),
            Predicate::Any(parts) => parts.iter().any(|p| p.matches(cell)),
        }
    }
}

#[cfg(test)]
fn compare_holds(op: CompareOp, ord: Ordering) -> bool {
    match op {
        CompareOp::Eq => ord == Ordering::Equal,
        CompareOp::Ne => ord != Ordering::Equal,
        CompareOp::Gt => ord == Ordering::Greater,
        CompareOp::Gte => ord != Ordering::Less,
        CompareOp::Lt => ord == Ordering::Less,
        CompareOp::Lte => ord != Ordering::Greater,
    }
}

/// Условие фильтра независимо от того, откуда оно пришло (метрика или виджет)
#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    pub field: KpiFieldId,
    pub operator: FilterOperator,
    pub value: Option<Value>,
    pub connector: Connector,
}

impl From<&MetricFilter> for FilterClause {
    fn from(f: &MetricFilter) -> Self {
        Self {
            field: f.field,
            operator: f.operator,
            value: f.value.clone(),
            connector: f.connector,
        }
    }
}

impl From<&WidgetFilter> for FilterClause {
    fn from(f: &WidgetFilter) -> Self {
        Self {
            field: f.field,
            operator: f.operator,
            value: f.value.clone(),
            connector: f.connector,
        }
    }
}

/// Свернуть упорядоченный список условий в предикат
pub fn compile_filters(
    clauses: &[FilterClause],
    schema: &SourceSchema<'_>,
    offset: FixedOffset,
) -> Result<Predicate, KpiError> {
    let mut acc: Option<Predicate> = None;
    for clause in clauses {
        let leaf = compile_clause(clause, schema, offset)?;
        acc = Some(match acc {
            None => leaf,
            Some(prev) => fold(prev, clause.connector, leaf),
        });
    }
    Ok(acc.unwrap_or(Predicate::True))
}

fn fold(acc: Predicate, connector: Connector, leaf: Predicate) -> Predicate {
    match (connector, acc) {
        (Connector::And, Predicate::All(mut parts)) => {
            parts.push(leaf);
            Predicate::All(parts)
        }
        (Connector::And, other) => Predicate::All(vec![other, leaf]),
        (Connector::Or, Predicate::Any(mut parts)) => {
            parts.push(leaf);
            Predicate::Any(parts)
        }
        (Connector::Or, other) => Predicate::Any(vec![other, leaf]),
    }
}

fn compile_clause(
    clause: &FilterClause,
    schema: &SourceSchema<'_>,
    offset: FixedOffset,
) -> Result<Predicate, KpiError> {
    let field = schema.field_ref(&clause.field)?;
    let invalid = |message: String| KpiError::InvalidFilterValue {
        field: field.path.clone(),
        message,
    };

    if !clause.operator.takes_value() {
        return Ok(Predicate::IsNull {
            negated: clause.operator == FilterOperator::IsNotNull,
            field: field.clone(),
        });
    }

    let value = match &clause.value {
        None | Some(Value::Null) => return Err(invalid("a value is required".into())),
        Some(v) => v,
    };

    let predicate = match clause.operator {
        FilterOperator::In | FilterOperator::NotIn => {
            let items = value
                .as_array()
                .ok_or_else(|| invalid("expected a list of values".into()))?;
            let values = items
                .iter()
                .map(|item| scalar_value(item, field.field_type, offset))
                .collect::<Result<Vec<_>, _>>()
                .map_err(invalid)?;
            Predicate::InList {
                negated: clause.operator == FilterOperator::NotIn,
                field: field.clone(),
                values,
            }
        }
        FilterOperator::Between => {
            let bounds = match value.as_array() {
                Some(items) if items.len() == 2 => items,
                _ => return Err(invalid("between expects exactly two bounds".into())),
            };
            let low = scalar_value(&bounds[0], field.field_type, offset).map_err(invalid)?;
            let high = scalar_value(&bounds[1], field.field_type, offset).map_err(invalid)?;
            if low.is_null() || high.is_null() {
                return Err(invalid("between bounds cannot be null".into()));
            }
            Predicate::Between {
                field: field.clone(),
                low,
                high,
            }
        }
        FilterOperator::Contains
        | FilterOperator::Icontains
        | FilterOperator::StartsWith
        | FilterOperator::EndsWith => {
            let pattern = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return Err(invalid("expected a text value".into())),
            };
            let op = match clause.operator {
                FilterOperator::Contains => TextOp::Contains,
                FilterOperator::Icontains => TextOp::IContains,
                FilterOperator::StartsWith => TextOp::StartsWith,
                _ => TextOp::EndsWith,
            };
            Predicate::Text {
                field: field.clone(),
                op,
                pattern,
            }
        }
        FilterOperator::Eq
        | FilterOperator::Ne
        | FilterOperator::Gt
        | FilterOperator::Gte
        | FilterOperator::Lt
        | FilterOperator::Lte => {
            let scalar = scalar_value(value, field.field_type, offset).map_err(invalid)?;
            let op = match clause.operator {
                FilterOperator::Eq => CompareOp::Eq,
                FilterOperator::Ne => CompareOp::Ne,
                FilterOperator::Gt => CompareOp::Gt,
                FilterOperator::Gte => CompareOp::Gte,
                FilterOperator::Lt => CompareOp::Lt,
                _ => CompareOp::Lte,
            };
            Predicate::Compare {
                field: field.clone(),
                op,
                value: scalar,
            }
        }
        FilterOperator::IsNull | FilterOperator::IsNotNull => Predicate::IsNull {
            negated: clause.operator == FilterOperator::IsNotNull,
            field: field.clone(),
        },
    };
    Ok(predicate)
}

/// Одиночное значение фильтра: списки и объекты недопустимы
fn scalar_value(value: &Value, field_type: FieldType, offset: FixedOffset) -> Result<Scalar, String> {
    if value.is_array() || value.is_object() {
        return Err(format!("expected a single value, got {}", value));
    }
    normalize(value, field_type, offset)
}

/// Базовые фильтры источника: скаляр - равенство, список - вхождение
pub fn compile_base_filters(
    schema: &SourceSchema<'_>,
    offset: FixedOffset,
) -> Result<Predicate, KpiError> {
    let mut parts = Vec::new();
    for (path, value) in &schema.source().base_filters {
        let field = schema.path_ref(path);
        let invalid = |message: String| KpiError::InvalidFilterValue {
            field: path.clone(),
            message,
        };
        let part = match value {
            Value::Null => Predicate::IsNull {
                field,
                negated: false,
            },
            Value::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| scalar_value(item, field.field_type, offset))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(invalid)?;
                Predicate::InList {
                    field,
                    values,
                    negated: false,
                }
            }
            other => {
                let value = scalar_value(other, field.field_type, offset).map_err(invalid)?;
                Predicate::Compare {
                    field,
                    op: CompareOp::Eq,
                    value,
                }
            }
        };
        parts.push(part);
    }
    Ok(Predicate::all(parts))
}

pub fn date_range(field: FieldRef, interval: &ResolvedInterval) -> Predicate {
    Predicate::DateRange {
        field,
        start: interval.start,
        end: interval.end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::kpi_engine::value::utc;
    use contracts::domain::a025_kpi_source::aggregate::{KpiSource, KpiSourceField};
    use serde_json::json;
    use std::collections::HashMap;

    fn source() -> KpiSource {
        let mut source =
            KpiSource::new_for_insert(None, "sales".into(), "Sales".into(), "sales".into())
                .with_field(KpiSourceField::new("total", "Total", FieldType::Numeric))
                .with_field(KpiSourceField::new("status", "Status", FieldType::Dimension))
                .with_field(KpiSourceField::new("paid", "Paid", FieldType::Boolean))
                .with_field(KpiSourceField::new("created_at", "Created", FieldType::Date));
        source.base_filters.insert("status".into(), json!(["done", "paid"]));
        source
    }

    fn clause(field: KpiFieldId, operator: FilterOperator, value: Value, connector: Connector) -> FilterClause {
        FilterClause {
            field,
            operator,
            value: if value.is_null() { None } else { Some(value) },
            connector,
        }
    }

    fn eval(predicate: &Predicate, row: &HashMap<&str, Scalar>) -> bool {
        predicate.matches(&|f: &FieldRef| row.get(f.path.as_str()).cloned().unwrap_or(Scalar::Null))
    }

    /// Все комбинации трёх булевых полей как строки
    fn truth_rows() -> Vec<HashMap<&'static str, Scalar>> {
        let mut rows = Vec::new();
        for mask in 0..8u8 {
            let mut row = HashMap::new();
            row.insert("total", Scalar::Number(if mask & 1 != 0 { 10.0 } else { 0.0 }));
            row.insert("status", Scalar::Text(if mask & 2 != 0 { "done" } else { "new" }.into()));
            row.insert("paid", Scalar::Bool(mask & 4 != 0));
            rows.push(row);
        }
        rows
    }

    #[test]
    fn test_left_fold_ignores_precedence() {
        let source = source();
        let schema = SourceSchema::new(&source);
        let (total, status, paid) = (source.fields[0].id, source.fields[1].id, source.fields[2].id);

        // total > 5 OR status = done AND paid = true  =>  ((total > 5) OR status) AND paid
        let clauses = vec![
            clause(total, FilterOperator::Gt, json!(5), Connector::And),
            clause(status, FilterOperator::Eq, json!("done"), Connector::Or),
            clause(paid, FilterOperator::Eq, json!(true), Connector::And),
        ];
        let predicate = compile_filters(&clauses, &schema, utc()).unwrap();

        let mut row = HashMap::new();
        row.insert("total", Scalar::Number(10.0));
        row.insert("status", Scalar::Text("new".into()));
        row.insert("paid", Scalar::Bool(false));
        // при обычном приоритете AND строка прошла бы через total > 5
        assert!(!eval(&predicate, &row));
    }

    #[test]
    fn test_swapping_adjacent_same_connector_clauses_is_equivalent() {
        let source = source();
        let schema = SourceSchema::new(&source);
        let (total, status, paid) = (source.fields[0].id, source.fields[1].id, source.fields[2].id);

        let a = clause(total, FilterOperator::Gt, json!(5), Connector::And);
        let b = clause(status, FilterOperator::Eq, json!("done"), Connector::Or);
        let c = clause(paid, FilterOperator::Eq, json!(true), Connector::Or);

        let original = compile_filters(&[a.clone(), b.clone(), c.clone()], &schema, utc()).unwrap();
        let swapped = compile_filters(&[a, c, b], &schema, utc()).unwrap();

        for row in truth_rows() {
            assert_eq!(eval(&original, &row), eval(&swapped, &row));
        }
    }

    #[test]
    fn test_changing_connector_changes_predicate() {
        let source = source();
        let schema = SourceSchema::new(&source);
        let (total, status, paid) = (source.fields[0].id, source.fields[1].id, source.fields[2].id);

        let and_or_and = compile_filters(
            &[
                clause(total, FilterOperator::Gt, json!(5), Connector::And),
                clause(status, FilterOperator::Eq, json!("done"), Connector::Or),
                clause(paid, FilterOperator::Eq, json!(true), Connector::And),
            ],
            &schema,
            utc(),
        )
        .unwrap();
        let and_and_or = compile_filters(
            &[
                clause(total, FilterOperator::Gt, json!(5), Connector::And),
                clause(status, FilterOperator::Eq, json!("done"), Connector::And),
                clause(paid, FilterOperator::Eq, json!(true), Connector::Or),
            ],
            &schema,
            utc(),
        )
        .unwrap();

        let differs = truth_rows()
            .iter()
            .any(|row| eval(&and_or_and, row) != eval(&and_and_or, row));
        assert!(differs);
    }

    #[test]
    fn test_value_shapes_per_operator() {
        let source = source();
        let schema = SourceSchema::new(&source);
        let total = source.fields[0].id;

        let between_one = clause(total, FilterOperator::Between, json!([1]), Connector::And);
        assert!(matches!(
            compile_filters(&[between_one], &schema, utc()),
            Err(KpiError::InvalidFilterValue { .. })
        ));

        let in_scalar = clause(total, FilterOperator::In, json!(5), Connector::And);
        assert!(compile_filters(&[in_scalar], &schema, utc()).is_err());

        let eq_list = clause(total, FilterOperator::Eq, json!([5]), Connector::And);
        assert!(compile_filters(&[eq_list], &schema, utc()).is_err());

        let bad_number = clause(total, FilterOperator::Gt, json!("lots"), Connector::And);
        assert!(compile_filters(&[bad_number], &schema, utc()).is_err());

        let missing = clause(total, FilterOperator::Eq, Value::Null, Connector::And);
        assert!(compile_filters(&[missing], &schema, utc()).is_err());

        // is_null игнорирует значение
        let null_check = clause(total, FilterOperator::IsNull, json!("ignored"), Connector::And);
        let predicate = compile_filters(&[null_check], &schema, utc()).unwrap();
        assert!(eval(&predicate, &HashMap::new()));
    }

    #[test]
    fn test_foreign_field_rejected() {
        let source = source();
        let schema = SourceSchema::new(&source);
        let foreign = clause(KpiFieldId::new_v4(), FilterOperator::Eq, json!(1), Connector::And);
        assert!(matches!(
            compile_filters(&[foreign], &schema, utc()),
            Err(KpiError::FieldNotInSource { .. })
        ));
    }

    #[test]
    fn test_between_in_and_text_operators() {
        let source = source();
        let schema = SourceSchema::new(&source);
        let (total, status) = (source.fields[0].id, source.fields[1].id);

        let between = compile_filters(
            &[clause(total, FilterOperator::Between, json!([5, 10]), Connector::And)],
            &schema,
            utc(),
        )
        .unwrap();
        let mut row = HashMap::new();
        row.insert("total", Scalar::Number(10.0));
        assert!(eval(&between, &row));

        let not_in = compile_filters(
            &[clause(status, FilterOperator::NotIn, json!(["new"]), Connector::And)],
            &schema,
            utc(),
        )
        .unwrap();
        row.insert("status", Scalar::Text("Done".into()));
        assert!(eval(&not_in, &row));

        let icontains = compile_filters(
            &[clause(status, FilterOperator::Icontains, json!("don"), Connector::And)],
            &schema,
            utc(),
        )
        .unwrap();
        let contains = compile_filters(
            &[clause(status, FilterOperator::Contains, json!("don"), Connector::And)],
            &schema,
            utc(),
        )
        .unwrap();
        assert!(eval(&icontains, &row));
        assert!(!eval(&contains, &row));

        // NULL не удовлетворяет ни ne, ни not_in
        let ne = compile_filters(
            &[clause(status, FilterOperator::Ne, json!("x"), Connector::And)],
            &schema,
            utc(),
        )
        .unwrap();
        assert!(!eval(&ne, &HashMap::new()));
        assert!(!eval(&not_in, &HashMap::new()));
    }

    #[test]
    fn test_base_filters_scalar_and_list() {
        let source = source();
        let schema = SourceSchema::new(&source);
        let predicate = compile_base_filters(&schema, utc()).unwrap();

        let mut row = HashMap::new();
        row.insert("status", Scalar::Text("paid".into()));
        assert!(eval(&predicate, &row));
        row.insert("status", Scalar::Text("new".into()));
        assert!(!eval(&predicate, &row));
    }

    #[test]
    fn test_all_flattens_and_drops_true() {
        let field = FieldRef::new("x", FieldType::Numeric);
        let leaf = Predicate::IsNull {
            field,
            negated: false,
        };
        assert_eq!(Predicate::all(vec![Predicate::True, leaf.clone()]), leaf);
        assert_eq!(Predicate::all(vec![]), Predicate::True);
        let nested = Predicate::all(vec![Predicate::All(vec![leaf.clone(), leaf.clone()]), leaf.clone()]);
        assert_eq!(nested, Predicate::All(vec![leaf.clone(), leaf.clone(), leaf]));
    }
}
