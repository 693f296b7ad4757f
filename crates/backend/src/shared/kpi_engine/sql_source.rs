//! Адаптер источника данных поверх SQLite (sea-orm raw statements).

use async_trait::async_trait;
use chrono::FixedOffset;
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, QueryResult, Statement};

use contracts::domain::a025_kpi_source::aggregate::FieldType;

use super::data_source::{DataQuery, DataSource, Row};
use super::error::DataSourceError;
use super::filter_compiler::{CompareOp, Predicate, TextOp};
use super::schema_registry::FieldRef;
use super::value::{parse_datetime, Scalar};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct SqlDataSource {
    db: DatabaseConnection,
    offset: FixedOffset,
}

impl SqlDataSource {
    pub fn new(db: DatabaseConnection, offset: FixedOffset) -> Self {
        Self { db, offset }
    }

    fn decode(&self, row: &QueryResult, index: usize, field: &FieldRef) -> Result<Scalar, DataSourceError> {
        let column = format!("p{}", index);
        let decode_err = |e: sea_orm::DbErr| DataSourceError::Decode {
            column: field.path.clone(),
            message: e.to_string(),
        };
        let scalar = match field.field_type {
            FieldType::Numeric => row
                .try_get::<Option<f64>>("", &column)
                .map_err(decode_err)?
                .map(Scalar::Number),
            FieldType::Boolean => row
                .try_get::<Option<i64>>("", &column)
                .map_err(decode_err)?
                .map(|v| Scalar::Bool(v != 0)),
            FieldType::Date => row
                .try_get::<Option<String>>("", &column)
                .map_err(decode_err)?
                .and_then(|s| parse_datetime(&s, self.offset))
                .map(Scalar::DateTime),
            FieldType::Dimension => row
                .try_get::<Option<String>>("", &column)
                .map_err(decode_err)?
                .map(Scalar::Text),
        };
        Ok(scalar.unwrap_or(Scalar::Null))
    }
}

/// Собрать `SELECT ... FROM ... WHERE ...` с параметрами
pub fn build_select(
    query: &DataQuery,
    offset: FixedOffset,
) -> Result<(String, Vec<sea_orm::Value>), DataSourceError> {
    let table = quote(&query.source.entity)?;

    let mut columns = Vec::with_capacity(query.projection.len());
    for (i, field) in query.projection.iter().enumerate() {
        let col = quote(&field.path)?;
        let expr = match field.field_type {
            FieldType::Numeric => format!("CAST({} AS REAL)", col),
            FieldType::Boolean => format!("CAST({} AS INTEGER)", col),
            FieldType::Date | FieldType::Dimension => format!("CAST({} AS TEXT)", col),
        };
        columns.push(format!("{} AS \"p{}\"", expr, i));
    }
    if columns.is_empty() {
        columns.push("1 AS \"p0\"".to_string());
    }

    let mut params = Vec::new();
    let where_clause = render_predicate(&query.predicate, offset, &mut params)?;
    let sql = format!(
        "SELECT {} FROM {} WHERE {}",
        columns.join(", "),
        table,
        where_clause
    );
    Ok((sql, params))
}

/// Предикат -> SQL. Узлы `All`/`Any` всегда в скобках, поэтому
/// левая свёртка сохраняется без учёта приоритета AND над OR.
/// Даты сравниваются в часовом поясе компании (`offset`).
pub fn render_predicate(
    predicate: &Predicate,
    offset: FixedOffset,
    params: &mut Vec<sea_orm::Value>,
) -> Result<String, DataSourceError> {
    let sql = match predicate {
        Predicate::True => "1 = 1".to_string(),
        Predicate::Compare { field, op, value } => {
            params.push(param(value));
            format!("{} {} ?", column_expr(field, offset)?, compare_op_to_sql(*op))
        }
        Predicate::InList {
            field,
            values,
            negated,
        } => {
            if values.is_empty() {
                return Ok(if *negated {
                    format!("{} IS NOT NULL", quote(&field.path)?)
                } else {
                    "1 = 0".to_string()
                });
            }
            let placeholders = vec!["?"; values.len()].join(", ");
            params.extend(values.iter().map(param));
            let keyword = if *negated { "NOT IN" } else { "IN" };
            format!("{} {} ({})", column_expr(field, offset)?, keyword, placeholders)
        }
        Predicate::Between { field, low, high } => {
            params.push(param(low));
            params.push(param(high));
            format!("{} BETWEEN ? AND ?", column_expr(field, offset)?)
        }
        Predicate::Text { field, op, pattern } => {
            let text = format!("CAST({} AS TEXT)", quote(&field.path)?);
            if pattern.is_empty() {
                return Ok(format!("{} IS NOT NULL", text));
            }
            match op {
                TextOp::Contains => {
                    params.push(pattern.clone().into());
                    format!("instr({}, ?) > 0", text)
                }
                TextOp::IContains => {
                    params.push(pattern.clone().into());
                    format!("instr(lower({}), lower(?)) > 0", text)
                }
                TextOp::StartsWith => {
                    params.push(pattern.clone().into());
                    params.push(pattern.clone().into());
                    format!("substr({}, 1, length(?)) = ?", text)
                }
                TextOp::EndsWith => {
                    params.push(pattern.clone().into());
                    params.push(pattern.clone().into());
                    format!("substr({}, -length(?)) = ?", text)
                }
            }
        }
        Predicate::IsNull { field, negated } => {
            let keyword = if *negated { "IS NOT NULL" } else { "IS NULL" };
            format!("{} {}", quote(&field.path)?, keyword)
        }
        Predicate::DateRange { field, start, end } => {
            params.push(start.format(DATETIME_FORMAT).to_string().into());
            params.push(end.format(DATETIME_FORMAT).to_string().into());
            let col = column_expr(field, offset)?;
            format!("({} >= ? AND {} < ?)", col, col)
        }
        Predicate::All(parts) => join(parts, " AND ", "1 = 1", offset, params)?,
        Predicate::Any(parts) => join(parts, " OR ", "1 = 0", offset, params)?,
    };
    Ok(sql)
}

fn join(
    parts: &[Predicate],
    separator: &str,
    empty: &str,
    offset: FixedOffset,
    params: &mut Vec<sea_orm::Value>,
) -> Result<String, DataSourceError> {
    if parts.is_empty() {
        return Ok(empty.to_string());
    }
    let rendered = parts
        .iter()
        .map(|p| render_predicate(p, offset, params))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", rendered.join(separator)))
}

/// Выражение колонки, сравнимое с параметром того же типа
fn column_expr(field: &FieldRef, offset: FixedOffset) -> Result<String, DataSourceError> {
    let col = quote(&field.path)?;
    Ok(match field.field_type {
        FieldType::Numeric => format!("CAST({} AS REAL)", col),
        FieldType::Boolean => format!("CAST({} AS INTEGER)", col),
        FieldType::Date => local_datetime(&col, offset),
        FieldType::Dimension => col,
    })
}

/// `datetime()` приводит значения с зоной (`Z`, `+03:00`) к UTC, поэтому
/// они дополнительно сдвигаются на смещение компании. Значения без зоны
/// уже локальные, как и при разборе строк в [`parse_datetime`].
fn local_datetime(col: &str, offset: FixedOffset) -> String {
    let minutes = offset.local_minus_utc() / 60;
    if minutes == 0 {
        return format!("datetime({})", col);
    }
    format!(
        "CASE WHEN {col} GLOB '*[Zz]' OR {col} GLOB '*[+-][0-9][0-9]:[0-9][0-9]' \
         THEN datetime({col}, '{minutes:+} minutes') ELSE datetime({col}) END",
        col = col,
        minutes = minutes
    )
}

fn param(value: &Scalar) -> sea_orm::Value {
    match value {
        Scalar::Null => sea_orm::Value::String(None),
        Scalar::Number(n) => (*n).into(),
        Scalar::Text(s) => s.clone().into(),
        Scalar::Bool(b) => (*b as i64).into(),
        Scalar::DateTime(dt) => dt.format(DATETIME_FORMAT).to_string().into(),
    }
}

fn compare_op_to_sql(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "=",
        CompareOp::Ne => "<>",
        CompareOp::Gt => ">",
        CompareOp::Gte => ">=",
        CompareOp::Lt => "<",
        CompareOp::Lte => "<=",
    }
}

/// Только простые идентификаторы: вложенные пути в SQL не поддерживаются
fn quote(identifier: &str) -> Result<String, DataSourceError> {
    let mut chars = identifier.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(DataSourceError::UnsupportedPath(identifier.to_string()));
    }
    Ok(format!("\"{}\"", identifier))
}

#[async_trait]
impl DataSource for SqlDataSource {
    async fn query(&self, query: &DataQuery) -> Result<Vec<Row>, DataSourceError> {
        let (sql, params) = build_select(query, self.offset)?;
        let stmt = Statement::from_sql_and_values(DatabaseBackend::Sqlite, &sql, params);
        let results = self.db.query_all(stmt).await?;

        let mut rows = Vec::with_capacity(results.len());
        for result in &results {
            let mut row = Row::new();
            for (i, field) in query.projection.iter().enumerate() {
                row.insert(field.path.clone(), self.decode(result, i, field)?);
            }
            rows.push(row);
        }
        Ok(rows)
    }
}
