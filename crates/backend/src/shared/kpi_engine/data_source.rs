//! Обобщённый табличный источник данных.
//!
//! Движок не знает о SQL: адаптер получает сущность, предикат и список
//! полей, а возвращает строки с нормализованными значениями.

use async_trait::async_trait;
use std::collections::HashMap;

use super::error::DataSourceError;
use super::filter_compiler::Predicate;
use super::schema_registry::{FieldRef, SourceDescriptor};
use super::value::Scalar;
#[cfg(test)]
use super::value::normalize;
#[cfg(test)]
use chrono::FixedOffset;
#[cfg(test)]
use serde_json::Value;

/// Строка результата: путь поля -> значение
pub type Row = HashMap<String, Scalar>;

#[derive(Debug, Clone)]
pub struct DataQuery {
    pub source: SourceDescriptor,
    pub predicate: Predicate,
    pub projection: Vec<FieldRef>,
}

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn query(&self, query: &DataQuery) -> Result<Vec<Row>, DataSourceError>;
}

// ============================================================================
// In-memory adapter
// ============================================================================

/// Источник над JSON-строками в памяти (тестовые данные движка).
///
/// Путь поля проходит по вложенным объектам через `__` или `.`
/// (`client__gender`, `client.gender`). Значения, которые не приводятся
/// к объявленному типу, считаются NULL.
#[cfg(test)]
pub struct MemoryDataSource {
    entities: HashMap<String, Vec<Value>>,
    offset: FixedOffset,
}

#[cfg(test)]
impl MemoryDataSource {
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            entities: HashMap::new(),
            offset,
        }
    }

    pub fn with_entity(mut self, entity: &str, rows: Vec<Value>) -> Self {
        self.entities.insert(entity.to_string(), rows);
        self
    }

    fn cell(&self, row: &Value, field: &FieldRef) -> Scalar {
        lookup(row, &field.path)
            .and_then(|raw| normalize(raw, field.field_type, self.offset).ok())
            .unwrap_or(Scalar::Null)
    }
}

/// Значение по пути в JSON-объекте
#[cfg(test)]
fn lookup<'v>(row: &'v Value, path: &str) -> Option<&'v Value> {
    if let Some(direct) = row.get(path) {
        return Some(direct);
    }
    let mut current = row;
    for part in path.split("__").flat_map(|p| p.split('.')) {
        current = current.get(part)?;
    }
    Some(current)
}

#[cfg(test)]
#[async_trait]
impl DataSource for MemoryDataSource {
    async fn query(&self, query: &DataQuery) -> Result<Vec<Row>, DataSourceError> {
        let rows = self
            .entities
            .get(&query.source.entity)
            .ok_or_else(|| DataSourceError::UnknownEntity(query.source.entity.clone()))?;

        let result = rows
            .iter()
            .filter(|row| query.predicate.matches(&|field: &FieldRef| self.cell(row, field)))
            .map(|row| {
                query
                    .projection
                    .iter()
                    .map(|field| (field.path.clone(), self.cell(row, field)))
                    .collect::<Row>()
            })
            .collect();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::kpi_engine::filter_compiler::CompareOp;
    use crate::shared::kpi_engine::value::utc;
    use contracts::domain::a025_kpi_source::aggregate::FieldType;
    use serde_json::json;

    fn descriptor() -> SourceDescriptor {
        SourceDescriptor {
            code: "sales".into(),
            entity: "sales".into(),
        }
    }

    #[tokio::test]
    async fn test_nested_paths_and_projection() {
        let ds = MemoryDataSource::new(utc()).with_entity(
            "sales",
            vec![
                json!({"total": "10.5", "client": {"gender": "f"}}),
                json!({"total": 4, "client": {"gender": "m"}}),
            ],
        );
        let gender = FieldRef::new("client__gender", FieldType::Dimension);
        let total = FieldRef::new("total", FieldType::Numeric);
        let query = DataQuery {
            source: descriptor(),
            predicate: Predicate::Compare {
                field: FieldRef::new("client.gender", FieldType::Dimension),
                op: CompareOp::Eq,
                value: Scalar::Text("f".into()),
            },
            projection: vec![total.clone(), gender.clone()],
        };

        let rows = ds.query(&query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("total"), Some(&Scalar::Number(10.5)));
        assert_eq!(rows[0].get("client__gender"), Some(&Scalar::Text("f".into())));
    }

    #[tokio::test]
    async fn test_unknown_entity_is_an_error() {
        let ds = MemoryDataSource::new(utc());
        let query = DataQuery {
            source: descriptor(),
            predicate: Predicate::True,
            projection: vec![],
        };
        assert!(matches!(
            ds.query(&query).await,
            Err(DataSourceError::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_unparseable_cell_is_null() {
        let ds = MemoryDataSource::new(utc());
        let row = json!({"total": "n/a"});
        assert_eq!(ds.cell(&row, &FieldRef::new("total", FieldType::Numeric)), Scalar::Null);
        assert_eq!(ds.cell(&row, &FieldRef::new("missing", FieldType::Numeric)), Scalar::Null);
    }
}
