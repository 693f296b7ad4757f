use crate::domain::a026_kpi_metric::aggregate::Aggregation;
use crate::domain::common::{AggregateRoot, BaseAggregate, EntityMetadata, OwnerId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

crate::uuid_id!(
    /// ID типа для агрегата KPI Source
    KpiSourceId
);

crate::uuid_id!(
    /// ID поля источника
    KpiFieldId
);

// ============================================================================
// Field
// ============================================================================

/// Тип поля источника
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Numeric,
    Date,
    Dimension,
    Boolean,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Numeric => "numeric",
            FieldType::Date => "date",
            FieldType::Dimension => "dimension",
            FieldType::Boolean => "boolean",
        }
    }
}

/// Поле, доступное в источнике данных
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSourceField {
    pub id: KpiFieldId,
    /// Путь к значению в сущности (например, "total" или "client__gender")
    pub path: String,
    pub label: String,
    pub field_type: FieldType,
    /// Разрешённые агрегации (только для числовых полей, пусто = все)
    #[serde(default)]
    pub allowed_aggregations: Vec<Aggregation>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub order: i32,
    /// Поле предлагается по умолчанию в конструкторах
    #[serde(default)]
    pub is_default: bool,
}

impl KpiSourceField {
    pub fn new(path: &str, label: &str, field_type: FieldType) -> Self {
        Self {
            id: KpiFieldId::new_v4(),
            path: path.to_string(),
            label: label.to_string(),
            field_type,
            allowed_aggregations: vec![],
            metadata: Map::new(),
            order: 0,
            is_default: false,
        }
    }

    pub fn with_aggregations(mut self, aggregations: &[Aggregation]) -> Self {
        self.allowed_aggregations = aggregations.to_vec();
        self
    }

    /// Пустой список означает, что допустима любая агрегация
    pub fn allows(&self, aggregation: Aggregation) -> bool {
        self.allowed_aggregations.is_empty() || self.allowed_aggregations.contains(&aggregation)
    }
}

// ============================================================================
// Aggregate
// ============================================================================

/// Агрегат KPI Source
///
/// Логический набор данных: ссылка на реальную сущность хранилища,
/// базовые фильтры и список типизированных полей.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSource {
    #[serde(flatten)]
    pub base: BaseAggregate<KpiSourceId>,

    /// Имя сущности/таблицы, из которой читаются строки
    pub entity: String,
    /// Поле даты по умолчанию для временных фильтров
    pub default_date_field: Option<String>,
    /// Фильтры, которые применяются всегда: `{ path: value | [values] }`
    #[serde(default)]
    pub base_filters: Map<String, Value>,
    /// Произвольные настройки источника
    #[serde(default)]
    pub extra_config: Map<String, Value>,
    #[serde(default)]
    pub fields: Vec<KpiSourceField>,
}

impl KpiSource {
    pub fn new_for_insert(
        owner: Option<OwnerId>,
        code: String,
        description: String,
        entity: String,
    ) -> Self {
        Self {
            base: BaseAggregate::new(KpiSourceId::new_v4(), owner, code, description),
            entity,
            default_date_field: None,
            base_filters: Map::new(),
            extra_config: Map::new(),
            fields: vec![],
        }
    }

    pub fn with_field(mut self, field: KpiSourceField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field(&self, id: &KpiFieldId) -> Option<&KpiSourceField> {
        self.fields.iter().find(|f| &f.id == id)
    }

    pub fn field_by_path(&self, path: &str) -> Option<&KpiSourceField> {
        self.fields.iter().find(|f| f.path == path)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.base.validate()?;
        if self.entity.trim().is_empty() {
            return Err("Сущность источника не может быть пустой".into());
        }
        Ok(())
    }

    pub fn before_write(&mut self) {
        self.base.touch();
    }
}

impl AggregateRoot for KpiSource {
    type Id = KpiSourceId;

    fn id(&self) -> Self::Id {
        self.base.id
    }

    fn owner(&self) -> Option<OwnerId> {
        self.base.owner
    }

    fn code(&self) -> &str {
        &self.base.code
    }

    fn metadata(&self) -> &EntityMetadata {
        &self.base.metadata
    }

    fn aggregate_index() -> &'static str {
        "a025"
    }

    fn collection_name() -> &'static str {
        "kpi_source"
    }

    fn element_name() -> &'static str {
        "Источник KPI"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_lookup_by_id_and_path() {
        let total = KpiSourceField::new("total", "Total", FieldType::Numeric);
        let total_id = total.id;
        let source = KpiSource::new_for_insert(None, "sales".into(), "Sales".into(), "sales".into())
            .with_field(total)
            .with_field(KpiSourceField::new("created_at", "Created", FieldType::Date));

        assert_eq!(source.field(&total_id).map(|f| f.path.as_str()), Some("total"));
        assert_eq!(
            source.field_by_path("created_at").map(|f| f.field_type),
            Some(FieldType::Date)
        );
        assert!(source.base.is_template);
        assert_eq!(KpiSource::full_name(), "a025_kpi_source");
    }

    #[test]
    fn test_empty_allowed_aggregations_allow_everything() {
        let open = KpiSourceField::new("total", "Total", FieldType::Numeric);
        assert!(open.allows(Aggregation::Max));

        let restricted = open.with_aggregations(&[Aggregation::Sum]);
        assert!(restricted.allows(Aggregation::Sum));
        assert!(!restricted.allows(Aggregation::Avg));
    }
}
