//! Реестр источников KPI
//!
//! Хранит загруженные источники одного вычисления и отвечает на вопросы
//! "какая сущность стоит за источником" и "какого типа это поле".

use std::collections::HashMap;

use contracts::domain::a025_kpi_source::aggregate::{
    FieldType, KpiFieldId, KpiSource, KpiSourceField, KpiSourceId,
};

use super::error::KpiError;

/// Поле в запросе к источнику данных: путь и объявленный тип
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub path: String,
    pub field_type: FieldType,
}

impl FieldRef {
    pub fn new(path: &str, field_type: FieldType) -> Self {
        Self {
            path: path.to_string(),
            field_type,
        }
    }
}

impl From<&KpiSourceField> for FieldRef {
    fn from(f: &KpiSourceField) -> Self {
        FieldRef::new(&f.path, f.field_type)
    }
}

/// Описание источника для адаптера данных
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub code: String,
    pub entity: String,
}

/// Представление одного источника
#[derive(Debug, Clone, Copy)]
pub struct SourceSchema<'a> {
    source: &'a KpiSource,
}

impl<'a> SourceSchema<'a> {
    pub fn new(source: &'a KpiSource) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &'a KpiSource {
        self.source
    }

    pub fn descriptor(&self) -> SourceDescriptor {
        SourceDescriptor {
            code: self.source.base.code.clone(),
            entity: self.source.entity.clone(),
        }
    }

    /// Поле источника по id; чужое поле - ошибка `FieldNotInSource`
    pub fn field(&self, id: &KpiFieldId) -> Result<&'a KpiSourceField, KpiError> {
        self.source
            .field(id)
            .ok_or_else(|| KpiError::FieldNotInSource {
                field: id.to_string(),
                source_code: self.source.base.code.clone(),
            })
    }

    pub fn field_ref(&self, id: &KpiFieldId) -> Result<FieldRef, KpiError> {
        self.field(id).map(FieldRef::from)
    }

    /// Путь из базовых фильтров: тип берётся из объявленного поля,
    /// необъявленные пути сравниваются как сырые значения
    pub fn path_ref(&self, path: &str) -> FieldRef {
        match self.source.field_by_path(path) {
            Some(field) => FieldRef::from(field),
            None => FieldRef::new(path, FieldType::Dimension),
        }
    }
}

/// Источники, загруженные для одного вычисления
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    sources: HashMap<KpiSourceId, KpiSource>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: KpiSource) {
        self.sources.insert(source.base.id, source);
    }

    pub fn contains(&self, id: &KpiSourceId) -> bool {
        self.sources.contains_key(id)
    }

    pub fn get(&self, id: &KpiSourceId) -> Option<&KpiSource> {
        self.sources.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales() -> KpiSource {
        KpiSource::new_for_insert(None, "sales".into(), "Sales".into(), "sales_orders".into())
            .with_field(KpiSourceField::new("total", "Total", FieldType::Numeric))
            .with_field(KpiSourceField::new("status", "Status", FieldType::Dimension))
    }

    #[test]
    fn test_foreign_field_is_rejected() {
        let source = sales();
        let schema = SourceSchema::new(&source);
        let err = schema.field_ref(&KpiFieldId::new_v4()).unwrap_err();
        assert!(matches!(err, KpiError::FieldNotInSource { ref source_code, .. } if source_code == "sales"));

        let total = schema.field_ref(&source.fields[0].id).unwrap();
        assert_eq!(total, FieldRef::new("total", FieldType::Numeric));
        assert_eq!(schema.descriptor().entity, "sales_orders");
    }

    #[test]
    fn test_undeclared_base_filter_path_is_raw() {
        let source = sales();
        let schema = SourceSchema::new(&source);
        assert_eq!(schema.path_ref("total").field_type, FieldType::Numeric);
        assert_eq!(schema.path_ref("channel").field_type, FieldType::Dimension);
    }

    #[test]
    fn test_registry_finds_registered_sources() {
        let mut registry = SchemaRegistry::new();
        let source = sales();
        let id = source.base.id;
        registry.register(source);
        registry.register(KpiSource::new_for_insert(
            None,
            "appointments".into(),
            "Appointments".into(),
            "appointments".into(),
        ));
        assert!(registry.contains(&id));
        assert_eq!(registry.get(&id).map(|s| s.entity.as_str()), Some("sales_orders"));
        assert!(!registry.contains(&KpiSourceId::new_v4()));
    }
}
