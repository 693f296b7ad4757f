use serde::{Deserialize, Serialize};

use super::{EntityMetadata, OwnerId};

/// Базовые поля KPI-агрегатов
///
/// `owner = None` означает шаблон (blueprint), который копируется в компанию
/// перед использованием.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseAggregate<Id> {
    /// Нулевой ID в запросе на сохранение означает новую запись
    #[serde(default)]
    pub id: Id,
    /// Компания-владелец
    pub owner: Option<OwnerId>,
    /// Бизнес-код, уникален в пределах владельца
    pub code: String,
    /// Наименование
    pub description: String,
    pub comment: Option<String>,
    /// Шаблон, доступный для клонирования
    #[serde(default)]
    pub is_template: bool,
    #[serde(default)]
    pub metadata: EntityMetadata,
}

impl<Id> BaseAggregate<Id> {
    pub fn new(id: Id, owner: Option<OwnerId>, code: String, description: String) -> Self {
        Self {
            id,
            owner,
            code,
            description,
            comment: None,
            is_template: owner.is_none(),
            metadata: EntityMetadata::new(),
        }
    }

    pub fn touch(&mut self) {
        self.metadata.touch();
    }

    /// Проверка обязательных полей, общая для всех агрегатов
    pub fn validate(&self) -> Result<(), String> {
        if self.code.trim().is_empty() {
            return Err("Код не может быть пустым".into());
        }
        if self.description.trim().is_empty() {
            return Err("Наименование не может быть пустым".into());
        }
        Ok(())
    }
}
