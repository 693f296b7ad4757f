use super::{EntityMetadata, OwnerId};

/// Трейт для корня агрегата
///
/// Определяет обязательные методы и метаданные для всех KPI-агрегатов
pub trait AggregateRoot {
    /// Тип идентификатора агрегата
    type Id;

    fn id(&self) -> Self::Id;

    fn owner(&self) -> Option<OwnerId>;

    /// Бизнес-код записи (например, "ventas-mes")
    fn code(&self) -> &str;

    fn metadata(&self) -> &EntityMetadata;

    /// Индекс агрегата в системе (например, "a026")
    fn aggregate_index() -> &'static str;

    /// Имя коллекции для БД (например, "kpi_metric")
    fn collection_name() -> &'static str;

    /// Имя элемента для UI
    fn element_name() -> &'static str;

    /// Полное имя агрегата, совпадает с именем таблицы (например, "a026_kpi_metric")
    fn full_name() -> String {
        format!("{}_{}", Self::aggregate_index(), Self::collection_name())
    }

    /// Принадлежит ли запись указанной компании
    fn is_owned_by(&self, owner: &OwnerId) -> bool {
        self.owner().as_ref() == Some(owner)
    }
}
