crate::uuid_id!(
    /// Компания-владелец (tenant). Все KPI-агрегаты, кроме шаблонов, привязаны к ней.
    OwnerId
);
