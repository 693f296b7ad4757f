//! Движок вычисления KPI.
//!
//! Конфигурация (источники, метрики, определения, дашборды) читается через
//! [`ConfigStore`], строки - через обобщённый [`DataSource`]. Перед каждым
//! вычислением конфигурация заново проверяется валидатором.

pub mod aggregation;
pub mod config_store;
pub mod data_source;
pub mod dimension;
pub mod engine;
pub mod error;
pub mod filter_compiler;
pub mod formula;
pub mod metric_evaluator;
pub mod schema_registry;
pub mod sql_source;
pub mod sqlite_store;
pub mod time_window;
pub mod validator;
pub mod value;

#[cfg(test)]
pub mod testing;

pub use config_store::ConfigStore;
pub use data_source::DataSource;
pub use engine::KpiEngine;
pub use error::{DataSourceError, KpiError};
pub use metric_evaluator::EngineSettings;
pub use sql_source::SqlDataSource;
pub use sqlite_store::SqliteConfigStore;
