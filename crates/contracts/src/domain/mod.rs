pub mod a025_kpi_source;
pub mod a026_kpi_metric;
pub mod a027_kpi_definition;
pub mod a028_kpi_dashboard;
pub mod common;
