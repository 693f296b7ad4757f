//! Shared KPI types: configuration aggregates and evaluation contracts.
//!
//! Everything here is plain data. The backend owns the engine and I/O.

pub mod domain;
pub mod shared;
