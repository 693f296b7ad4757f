//! Типизированные значения ячеек и нормализация по типу поля.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};
use contracts::domain::a025_kpi_source::aggregate::FieldType;
use serde_json::Value;
#[cfg(test)]
use std::cmp::Ordering;

/// Значение ячейки после нормализации
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Number(f64),
    Text(String),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Scalar::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Строковое представление для текстовых операторов и ключей разбивки
    pub fn render(&self) -> Option<String> {
        match self {
            Scalar::Null => None,
            Scalar::Number(n) => Some(render_number(*n)),
            Scalar::Text(s) => Some(s.clone()),
            Scalar::Bool(b) => Some(b.to_string()),
            Scalar::DateTime(dt) => Some(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
        }
    }

    /// Сравнение однотипных значений; разнотипные несравнимы
    #[cfg(test)]
    pub fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Number(a), Scalar::Number(b)) => a.partial_cmp(b),
            (Scalar::Text(a), Scalar::Text(b)) => Some(a.cmp(b)),
            (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
            (Scalar::DateTime(a), Scalar::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// `5.0` -> `"5"`, `2.5` -> `"2.5"`
fn render_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Привести JSON-значение к типу поля.
///
/// Ошибка возвращается, когда значение не может представлять поле
/// этого типа (например, `"abc"` для числового поля).
pub fn normalize(value: &Value, field_type: FieldType, offset: FixedOffset) -> Result<Scalar, String> {
    if value.is_null() {
        return Ok(Scalar::Null);
    }
    match field_type {
        FieldType::Numeric => match value {
            Value::Number(n) => n
                .as_f64()
                .map(Scalar::Number)
                .ok_or_else(|| format!("number out of range: {}", n)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Scalar::Number)
                .ok_or_else(|| format!("expected a number, got '{}'", s)),
            other => Err(format!("expected a number, got {}", other)),
        },
        FieldType::Date => match value {
            Value::String(s) => parse_datetime(s, offset)
                .map(Scalar::DateTime)
                .ok_or_else(|| format!("expected a date, got '{}'", s)),
            other => Err(format!("expected a date, got {}", other)),
        },
        FieldType::Boolean => match value {
            Value::Bool(b) => Ok(Scalar::Bool(*b)),
            Value::Number(n) if n.as_f64() == Some(1.0) => Ok(Scalar::Bool(true)),
            Value::Number(n) if n.as_f64() == Some(0.0) => Ok(Scalar::Bool(false)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Scalar::Bool(true)),
                "false" | "0" => Ok(Scalar::Bool(false)),
                _ => Err(format!("expected a boolean, got '{}'", s)),
            },
            other => Err(format!("expected a boolean, got {}", other)),
        },
        FieldType::Dimension => match value {
            Value::String(s) => Ok(Scalar::Text(s.clone())),
            Value::Number(n) => n
                .as_f64()
                .map(Scalar::Number)
                .ok_or_else(|| format!("number out of range: {}", n)),
            Value::Bool(b) => Ok(Scalar::Bool(*b)),
            other => Err(format!("expected a scalar, got {}", other)),
        },
    }
}

/// Разбор даты/времени. Значения с часовым поясом переводятся в
/// локальное время компании (`offset`), остальные считаются локальными.
pub fn parse_datetime(s: &str, offset: FixedOffset) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&offset).naive_local())
}

/// Смещение часового пояса компании в минутах -> `FixedOffset`
pub fn offset_from_minutes(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes * 60).unwrap_or_else(utc)
}

pub fn utc() -> FixedOffset {
    Utc.fix()
}
