//! Форматирование чисел и значений KPI для отображения

use contracts::domain::a027_kpi_definition::aggregate::FormatType;
use serde_json::{Map, Value};

/// Значение, которое показывается вместо отсутствующего результата
pub const EMPTY_VALUE: &str = "—";

/// Форматирует размер с разделителями тысяч (точками), для логов запросов
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push('.');
        }
        result.push(ch);
    }
    result.chars().rev().collect()
}

/// Число с разделителем тысяч (пробел) и `decimals` знаками после точки
pub fn format_decimal(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value);
    let (integer_part, decimal_part) = match formatted.split_once('.') {
        Some((i, d)) => (i, Some(d)),
        None => (formatted.as_str(), None),
    };

    let mut result = String::new();
    for (i, c) in integer_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 && c != '-' {
            result.push(' ');
        }
        result.push(c);
    }
    let integer: String = result.chars().rev().collect();

    match decimal_part {
        Some(d) => format!("{}.{}", integer, d),
        None => integer,
    }
}

/// Отформатировать результат KPI по `format_type`.
///
/// `extra_config` может задавать `decimals` (по умолчанию 0 для `value`,
/// 2 для `currency`, 1 для `percentage`) и `currency` (символ валюты,
/// по умолчанию `$`). Длительность хранится и выводится в целых минутах.
pub fn format_value(value: Option<f64>, format_type: FormatType, extra_config: &Map<String, Value>) -> String {
    let Some(value) = value else {
        return EMPTY_VALUE.to_string();
    };
    let decimals = |default: u64| {
        extra_config
            .get("decimals")
            .and_then(Value::as_u64)
            .unwrap_or(default)
            .min(6) as usize
    };
    match format_type {
        FormatType::Value => format_decimal(value, decimals(0)),
        FormatType::Currency => {
            let symbol = extra_config
                .get("currency")
                .and_then(Value::as_str)
                .unwrap_or("$");
            let digits = decimals(2);
            if value < 0.0 {
                format!("-{}{}", symbol, format_decimal(-value, digits))
            } else {
                format!("{}{}", symbol, format_decimal(value, digits))
            }
        }
        FormatType::Percentage => format!("{}%", format_decimal(value * 100.0, decimals(1))),
        FormatType::Duration => {
            let total = value.round() as i64;
            let sign = if total < 0 { "-" } else { "" };
            let total = total.abs();
            format!("{}{}h {:02}m", sign, total / 60, total % 60)
        }
    }
}
