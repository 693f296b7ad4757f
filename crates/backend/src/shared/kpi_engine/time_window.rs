use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use contracts::domain::a026_kpi_metric::aggregate::{TimeWindow, WindowSpec};
use contracts::shared::kpi::ResolvedInterval;

use super::error::KpiError;

/// Разрешить окно в интервал `[start, end)` относительно момента `at`.
///
/// `None` означает `all_time`: временной фильтр не применяется.
pub fn resolve(spec: &WindowSpec, at: NaiveDateTime) -> Result<Option<ResolvedInterval>, KpiError> {
    let today = at.date();
    let interval = match spec.window {
        TimeWindow::AllTime => return Ok(None),
        TimeWindow::Today => day_span(today, today)?,
        TimeWindow::Yesterday => {
            let yesterday = shift_days(today, -1)?;
            day_span(yesterday, yesterday)?
        }
        TimeWindow::ThisWeek => {
            let monday = start_of_week(today);
            day_span(monday, shift_days(monday, 6)?)?
        }
        TimeWindow::Last7Days => rolling(at, 7),
        TimeWindow::Last30Days => rolling(at, 30),
        TimeWindow::ThisMonth => {
            let first = ymd(today.year(), today.month(), 1)?;
            let next = if today.month() == 12 {
                ymd(today.year() + 1, 1, 1)?
            } else {
                ymd(today.year(), today.month() + 1, 1)?
            };
            ResolvedInterval {
                start: midnight(first),
                end: midnight(next),
            }
        }
        TimeWindow::ThisYear => ResolvedInterval {
            start: midnight(ymd(today.year(), 1, 1)?),
            end: midnight(ymd(today.year() + 1, 1, 1)?),
        },
        TimeWindow::Custom => {
            let (start, end) = match (spec.custom_start, spec.custom_end) {
                (Some(s), Some(e)) => (s, e),
                _ => {
                    return Err(KpiError::InvalidWindowConfig(
                        "custom window requires both custom_start and custom_end".into(),
                    ))
                }
            };
            if start > end {
                return Err(KpiError::InvalidWindowConfig(format!(
                    "custom_end {} is before custom_start {}",
                    end, start
                )));
            }
            day_span(start, end)?
        }
    };
    Ok(Some(interval))
}

/// Предыдущий период той же длины, заканчивающийся в `start`
pub fn previous(interval: &ResolvedInterval) -> ResolvedInterval {
    let length = interval.end - interval.start;
    ResolvedInterval {
        start: interval.start - length,
        end: interval.start,
    }
}

/// Текущий и предыдущий интервалы для сравнения периодов.
/// Для `all_time` сравнение не определено.
pub fn resolve_with_previous(
    spec: &WindowSpec,
    at: NaiveDateTime,
) -> Result<(ResolvedInterval, ResolvedInterval), KpiError> {
    match resolve(spec, at)? {
        Some(current) => {
            let prev = previous(&current);
            Ok((current, prev))
        }
        None => Err(KpiError::InvalidWindowConfig(
            "comparison against the previous period is undefined for all_time".into(),
        )),
    }
}

/// Начало недели (понедельник) для даты
pub fn start_of_week(date: NaiveDate) -> NaiveDate {
    let days_from_monday = date.weekday().num_days_from_monday();
    date - Duration::days(days_from_monday as i64)
}

fn rolling(at: NaiveDateTime, days: i64) -> ResolvedInterval {
    ResolvedInterval {
        start: at - Duration::days(days),
        end: at,
    }
}

/// Полные календарные дни `[first 00:00, last + 1 00:00)`
fn day_span(first: NaiveDate, last: NaiveDate) -> Result<ResolvedInterval, KpiError> {
    Ok(ResolvedInterval {
        start: midnight(first),
        end: midnight(shift_days(last, 1)?),
    })
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(chrono::NaiveTime::MIN)
}

fn shift_days(date: NaiveDate, days: i64) -> Result<NaiveDate, KpiError> {
    date.checked_add_signed(Duration::days(days))
        .ok_or_else(|| KpiError::InvalidWindowConfig(format!("date out of range: {}", date)))
}

fn ymd(year: i32, month: u32, day: u32) -> Result<NaiveDate, KpiError> {
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        KpiError::InvalidWindowConfig(format!("invalid date {}-{}-{}", year, month, day))
    })
}
