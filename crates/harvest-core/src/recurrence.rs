//! # Recurrence Module
//!
//! Expands a market event's schedule into concrete event days.
//!
//! ```text
//! single     2024-03-02                       → [03-02]
//! multi_day  2024-03-02 ..= 2024-03-04        → [03-02, 03-03, 03-04]
//! weekly     2024-03-02 until 2024-03-23      → [03-02, 03-09, 03-16, 03-23]
//! biweekly   2024-03-02 until 2024-03-30      → [03-02, 03-16, 03-30]
//! monthly    2024-01-31 until 2024-04-30      → [01-31, 02-29, 03-31, 04-30]
//! ```
//!
//! Monthly events keep the start date's day-of-month and clamp it to the end
//! of shorter months. A multi-day event longer than
//! [`MAX_EVENT_OCCURRENCES`](crate::MAX_EVENT_OCCURRENCES) days is rejected;
//! recurring series stop after that many occurrences.

use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ValidationError;
use crate::types::EventDay;
use crate::MAX_EVENT_OCCURRENCES;

// =============================================================================
// Event Types
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Single,
    MultiDay,
    Recurring,
}

impl Default for EventType {
    fn default() -> Self {
        EventType::Single
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePattern {
    Weekly,
    Biweekly,
    Monthly,
}

/// The date-related fields of a market event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSchedule {
    pub event_type: EventType,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub pattern: Option<RecurrencePattern>,
    pub until: Option<NaiveDate>,
}

impl EventSchedule {
    /// A one-day event with no times.
    pub fn single(date: NaiveDate) -> Self {
        EventSchedule {
            event_type: EventType::Single,
            start_date: date,
            end_date: None,
            start_time: None,
            end_time: None,
            pattern: None,
            until: None,
        }
    }

    /// Checks that the fields make sense for the event type.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if end <= start {
                return Err(ValidationError::Inconsistent {
                    field: "end_time".to_string(),
                    reason: "must be after start_time".to_string(),
                });
            }
        }

        match self.event_type {
            EventType::Single => Ok(()),
            EventType::MultiDay => {
                let end = self.end_date.ok_or_else(|| ValidationError::required("end_date"))?;
                if end < self.start_date {
                    return Err(ValidationError::Inconsistent {
                        field: "end_date".to_string(),
                        reason: "must not be before start_date".to_string(),
                    });
                }
                let span = (end - self.start_date).num_days() + 1;
                if span > MAX_EVENT_OCCURRENCES as i64 {
                    return Err(ValidationError::Inconsistent {
                        field: "end_date".to_string(),
                        reason: format!(
                            "a multi-day event spans at most {MAX_EVENT_OCCURRENCES} days"
                        ),
                    });
                }
                Ok(())
            }
            EventType::Recurring => {
                if self.pattern.is_none() {
                    return Err(ValidationError::required("recurrence_pattern"));
                }
                let until = self
                    .until
                    .ok_or_else(|| ValidationError::required("recurrence_end_date"))?;
                if until < self.start_date {
                    return Err(ValidationError::Inconsistent {
                        field: "recurrence_end_date".to_string(),
                        reason: "must not be before start_date".to_string(),
                    });
                }
                Ok(())
            }
        }
    }
}

// =============================================================================
// Expansion
// =============================================================================

/// Expands a schedule into its event dates, validating it first.
pub fn expand_event_days(schedule: &EventSchedule) -> Result<Vec<NaiveDate>, ValidationError> {
    schedule.validate()?;

    let start = schedule.start_date;
    let days = match (schedule.event_type, schedule.pattern) {
        (EventType::Single, _) => vec![start],
        (EventType::MultiDay, _) => {
            let end = schedule.end_date.unwrap_or(start);
            step_by_days(start, end, 1)
        }
        (EventType::Recurring, Some(RecurrencePattern::Weekly)) => {
            step_by_days(start, schedule.until.unwrap_or(start), 7)
        }
        (EventType::Recurring, Some(RecurrencePattern::Biweekly)) => {
            step_by_days(start, schedule.until.unwrap_or(start), 14)
        }
        (EventType::Recurring, Some(RecurrencePattern::Monthly)) => {
            monthly(start, schedule.until.unwrap_or(start))
        }
        (EventType::Recurring, None) => vec![start],
    };

    Ok(days)
}

fn step_by_days(start: NaiveDate, until: NaiveDate, step: i64) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut current = start;
    while current <= until && days.len() < MAX_EVENT_OCCURRENCES {
        days.push(current);
        current += Duration::days(step);
    }
    days
}

fn monthly(start: NaiveDate, until: NaiveDate) -> Vec<NaiveDate> {
    let anchor_day = start.day();
    let mut days = Vec::new();
    let (mut year, mut month) = (start.year(), start.month());

    while days.len() < MAX_EVENT_OCCURRENCES {
        let day = anchor_day.min(days_in_month(year, month));
        let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
            break;
        };
        if date > until {
            break;
        }
        days.push(date);

        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }

    days
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

// =============================================================================
// Calendar
// =============================================================================

/// Event days falling inside `from..=to`, in date order.
pub fn occurrences_between(days: &[EventDay], from: NaiveDate, to: NaiveDate) -> Vec<EventDay> {
    let mut hits: Vec<EventDay> = days
        .iter()
        .filter(|d| d.event_date >= from && d.event_date <= to)
        .cloned()
        .collect();
    hits.sort_by(|a, b| {
        a.event_date
            .cmp(&b.event_date)
            .then_with(|| a.start_time.cmp(&b.start_time))
    });
    hits
}

/// Validates a calendar query range.
pub fn validate_range(from: NaiveDate, to: NaiveDate) -> Result<(), ValidationError> {
    if to < from {
        return Err(ValidationError::Inconsistent {
            field: "to".to_string(),
            reason: "must not be before from".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn recurring(start: &str, pattern: RecurrencePattern, until: &str) -> EventSchedule {
        EventSchedule {
            event_type: EventType::Recurring,
            start_date: d(start),
            end_date: None,
            start_time: None,
            end_time: None,
            pattern: Some(pattern),
            until: Some(d(until)),
        }
    }

    #[test]
    fn test_single_day() {
        let days = expand_event_days(&EventSchedule::single(d("2024-03-02"))).unwrap();
        assert_eq!(days, vec![d("2024-03-02")]);
    }

    #[test]
    fn test_multi_day_inclusive() {
        let schedule = EventSchedule {
            event_type: EventType::MultiDay,
            end_date: Some(d("2024-03-04")),
            ..EventSchedule::single(d("2024-03-02"))
        };
        let days = expand_event_days(&schedule).unwrap();
        assert_eq!(days, vec![d("2024-03-02"), d("2024-03-03"), d("2024-03-04")]);
    }

    #[test]
    fn test_weekly_and_biweekly() {
        let weekly = recurring("2024-03-02", RecurrencePattern::Weekly, "2024-03-23");
        let weekly = expand_event_days(&weekly).unwrap();
        assert_eq!(weekly.len(), 4);
        assert_eq!(weekly[3], d("2024-03-23"));

        let biweekly = recurring("2024-03-02", RecurrencePattern::Biweekly, "2024-03-29");
        let biweekly = expand_event_days(&biweekly).unwrap();
        assert_eq!(biweekly, vec![d("2024-03-02"), d("2024-03-16")]);
    }

    #[test]
    fn test_monthly_clamps_to_month_end() {
        let monthly = recurring("2024-01-31", RecurrencePattern::Monthly, "2024-04-30");
        let days = expand_event_days(&monthly).unwrap();
        assert_eq!(
            days,
            vec![d("2024-01-31"), d("2024-02-29"), d("2024-03-31"), d("2024-04-30")]
        );
    }

    #[test]
    fn test_overlong_multi_day_is_rejected() {
        let schedule = EventSchedule {
            event_type: EventType::MultiDay,
            end_date: Some(d("2030-01-01")),
            ..EventSchedule::single(d("2024-01-01"))
        };
        assert!(matches!(
            expand_event_days(&schedule),
            Err(ValidationError::Inconsistent { ref field, .. }) if field == "end_date"
        ));

        // 2024 is a leap year: Jan 1 to Dec 31 is exactly 366 days.
        let full_year = EventSchedule {
            end_date: Some(d("2024-12-31")),
            ..schedule
        };
        assert_eq!(expand_event_days(&full_year).unwrap().len(), MAX_EVENT_OCCURRENCES);
    }

    #[test]
    fn test_recurring_series_is_capped() {
        let schedule = recurring("2024-01-01", RecurrencePattern::Weekly, "2040-01-01");
        assert_eq!(expand_event_days(&schedule).unwrap().len(), MAX_EVENT_OCCURRENCES);
    }

    #[test]
    fn test_validation() {
        let backwards = EventSchedule {
            event_type: EventType::MultiDay,
            end_date: Some(d("2024-03-01")),
            ..EventSchedule::single(d("2024-03-02"))
        };
        assert!(expand_event_days(&backwards).is_err());

        let no_pattern = EventSchedule {
            event_type: EventType::Recurring,
            until: Some(d("2024-04-01")),
            ..EventSchedule::single(d("2024-03-02"))
        };
        assert!(matches!(
            no_pattern.validate(),
            Err(ValidationError::Required { .. })
        ));

        let bad_times = EventSchedule {
            start_time: NaiveTime::from_hms_opt(14, 0, 0),
            end_time: NaiveTime::from_hms_opt(9, 0, 0),
            ..EventSchedule::single(d("2024-03-02"))
        };
        assert!(bad_times.validate().is_err());
    }

    #[test]
    fn test_occurrences_between() {
        let day = |date: &str| EventDay {
            id: date.to_string(),
            event_id: "e".to_string(),
            event_date: d(date),
            start_time: None,
            end_time: None,
        };
        let days = vec![day("2024-03-16"), day("2024-03-02"), day("2024-04-06")];
        let hits = occurrences_between(&days, d("2024-03-01"), d("2024-03-31"));
        let dates: Vec<_> = hits.iter().map(|h| h.event_date).collect();
        assert_eq!(dates, vec![d("2024-03-02"), d("2024-03-16")]);

        assert!(validate_range(d("2024-03-02"), d("2024-03-01")).is_err());
    }
}
