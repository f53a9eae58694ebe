use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// A recurrence rule on a [`ScheduledTask`](crate::scheduled_task::ScheduledTask).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecurrenceType {
    Once,
    Daily,
    Weekly,
    Monthly,
}

/// `scheduled_time` plus the optional `scheduled_day` qualifier (weekday for
/// WEEKLY, day-of-month for MONTHLY).
#[derive(Debug, Clone, Copy)]
pub struct RecurrenceRule {
    pub recurrence_type: RecurrenceType,
    pub scheduled_time: NaiveTime,
    /// WEEKLY: 0..6 (Mon..Sun). MONTHLY: 1..31. Ignored otherwise.
    pub scheduled_day: Option<u32>,
}

/// Errors raised by [`validate_recurrence_constraints`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecurrenceValidationError {
    #[error("WEEKLY scheduled_day must be in 0..=6 (Mon..Sun), got {0}")]
    WeekdayOutOfRange(u32),
    #[error("MONTHLY scheduled_day must be in 1..=31, got {0}")]
    DayOfMonthOutOfRange(u32),
    #[error("{0:?} recurrence requires scheduled_day")]
    MissingScheduledDay(RecurrenceType),
}

/// Validate the `scheduled_day` bounds required by a recurrence type.
///
/// Mirrors the scheduler service's write-time validation: WEEKLY requires
/// `0..=6`, MONTHLY requires `1..=31`; ONCE/DAILY ignore `scheduled_day`.
pub fn validate_recurrence_constraints(
    recurrence_type: RecurrenceType,
    scheduled_day: Option<u32>,
) -> Result<(), RecurrenceValidationError> {
    match recurrence_type {
        RecurrenceType::Once | RecurrenceType::Daily => Ok(()),
        RecurrenceType::Weekly => match scheduled_day {
            Some(day) if day <= 6 => Ok(()),
            Some(day) => Err(RecurrenceValidationError::WeekdayOutOfRange(day)),
            None => Err(RecurrenceValidationError::MissingScheduledDay(
                recurrence_type,
            )),
        },
        RecurrenceType::Monthly => match scheduled_day {
            Some(day) if (1..=31).contains(&day) => Ok(()),
            Some(day) => Err(RecurrenceValidationError::DayOfMonthOutOfRange(day)),
            None => Err(RecurrenceValidationError::MissingScheduledDay(
                recurrence_type,
            )),
        },
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let first_of_next = chrono::NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .expect("valid calendar arithmetic");
    let first_of_this =
        chrono::NaiveDate::from_ymd_opt(year, month, 1).expect("valid calendar arithmetic");
    (first_of_next - first_of_this).num_days() as u32
}

fn at_time_on(year: i32, month: u32, day: u32, time: NaiveTime) -> DateTime<Utc> {
    let date = chrono::NaiveDate::from_ymd_opt(year, month, day).expect("clamped day is valid");
    Utc.from_utc_datetime(&date.and_time(time))
}

/// Compute the next fire time for `rule` strictly after `from_time`.
///
/// `allow_once` gates ONCE recurrence: when `false` (the steady-state
/// `check_due` recompute), ONCE never fires again once scheduled;
/// when `true` (task creation), ONCE behaves like DAILY for the purpose of
/// picking its single occurrence.
#[must_use]
pub fn next_fire(
    rule: &RecurrenceRule,
    from_time: DateTime<Utc>,
    allow_once: bool,
) -> Option<DateTime<Utc>> {
    match rule.recurrence_type {
        RecurrenceType::Once => {
            if allow_once {
                Some(next_daily(rule.scheduled_time, from_time))
            } else {
                None
            }
        }
        RecurrenceType::Daily => Some(next_daily(rule.scheduled_time, from_time)),
        RecurrenceType::Weekly => Some(next_weekly(
            rule.scheduled_day.unwrap_or(0),
            rule.scheduled_time,
            from_time,
        )),
        RecurrenceType::Monthly => Some(next_monthly(
            rule.scheduled_day.unwrap_or(1),
            rule.scheduled_time,
            from_time,
        )),
    }
}

fn next_daily(time: NaiveTime, from_time: DateTime<Utc>) -> DateTime<Utc> {
    let today = at_time_on(from_time.year(), from_time.month(), from_time.day(), time);
    if today > from_time {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

fn next_weekly(target_weekday: u32, time: NaiveTime, from_time: DateTime<Utc>) -> DateTime<Utc> {
    let current_weekday = from_time.weekday().num_days_from_monday();
    let mut days_ahead = (i64::from(target_weekday) - i64::from(current_weekday)).rem_euclid(7);
    if days_ahead == 0 {
        let today_at_time = at_time_on(from_time.year(), from_time.month(), from_time.day(), time);
        if today_at_time <= from_time {
            days_ahead = 7;
        }
    }
    let candidate_date = from_time.date_naive() + chrono::Duration::days(days_ahead);
    Utc.from_utc_datetime(&candidate_date.and_time(time))
}

fn next_monthly(target_day: u32, time: NaiveTime, from_time: DateTime<Utc>) -> DateTime<Utc> {
    let mut year = from_time.year();
    let mut month = from_time.month();
    let max_day = days_in_month(year, month);
    let day = target_day.min(max_day);
    let candidate = at_time_on(year, month, day, time);
    if candidate <= from_time {
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
        let max_day = days_in_month(year, month);
        let day = target_day.min(max_day);
        at_time_on(year, month, day, time)
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn dt(year: i32, month: u32, day: u32, h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &chrono::NaiveDate::from_ymd_opt(year, month, day)
                .unwrap()
                .and_hms_opt(h, m, s)
                .unwrap(),
        )
    }

    #[test]
    fn once_without_allow_once_never_fires() {
        let rule = RecurrenceRule {
            recurrence_type: RecurrenceType::Once,
            scheduled_time: time(9, 0, 0),
            scheduled_day: None,
        };
        assert_eq!(next_fire(&rule, Utc::now(), false), None);
    }

    #[test]
    fn once_with_allow_once_behaves_like_daily() {
        let rule = RecurrenceRule {
            recurrence_type: RecurrenceType::Once,
            scheduled_time: time(9, 0, 0),
            scheduled_day: None,
        };
        let from = dt(2026, 3, 10, 8, 0, 0);
        let next = next_fire(&rule, from, true).unwrap();
        assert_eq!(next, dt(2026, 3, 10, 9, 0, 0));
    }

    #[test]
    fn s1_daily_schedule_rolls_to_next_day_after_fire_time() {
        let rule = RecurrenceRule {
            recurrence_type: RecurrenceType::Daily,
            scheduled_time: time(9, 0, 0),
            scheduled_day: None,
        };
        let from = dt(2026, 3, 10, 9, 0, 0);
        let next = next_fire(&rule, from, false).unwrap();
        assert_eq!(next, dt(2026, 3, 11, 9, 0, 0));
    }

    #[test]
    fn daily_fires_later_today_if_time_still_ahead() {
        let rule = RecurrenceRule {
            recurrence_type: RecurrenceType::Daily,
            scheduled_time: time(9, 0, 0),
            scheduled_day: None,
        };
        let from = dt(2026, 3, 10, 8, 0, 0);
        let next = next_fire(&rule, from, false).unwrap();
        assert_eq!(next, dt(2026, 3, 10, 9, 0, 0));
    }

    #[test]
    fn s6_weekly_same_day_rollover_is_seven_days_later() {
        // Wednesday = 2 (Mon=0). from_time is Wed 09:00, scheduled 08:00 Wed.
        let rule = RecurrenceRule {
            recurrence_type: RecurrenceType::Weekly,
            scheduled_time: time(8, 0, 0),
            scheduled_day: Some(2),
        };
        let from = dt(2026, 3, 11, 9, 0, 0); // a Wednesday
        assert_eq!(from.weekday().num_days_from_monday(), 2);
        let next = next_fire(&rule, from, false).unwrap();
        assert_eq!(next, dt(2026, 3, 18, 8, 0, 0));
    }

    #[test]
    fn weekly_same_day_future_time_does_not_roll_over() {
        let rule = RecurrenceRule {
            recurrence_type: RecurrenceType::Weekly,
            scheduled_time: time(10, 0, 0),
            scheduled_day: Some(2),
        };
        let from = dt(2026, 3, 11, 9, 0, 0);
        let next = next_fire(&rule, from, false).unwrap();
        assert_eq!(next, dt(2026, 3, 11, 10, 0, 0));
    }

    #[test]
    fn s2_monthly_day_31_clamps_to_february_28_non_leap() {
        let rule = RecurrenceRule {
            recurrence_type: RecurrenceType::Monthly,
            scheduled_time: time(10, 0, 0),
            scheduled_day: Some(31),
        };
        let from = dt(2026, 1, 31, 12, 0, 0);
        let next = next_fire(&rule, from, false).unwrap();
        assert_eq!(next, dt(2026, 2, 28, 10, 0, 0));
    }

    #[test]
    fn monthly_day_31_clamps_to_february_29_leap_year() {
        let rule = RecurrenceRule {
            recurrence_type: RecurrenceType::Monthly,
            scheduled_time: time(10, 0, 0),
            scheduled_day: Some(31),
        };
        let from = dt(2028, 1, 31, 12, 0, 0);
        let next = next_fire(&rule, from, false).unwrap();
        assert_eq!(next, dt(2028, 2, 29, 10, 0, 0));
    }

    #[test]
    fn monthly_advances_across_year_boundary() {
        let rule = RecurrenceRule {
            recurrence_type: RecurrenceType::Monthly,
            scheduled_time: time(9, 0, 0),
            scheduled_day: Some(15),
        };
        let from = dt(2026, 12, 15, 9, 0, 0);
        let next = next_fire(&rule, from, false).unwrap();
        assert_eq!(next, dt(2027, 1, 15, 9, 0, 0));
    }

    #[test]
    fn monthly_fires_same_month_if_still_ahead() {
        let rule = RecurrenceRule {
            recurrence_type: RecurrenceType::Monthly,
            scheduled_time: time(9, 0, 0),
            scheduled_day: Some(15),
        };
        let from = dt(2026, 3, 10, 9, 0, 0);
        let next = next_fire(&rule, from, false).unwrap();
        assert_eq!(next, dt(2026, 3, 15, 9, 0, 0));
    }

    #[test]
    fn invariant_next_fire_is_always_strictly_after_from_time() {
        let rules = [
            RecurrenceRule {
                recurrence_type: RecurrenceType::Daily,
                scheduled_time: time(9, 0, 0),
                scheduled_day: None,
            },
            RecurrenceRule {
                recurrence_type: RecurrenceType::Weekly,
                scheduled_time: time(8, 0, 0),
                scheduled_day: Some(4),
            },
            RecurrenceRule {
                recurrence_type: RecurrenceType::Monthly,
                scheduled_time: time(10, 0, 0),
                scheduled_day: Some(31),
            },
        ];
        let from = dt(2026, 5, 20, 14, 30, 0);
        for rule in rules {
            let next = next_fire(&rule, from, false).unwrap();
            assert!(next > from, "{rule:?} produced {next} not after {from}");
        }
    }

    #[test]
    fn validate_weekly_bounds() {
        assert!(validate_recurrence_constraints(RecurrenceType::Weekly, Some(6)).is_ok());
        assert!(validate_recurrence_constraints(RecurrenceType::Weekly, Some(7)).is_err());
        assert!(validate_recurrence_constraints(RecurrenceType::Weekly, None).is_err());
    }

    #[test]
    fn validate_monthly_bounds() {
        assert!(validate_recurrence_constraints(RecurrenceType::Monthly, Some(1)).is_ok());
        assert!(validate_recurrence_constraints(RecurrenceType::Monthly, Some(31)).is_ok());
        assert!(validate_recurrence_constraints(RecurrenceType::Monthly, Some(0)).is_err());
        assert!(validate_recurrence_constraints(RecurrenceType::Monthly, Some(32)).is_err());
    }

    #[test]
    fn validate_once_and_daily_ignore_scheduled_day() {
        assert!(validate_recurrence_constraints(RecurrenceType::Once, None).is_ok());
        assert!(validate_recurrence_constraints(RecurrenceType::Daily, None).is_ok());
    }
}
