use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use tracing::warn;

use recap_core::types::Schedule;

use crate::cron::CronExpr;

/// Compute the next UTC execution time for `schedule` strictly after `from`.
///
/// The result depends on the schedule descriptor and the wall clock only,
/// never on the previous run, so drift cannot accumulate. Returns `None`
/// when the schedule is exhausted (a `Once` whose instant has passed) or can
/// never fire.
pub fn next_run(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Once { at } => {
            // Fire only if the instant is still in the future.
            if *at > from {
                Some(*at)
            } else {
                None
            }
        }

        Schedule::Daily { hour, minute } => {
            let candidate = Utc
                .with_ymd_and_hms(
                    from.year(),
                    from.month(),
                    from.day(),
                    (*hour).min(23) as u32,
                    (*minute).min(59) as u32,
                    0,
                )
                .single()?;
            if candidate > from {
                Some(candidate)
            } else {
                // Today's slot has passed; advance to tomorrow.
                Some(candidate + Duration::days(1))
            }
        }

        Schedule::Weekly { day, hour, minute } => {
            // ISO weekday numbering: 0 = Monday … 6 = Sunday, matching
            // chrono's `num_days_from_monday`.
            let today_dow = from.weekday().num_days_from_monday() as i64;
            let target_dow = (*day as i64).clamp(0, 6);
            let days_ahead = (target_dow - today_dow).rem_euclid(7);

            let candidate_day = from + Duration::days(days_ahead);
            let candidate = Utc
                .with_ymd_and_hms(
                    candidate_day.year(),
                    candidate_day.month(),
                    candidate_day.day(),
                    (*hour).min(23) as u32,
                    (*minute).min(59) as u32,
                    0,
                )
                .single()?;

            if candidate > from {
                Some(candidate)
            } else {
                Some(candidate + Duration::days(7))
            }
        }

        Schedule::Monthly { day, hour, minute } => {
            let candidate = monthly_candidate(from.year(), from.month(), *day, *hour, *minute)?;
            if candidate > from {
                Some(candidate)
            } else {
                let (year, month) = if from.month() == 12 {
                    (from.year() + 1, 1)
                } else {
                    (from.year(), from.month() + 1)
                };
                monthly_candidate(year, month, *day, *hour, *minute)
            }
        }

        Schedule::Cron { expression } => match CronExpr::parse(expression) {
            Ok(expr) => expr.next_after(from),
            Err(e) => {
                warn!(%expression, error = %e, "unparseable cron expression; next_run unset");
                None
            }
        },
    }
}

/// Build the month's slot, clamping day 29-31 to the month's last day.
fn monthly_candidate(
    year: i32,
    month: u32,
    day: u8,
    hour: u8,
    minute: u8,
) -> Option<DateTime<Utc>> {
    let day = (day.max(1) as u32).min(days_in_month(year, month));
    Utc.with_ymd_and_hms(
        year,
        month,
        day,
        (hour).min(23) as u32,
        (minute).min(59) as u32,
        0,
    )
    .single()
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let first_next = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .unwrap();
    (first_next - Duration::days(1)).day()
}

/// The implicit summary window for a scheduled run ending at `now`.
pub fn window_for(schedule: &Schedule, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let span = match schedule {
        Schedule::Daily { .. } => Duration::hours(24),
        Schedule::Weekly { .. } => Duration::days(7),
        Schedule::Monthly { .. } => Duration::days(30),
        Schedule::Once { .. } | Schedule::Cron { .. } => Duration::hours(24),
    };
    (now - span, now)
}
