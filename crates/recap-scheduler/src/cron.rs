//! Minimal 5-field cron matcher: minute hour day-of-month month day-of-week.
//!
//! Supports `*`, values, lists, ranges, and steps (`*/15`, `1-5`, `0,30`).
//! Day-of-week uses 0 or 7 for Sunday. When both day fields are restricted
//! the match follows classic cron: either one matching suffices.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct CronExpr {
    minute: Field,
    hour: Field,
    dom: Field,
    month: Field,
    dow: Field,
}

#[derive(Debug, Clone, PartialEq)]
enum Field {
    Any,
    Values(Vec<u8>),
}

impl Field {
    fn matches(&self, value: u8) -> bool {
        match self {
            Field::Any => true,
            Field::Values(vs) => vs.contains(&value),
        }
    }

    fn is_restricted(&self) -> bool {
        !matches!(self, Field::Any)
    }
}

impl CronExpr {
    pub fn parse(expression: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!(
                "cron expression needs 5 fields, got {}",
                fields.len()
            ));
        }
        Ok(Self {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            dom: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            dow: parse_dow(fields[4])?,
        })
    }

    /// Whether the minute containing `at` matches.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        let time_ok = self.minute.matches(at.minute() as u8)
            && self.hour.matches(at.hour() as u8)
            && self.month.matches(at.month() as u8);
        if !time_ok {
            return false;
        }

        let dom_ok = self.dom.matches(at.day() as u8);
        // chrono: Sunday-based weekday number 0-6.
        let dow_ok = self.dow.matches(at.weekday().num_days_from_sunday() as u8);

        if self.dom.is_restricted() && self.dow.is_restricted() {
            dom_ok || dow_ok
        } else {
            dom_ok && dow_ok
        }
    }

    /// The next matching minute strictly after `from`, searched up to 366
    /// days ahead. `None` means the expression can never fire (e.g. Feb 30).
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = truncate_to_minute(from) + Duration::minutes(1);
        let horizon = from + Duration::days(366);
        while candidate <= horizon {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

fn truncate_to_minute(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt - Duration::seconds(dt.second() as i64)
        - Duration::nanoseconds(dt.timestamp_subsec_nanos() as i64)
}

fn parse_field(text: &str, min: u8, max: u8) -> Result<Field, String> {
    if text == "*" {
        return Ok(Field::Any);
    }
    let mut values = Vec::new();
    for part in text.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u8 = s
                    .parse()
                    .map_err(|_| format!("bad step in cron part '{part}'"))?;
                if step == 0 {
                    return Err(format!("zero step in cron part '{part}'"));
                }
                (r, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (
                a.parse()
                    .map_err(|_| format!("bad range start in '{part}'"))?,
                b.parse().map_err(|_| format!("bad range end in '{part}'"))?,
            )
        } else {
            let v: u8 = range
                .parse()
                .map_err(|_| format!("bad cron value '{part}'"))?;
            (v, if step > 1 { max } else { v })
        };

        if lo < min || hi > max || lo > hi {
            return Err(format!("cron value out of range in '{part}' ({min}-{max})"));
        }
        let mut v = lo;
        while v <= hi {
            values.push(v);
            match v.checked_add(step) {
                Some(next) => v = next,
                None => break,
            }
        }
    }
    values.sort_unstable();
    values.dedup();
    Ok(Field::Values(values))
}

/// Day-of-week field: 0-7 where both 0 and 7 mean Sunday.
fn parse_dow(text: &str) -> Result<Field, String> {
    match parse_field(text, 0, 7)? {
        Field::Any => Ok(Field::Any),
        Field::Values(vs) => {
            let mut mapped: Vec<u8> = vs.into_iter().map(|v| if v == 7 { 0 } else { v }).collect();
            mapped.sort_unstable();
            mapped.dedup();
            Ok(Field::Values(mapped))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn every_fifteen_minutes() {
        let expr = CronExpr::parse("*/15 * * * *").unwrap();
        assert!(expr.matches(at(2026, 7, 1, 10, 0)));
        assert!(expr.matches(at(2026, 7, 1, 10, 45)));
        assert!(!expr.matches(at(2026, 7, 1, 10, 7)));

        let next = expr.next_after(at(2026, 7, 1, 10, 7)).unwrap();
        assert_eq!(next, at(2026, 7, 1, 10, 15));
    }

    #[test]
    fn weekday_mornings() {
        let expr = CronExpr::parse("0 9 * * 1-5").unwrap();
        // 2026-07-01 is a Wednesday.
        assert!(expr.matches(at(2026, 7, 1, 9, 0)));
        // 2026-07-04 is a Saturday.
        assert!(!expr.matches(at(2026, 7, 4, 9, 0)));

        // From Friday evening the next fire is Monday morning.
        let next = expr.next_after(at(2026, 7, 3, 18, 0)).unwrap();
        assert_eq!(next, at(2026, 7, 6, 9, 0));
    }

    #[test]
    fn first_of_month() {
        let expr = CronExpr::parse("30 8 1 * *").unwrap();
        let next = expr.next_after(at(2026, 7, 14, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 8, 1, 8, 30));
    }

    #[test]
    fn sunday_aliases() {
        let zero = CronExpr::parse("0 12 * * 0").unwrap();
        let seven = CronExpr::parse("0 12 * * 7").unwrap();
        // 2026-07-05 is a Sunday.
        assert!(zero.matches(at(2026, 7, 5, 12, 0)));
        assert!(seven.matches(at(2026, 7, 5, 12, 0)));
        assert_eq!(zero, seven);
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(CronExpr::parse("* * * *").is_err());
        assert!(CronExpr::parse("61 * * * *").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("a b c d e").is_err());
    }

    #[test]
    fn impossible_dates_never_fire() {
        let expr = CronExpr::parse("0 0 30 2 *").unwrap();
        assert!(expr.next_after(at(2026, 1, 1, 0, 0)).is_none());
    }
}
