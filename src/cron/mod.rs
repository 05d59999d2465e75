//! Cron expression engine.
//!
//! A [`CronEntry`] is parsed from a whitespace-separated expression into
//! per-field boolean membership tables and computes future fire times at
//! one-second resolution (see [`CronEntry::next_running_time`]).
//!
//! Fields are right-aligned by count, minute first:
//!
//! | fields | meaning                                              |
//! |--------|------------------------------------------------------|
//! | 1      | minute                                               |
//! | 2      | minute hour                                          |
//! | 3      | second minute hour                                   |
//! | 4      | second minute hour day-of-month                      |
//! | 5      | second minute hour day-of-month month                |
//! | 6      | second minute hour day-of-month month day-of-week    |
//!
//! A trailing seventh (year) field is accepted and ignored. Each field is
//! `*`, a single value, a range `a-b`, a comma list, or a step `a-b/step`
//! (`*/step` steps over the whole domain). Expressions with fewer than three
//! fields default the seconds field to 0; every other unspecified field
//! defaults to `*`. Day-of-week runs 0-6 with 0 = Sunday.

use chrono::{DateTime, Datelike, Timelike, Utc};
use parking_lot::Mutex;

use crate::types::CronError;

mod calendar;

/// Domain descriptor for one cron field.
struct FieldSpec {
    name: &'static str,
    len: usize,
    /// First value of the human-facing domain; one-based fields are shifted
    /// to zero-based indices at parse time.
    origin: u32,
}

const SECOND: FieldSpec = FieldSpec {
    name: "second",
    len: 60,
    origin: 0,
};
const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    len: 60,
    origin: 0,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    len: 24,
    origin: 0,
};
const DAY: FieldSpec = FieldSpec {
    name: "day-of-month",
    len: 31,
    origin: 1,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    len: 12,
    origin: 1,
};
const WEEKDAY: FieldSpec = FieldSpec {
    name: "day-of-week",
    len: 7,
    origin: 0,
};

/// A parsed cron expression.
///
/// Membership tables are derived once at parse time and are immutable
/// afterwards except through the explicit per-field setters. The only other
/// mutable state is the cached last-computed next-run time used by the
/// de-duplication rule in [`next_running_time`](CronEntry::next_running_time).
pub struct CronEntry {
    expression: String,
    seconds: [bool; 60],
    minutes: [bool; 60],
    hours: [bool; 24],
    /// Zero-based: index 0 is the 1st of the month.
    days: [bool; 31],
    /// Zero-based: index 0 is January.
    months: [bool; 12],
    /// 0 = Sunday.
    weekdays: [bool; 7],
    last_computed: Mutex<Option<DateTime<Utc>>>,
}

impl CronEntry {
    /// Parse a cron expression. Malformed field syntax is fatal here and is
    /// never retried.
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let mut tokens: Vec<&str> = expression.split_whitespace().collect();
        if tokens.is_empty() {
            return Err(CronError::Empty);
        }
        if tokens.len() > 7 {
            return Err(CronError::TooManyFields {
                count: tokens.len(),
            });
        }
        // Year field: accepted but not enforced.
        if tokens.len() == 7 {
            tokens.truncate(6);
        }

        let mut entry = Self {
            expression: expression.trim().to_string(),
            seconds: [true; 60],
            minutes: [true; 60],
            hours: [true; 24],
            days: [true; 31],
            months: [true; 12],
            weekdays: [true; 7],
            last_computed: Mutex::new(None),
        };

        // Without an explicit seconds field the entry fires at second 0, not
        // sixty times per matching minute.
        if tokens.len() < 3 {
            entry.seconds = [false; 60];
            entry.seconds[0] = true;
        }

        match tokens.as_slice() {
            [m] => {
                entry.set_minutes(m)?;
            }
            [m, h] => {
                entry.set_minutes(m)?;
                entry.set_hours(h)?;
            }
            [s, m, h] => {
                entry.set_seconds(s)?;
                entry.set_minutes(m)?;
                entry.set_hours(h)?;
            }
            [s, m, h, d] => {
                entry.set_seconds(s)?;
                entry.set_minutes(m)?;
                entry.set_hours(h)?;
                entry.set_days(d)?;
            }
            [s, m, h, d, mo] => {
                entry.set_seconds(s)?;
                entry.set_minutes(m)?;
                entry.set_hours(h)?;
                entry.set_days(d)?;
                entry.set_months(mo)?;
            }
            [s, m, h, d, mo, w] => {
                entry.set_seconds(s)?;
                entry.set_minutes(m)?;
                entry.set_hours(h)?;
                entry.set_days(d)?;
                entry.set_months(mo)?;
                entry.set_weekdays(w)?;
            }
            _ => unreachable!("token count is bounded above"),
        }

        Ok(entry)
    }

    /// Validate an expression without keeping the parsed entry.
    pub fn validate(expression: &str) -> Result<(), CronError> {
        Self::parse(expression).map(|_| ())
    }

    /// The original expression text.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether `at` satisfies every field of the entry.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        let naive = at.naive_utc();
        self.seconds[naive.second() as usize]
            && self.minutes[naive.minute() as usize]
            && self.hours[naive.hour() as usize]
            && self.days[naive.day0() as usize]
            && self.months[naive.month0() as usize]
            && self.weekdays[naive.weekday().num_days_from_sunday() as usize]
    }

    pub fn set_seconds(&mut self, spec: &str) -> Result<(), CronError> {
        self.seconds = parse_field(&SECOND, spec)?;
        Ok(())
    }

    pub fn set_minutes(&mut self, spec: &str) -> Result<(), CronError> {
        self.minutes = parse_field(&MINUTE, spec)?;
        Ok(())
    }

    pub fn set_hours(&mut self, spec: &str) -> Result<(), CronError> {
        self.hours = parse_field(&HOUR, spec)?;
        Ok(())
    }

    pub fn set_days(&mut self, spec: &str) -> Result<(), CronError> {
        self.days = parse_field(&DAY, spec)?;
        Ok(())
    }

    pub fn set_months(&mut self, spec: &str) -> Result<(), CronError> {
        self.months = parse_field(&MONTH, spec)?;
        Ok(())
    }

    pub fn set_weekdays(&mut self, spec: &str) -> Result<(), CronError> {
        self.weekdays = parse_field(&WEEKDAY, spec)?;
        Ok(())
    }
}

impl Clone for CronEntry {
    fn clone(&self) -> Self {
        Self {
            expression: self.expression.clone(),
            seconds: self.seconds,
            minutes: self.minutes,
            hours: self.hours,
            days: self.days,
            months: self.months,
            weekdays: self.weekdays,
            last_computed: Mutex::new(*self.last_computed.lock()),
        }
    }
}

impl std::fmt::Debug for CronEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronEntry")
            .field("expression", &self.expression)
            .field("last_computed", &*self.last_computed.lock())
            .finish()
    }
}

impl std::fmt::Display for CronEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expression)
    }
}

impl std::str::FromStr for CronEntry {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_field<const N: usize>(field: &FieldSpec, spec: &str) -> Result<[bool; N], CronError> {
    let mut table = [false; N];
    parse_token(field, spec, &mut table)?;
    Ok(table)
}

/// Parse one field token into `table`. Comma lists recurse over their
/// sub-tokens and union the results.
fn parse_token(field: &FieldSpec, token: &str, table: &mut [bool]) -> Result<(), CronError> {
    if token.is_empty() {
        return Err(CronError::InvalidToken {
            field: field.name,
            token: token.to_string(),
        });
    }

    if token == "*" {
        table.fill(true);
        return Ok(());
    }

    if token.contains(',') {
        for sub in token.split(',') {
            parse_token(field, sub, table)?;
        }
        return Ok(());
    }

    if let Some((range, step)) = token.split_once('/') {
        let step: u32 = step.parse().map_err(|_| CronError::InvalidToken {
            field: field.name,
            token: token.to_string(),
        })?;
        if step == 0 {
            return Err(CronError::ZeroStep {
                token: token.to_string(),
            });
        }
        let (begin, end) = if range == "*" {
            (0, field.len - 1)
        } else if let Some((a, b)) = range.split_once('-') {
            (
                parse_value(field, a, token)?,
                parse_value(field, b, token)?,
            )
        } else {
            // A bare value with a step has no range end to walk toward.
            return Err(CronError::StepWithoutRange {
                token: token.to_string(),
            });
        };
        mark_walk(table, begin, end, step as usize);
        return Ok(());
    }

    if let Some((a, b)) = token.split_once('-') {
        let begin = parse_value(field, a, token)?;
        let end = parse_value(field, b, token)?;
        mark_walk(table, begin, end, 1);
        return Ok(());
    }

    let value = parse_value(field, token, token)?;
    table[value] = true;
    Ok(())
}

/// Parse a single numeric value, shifting one-based domains to zero-based
/// table indices.
fn parse_value(field: &FieldSpec, text: &str, token: &str) -> Result<usize, CronError> {
    let value: u32 = text.parse().map_err(|_| CronError::InvalidToken {
        field: field.name,
        token: token.to_string(),
    })?;
    let max = field.origin + field.len as u32 - 1;
    if value < field.origin || value > max {
        return Err(CronError::OutOfRange {
            field: field.name,
            value,
            min: field.origin,
            max,
        });
    }
    Ok((value - field.origin) as usize)
}

/// Mark every `step`-th position from `begin` through `end` inclusive. A
/// reversed range walks past the domain end and wraps modulo the domain
/// size until the unwrapped index passes `end + len`.
fn mark_walk(table: &mut [bool], begin: usize, end: usize, step: usize) {
    let len = table.len();
    let end = if begin <= end { end } else { end + len };
    let mut i = begin;
    while i <= end {
        table[i % len] = true;
        i += step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marked(table: &[bool]) -> Vec<usize> {
        table
            .iter()
            .enumerate()
            .filter_map(|(i, &set)| set.then_some(i))
            .collect()
    }

    #[test]
    fn single_field_is_minute() {
        let entry = CronEntry::parse("15").unwrap();
        assert_eq!(marked(&entry.minutes), vec![15]);
        // Seconds default to 0 for short expressions.
        assert_eq!(marked(&entry.seconds), vec![0]);
        assert_eq!(marked(&entry.hours).len(), 24);
    }

    #[test]
    fn two_fields_are_minute_hour() {
        let entry = CronEntry::parse("30 2").unwrap();
        assert_eq!(marked(&entry.minutes), vec![30]);
        assert_eq!(marked(&entry.hours), vec![2]);
        assert_eq!(marked(&entry.seconds), vec![0]);
    }

    #[test]
    fn three_fields_add_explicit_seconds() {
        let entry = CronEntry::parse("45 30 2").unwrap();
        assert_eq!(marked(&entry.seconds), vec![45]);
        assert_eq!(marked(&entry.minutes), vec![30]);
        assert_eq!(marked(&entry.hours), vec![2]);
    }

    #[test]
    fn four_and_five_fields_extend_rightward() {
        let entry = CronEntry::parse("0 0 3 10").unwrap();
        assert_eq!(marked(&entry.hours), vec![3]);
        assert_eq!(marked(&entry.days), vec![9]);
        assert_eq!(marked(&entry.months).len(), 12);

        let entry = CronEntry::parse("0 0 3 10 4").unwrap();
        assert_eq!(marked(&entry.days), vec![9]);
        assert_eq!(marked(&entry.months), vec![3]);
        assert_eq!(marked(&entry.weekdays).len(), 7);
    }

    #[test]
    fn six_fields_cover_every_position() {
        let entry = CronEntry::parse("0 5 4 15 7 3").unwrap();
        assert_eq!(marked(&entry.seconds), vec![0]);
        assert_eq!(marked(&entry.minutes), vec![5]);
        assert_eq!(marked(&entry.hours), vec![4]);
        // One-based domains shift down at parse time.
        assert_eq!(marked(&entry.days), vec![14]);
        assert_eq!(marked(&entry.months), vec![6]);
        assert_eq!(marked(&entry.weekdays), vec![3]);
    }

    #[test]
    fn year_field_is_accepted_and_ignored() {
        let entry = CronEntry::parse("0 5 4 15 7 3 2031").unwrap();
        assert_eq!(marked(&entry.weekdays), vec![3]);

        assert!(matches!(
            CronEntry::parse("0 5 4 15 7 3 2031 extra"),
            Err(CronError::TooManyFields { count: 8 })
        ));
    }

    #[test]
    fn comma_list_equals_range() {
        let list = CronEntry::parse("2,3,4,5").unwrap();
        let range = CronEntry::parse("2-5").unwrap();
        assert_eq!(list.minutes, range.minutes);
    }

    #[test]
    fn comma_list_unions_mixed_tokens() {
        let entry = CronEntry::parse("1-3,10,20-24/2").unwrap();
        assert_eq!(marked(&entry.minutes), vec![1, 2, 3, 10, 20, 22, 24]);
    }

    #[test]
    fn star_step_covers_whole_domain() {
        let entry = CronEntry::parse("*/15 * * * *").unwrap();
        // Five fields: second minute hour day-of-month month.
        assert_eq!(marked(&entry.seconds), vec![0, 15, 30, 45]);
        assert_eq!(marked(&entry.minutes).len(), 60);
    }

    #[test]
    fn reversed_step_range_wraps_around_the_domain() {
        let mut entry = CronEntry::parse("*").unwrap();
        entry.set_minutes("50-10/5").unwrap();
        assert_eq!(marked(&entry.minutes), vec![0, 5, 10, 50, 55]);
    }

    #[test]
    fn reversed_plain_range_wraps_too() {
        let mut entry = CronEntry::parse("*").unwrap();
        entry.set_hours("22-2").unwrap();
        assert_eq!(marked(&entry.hours), vec![0, 1, 2, 22, 23]);
    }

    #[test]
    fn step_without_range_is_rejected() {
        assert!(matches!(
            CronEntry::parse("5/10"),
            Err(CronError::StepWithoutRange { .. })
        ));
    }

    #[test]
    fn zero_step_is_rejected() {
        assert!(matches!(
            CronEntry::parse("1-30/0"),
            Err(CronError::ZeroStep { .. })
        ));
    }

    #[test]
    fn out_of_domain_values_are_rejected() {
        assert!(matches!(
            CronEntry::parse("75"),
            Err(CronError::OutOfRange { field: "minute", value: 75, .. })
        ));
        // Day-of-month and month are one-based; zero is out of domain.
        assert!(matches!(
            CronEntry::parse("0 0 0 0"),
            Err(CronError::OutOfRange { field: "day-of-month", value: 0, .. })
        ));
        assert!(matches!(
            CronEntry::parse("0 0 0 1 13"),
            Err(CronError::OutOfRange { field: "month", value: 13, .. })
        ));
        assert!(matches!(
            CronEntry::parse("0 0 0 1 1 7"),
            Err(CronError::OutOfRange { field: "day-of-week", value: 7, .. })
        ));
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        assert!(matches!(
            CronEntry::parse("every-minute"),
            Err(CronError::InvalidToken { .. })
        ));
        assert!(matches!(CronEntry::parse("   "), Err(CronError::Empty)));
        assert!(matches!(
            CronEntry::parse("1,,2"),
            Err(CronError::InvalidToken { .. })
        ));
    }

    #[test]
    fn setters_rederive_exactly_one_field() {
        let mut entry = CronEntry::parse("10 * * * *").unwrap();
        let minutes_before = entry.minutes;
        entry.set_weekdays("0,6").unwrap();
        assert_eq!(marked(&entry.weekdays), vec![0, 6]);
        assert_eq!(entry.minutes, minutes_before);
    }

    #[test]
    fn display_echoes_expression() {
        let entry: CronEntry = "0 */5 * * *".parse().unwrap();
        assert_eq!(entry.to_string(), "0 */5 * * *");
        assert_eq!(entry.expression(), "0 */5 * * *");
    }

    #[test]
    fn matches_checks_every_field() {
        use chrono::TimeZone;

        let entry = CronEntry::parse("0 30 12 15 6 *").unwrap();
        let hit = Utc.with_ymd_and_hms(2026, 6, 15, 12, 30, 0).unwrap();
        let miss = Utc.with_ymd_and_hms(2026, 6, 15, 12, 31, 0).unwrap();
        assert!(entry.matches(hit));
        assert!(!entry.matches(miss));
    }
}
