//! Next-fire-time computation for parsed cron entries.
//!
//! The computation walks the time fields from finest to coarsest
//! (second -> minute -> hour -> day -> month -> year). Whenever a coarser
//! field has to advance, every finer field is re-derived to its first
//! qualifying value; computing fields independently would keep a stale
//! finer value alive across a rollover and produce times in the past.
//! After a candidate date is assembled, day-of-week membership is checked
//! and, on a miss, the search advances one calendar day and reruns the
//! whole cascade for the new day.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc};

use super::CronEntry;

/// Upper bound on day-of-week advances: a bit over four years. Past this the
/// expression is considered unsatisfiable.
const MAX_DAY_ADVANCES: usize = 366 * 4;

/// Upper bound on month hops while searching for a calendar-valid day.
const MAX_MONTH_HOPS: usize = 64;

impl CronEntry {
    /// The next instant at or after `now` that satisfies the expression,
    /// de-duplicated against the previously returned value.
    ///
    /// If the freshly computed time lands within 1000 ms of the cached
    /// previous result, the reference advances to `max(cached, now) + 1s`
    /// and the computation runs once more. Without this, a caller invoking
    /// the entry again right after a fire would be handed the same slot
    /// twice.
    pub fn next_running_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut cache = self.last_computed.lock();
        let mut next = self.next_after(now)?;
        if let Some(prev) = *cache {
            if (next - prev).num_milliseconds().abs() < 1000 {
                let reference = prev.max(now) + chrono::Duration::milliseconds(1000);
                next = self.next_after(reference)?;
            }
        }
        *cache = Some(next);
        Some(next)
    }

    /// Pure computation of the first qualifying instant at or after `after`.
    ///
    /// Returns `None` when no qualifying instant exists within the search
    /// bound (for example day-of-month 31 restricted to February).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let naive = after.naive_utc();
        let mut sec = naive.second();
        let mut min = naive.minute();
        let mut hour = naive.hour();
        let mut day = naive.day0();
        let mut month = naive.month0();
        let mut year = naive.year();

        for _ in 0..MAX_DAY_ADVANCES {
            // Seconds.
            match next_set(&self.seconds, sec) {
                Some(s) => sec = s,
                None => {
                    sec = first_set(&self.seconds);
                    min += 1;
                }
            }

            // Minutes. Any advance invalidates the chosen second.
            let minute_before = min;
            match checked_next(&self.minutes, min) {
                Some(m) => min = m,
                None => {
                    min = first_set(&self.minutes);
                    hour += 1;
                }
            }
            if min != minute_before {
                sec = first_set(&self.seconds);
            }

            // Hours.
            let hour_before = hour;
            match checked_next(&self.hours, hour) {
                Some(h) => hour = h,
                None => {
                    hour = first_set(&self.hours);
                    day += 1;
                }
            }
            if hour != hour_before {
                min = first_set(&self.minutes);
                sec = first_set(&self.seconds);
            }

            // Date. The month table gates the day search, and a qualifying
            // day index that does not exist in the candidate month (the
            // 31st of February) advances the month and retries.
            let before = (day, month, year);
            let mut hops = 0;
            loop {
                hops += 1;
                if hops > MAX_MONTH_HOPS {
                    return None;
                }
                if !self.months[month as usize] {
                    match next_set(&self.months, month) {
                        Some(mo) => month = mo,
                        None => {
                            month = first_set(&self.months);
                            year += 1;
                        }
                    }
                    day = 0;
                    continue;
                }
                match next_set(&self.days, day) {
                    Some(d) if d < days_in_month(year, month) => {
                        day = d;
                        break;
                    }
                    _ => {
                        day = 0;
                        month += 1;
                        if month > 11 {
                            month = 0;
                            year += 1;
                        }
                    }
                }
            }
            if (day, month, year) != before {
                hour = first_set(&self.hours);
                min = first_set(&self.minutes);
                sec = first_set(&self.seconds);
            }

            // Day-of-week recheck over the assembled date.
            let date = NaiveDate::from_ymd_opt(year, month + 1, day + 1)?;
            if self.weekdays[date.weekday().num_days_from_sunday() as usize] {
                let time = NaiveTime::from_hms_opt(hour, min, sec)?;
                return Some(DateTime::from_naive_utc_and_offset(
                    date.and_time(time),
                    Utc,
                ));
            }

            // Advance one calendar day and rerun the cascade for the new day.
            let next_day = date.succ_opt()?;
            year = next_day.year();
            month = next_day.month0();
            day = next_day.day0();
            hour = first_set(&self.hours);
            min = first_set(&self.minutes);
            sec = first_set(&self.seconds);
        }

        None
    }
}

/// First qualifying value of a field table.
fn first_set(table: &[bool]) -> u32 {
    table.iter().position(|&set| set).unwrap_or(0) as u32
}

/// Next qualifying value at or after `from`, or `None` if the field has to
/// roll over.
fn next_set(table: &[bool], from: u32) -> Option<u32> {
    (from as usize..table.len())
        .find(|&i| table[i])
        .map(|i| i as u32)
}

/// `next_set` for a value that may have been carried past the domain end.
fn checked_next(table: &[bool], from: u32) -> Option<u32> {
    if (from as usize) < table.len() {
        next_set(table, from)
    } else {
        None
    }
}

/// Number of days in the given month (`month0` is zero-based).
fn days_in_month(year: i32, month0: u32) -> u32 {
    for day in (28..=31).rev() {
        if NaiveDate::from_ymd_opt(year, month0 + 1, day).is_some() {
            return day;
        }
    }
    28
}
