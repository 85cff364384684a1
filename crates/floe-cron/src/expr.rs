use time::{Date, Duration, Month, PrimitiveDateTime, Time};

/// One admissible range for a calendar field.
///
/// `step == 0` means "only `begin` matches".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub begin: i32,
    pub end: i32,
    pub step: i32,
}

impl TimeRange {
    pub fn only(begin: i32) -> Self {
        TimeRange {
            begin,
            end: begin,
            step: 0,
        }
    }

    pub fn new(begin: i32, end: i32, step: i32) -> Self {
        TimeRange { begin, end, step }
    }
}

// A schedule unreachable within a full Gregorian cycle is unreachable
// forever; the calendar repeats every 400 years.
const MAX_YEAR_SPAN: i32 = 400;

#[derive(Debug, Clone)]
pub struct CronExpression {
    pub(crate) year: Vec<TimeRange>,
    pub(crate) month: Vec<TimeRange>,
    pub(crate) day: Vec<TimeRange>,
    pub(crate) week: Vec<TimeRange>,
    pub(crate) hour: Vec<TimeRange>,
    pub(crate) minute: Vec<TimeRange>,
    pub(crate) second: Vec<TimeRange>,
}

impl Default for CronExpression {
    fn default() -> Self {
        Self::new()
    }
}

impl CronExpression {
    /// An expression matching every instant.
    pub fn new() -> Self {
        CronExpression {
            year: vec![TimeRange::new(0, i32::MAX, 1)],
            month: vec![TimeRange::new(1, 12, 1)],
            day: vec![TimeRange::new(1, 31, 1)],
            week: vec![TimeRange::new(0, 6, 1)],
            hour: vec![TimeRange::new(0, 23, 1)],
            minute: vec![TimeRange::new(0, 59, 1)],
            second: vec![TimeRange::new(0, 59, 1)],
        }
    }

    pub fn with_year(mut self, ranges: Vec<TimeRange>) -> Self {
        self.year = ranges;
        self
    }

    pub fn with_month(mut self, ranges: Vec<TimeRange>) -> Self {
        self.month = ranges;
        self
    }

    pub fn with_day(mut self, ranges: Vec<TimeRange>) -> Self {
        self.day = ranges;
        self
    }

    pub fn with_week(mut self, ranges: Vec<TimeRange>) -> Self {
        self.week = ranges;
        self
    }

    pub fn with_hour(mut self, ranges: Vec<TimeRange>) -> Self {
        self.hour = ranges;
        self
    }

    pub fn with_minute(mut self, ranges: Vec<TimeRange>) -> Self {
        self.minute = ranges;
        self
    }

    pub fn with_second(mut self, ranges: Vec<TimeRange>) -> Self {
        self.second = ranges;
        self
    }

    /// The smallest instant `>= t` matching all fields, `None` when no such
    /// instant exists.
    pub fn normalize(&self, t: PrimitiveDateTime) -> Option<PrimitiveDateTime> {
        enum Phase {
            Year,
            Month,
            Day,
            Hour,
            Minute,
            Second,
        }

        let max_year = t.year().saturating_add(MAX_YEAR_SPAN);

        let mut year = t.year();
        let mut month = u8::from(t.month()) as i32;
        let mut day = t.day() as i32;
        let mut hour = t.hour() as i32;
        let mut minute = t.minute() as i32;
        let mut second = t.second() as i32;

        // Sub-second precision rounds up to the next whole second.
        if t.nanosecond() > 0 {
            second += 1;
        }

        let mut old_val = year;
        let mut phase = Phase::Year;

        loop {
            match phase {
                Phase::Year => {
                    if year > max_year {
                        return None;
                    }
                    let (carry, ny) = normalize_unit(&self.year, year);
                    if carry {
                        return None;
                    }
                    if old_val != ny {
                        month = 1;
                        day = 1;
                        hour = 0;
                        minute = 0;
                        second = 0;
                    }
                    year = ny;
                    old_val = month;
                    phase = Phase::Month;
                }
                Phase::Month => {
                    let (carry, nm) = normalize_unit(&self.month, month);
                    if carry {
                        old_val = year;
                        year += 1;
                        phase = Phase::Year;
                        continue;
                    }
                    if old_val != nm {
                        day = 1;
                        hour = 0;
                        minute = 0;
                        second = 0;
                    }
                    month = nm;
                    old_val = day;
                    phase = Phase::Day;
                }
                Phase::Day => {
                    let (carry, nd) = normalize_unit(&self.day, day);
                    day = nd;
                    let date = calendar_date(year, month, day);
                    let date = match (carry, date) {
                        (false, Some(date)) => date,
                        // Either no admissible day is left this month or the
                        // candidate is not a real calendar day (Feb 30).
                        _ => {
                            old_val = month;
                            month += 1;
                            phase = Phase::Month;
                            continue;
                        }
                    };
                    if old_val != day {
                        hour = 0;
                        minute = 0;
                        second = 0;
                    }

                    let week = date.weekday().number_days_from_sunday() as i32;
                    let (wcarry, nw) = normalize_unit(&self.week, week);
                    if wcarry || nw != week {
                        let shift = if wcarry { nw - week + 7 } else { nw - week };
                        let nt = date.checked_add(Duration::days(shift as i64))?;
                        day = nt.day() as i32;
                        if u8::from(nt.month()) as i32 != month || nt.year() != year {
                            old_val = month;
                            month += 1;
                            phase = Phase::Month;
                            continue;
                        }
                        hour = 0;
                        minute = 0;
                        second = 0;
                    }

                    old_val = hour;
                    phase = Phase::Hour;
                }
                Phase::Hour => {
                    let (carry, nh) = normalize_unit(&self.hour, hour);
                    if carry {
                        old_val = day;
                        day += 1;
                        phase = Phase::Day;
                        continue;
                    }
                    if old_val != nh {
                        minute = 0;
                        second = 0;
                    }
                    hour = nh;
                    old_val = minute;
                    phase = Phase::Minute;
                }
                Phase::Minute => {
                    let (carry, nm) = normalize_unit(&self.minute, minute);
                    if carry {
                        old_val = hour;
                        hour += 1;
                        phase = Phase::Hour;
                        continue;
                    }
                    if old_val != nm {
                        second = 0;
                    }
                    minute = nm;
                    old_val = second;
                    phase = Phase::Second;
                }
                Phase::Second => {
                    let (carry, ns) = normalize_unit(&self.second, second);
                    if carry {
                        old_val = minute;
                        minute += 1;
                        phase = Phase::Minute;
                        continue;
                    }
                    second = ns;

                    let date = calendar_date(year, month, day)?;
                    let time =
                        Time::from_hms(hour as u8, minute as u8, second as u8).ok()?;
                    return Some(PrimitiveDateTime::new(date, time));
                }
            }
        }
    }
}

fn calendar_date(year: i32, month: i32, day: i32) -> Option<Date> {
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    let month = Month::try_from(month as u8).ok()?;
    Date::from_calendar_date(year, month, day as u8).ok()
}

/// Advances `val` to the smallest admissible value across `ranges`.
///
/// Returns `(true, ranges[0].begin)` when every range is exhausted, which
/// carries into the next-coarser field.
fn normalize_unit(ranges: &[TimeRange], val: i32) -> (bool, i32) {
    for r in ranges {
        let (b, e, s) = (r.begin, r.end, r.step);
        if s == 0 {
            if val <= b {
                return (false, b);
            }
            continue;
        }

        if val > e {
            continue;
        }
        if val <= b {
            return (false, b);
        }

        let mut nv = val;
        if (val - b) % s > 0 {
            nv = ((val - b) / s + 1) * s + b;
        }
        if nv > e {
            continue;
        }
        return (false, nv);
    }
    (true, ranges[0].begin)
}
