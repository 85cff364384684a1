use thiserror::Error;

use crate::expr::{CronExpression, TimeRange};

/// Parse failures always name the offending substring.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing field(s) in {0:?}")]
    MissingFields(String),
    #[error("{field} field: missing directive")]
    MissingDirective { field: &'static str },
    #[error("invalid interval {entry:?} in {field} field")]
    InvalidInterval { entry: String, field: &'static str },
    #[error("value {value} out of range [{min}, {max}] for {field}")]
    OutOfRange {
        value: i32,
        min: i32,
        max: i32,
        field: &'static str,
    },
    #[error("invalid value {value:?} for {field}")]
    InvalidValue { value: String, field: &'static str },
}

#[derive(Clone, Copy)]
struct FieldDescriptor {
    name: &'static str,
    min: i32,
    max: i32,
}

const SECOND: FieldDescriptor = FieldDescriptor {
    name: "second",
    min: 0,
    max: 59,
};
const MINUTE: FieldDescriptor = FieldDescriptor {
    name: "minute",
    min: 0,
    max: 59,
};
const HOUR: FieldDescriptor = FieldDescriptor {
    name: "hour",
    min: 0,
    max: 23,
};
const DAY_OF_MONTH: FieldDescriptor = FieldDescriptor {
    name: "day-of-month",
    min: 1,
    max: 31,
};
const MONTH: FieldDescriptor = FieldDescriptor {
    name: "month",
    min: 1,
    max: 12,
};
const DAY_OF_WEEK: FieldDescriptor = FieldDescriptor {
    name: "day-of-week",
    min: 0,
    max: 6,
};
const YEAR: FieldDescriptor = FieldDescriptor {
    name: "year",
    min: 1970,
    max: i32::MAX,
};

/// Parses a cron line of 5–7 whitespace-separated fields:
///
/// ```text
/// [second] minute hour day-of-month month day-of-week [year]
/// ```
///
/// Shorthand macros (`@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly`,
/// `@annually`), `*`/`?`, `*/n`, `a-b`, `a-b/n`, `a/n`, comma lists, and
/// month/weekday names are supported.
pub fn parse(line: &str) -> Result<CronExpression, ParseError> {
    let line = expand_macros(line);
    let fields: Vec<&str> = line.split_whitespace().collect();

    if fields.len() < 5 {
        return Err(ParseError::MissingFields(line.trim().to_string()));
    }
    let field_count = fields.len().min(7);

    let mut expr = CronExpression::new();
    let mut next = 0;

    if field_count == 7 {
        expr = expr.with_second(parse_field(fields[next], SECOND)?);
        next += 1;
    }

    expr = expr.with_minute(parse_field(fields[next], MINUTE)?);
    next += 1;
    expr = expr.with_hour(parse_field(fields[next], HOUR)?);
    next += 1;
    expr = expr.with_day(parse_field(fields[next], DAY_OF_MONTH)?);
    next += 1;
    expr = expr.with_month(parse_field(fields[next], MONTH)?);
    next += 1;
    expr = expr.with_week(parse_field(fields[next], DAY_OF_WEEK)?);
    next += 1;

    if next < field_count {
        expr = expr.with_year(parse_field(fields[next], YEAR)?);
    }

    Ok(expr)
}

fn expand_macros(line: &str) -> String {
    line.replace("@yearly", "0 0 0 1 1 * *")
        .replace("@annually", "0 0 0 1 1 * *")
        .replace("@monthly", "0 0 0 1 * * *")
        .replace("@weekly", "0 0 0 * * 0 *")
        .replace("@daily", "0 0 0 * * * *")
        .replace("@hourly", "0 0 * * * * *")
}

fn parse_field(s: &str, desc: FieldDescriptor) -> Result<Vec<TimeRange>, ParseError> {
    let entries: Vec<&str> = s.split(',').filter(|e| !e.is_empty()).collect();
    if entries.is_empty() {
        return Err(ParseError::MissingDirective { field: desc.name });
    }

    entries
        .iter()
        .map(|entry| parse_field_entry(entry, desc))
        .collect()
}

fn parse_field_entry(entry: &str, desc: FieldDescriptor) -> Result<TimeRange, ParseError> {
    let lower = entry.to_lowercase();

    if lower == "*" || lower == "?" {
        return Ok(TimeRange::new(desc.min, desc.max, 1));
    }

    if let Some(step_str) = lower.strip_prefix("*/") {
        let step = parse_step(step_str, entry, desc)?;
        return Ok(TimeRange::new(desc.min, desc.max, step));
    }

    if let Some((value_str, step_str)) = lower.split_once('/') {
        let step = parse_step(step_str, entry, desc)?;

        if let Some((begin_str, end_str)) = split_range(value_str) {
            let begin = parse_value(begin_str, desc)?;
            let end = parse_value(end_str, desc)?;
            return Ok(TimeRange::new(begin, end, step));
        }

        let begin = parse_value(value_str, desc)?;
        return Ok(TimeRange::new(begin, desc.max, step));
    }

    if let Some((begin_str, end_str)) = split_range(&lower) {
        let begin = parse_value(begin_str, desc)?;
        let end = parse_value(end_str, desc)?;
        return Ok(TimeRange::new(begin, end, 1));
    }

    let value = parse_value(&lower, desc)?;
    Ok(TimeRange::only(value))
}

/// Splits `a-b`, tolerating a leading `-` (which is not a range).
fn split_range(s: &str) -> Option<(&str, &str)> {
    let idx = s.find('-').filter(|&i| i > 0)?;
    Some((&s[..idx], &s[idx + 1..]))
}

fn parse_step(s: &str, entry: &str, desc: FieldDescriptor) -> Result<i32, ParseError> {
    let step: i32 = s.parse().map_err(|_| ParseError::InvalidInterval {
        entry: entry.to_string(),
        field: desc.name,
    })?;
    if step < 1 || step > desc.max {
        return Err(ParseError::InvalidInterval {
            entry: entry.to_string(),
            field: desc.name,
        });
    }
    Ok(step)
}

fn parse_value(s: &str, desc: FieldDescriptor) -> Result<i32, ParseError> {
    if let Ok(value) = s.parse::<i32>() {
        if value < desc.min || value > desc.max {
            return Err(ParseError::OutOfRange {
                value,
                min: desc.min,
                max: desc.max,
                field: desc.name,
            });
        }
        return Ok(value);
    }

    if desc.name == MONTH.name {
        if let Some(value) = month_name(s) {
            return Ok(value);
        }
    }
    if desc.name == DAY_OF_WEEK.name {
        if let Some(value) = week_name(s) {
            return Ok(value);
        }
    }

    Err(ParseError::InvalidValue {
        value: s.to_string(),
        field: desc.name,
    })
}

fn month_name(s: &str) -> Option<i32> {
    Some(match s {
        "jan" | "january" => 1,
        "feb" | "february" => 2,
        "mar" | "march" => 3,
        "apr" | "april" => 4,
        "may" => 5,
        "jun" | "june" => 6,
        "jul" | "july" => 7,
        "aug" | "august" => 8,
        "sep" | "september" => 9,
        "oct" | "october" => 10,
        "nov" | "november" => 11,
        "dec" | "december" => 12,
        _ => return None,
    })
}

fn week_name(s: &str) -> Option<i32> {
    Some(match s {
        "sun" | "sunday" => 0,
        "mon" | "monday" => 1,
        "tue" | "tuesday" => 2,
        "wed" | "wednesday" => 3,
        "thu" | "thursday" => 4,
        "fri" | "friday" => 5,
        "sat" | "saturday" => 6,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parses_five_field_line() {
        let expr = parse("*/5 * * * *").unwrap();
        // Minute restricted to multiples of 5, everything else open.
        assert_eq!(
            expr.normalize(datetime!(2020-01-05 06:07:09)),
            Some(datetime!(2020-01-05 06:10:00))
        );
    }

    #[test]
    fn parses_seven_field_line_with_seconds_and_year() {
        let expr = parse("*/5 * * * * * 2020-2030").unwrap();
        assert_eq!(
            expr.normalize(datetime!(2020-01-05 06:07:09)),
            Some(datetime!(2020-01-05 06:07:10))
        );
        assert_eq!(expr.normalize(datetime!(2031-01-01 00:00:00)), None);
    }

    #[test]
    fn parses_names_and_ranges() {
        let expr = parse("0 0 1 feb mon-fri").unwrap();
        // 2021-02-01 is a Monday.
        assert_eq!(
            expr.normalize(datetime!(2021-01-01 00:00:00)),
            Some(datetime!(2021-02-01 00:00:00))
        );
    }

    #[test]
    fn parses_comma_lists() {
        let expr = parse("0,30 * * * *").unwrap();
        assert_eq!(
            expr.normalize(datetime!(2020-01-05 06:07:09)),
            Some(datetime!(2020-01-05 06:30:00))
        );
        assert_eq!(
            expr.normalize(datetime!(2020-01-05 06:31:00)),
            Some(datetime!(2020-01-05 07:00:00))
        );
    }

    #[test]
    fn parses_value_slash_step() {
        let expr = parse("10/15 * * * *").unwrap();
        assert_eq!(
            expr.normalize(datetime!(2020-01-05 06:11:00)),
            Some(datetime!(2020-01-05 06:25:00))
        );
    }

    #[test]
    fn macros_expand() {
        let expr = parse("@daily").unwrap();
        assert_eq!(
            expr.normalize(datetime!(2020-01-05 06:07:09)),
            Some(datetime!(2020-01-06 00:00:00))
        );
    }

    #[test]
    fn too_few_fields_is_error() {
        assert!(matches!(
            parse("* * *"),
            Err(ParseError::MissingFields(_))
        ));
    }

    #[test]
    fn errors_name_the_offending_substring() {
        let err = parse("*/zap * * * *").unwrap_err();
        assert!(err.to_string().contains("*/zap"), "got: {err}");

        let err = parse("0 0 1 notamonth *").unwrap_err();
        assert!(err.to_string().contains("notamonth"), "got: {err}");

        let err = parse("99 * * * *").unwrap_err();
        assert!(err.to_string().contains("99"), "got: {err}");
    }

    #[test]
    fn out_of_range_step_is_error() {
        assert!(matches!(
            parse("*/99 * * * *"),
            Err(ParseError::InvalidInterval { .. })
        ));
    }
}
