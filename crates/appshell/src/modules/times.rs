//! The `times` module. Durations are ints counting nanoseconds; times are
//! local date-times.

use std::{
    fmt::Write as _,
    rc::Rc,
    thread,
    time::{Duration, Instant},
};

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike, Utc};

use super::{error_value, expect_args, int_arg, register, str_arg, time_arg};
use crate::{
    context::ContextSlot,
    exception::RuntimeError,
    value::{Value, ValueMap},
};

const NANOSECOND: i64 = 1;
const MICROSECOND: i64 = 1_000 * NANOSECOND;
const MILLISECOND: i64 = 1_000 * MICROSECOND;
const SECOND: i64 = 1_000 * MILLISECOND;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;

/// How often `sleep` re-checks the evaluation context.
const SLEEP_POLL: Duration = Duration::from_millis(10);

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

pub fn module(ctx: &ContextSlot) -> ValueMap {
    let mut attrs = ValueMap::new();
    for (name, value) in [
        ("nanosecond", NANOSECOND),
        ("microsecond", MICROSECOND),
        ("millisecond", MILLISECOND),
        ("second", SECOND),
        ("minute", MINUTE),
        ("hour", HOUR),
    ] {
        attrs.insert(name.to_owned(), Value::Int(value));
    }
    for (month, name) in (1..).zip(MONTHS) {
        attrs.insert(name.to_lowercase(), Value::Int(month));
    }

    let ctx = Rc::clone(ctx);
    register(&mut attrs, "sleep", move |_, args| {
        expect_args(args, 1)?;
        let nanos = u64::try_from(int_arg(args, 0)?).unwrap_or(0);
        let deadline = Instant::now() + Duration::from_nanos(nanos);
        loop {
            ctx.borrow().check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(Value::Undefined);
            }
            thread::sleep((deadline - now).min(SLEEP_POLL));
        }
    });

    durations(&mut attrs);
    constructors(&mut attrs);
    arithmetic(&mut attrs);
    accessors(&mut attrs);
    attrs
}

fn durations(attrs: &mut ValueMap) {
    register(attrs, "parse_duration", |_, args| {
        expect_args(args, 1)?;
        let s = str_arg(args, 0)?;
        Ok(parse_duration(&s).map_or_else(|| error_value(format!("time: invalid duration \"{s}\"")), Value::Int))
    });
    register(attrs, "duration_string", |_, args| {
        expect_args(args, 1)?;
        Ok(Value::from(duration_string(int_arg(args, 0)?)))
    });
    for (name, unit) in [
        ("duration_hours", HOUR),
        ("duration_minutes", MINUTE),
        ("duration_seconds", SECOND),
    ] {
        register(attrs, name, move |_, args| {
            expect_args(args, 1)?;
            let nanos = int_arg(args, 0)?;
            Ok(Value::Float((nanos / unit) as f64 + (nanos % unit) as f64 / unit as f64))
        });
    }
    for (name, unit) in [("duration_milliseconds", MILLISECOND), ("duration_microseconds", MICROSECOND)] {
        register(attrs, name, move |_, args| {
            expect_args(args, 1)?;
            Ok(Value::Int(int_arg(args, 0)? / unit))
        });
    }
    register(attrs, "month_string", |_, args| {
        expect_args(args, 1)?;
        let month = int_arg(args, 0)?;
        let name = usize::try_from(month - 1)
            .ok()
            .and_then(|index| MONTHS.get(index))
            .map_or_else(|| format!("%!Month({month})"), |name| (*name).to_owned());
        Ok(Value::from(name))
    });
}

fn constructors(attrs: &mut ValueMap) {
    register(attrs, "now", |_, args| {
        expect_args(args, 0)?;
        Ok(Value::Time(Local::now()))
    });
    register(attrs, "date", |_, args| {
        if !(3..=7).contains(&args.len()) {
            return Err(RuntimeError::WrongNumArguments);
        }
        let mut fields = [0_i64; 7];
        for (index, field) in fields.iter_mut().enumerate().take(args.len()) {
            *field = int_arg(args, index)?;
        }
        let [year, month, day, hour, minute, second, nanos] = fields;
        let time = normalized_date(year, month, day)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .and_then(|midnight| add_clock(midnight, hour, minute, second, nanos))
            .and_then(to_local);
        Ok(time.map_or_else(|| error_value("time: date out of range"), Value::Time))
    });
    register(attrs, "unix", |_, args| {
        expect_args(args, 2)?;
        let (secs, nanos) = (int_arg(args, 0)?, int_arg(args, 1)?);
        let time = DateTime::from_timestamp(secs, 0)
            .and_then(|time| time.checked_add_signed(TimeDelta::nanoseconds(nanos)))
            .map(|time| time.with_timezone(&Local));
        Ok(time.map_or_else(|| error_value("time: unix time out of range"), Value::Time))
    });
}

fn arithmetic(attrs: &mut ValueMap) {
    register(attrs, "since", |_, args| {
        expect_args(args, 1)?;
        Ok(nanos_between(Local::now(), time_arg(args, 0)?))
    });
    register(attrs, "until", |_, args| {
        expect_args(args, 1)?;
        Ok(nanos_between(time_arg(args, 0)?, Local::now()))
    });
    register(attrs, "sub", |_, args| {
        expect_args(args, 2)?;
        Ok(nanos_between(time_arg(args, 0)?, time_arg(args, 1)?))
    });
    register(attrs, "add", |_, args| {
        expect_args(args, 2)?;
        let time = time_arg(args, 0)?.checked_add_signed(TimeDelta::nanoseconds(int_arg(args, 1)?));
        Ok(time.map_or_else(|| error_value("time: out of range"), Value::Time))
    });
    register(attrs, "add_date", |_, args| {
        expect_args(args, 4)?;
        let time = time_arg(args, 0)?;
        let (years, months, days) = (int_arg(args, 1)?, int_arg(args, 2)?, int_arg(args, 3)?);
        let shifted = i64::from(time.year())
            .checked_add(years)
            .zip(i64::from(time.month()).checked_add(months))
            .zip(i64::from(time.day()).checked_add(days))
            .and_then(|((year, month), day)| normalized_date(year, month, day))
            .map(|date| date.and_time(time.time()))
            .and_then(to_local);
        Ok(shifted.map_or_else(|| error_value("time: date out of range"), Value::Time))
    });
    register(attrs, "before", |_, args| {
        expect_args(args, 2)?;
        Ok(Value::Bool(time_arg(args, 0)? < time_arg(args, 1)?))
    });
    register(attrs, "after", |_, args| {
        expect_args(args, 2)?;
        Ok(Value::Bool(time_arg(args, 0)? > time_arg(args, 1)?))
    });
}

fn accessors(attrs: &mut ValueMap) {
    let fields: [(&str, fn(&DateTime<Local>) -> i64); 9] = [
        ("time_year", |t| i64::from(t.year())),
        ("time_month", |t| i64::from(t.month())),
        ("time_day", |t| i64::from(t.day())),
        ("time_weekday", |t| i64::from(t.weekday().num_days_from_sunday())),
        ("time_hour", |t| i64::from(t.hour())),
        ("time_minute", |t| i64::from(t.minute())),
        ("time_second", |t| i64::from(t.second())),
        ("time_nanosecond", |t| i64::from(t.nanosecond())),
        ("time_unix", DateTime::timestamp),
    ];
    for (name, f) in fields {
        register(attrs, name, move |_, args| {
            expect_args(args, 1)?;
            Ok(Value::Int(f(&time_arg(args, 0)?)))
        });
    }
    register(attrs, "time_unix_nano", |_, args| {
        expect_args(args, 1)?;
        let time = time_arg(args, 0)?;
        Ok(time.timestamp_nanos_opt().map_or(Value::Undefined, Value::Int))
    });
    register(attrs, "time_format", |_, args| {
        expect_args(args, 2)?;
        let time = time_arg(args, 0)?;
        let layout = str_arg(args, 1)?;
        let mut out = String::new();
        if write!(out, "{}", time.format(&layout)).is_err() {
            return Ok(error_value(format!("invalid time layout: {layout}")));
        }
        Ok(Value::from(out))
    });
    register(attrs, "time_string", |_, args| {
        expect_args(args, 1)?;
        Ok(Value::from(Value::Time(time_arg(args, 0)?).to_string()))
    });
    register(attrs, "is_zero", |_, args| {
        expect_args(args, 1)?;
        let zero = NaiveDate::from_ymd_opt(1, 1, 1)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive));
        Ok(Value::Bool(Some(time_arg(args, 0)?.with_timezone(&Utc)) == zero))
    });
}

fn nanos_between(later: DateTime<Local>, earlier: DateTime<Local>) -> Value {
    (later - earlier).num_nanoseconds().map_or(Value::Undefined, Value::Int)
}

/// Builds a date the way overflowing fields roll over: month 13 is January
/// of the next year, day 0 the last day of the previous month.
fn normalized_date(year: i64, month: i64, day: i64) -> Option<NaiveDate> {
    let months = year.checked_mul(12)?.checked_add(month.checked_sub(1)?)?;
    let year = i32::try_from(months.div_euclid(12)).ok()?;
    let month = u32::try_from(months.rem_euclid(12) + 1).ok()?;
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    first.checked_add_signed(TimeDelta::try_days(day.checked_sub(1)?)?)
}

fn add_clock(start: NaiveDateTime, hour: i64, minute: i64, second: i64, nanos: i64) -> Option<NaiveDateTime> {
    start
        .checked_add_signed(TimeDelta::try_hours(hour)?)?
        .checked_add_signed(TimeDelta::try_minutes(minute)?)?
        .checked_add_signed(TimeDelta::try_seconds(second)?)?
        .checked_add_signed(TimeDelta::nanoseconds(nanos))
}

fn to_local(naive: NaiveDateTime) -> Option<DateTime<Local>> {
    Local.from_local_datetime(&naive).earliest()
}

/// Parses durations such as `1h30m`, `-1.5s` or `300ms`.
fn parse_duration(s: &str) -> Option<i64> {
    let (negative, mut rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    if rest == "0" {
        return Some(0);
    }
    if rest.is_empty() {
        return None;
    }
    let mut total: f64 = 0.0;
    while !rest.is_empty() {
        let number_len = rest.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(rest.len());
        let number: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];
        let unit_len = rest.find(|c: char| c.is_ascii_digit() || c == '.').unwrap_or(rest.len());
        let unit = match &rest[..unit_len] {
            "ns" => NANOSECOND,
            "us" | "µs" | "μs" => MICROSECOND,
            "ms" => MILLISECOND,
            "s" => SECOND,
            "m" => MINUTE,
            "h" => HOUR,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total += number * unit as f64;
    }
    if total > i64::MAX as f64 {
        return None;
    }
    let nanos = total.round() as i64;
    Some(if negative { -nanos } else { nanos })
}

/// Renders a duration like `1h2m3.5s` or `150ms`.
fn duration_string(nanos: i64) -> String {
    if nanos == 0 {
        return "0s".to_owned();
    }
    let sign = if nanos < 0 { "-" } else { "" };
    let magnitude = nanos.unsigned_abs();
    let second = SECOND.unsigned_abs();
    let body = if magnitude < 1_000 {
        format!("{magnitude}ns")
    } else if magnitude < 1_000_000 {
        format!("{}µs", with_fraction(magnitude, 1_000, 3))
    } else if magnitude < second {
        format!("{}ms", with_fraction(magnitude, 1_000_000, 6))
    } else {
        let seconds = with_fraction(magnitude % (60 * second), second, 9);
        let minutes = magnitude / (60 * second) % 60;
        let hours = magnitude / (3_600 * second);
        if hours > 0 {
            format!("{hours}h{minutes}m{seconds}s")
        } else if minutes > 0 {
            format!("{minutes}m{seconds}s")
        } else {
            format!("{seconds}s")
        }
    };
    format!("{sign}{body}")
}

fn with_fraction(value: u64, unit: u64, digits: usize) -> String {
    let whole = value / unit;
    let fraction = value % unit;
    if fraction == 0 {
        return whole.to_string();
    }
    let fraction = format!("{fraction:0digits$}");
    format!("{whole}.{}", fraction.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_parse_and_render() {
        assert_eq!(parse_duration("1h30m"), Some(HOUR + 30 * MINUTE));
        assert_eq!(parse_duration("-1.5s"), Some(-1_500 * MILLISECOND));
        assert_eq!(parse_duration("3x"), None);
        assert_eq!(duration_string(HOUR + 2 * MINUTE + 3_500 * MILLISECOND), "1h2m3.5s");
        assert_eq!(duration_string(150 * MILLISECOND), "150ms");
        assert_eq!(duration_string(0), "0s");
    }

    #[test]
    fn dates_roll_over() {
        assert_eq!(normalized_date(2023, 13, 1), NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(normalized_date(2024, 3, 0), NaiveDate::from_ymd_opt(2024, 2, 29));
        assert_eq!(normalized_date(2024, i64::MIN, 1), None);
        assert_eq!(normalized_date(2024, 1, i64::MIN), None);
    }
}
