use anyhow::{bail, Context};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};

/// Evening times given shortly after midnight refer to yesterday, and early
/// morning times given late in the evening refer to tomorrow.
const DAY_OVERLAP_HOURS: u32 = 4;

/// Parses `[YYYY-MM-DD|today|yesterday|tomorrow ]HH:MM[:SS]` in local time.
pub fn parse_time_string(input: &str) -> anyhow::Result<DateTime<Utc>> {
    let naive = parse_time_string_at(input, Local::now().naive_local())?;
    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .with_context(|| format!("{input} does not exist in the local time zone"))?;
    Ok(local.with_timezone(&Utc))
}

pub fn parse_time_string_at(input: &str, now: NaiveDateTime) -> anyhow::Result<NaiveDateTime> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let (date, time) = match parts.as_slice() {
        [time] => {
            let time = parse_clock(time)?;
            (guess_date(time, now), time)
        }
        [date, time] => (parse_date(date, now.date())?, parse_clock(time)?),
        _ => bail!("Cannot parse given time: {input}"),
    };
    Ok(date.and_time(time))
}

fn guess_date(time: NaiveTime, now: NaiveDateTime) -> NaiveDate {
    let today = now.date();
    let past_midnight = NaiveTime::from_hms_opt(DAY_OVERLAP_HOURS, 0, 0).unwrap_or(NaiveTime::MIN);
    let before_midnight =
        NaiveTime::from_hms_opt(24 - DAY_OVERLAP_HOURS, 0, 0).unwrap_or(NaiveTime::MIN);

    if now.time() < past_midnight && time > before_midnight {
        today.pred_opt().unwrap_or(today)
    } else if now.time() > before_midnight && time < past_midnight {
        today.succ_opt().unwrap_or(today)
    } else {
        today
    }
}

fn parse_date(input: &str, today: NaiveDate) -> anyhow::Result<NaiveDate> {
    let date = match input {
        "today" => Some(today),
        "tomorrow" => today.succ_opt(),
        "yesterday" => today.pred_opt(),
        _ => NaiveDate::parse_from_str(input, "%Y-%m-%d").ok(),
    };
    date.with_context(|| format!("Cannot parse given date: {input}"))
}

fn parse_clock(input: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(input, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(input, "%H:%M"))
        .with_context(|| format!("Cannot parse given time: {input}"))
}

/// Parses `[[HH:]MM:]SS` or a unit form such as `1h30m`, `90m` or `45s`.
pub fn parse_duration_string(input: &str) -> anyhow::Result<TimeDelta> {
    let input = input.trim();
    let seconds = if input.contains(':') || input.chars().all(|c| c.is_ascii_digit()) {
        let fields = input
            .split(':')
            .map(|f| f.parse::<i64>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Could not parse duration: {input}"))?;
        if fields.len() > 3 {
            bail!("Could not parse duration, too many fields: {input}");
        }
        fields.iter().fold(0, |acc, field| acc * 60 + field)
    } else {
        parse_unit_duration(input)?
    };

    if seconds <= 0 {
        bail!("Duration must be positive: {input}");
    }
    Ok(TimeDelta::seconds(seconds))
}

fn parse_unit_duration(input: &str) -> anyhow::Result<i64> {
    let mut seconds = 0;
    let mut number = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let value: i64 = number
            .parse()
            .with_context(|| format!("Could not parse duration: {input}"))?;
        number.clear();
        seconds += match c {
            'h' => value * 3600,
            'm' => value * 60,
            's' => value,
            _ => bail!("Unknown duration unit {c} in {input}"),
        };
    }
    if !number.is_empty() {
        bail!("Missing unit at the end of duration: {input}");
    }
    Ok(seconds)
}
