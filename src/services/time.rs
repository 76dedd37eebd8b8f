//! Conversions between zoned instants and the phrases people type.
//!
//! Everything here is pure: the reference clock and zone are always passed
//! in, so a phrase resolves the same way no matter when the test runs.

use chrono::offset::LocalResult;
use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::errors::DispatchError;

pub const DEFAULT_DURATION_MINUTES: i64 = 60;

/// Longest meeting length accepted from a phrase: one year.
pub const MAX_DURATION_MINUTES: i64 = 366 * 24 * 60;

/// A phrase broken down into whatever parts it actually named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedWhen {
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
}

/// "8:00 PM"
pub fn format_clock(ts: DateTime<Utc>, zone: Tz) -> String {
    ts.with_timezone(&zone).format("%-I:%M %p").to_string()
}

/// "today", "tomorrow", or "Tue, Jul 8" (with the year when it would not be
/// read back as the upcoming occurrence).
pub fn format_day(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "today".to_string()
    } else if Some(date) == today.succ_opt() {
        "tomorrow".to_string()
    } else if date.year() != today.year() || date < today {
        date.format("%a, %b %-d, %Y").to_string()
    } else {
        date.format("%a, %b %-d").to_string()
    }
}

pub fn to_display(ts: DateTime<Utc>, zone: Tz, now: DateTime<Utc>) -> String {
    let local = ts.with_timezone(&zone);
    let today = now.with_timezone(&zone).date_naive();
    format!(
        "{} at {}",
        format_day(local.date_naive(), today),
        format_clock(ts, zone)
    )
}

/// Resolve a phrase to a single instant. Fails when the phrase names no
/// time of day or names one that cannot be pinned down.
pub fn to_machine(phrase: &str, now: DateTime<Utc>, zone: Tz) -> Result<DateTime<Tz>, DispatchError> {
    let resolved = resolve_phrase(phrase, now, zone)?;
    let time = resolved.time.ok_or_else(|| {
        DispatchError::AmbiguousTime(format!("\"{}\" has no time of day", phrase.trim()))
    })?;
    let date = resolved
        .date
        .unwrap_or_else(|| now.with_timezone(&zone).date_naive());
    localize(date, time, zone)
}

pub fn localize(date: NaiveDate, time: NaiveTime, zone: Tz) -> Result<DateTime<Tz>, DispatchError> {
    match zone.from_local_datetime(&date.and_time(time)) {
        LocalResult::Single(dt) => Ok(dt),
        LocalResult::Ambiguous(_, _) => Err(DispatchError::AmbiguousTime(format!(
            "{date} {} happens twice in {zone}",
            time.format("%H:%M")
        ))),
        LocalResult::None => Err(DispatchError::AmbiguousTime(format!(
            "{date} {} does not exist in {zone}",
            time.format("%H:%M")
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Meridiem {
    Am,
    Pm,
}

#[derive(Debug, Clone, Copy)]
enum Clock {
    /// "9pm", "9:30 am"
    Marked(u32, u32, Meridiem),
    /// "21:00", "3:30"
    Colon(u32, u32),
    /// "9" with nothing else to go on
    Bare(u32),
    /// "noon", "midnight", "in 2 hours"
    Exact(NaiveTime),
}

/// Break a phrase into the date and time it names, relative to `now` in `zone`.
pub fn resolve_phrase(phrase: &str, now: DateTime<Utc>, zone: Tz) -> Result<ResolvedWhen, DispatchError> {
    let local_now = now.with_timezone(&zone);
    let today = local_now.date_naive();

    let normalized = phrase
        .to_lowercase()
        .replace("a.m.", "am")
        .replace("p.m.", "pm")
        .replace(',', " ");
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    let out_of_range =
        || DispatchError::AmbiguousTime(format!("\"{}\" is too far from now", phrase.trim()));

    let mut day_word: Option<NaiveDate> = None;
    let mut explicit_date: Option<NaiveDate> = None;
    let mut weekday: Option<(Weekday, bool)> = None;
    let mut part: Option<Meridiem> = None;
    let mut clock: Option<Clock> = None;
    let mut next = false;
    let mut recognized = false;

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        let peek = tokens.get(i + 1).copied();
        i += 1;

        match token {
            "at" | "on" | "this" | "by" | "around" | "for" | "the" | "of" | "coming" => continue,
            "today" => day_word = Some(today),
            "tonight" => {
                day_word = Some(today);
                part = Some(Meridiem::Pm);
            }
            "tomorrow" => day_word = Some(today.succ_opt().ok_or_else(out_of_range)?),
            "day" if peek == Some("after") && tokens.get(i + 1) == Some(&"tomorrow") => {
                day_word = Some(today.checked_add_days(Days::new(2)).ok_or_else(out_of_range)?);
                i += 2;
            }
            "morning" => part = Some(Meridiem::Am),
            "afternoon" | "evening" | "night" => part = Some(Meridiem::Pm),
            "noon" | "midday" => clock = Some(Clock::Exact(hm(12, 0))),
            "midnight" => clock = Some(Clock::Exact(hm(0, 0))),
            "next" => {
                next = true;
                continue;
            }
            "in" => {
                let amount = peek.and_then(|p| p.parse::<i64>().ok());
                let unit = tokens.get(i + 1).copied().and_then(unit_minutes);
                match (amount, unit) {
                    (Some(n), Some(per)) if n >= 0 => {
                        let target = n
                            .checked_mul(per)
                            .and_then(Duration::try_minutes)
                            .and_then(|offset| local_now.checked_add_signed(offset))
                            .ok_or_else(out_of_range)?;
                        day_word = Some(target.date_naive());
                        clock = Some(Clock::Exact(hm(target.hour(), target.minute())));
                        i += 2;
                    }
                    _ => continue,
                }
            }
            _ => {
                if let Some(wd) = parse_weekday(token) {
                    weekday = Some((wd, next));
                } else if let Some(month) = parse_month(token) {
                    let day = peek.and_then(parse_day_number);
                    let Some(day) = day else { continue };
                    i += 1;
                    let year = match tokens.get(i).and_then(|t| parse_year(t)) {
                        Some(y) => {
                            i += 1;
                            Some(y)
                        }
                        None => None,
                    };
                    explicit_date = Some(month_day(month, day, year, today)?);
                } else if let Ok(date) = NaiveDate::parse_from_str(token, "%Y-%m-%d") {
                    explicit_date = Some(date);
                } else if let Some(c) = parse_marked(token) {
                    clock = Some(c);
                } else if let Some((h, m)) = parse_colon(token) {
                    clock = Some(match peek.and_then(parse_meridiem) {
                        Some(mer) => {
                            i += 1;
                            Clock::Marked(h, m, mer)
                        }
                        None => Clock::Colon(h, m),
                    });
                } else if let Some(n) = parse_day_number(token) {
                    if let Some(month) = peek.and_then(parse_month) {
                        i += 1;
                        let year = match tokens.get(i).and_then(|t| parse_year(t)) {
                            Some(y) => {
                                i += 1;
                                Some(y)
                            }
                            None => None,
                        };
                        explicit_date = Some(month_day(month, n, year, today)?);
                    } else if let Some(mer) = peek.and_then(parse_meridiem) {
                        i += 1;
                        clock = Some(Clock::Marked(n, 0, mer));
                    } else if peek.and_then(unit_minutes).is_some() {
                        // "30 mins" is a duration, not a clock reading
                        i += 1;
                    } else {
                        clock = Some(Clock::Bare(n));
                    }
                } else {
                    continue;
                }
            }
        }
        recognized = true;
        next = false;
    }

    if !recognized {
        return Err(DispatchError::AmbiguousTime(format!(
            "couldn't read a date or time from \"{}\"",
            phrase.trim()
        )));
    }

    let date = match (explicit_date, weekday) {
        (Some(date), _) => Some(date),
        (None, Some((wd, strictly_after))) => {
            Some(upcoming(today, wd, strictly_after).ok_or_else(out_of_range)?)
        }
        (None, None) => day_word,
    };
    let time = match clock {
        Some(c) => Some(clock_to_time(c, part, phrase)?),
        None => None,
    };

    Ok(ResolvedWhen { date, time })
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

fn clock_to_time(clock: Clock, part: Option<Meridiem>, phrase: &str) -> Result<NaiveTime, DispatchError> {
    let invalid = || DispatchError::AmbiguousTime(format!("\"{}\" is not a valid clock time", phrase.trim()));
    let (hour, minute) = match clock {
        Clock::Exact(t) => return Ok(t),
        Clock::Marked(h, m, mer) => {
            if h == 0 || h > 12 {
                return Err(invalid());
            }
            (apply_meridiem(h, mer), m)
        }
        Clock::Colon(h, m) => match part {
            Some(mer) if (1..=12).contains(&h) => (apply_meridiem(h, mer), m),
            _ => (h, m),
        },
        Clock::Bare(h) => match part {
            Some(mer) if (1..=12).contains(&h) => (apply_meridiem(h, mer), 0),
            _ if h == 0 || h > 12 => (h, 0),
            _ => {
                return Err(DispatchError::AmbiguousTime(format!(
                    "is {h} in \"{}\" morning or evening?",
                    phrase.trim()
                )))
            }
        },
    };
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

fn apply_meridiem(hour: u32, mer: Meridiem) -> u32 {
    match (mer, hour) {
        (Meridiem::Am, 12) => 0,
        (Meridiem::Am, h) => h,
        (Meridiem::Pm, 12) => 12,
        (Meridiem::Pm, h) => h + 12,
    }
}

fn upcoming(today: NaiveDate, target: Weekday, strictly_after: bool) -> Option<NaiveDate> {
    let current = today.weekday().num_days_from_monday() as i64;
    let wanted = target.num_days_from_monday() as i64;
    let mut ahead = (wanted - current).rem_euclid(7) as u64;
    if ahead == 0 && strictly_after {
        ahead = 7;
    }
    today.checked_add_days(Days::new(ahead))
}

fn month_day(month: u32, day: u32, year: Option<i32>, today: NaiveDate) -> Result<NaiveDate, DispatchError> {
    let invalid = || DispatchError::AmbiguousTime(format!("{month}/{day} is not a calendar date"));
    match year {
        Some(y) => NaiveDate::from_ymd_opt(y, month, day).ok_or_else(invalid),
        None => {
            let this_year = NaiveDate::from_ymd_opt(today.year(), month, day);
            match this_year {
                Some(d) if d >= today => Ok(d),
                _ => today
                    .year()
                    .checked_add(1)
                    .and_then(|next| NaiveDate::from_ymd_opt(next, month, day))
                    .ok_or_else(invalid),
            }
        }
    }
}

fn parse_weekday(token: &str) -> Option<Weekday> {
    match token {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thur" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

fn parse_month(token: &str) -> Option<u32> {
    let month = match token.trim_end_matches('.') {
        "january" | "jan" => 1,
        "february" | "feb" => 2,
        "march" | "mar" => 3,
        "april" | "apr" => 4,
        "may" => 5,
        "june" | "jun" => 6,
        "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sep" | "sept" => 9,
        "october" | "oct" => 10,
        "november" | "nov" => 11,
        "december" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn parse_day_number(token: &str) -> Option<u32> {
    let digits = token
        .strip_suffix("st")
        .or_else(|| token.strip_suffix("nd"))
        .or_else(|| token.strip_suffix("rd"))
        .or_else(|| token.strip_suffix("th"))
        .unwrap_or(token);
    if digits.is_empty() || digits.len() > 2 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn parse_year(token: &str) -> Option<i32> {
    if token.len() == 4 && token.chars().all(|c| c.is_ascii_digit()) {
        token.parse().ok()
    } else {
        None
    }
}

fn parse_meridiem(token: &str) -> Option<Meridiem> {
    match token {
        "am" => Some(Meridiem::Am),
        "pm" => Some(Meridiem::Pm),
        _ => None,
    }
}

fn parse_colon(token: &str) -> Option<(u32, u32)> {
    let (h, m) = token.split_once(':')?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return None;
    }
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    (hour <= 23 && minute <= 59).then_some((hour, minute))
}

fn parse_marked(token: &str) -> Option<Clock> {
    let (body, mer) = if let Some(b) = token.strip_suffix("am") {
        (b, Meridiem::Am)
    } else if let Some(b) = token.strip_suffix("pm") {
        (b, Meridiem::Pm)
    } else {
        return None;
    };
    if let Some((h, m)) = parse_colon(body) {
        return Some(Clock::Marked(h, m, mer));
    }
    if !body.is_empty() && body.len() <= 2 && body.chars().all(|c| c.is_ascii_digit()) {
        return body.parse().ok().map(|h| Clock::Marked(h, 0, mer));
    }
    None
}

fn unit_minutes(token: &str) -> Option<i64> {
    match token {
        "m" | "min" | "mins" | "minute" | "minutes" => Some(1),
        "h" | "hr" | "hrs" | "hour" | "hours" => Some(60),
        _ => None,
    }
}

/// Parse a spoken duration. Bare numbers are minutes.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let lowered = text
        .to_lowercase()
        .replace("half an hour", "30 minutes")
        .replace("half hour", "30 minutes")
        .replace("quarter of an hour", "15 minutes")
        .replace("an hour", "1 hour")
        .replace("a hour", "1 hour");

    // "1h30m" -> "1 h 30 m"
    let mut spaced = String::with_capacity(lowered.len() + 8);
    let mut prev_digit: Option<bool> = None;
    for c in lowered.chars() {
        let is_digit = c.is_ascii_digit() || c == '.';
        if c.is_alphanumeric() || c == '.' {
            if prev_digit.is_some_and(|p| p != is_digit) {
                spaced.push(' ');
            }
            prev_digit = Some(is_digit);
        } else {
            prev_digit = None;
        }
        spaced.push(c);
    }

    let tokens: Vec<&str> = spaced.split_whitespace().collect();
    let mut total = 0.0_f64;
    let mut found = false;
    let mut i = 0;
    while i < tokens.len() {
        if let Ok(n) = tokens[i].parse::<f64>() {
            let per = tokens.get(i + 1).copied().and_then(unit_minutes);
            total += n * per.unwrap_or(1) as f64;
            found = true;
            i += if per.is_some() { 2 } else { 1 };
        } else {
            i += 1;
        }
    }

    // NaN, infinities and anything past the representable range fall out here
    let minutes = total.round();
    if !found || !(1.0..=MAX_DURATION_MINUTES as f64).contains(&minutes) {
        return None;
    }
    Duration::try_minutes(minutes as i64)
}

/// "30 mins", "1 hour", "1 hour 30 mins"
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_minutes();
    let (hours, minutes) = (total / 60, total % 60);
    let hours_text = match hours {
        0 => None,
        1 => Some("1 hour".to_string()),
        h => Some(format!("{h} hours")),
    };
    let minutes_text = match minutes {
        0 => None,
        1 => Some("1 min".to_string()),
        m => Some(format!("{m} mins")),
    };
    match (hours_text, minutes_text) {
        (Some(h), Some(m)) => format!("{h} {m}"),
        (Some(h), None) => h,
        (None, Some(m)) => m,
        (None, None) => "0 mins".to_string(),
    }
}
