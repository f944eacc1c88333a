//! Tolerant date parsing for the wild variety of timestamps feeds
//! actually ship: RFC-3339/ISO-8601, the RFC-822/850/1123 family with
//! named or numeric zones, and loose "month day year" permutations
//! with junk tokens around them.

use chrono::{
    DateTime, Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc,
};

/// Parses a date string into a UTC instant. Returns `None` when no
/// supported form matches; an empty result is distinguishable from any
/// real instant.
pub fn parse_date(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if looks_like_iso(input) {
        return parse_iso(input);
    }
    parse_loose(input)
}

/// The normalizer's weak date fields also accept millisecond epochs.
pub fn parse_date_value(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => {
            let millis = n.as_i64()?;
            DateTime::<Utc>::from_timestamp_millis(millis)
        }
        serde_json::Value::String(s) => parse_date(s),
        _ => None,
    }
}

/// Serde adapter for optional dates serialized as RFC 3339 but parsed
/// tolerantly.
pub mod serde_opt {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        date: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match date {
            Some(date) => serializer.serialize_str(&date.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(value.as_ref().and_then(parse_date_value))
    }
}

fn looks_like_iso(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 10
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(u8::is_ascii_digit)
}

fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    let (date_part, rest) = s.split_at(10);
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;

    if rest.is_empty() {
        // A date with no time is interpreted as UTC midnight.
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }

    let mut rest = rest.strip_prefix(['T', 't', ' '])?;

    // Split a trailing zone designator off the time.
    let mut zone: Option<i32> = None;
    if let Some(stripped) = rest.strip_suffix(['Z', 'z']) {
        zone = Some(0);
        rest = stripped;
    } else if let Some(pos) = rest.rfind(['+', '-']) {
        if pos > 0 {
            zone = Some(parse_numeric_offset(&rest[pos..])?);
            rest = &rest[..pos];
        }
    }

    let mut millis: u32 = 0;
    if let Some(dot) = rest.find('.') {
        let frac = &rest[dot + 1..];
        if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let padded = format!("{frac:0<3}");
        millis = padded[..3].parse().ok()?;
        rest = &rest[..dot];
    }

    let mut fields = rest.split(':');
    let hour: u32 = parse_two_digits(fields.next()?)?;
    let minute: u32 = parse_two_digits(fields.next()?)?;
    let second: u32 = match fields.next() {
        Some(s) => parse_two_digits(s)?,
        None => 0,
    };
    if fields.next().is_some() {
        return None;
    }

    // T24:00 is the midnight at the end of the day.
    let mut bump_day = false;
    let hour = if hour == 24 {
        if minute != 0 || second != 0 || millis != 0 {
            return None;
        }
        bump_day = true;
        0
    } else {
        hour
    };

    let mut naive = date.and_hms_milli_opt(hour, minute, second, millis)?;
    if bump_day {
        naive += Duration::days(1);
    }
    with_zone(naive, zone)
}

fn parse_two_digits(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// `+HH`, `+HHMM` or `+HH:MM` (sign included) to minutes.
fn parse_numeric_offset(s: &str) -> Option<i32> {
    let sign = match s.as_bytes().first()? {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let digits: String = s[1..].chars().filter(|c| *c != ':').collect();
    if digits.is_empty() || digits.len() > 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: i32 = digits.parse().ok()?;
    let minutes = if digits.len() <= 2 {
        value * 60
    } else {
        (value / 100) * 60 + value % 100
    };
    if minutes > 14 * 60 {
        return None;
    }
    Some(sign * minutes)
}

fn with_zone(naive: NaiveDateTime, zone: Option<i32>) -> Option<DateTime<Utc>> {
    match zone {
        Some(minutes) => {
            let offset = FixedOffset::east_opt(minutes * 60)?;
            match offset.from_local_datetime(&naive) {
                LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
                _ => None,
            }
        }
        // A time with no zone is interpreted in local time.
        None => match chrono::Local.from_local_datetime(&naive) {
            LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                Some(dt.with_timezone(&Utc))
            }
            LocalResult::None => None,
        },
    }
}

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
fn month_from(token: &str) -> Option<u32> {
    if token.len() < 3 || !token.is_char_boundary(3) {
        return None;
    }
    let prefix = token[..3].to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| **m == prefix)
        .map(|i| i as u32 + 1)
}

fn named_zone(token: &str) -> Option<i32> {
    match token.to_ascii_uppercase().as_str() {
        "UT" | "GMT" | "UTC" | "Z" => Some(0),
        "EST" => Some(-5 * 60),
        "EDT" => Some(-4 * 60),
        "CST" => Some(-6 * 60),
        "CDT" => Some(-5 * 60),
        "MST" => Some(-7 * 60),
        "MDT" => Some(-6 * 60),
        "PST" => Some(-8 * 60),
        "PDT" => Some(-7 * 60),
        _ => None,
    }
}

/// Zone tokens: a named zone, `GMT+HHMM`, `UTC-05:00`, or a bare
/// `±HHMM` offset.
fn zone_from(token: &str) -> Option<i32> {
    if let Some(minutes) = named_zone(token) {
        return Some(minutes);
    }
    for prefix in ["GMT", "UTC", "UT"] {
        if let Some(rest) = strip_prefix_ignore_case(token, prefix) {
            if rest.is_empty() {
                return Some(0);
            }
            return parse_numeric_offset(rest);
        }
    }
    if token.starts_with(['+', '-']) {
        return parse_numeric_offset(token);
    }
    None
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

#[derive(Default)]
struct Accumulator {
    year: Option<i32>,
    month: Option<u32>,
    day: Option<u32>,
    hour: u32,
    minute: u32,
    second: u32,
    zone: Option<i32>,
    pm: Option<bool>,
}

impl Accumulator {
    fn push_number(&mut self, value: i64, width: usize) {
        if width >= 3 || value > 31 {
            if self.year.is_none() {
                self.year = Some(value as i32);
            }
        } else if self.day.is_none() {
            self.day = Some(value as u32);
        } else if self.year.is_none() {
            self.year = Some(value as i32);
        }
    }

    fn push_time(&mut self, token: &str) -> bool {
        let mut parts = token.split(':');
        let (Some(h), Some(m)) = (parts.next(), parts.next()) else {
            return false;
        };
        let (Some(hour), Some(minute)) = (parse_two_digits(h), parse_two_digits(m)) else {
            return false;
        };
        let second = match parts.next() {
            Some(s) => match parse_two_digits(s) {
                Some(second) => second,
                None => return false,
            },
            None => 0,
        };
        if parts.next().is_some() || hour > 23 || minute > 59 || second > 59 {
            return false;
        }
        self.hour = hour;
        self.minute = minute;
        self.second = second;
        true
    }

    /// `2000/01/01`, `01/01/2000` and `01/01`.
    fn push_slashed(&mut self, token: &str) -> bool {
        let parts: Vec<&str> = token.split('/').collect();
        if parts.len() < 2
            || parts.len() > 3
            || !parts
                .iter()
                .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
        {
            return false;
        }
        let numbers: Vec<i64> = parts.iter().map(|p| p.parse().unwrap()).collect();
        if numbers[0] >= 1000 {
            self.year = Some(numbers[0] as i32);
            self.month = Some(numbers[1] as u32);
            if numbers.len() == 3 {
                self.day = Some(numbers[2] as u32);
            }
        } else {
            self.month = Some(numbers[0] as u32);
            self.day = Some(numbers[1] as u32);
            if numbers.len() == 3 {
                self.year = Some(numbers[2] as i32);
            }
        }
        true
    }

    fn finish(mut self) -> Option<DateTime<Utc>> {
        let mut year = self.year?;
        // Two-digit years: [0,50) is 2000-based, [50,100) 1900-based.
        if (0..50).contains(&year) {
            year += 2000;
        } else if (50..100).contains(&year) {
            year += 1900;
        }
        match self.pm {
            Some(true) if self.hour < 12 => self.hour += 12,
            Some(false) if self.hour == 12 => self.hour = 0,
            _ => {}
        }
        let naive = NaiveDate::from_ymd_opt(year, self.month?, self.day?)?.and_hms_opt(
            self.hour,
            self.minute,
            self.second,
        )?;
        with_zone(naive, self.zone)
    }
}

/// Scans whitespace/comma separated tokens, skipping parenthesized
/// noise, and recovers day/month/year/time/zone wherever they appear.
fn parse_loose(input: &str) -> Option<DateTime<Utc>> {
    let mut acc = Accumulator::default();

    for token in tokenize(input) {
        let token = token.as_str();
        if token.contains(':') && acc.push_time(token) {
            continue;
        }
        if let Some(minutes) = zone_from(token) {
            acc.zone = Some(minutes);
            continue;
        }
        if token.contains('/') && acc.push_slashed(token) {
            continue;
        }
        if token.eq_ignore_ascii_case("am") {
            acc.pm = Some(false);
            continue;
        }
        if token.eq_ignore_ascii_case("pm") {
            acc.pm = Some(true);
            continue;
        }
        if token.bytes().all(|b| b.is_ascii_digit()) {
            acc.push_number(token.parse().ok()?, token.len());
            continue;
        }
        // `01-Jan-2000` and `01-Jan-00`.
        if let Some((day, month, year)) = split_dashed_date(token) {
            acc.day = Some(day);
            acc.month = Some(month);
            acc.year = Some(year);
            continue;
        }
        // `Jan01`, or a month name with trailing junk and digits.
        if let Some(month) = month_from(token) {
            if acc.month.is_none() {
                acc.month = Some(month);
            }
            let digits: String = token
                .chars()
                .rev()
                .take_while(|c| c.is_ascii_digit())
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            if !digits.is_empty() && digits.len() <= 2 && acc.day.is_none() {
                acc.day = digits.parse().ok();
            }
            continue;
        }
        // Weekdays and anything else unrecognized are ignored.
    }

    acc.finish()
}

fn split_dashed_date(token: &str) -> Option<(u32, u32, i32)> {
    let parts: Vec<&str> = token.split('-').collect();
    if parts.len() != 3 {
        return None;
    }
    let day: u32 = parse_two_digits(parts[0])?;
    let month = month_from(parts[1])?;
    if parts[2].is_empty() || parts[2].len() > 4 || !parts[2].bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = parts[2].parse().ok()?;
    Some((day, month, year))
}

fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in input.chars() {
        match ch {
            '(' => {
                depth += 1;
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            ')' => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            c if c.is_whitespace() || c == ',' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(s: &str) -> i64 {
        parse_date(s).expect(s).timestamp_millis()
    }

    #[test]
    fn iso_dates() {
        assert_eq!(millis("2000-01-01T08:00:00.000Z"), 946713600000);
        assert_eq!(millis("2000-01-01T08:00:00Z"), 946713600000);
        assert_eq!(millis("2000-01-01T08:00Z"), 946713600000);
        assert_eq!(millis("2000-01-01T03:00:00-05:00"), 946713600000);
        assert_eq!(millis("2000-01-01"), 946684800000);
    }

    #[test]
    fn iso_hour_24_is_the_following_midnight() {
        assert_eq!(millis("2000-01-01T24:00Z"), 946771200000);
        assert_eq!(millis("2000-01-01T24:00:00.000Z"), 946771200000);
        assert!(parse_date("2000-01-01T24:30Z").is_none());
    }

    #[test]
    fn invalid_iso_times_fail_outright() {
        assert!(parse_date("2000-01-01T60Z").is_none());
        assert!(parse_date("2000-01-01T08:61:00Z").is_none());
    }

    #[test]
    fn rfc822_variants() {
        assert_eq!(millis("Sat, 01 Jan 2000 08:00:00 UT"), 946713600000);
        assert_eq!(millis("Sat, 01-Jan-2000 08:00:00 GMT"), 946713600000);
        assert_eq!(millis("Saturday, 01-Jan-00 08:00:00 UT"), 946713600000);
        assert_eq!(millis("01 Jan 00 08:00 +0000"), 946713600000);
        assert_eq!(millis("Sat, 01 Jan 00 08:00 -0500"), 946731600000);
    }

    #[test]
    fn two_digit_years_split_at_fifty() {
        assert_eq!(millis("Sat, 01 Jan 50 08:00:00 UT"), -631123200000);
        assert_eq!(millis("Sat, 01 Jan 00 08:00:00 UT"), 946713600000);
    }

    #[test]
    fn named_timezones() {
        assert_eq!(millis("Sat, 01 Jan 2000 03:00:00 EST"), 946713600000);
        assert_eq!(millis("Sat, 01 Jan 2000 04:00:00 EDT"), 946713600000);
        assert_eq!(millis("Sat, 01-Jan-2000 02:00:00 CST"), 946713600000);
        assert_eq!(millis("Sat, 01-Jan-2000 00:00:00 PST"), 946713600000);
        assert_eq!(millis("Sat, 01-Jan-2000 03:00:00 UTC-0500"), 946713600000);
        assert_eq!(millis("Sat, 01-Jan-2000 03:00:00 UTC-05:00"), 946713600000);
        assert_eq!(millis("Sat, 01-Jan-2000 08:00:00 GMT+00:00"), 946713600000);
    }

    #[test]
    fn junk_tokens_are_tolerated() {
        assert_eq!(millis("Jan 01 08:00:00 UT 2000"), 946713600000);
        assert_eq!(millis("[Saturday] Jan 01 08:00:00 UT 2000"), 946713600000);
        assert_eq!(
            millis("Ignore all of this stuff because it is annoying 01 Jan 2000 08:00:00 UT"),
            946713600000
        );
        assert_eq!(millis("Sat, 01 Janisamonth 2000 08:00:00 UT"), 946713600000);
        assert_eq!(millis("Jan01 2000 08:00:00 UT"), 946713600000);
        assert_eq!(
            millis(" ()(Sat, 01-Jan-2000)  Sat,   01-Jan-2000   08:00:00   UT  "),
            946713600000
        );
        assert_eq!(
            millis("  Sat,  01  Jan  2000  08:00:00  UT((((CDT))))"),
            946713600000
        );
    }

    #[test]
    fn slashed_dates() {
        assert_eq!(millis("Sat, 2000/01/01 08:00:00 UT"), 946713600000);
        assert_eq!(millis("Sat, 01/01/2000 08:00:00 UT"), 946713600000);
        assert_eq!(millis("Sat, 01/01 2000 08:00:00 UT"), 946713600000);
    }

    #[test]
    fn am_pm() {
        assert_eq!(millis("Sat, 01 Jan 2000 08:00 AM UT"), 946713600000);
        assert_eq!(millis("Sat, 01 Jan 2000 12:00 AM UT"), 946684800000);
        assert_eq!(millis("Sat, 01 Jan 2000 08:00 PM UT"), 946756800000);
    }

    #[test]
    fn garbage_fails() {
        assert!(parse_date("").is_none());
        assert!(parse_date("not a date").is_none());
        assert!(parse_date("Sat, 08:00:00 UT").is_none());
    }

    #[test]
    fn epoch_millis_value() {
        assert_eq!(
            parse_date_value(&serde_json::json!(946713600000i64))
                .unwrap()
                .timestamp_millis(),
            946713600000
        );
    }
}
