//! Free-text command parser.
//!
//! Recognises the two trigger phrases, pulls a target date-time out of the
//! command body, and extracts `@nickname` and email attendee tokens.
//! A failed parse yields a [`ParseError`] whose `Display` text is shown to
//! the user verbatim.

use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use regex::Regex;

use crate::types::{Command, Trigger};

/// Localized month names: genitive ("27 февраля") first, then nominative.
/// Order matters: longer forms must be tried before their prefixes ("марта" before "март").
const MONTHS: &[(&str, u32)] = &[
    ("января", 1),
    ("февраля", 2),
    ("марта", 3),
    ("апреля", 4),
    ("мая", 5),
    ("июня", 6),
    ("июля", 7),
    ("августа", 8),
    ("сентября", 9),
    ("октября", 10),
    ("ноября", 11),
    ("декабря", 12),
    ("январь", 1),
    ("февраль", 2),
    ("март", 3),
    ("апрель", 4),
    ("май", 5),
    ("июнь", 6),
    ("июль", 7),
    ("август", 8),
    ("сентябрь", 9),
    ("октябрь", 10),
    ("ноябрь", 11),
    ("декабрь", 12),
];

/// User-facing parse failure. Never retried; shown as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Укажи время, например: сделай встречу 16:00 27 февраля")]
    MissingTime,
    #[error("Некорректное время: {hour:02}{minute:02}")]
    InvalidTime { hour: u32, minute: u32 },
    #[error("Некорректная дата: {day}.{month:02}")]
    InvalidDate { day: u32, month: u32 },
}

fn re_create_trigger() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*(сделай|создай)\s+встречу\s*").unwrap())
}

fn re_find_trigger() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*найди\s+время").unwrap())
}

fn re_clock_time() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([0-9]{1,2}):([0-9]{2})\b").unwrap())
}

fn re_compact_time() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([0-9]{3,4})\b").unwrap())
}

fn re_month_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let names: Vec<&str> = MONTHS.iter().map(|(name, _)| *name).collect();
        Regex::new(&format!(r"([0-9]{{1,2}})\s+({})", names.join("|"))).unwrap()
    })
}

fn re_numeric_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([0-9]{1,2})\.([0-9]{2})\b").unwrap())
}

fn re_email() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9-.]+").unwrap())
}

fn re_nickname() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@(\w+)").unwrap())
}

/// Match one of the trigger phrases at the start of a message.
///
/// "Find time" is checked first; the two phrases never overlap.
pub fn match_trigger(text: &str) -> Option<Trigger> {
    if re_find_trigger().is_match(text) {
        Some(Trigger::FindTime)
    } else if re_create_trigger().is_match(text) {
        Some(Trigger::CreateMeeting)
    } else {
        None
    }
}

/// Strip the "create meeting" phrase, leaving the command body.
pub fn strip_create_trigger(text: &str) -> &str {
    match re_create_trigger().find(text) {
        Some(m) => text[m.end()..].trim(),
        None => text.trim(),
    }
}

/// Parse a full "create meeting" message into a [`Command`].
pub fn parse_command(
    text: &str,
    context_text: Option<&str>,
    now: NaiveDateTime,
) -> Result<Command, ParseError> {
    let body = strip_create_trigger(text);
    let target = parse_meeting_time(body, now)?;
    let (nicknames, emails) = extract_attendees(text);

    Ok(Command {
        raw_text: text.to_string(),
        target,
        nicknames,
        emails,
        context_text: context_text
            .map(str::to_string)
            .filter(|ctx| !ctx.is_empty()),
    })
}

/// Extract the target date-time from a command body.
pub fn parse_meeting_time(body: &str, now: NaiveDateTime) -> Result<NaiveDateTime, ParseError> {
    let (hour, minute) = parse_time_of_day(body)?;

    let Some((day, month)) = parse_day_month(body) else {
        return now
            .date()
            .and_hms_opt(hour, minute, 0)
            .ok_or(ParseError::InvalidTime { hour, minute });
    };

    let dt = NaiveDate::from_ymd_opt(now.year(), month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .ok_or(ParseError::InvalidDate { day, month })?;

    if dt >= now {
        return Ok(dt);
    }

    // Already past this year: the user means the next occurrence.
    dt.with_year(now.year() + 1)
        .ok_or(ParseError::InvalidDate { day, month })
}

/// `H:MM` first, then a bare 3-4 digit run read as `HHMM`.
fn parse_time_of_day(body: &str) -> Result<(u32, u32), ParseError> {
    let (hour, minute) = if let Some(caps) = re_clock_time().captures(body) {
        (parse_num(&caps[1]), parse_num(&caps[2]))
    } else if let Some(caps) = re_compact_time().captures(body) {
        let raw = format!("{:0>4}", &caps[1]);
        (parse_num(&raw[..2]), parse_num(&raw[2..]))
    } else {
        return Err(ParseError::MissingTime);
    };

    if hour > 23 || minute > 59 {
        return Err(ParseError::InvalidTime { hour, minute });
    }
    Ok((hour, minute))
}

/// `D <month-name>` first, then `D.MM`. Returns `(day, month)`.
fn parse_day_month(body: &str) -> Option<(u32, u32)> {
    let lowered = body.to_lowercase();
    if let Some(caps) = re_month_date().captures(&lowered) {
        let month = MONTHS
            .iter()
            .find(|(name, _)| *name == &caps[2])
            .map(|(_, n)| *n)?;
        return Some((parse_num(&caps[1]), month));
    }

    re_numeric_date()
        .captures(body)
        .map(|caps| (parse_num(&caps[1]), parse_num(&caps[2])))
}

/// Captures are ASCII digit runs of at most four characters.
fn parse_num(digits: &str) -> u32 {
    digits.parse().unwrap_or(0)
}

/// Extract `(nicknames, emails)` from command text.
///
/// Emails are collected and removed first so that an email's domain part is
/// never picked up as a nickname.
pub fn extract_attendees(text: &str) -> (Vec<String>, Vec<String>) {
    let emails: Vec<String> = re_email()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();

    let remainder = re_email().replace_all(text, " ");
    let nicknames = re_nickname()
        .captures_iter(&remainder)
        .map(|caps| caps[1].to_string())
        .collect();

    (nicknames, emails)
}
