//! Locale-stable parsing of statement amounts and dates.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tally_core::DateRange;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocaleError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid date format: {0}")]
    InvalidDate(String),
}

/// Which character a bank uses as its decimal mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecimalStyle {
    /// Infer from the position of the last separator.
    #[default]
    Auto,
    Dot,
    Comma,
}

const FALLBACK_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%d.%m.%Y", "%d.%m.%y", "%m/%d/%Y", "%d/%m/%Y", "%Y/%m/%d", "%m-%d-%Y",
    "%d-%m-%Y", "%Y%m%d",
];

/// Parses an amount written in any common locale into a dot-decimal value.
///
/// `"1 300,54"`, `"1.300,54"`, `"1,300.54"` and `"1300.54"` all yield the same
/// value under [`DecimalStyle::Auto`]. Accounting parentheses, trailing minus,
/// `DR` suffixes, currency symbols and ISO codes are understood.
pub fn parse_amount(raw: &str, style: DecimalStyle) -> Result<Decimal, LocaleError> {
    let invalid = || LocaleError::InvalidAmount(raw.trim().to_string());
    let mut s = raw.trim();

    let mut negative = false;
    if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        negative = true;
        s = &s[1..s.len() - 1];
    }

    if let Some(rest) = strip_marker(s, "DR") {
        negative = true;
        s = rest;
    } else if let Some(rest) = strip_marker(s, "CR") {
        s = rest;
    }

    let mut digits = String::with_capacity(s.len());
    let mut seen_digit = false;
    for c in s.chars() {
        match c {
            '0'..='9' => {
                seen_digit = true;
                digits.push(c);
            }
            '.' | ',' => digits.push(c),
            '-' | '\u{2212}' => negative = true,
            '+' | '\'' => {}
            c if c.is_whitespace() => {}
            c if c.is_alphabetic() || matches!(c, '$' | '€' | '£' | '¥' | '₹') => {}
            _ => return Err(invalid()),
        }
    }
    if !seen_digit {
        return Err(invalid());
    }

    let normalized = match style {
        DecimalStyle::Dot => digits.replace(',', ""),
        DecimalStyle::Comma => digits.replace('.', "").replace(',', "."),
        DecimalStyle::Auto => infer_decimal_mark(&digits),
    };

    let normalized = normalized.trim_end_matches('.');
    let normalized = if normalized.starts_with('.') {
        format!("0{normalized}")
    } else {
        normalized.to_string()
    };
    let value = Decimal::from_str(&normalized).map_err(|_| invalid())?;
    Ok(if negative { -value } else { value })
}

/// Strips a trailing debit/credit marker that follows a digit or whitespace,
/// so currency codes such as `IDR` are left alone.
fn strip_marker<'a>(s: &'a str, marker: &str) -> Option<&'a str> {
    let cut = s.len().checked_sub(marker.len())?;
    let tail = s.get(cut..)?;
    if !tail.eq_ignore_ascii_case(marker) {
        return None;
    }
    let head = &s[..cut];
    let before = head.chars().next_back()?;
    (before.is_ascii_digit() || before.is_whitespace()).then(|| head.trim_end())
}

fn infer_decimal_mark(digits: &str) -> String {
    let last_sep = digits.rfind(['.', ',']);
    let Some(pos) = last_sep else {
        return digits.to_string();
    };
    let mark = digits.as_bytes()[pos] as char;
    let other = if mark == '.' { ',' } else { '.' };
    let frac_len = digits.len() - pos - 1;
    let mark_count = digits.matches(mark).count();

    let mark_is_decimal = if digits.contains(other) {
        // Both separators present: the last one is the decimal mark.
        true
    } else {
        // A lone separator followed by exactly three digits groups thousands.
        mark_count == 1 && frac_len != 3
    };

    if mark_is_decimal {
        let (int_part, frac_part) = digits.split_at(pos);
        let int_part: String = int_part.chars().filter(char::is_ascii_digit).collect();
        format!("{}.{}", int_part, &frac_part[1..])
    } else {
        digits.chars().filter(char::is_ascii_digit).collect()
    }
}

/// Parses a full date, trying the bank's formats before the common fallbacks.
pub fn parse_date<S: AsRef<str>>(raw: &str, formats: &[S]) -> Result<NaiveDate, LocaleError> {
    let cleaned = raw.trim().replace(". ", ".");
    let s = cleaned.as_str();

    for fmt in formats.iter().map(|f| f.as_ref()).chain(FALLBACK_DATE_FORMATS.iter().copied()) {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(date);
        }
    }

    Err(LocaleError::InvalidDate(raw.trim().to_string()))
}

/// Parses a year-less `DD.MM.` / `DD.MM` / `DD/MM` token into `(day, month)`.
pub fn parse_day_month(raw: &str) -> Option<(u32, u32)> {
    let s = raw.trim().trim_end_matches('.');
    let (d, m) = s.split_once(['.', '/'])?;
    let day: u32 = d.trim().parse().ok()?;
    let month: u32 = m.trim().parse().ok()?;
    if (1..=31).contains(&day) && (1..=12).contains(&month) {
        Some((day, month))
    } else {
        None
    }
}

/// Where a statement's year comes from when its lines print only day and month.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatementYear {
    pub period: Option<DateRange>,
    pub year: Option<i32>,
    pub hint: Option<i32>,
}

impl StatementYear {
    pub fn is_known(&self) -> bool {
        self.period.is_some() || self.year.is_some() || self.hint.is_some()
    }

    /// Completes a day/month pair. With a statement period the year is chosen so
    /// the date lands inside (or nearest to) the period, which keeps December
    /// lines of a December–January statement in the earlier year.
    pub fn resolve(&self, day: u32, month: u32) -> Option<NaiveDate> {
        if let Some(period) = self.period {
            return (period.start.year() - 1..=period.end.year() + 1)
                .filter_map(|y| NaiveDate::from_ymd_opt(y, month, day))
                .min_by_key(|d| distance_to(period, *d));
        }
        let year = self.year.or(self.hint)?;
        NaiveDate::from_ymd_opt(year, month, day)
    }
}

fn distance_to(range: DateRange, date: NaiveDate) -> i64 {
    if range.contains(date) {
        0
    } else if date < range.start {
        (range.start - date).num_days()
    } else {
        (date - range.end).num_days()
    }
}
