// src/extract/values.rs

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use time::{Date, Month};

/// How a located string is turned into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Text,
    Numeric,
    Date,
    /// A money amount; currency codes and symbols are ignored.
    Currency,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Date(Date),
}

impl FieldValue {
    pub fn into_text(self) -> String {
        match self {
            FieldValue::Text(s) => s,
            FieldValue::Number(n) if n.fract() == 0.0 => format!("{n:.0}"),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Date(d) => d.to_string(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => parse_amount(s),
            FieldValue::Date(_) => None,
        }
    }

    pub fn as_date(&self) -> Option<Date> {
        match self {
            FieldValue::Date(d) => Some(*d),
            FieldValue::Text(s) => parse_date(s),
            FieldValue::Number(_) => None,
        }
    }
}

/// Parse `raw` according to `kind`. `None` means the text was located but
/// does not hold a value of that kind.
pub fn parse_value(raw: &str, kind: ValueKind) -> Option<FieldValue> {
    match kind {
        ValueKind::Text => parse_text(raw).map(FieldValue::Text),
        ValueKind::Numeric | ValueKind::Currency => parse_amount(raw).map(FieldValue::Number),
        ValueKind::Date => parse_date(raw).map(FieldValue::Date),
    }
}

pub fn parse_text(raw: &str) -> Option<String> {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

/// Parse a number as printed on ERP screens.
///
/// Both `1,234.56` and `1.234,56` are accepted: when both separators occur the
/// last one is the decimal point. A lone comma followed by exactly three digits
/// is a thousands separator, otherwise a decimal comma. With several periods
/// only the last one is kept as the decimal point (`12.000.000` → `12000.000`).
pub fn parse_amount(raw: &str) -> Option<f64> {
    let negative = raw.chars().find(|c| c.is_ascii_digit() || *c == '-') == Some('-');
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    let kept = kept.trim_matches(|c| c == ',' || c == '.');
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let last_comma = kept.rfind(',');
    let last_period = kept.rfind('.');
    let normalized = match (last_comma, last_period) {
        (Some(c), Some(p)) if p > c => kept.replace(',', ""),
        (Some(_), Some(_)) => kept.replace('.', "").replace(',', "."),
        (Some(c), None) => {
            let tail = &kept[c + 1..];
            if kept.matches(',').count() == 1 && tail.len() != 3 {
                kept.replace(',', ".")
            } else {
                kept.replace(',', "")
            }
        }
        (None, Some(p)) => {
            let (head, tail) = kept.split_at(p);
            format!("{}{}", head.replace('.', ""), tail)
        }
        (None, None) => kept.to_string(),
    };

    let value: f64 = normalized.parse().ok()?;
    Some(if negative { -value } else { value })
}

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,4})([./-])(\d{1,2})[./-](\d{1,4})").expect("date pattern")
});

/// Find and parse the first date in `raw`.
///
/// `YYYY-MM-DD` and `YYYY/MM/DD` are year-first; dotted dates are
/// day-first (`DD.MM.YY`); slashed and dashed dates are month-first unless
/// the first number cannot be a month. Two-digit years land in 2000-2099.
pub fn parse_date(raw: &str) -> Option<Date> {
    let cap = DATE_RE.captures(raw)?;
    let a = &cap[1];
    let sep = &cap[2];
    let b: u8 = cap[3].parse().ok()?;
    let c = &cap[4];

    let (year, month, day) = if a.len() == 4 {
        (a.parse::<i32>().ok()?, b, c.parse::<u8>().ok()?)
    } else {
        let first: u8 = a.parse().ok()?;
        let year = match c.len() {
            2 => 2000 + c.parse::<i32>().ok()?,
            4 => c.parse::<i32>().ok()?,
            _ => return None,
        };
        if sep == "." || first > 12 {
            (year, b, first)
        } else {
            (year, first, b)
        }
    };

    let month = Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

/// Strip OCR debris around a description and normalize its spacing.
pub fn clean_description(raw: &str) -> String {
    raw.trim_matches(|c: char| !c.is_alphanumeric())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
