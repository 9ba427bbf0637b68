// src/extract/rows.rs

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

use super::LineItem;
use super::values::{clean_description, parse_amount};

/// How a single line-item row is laid out on a vendor's screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RowFormat {
    /// `[item_no] description  qty  price  total`, numbers at the end of the row.
    #[default]
    Trailing,
    /// SAP Business One grid rows:
    /// `A00001 J.B. Officeprint 1420  5 5  AUD 500.000 ... AUD 2,500.000`.
    SapB1,
}

/// A row that could not be turned into a line item, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError(pub &'static str);

const AMOUNT: &str = r"(?:[A-Z]{3}\s*)?[$£€]?\s*-?[\d.,]*\d";

static TRAILING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?:(?P<item>[A-Z]{{1,3}}-?\d{{3,6}})\s+)?(?P<desc>.*?\S)\s+(?P<qty>\d+(?:[.,]\d+)?)\s+(?P<price>{AMOUNT})\s+(?P<total>{AMOUNT})\s*$"
    ))
    .expect("trailing row pattern")
});

static SAP_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A£]\s?(\d{5})\b").expect("sap item pattern"));

static SAP_AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:AUD|USD|EUR|GBP|NZD|CAD|SGD)\s*([\d,.]*\d)").expect("sap amount pattern")
});

static SAP_QTY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s(\d{1,4})\s+\d{1,4}[,.]?\s+(?:AUD|USD|EUR|GBP|NZD|CAD|SGD)\b")
        .expect("sap quantity pattern")
});

impl RowFormat {
    /// Parse one row. The returned item has `line_no` 0; the caller numbers
    /// the rows it keeps.
    pub fn parse_row(&self, row: &str) -> Result<LineItem, RowError> {
        match self {
            RowFormat::Trailing => parse_trailing(row),
            RowFormat::SapB1 => parse_sap_b1(row),
        }
    }
}

fn parse_trailing(row: &str) -> Result<LineItem, RowError> {
    let cap = TRAILING_RE
        .captures(row.trim())
        .ok_or(RowError("expected description, quantity, price and total"))?;

    let description = clean_description(&cap["desc"]);
    if !description.chars().any(|c| c.is_alphabetic()) {
        return Err(RowError("description has no text"));
    }

    let quantity = parse_amount(&cap["qty"]).ok_or(RowError("quantity is not a number"))?;
    let unit_price = parse_amount(&cap["price"]).ok_or(RowError("unit price is not a number"))?;
    let line_total = parse_amount(&cap["total"]).ok_or(RowError("line total is not a number"))?;
    check_item(quantity, unit_price, line_total)?;

    Ok(LineItem {
        line_no: 0,
        item_no: cap.name("item").map(|m| m.as_str().to_string()),
        description,
        quantity,
        unit_price,
        line_total,
    })
}

fn parse_sap_b1(row: &str) -> Result<LineItem, RowError> {
    let item = SAP_ITEM_RE
        .captures(row)
        .ok_or(RowError("no item code"))?;
    let item_end = item.get(0).map_or(0, |m| m.end());
    let item_no = format!("A{}", &item[1]);

    let amounts: Vec<(usize, f64)> = SAP_AMOUNT_RE
        .captures_iter(row)
        .filter_map(|c| {
            let start = c.get(0)?.start();
            parse_amount(&c[1]).map(|v| (start, v))
        })
        .collect();
    let Some(&(first_amount_at, unit_price)) = amounts.first() else {
        return Err(RowError("no currency amounts"));
    };

    let qty = SAP_QTY_RE
        .captures(&row[item_end..])
        .and_then(|c| Some((item_end + c.get(0)?.start(), c[1].parse::<f64>().ok()?)));

    let line_total = if amounts.len() >= 2 {
        amounts[amounts.len() - 1].1
    } else {
        qty.map_or(unit_price, |(_, q)| q * unit_price)
    };

    let quantity = match qty {
        Some((_, q)) => q,
        None if unit_price > 0.0 => (line_total / unit_price).round(),
        None => 1.0,
    };

    let desc_end = qty.map_or(first_amount_at, |(at, _)| at).max(item_end);
    let description = clean_description(&row[item_end..desc_end]);
    if !description.chars().any(|c| c.is_alphabetic()) {
        return Err(RowError("description has no text"));
    }
    check_item(quantity, unit_price, line_total)?;

    Ok(LineItem {
        line_no: 0,
        item_no: Some(item_no),
        description,
        quantity,
        unit_price,
        line_total,
    })
}

fn check_item(quantity: f64, unit_price: f64, line_total: f64) -> Result<(), RowError> {
    if quantity <= 0.0 {
        return Err(RowError("quantity must be positive"));
    }
    if unit_price < 0.0 || line_total < 0.0 {
        return Err(RowError("negative amount"));
    }
    Ok(())
}

static MONEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[$£€]|\b(?:AUD|USD|EUR|GBP|NZD|CAD|SGD)\b").expect("money pattern")
});

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d.,]*").expect("number pattern"));

/// Whether a line that failed to parse was meant to be a row: it carries a
/// money amount or at least three numbers. Header lines carry neither.
pub fn looks_like_row(line: &str) -> bool {
    MONEY_RE.is_match(line) || NUMBER_RE.find_iter(line).count() >= 3
}
