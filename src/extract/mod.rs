// src/extract/mod.rs

pub mod rows;
pub mod values;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use time::Date;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::vendors::VendorProfile;
use rows::looks_like_row;
use values::{FieldValue, ValueKind, parse_value};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

/// Header and totals fields a vendor rule can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    PoNumber,
    OrderDate,
    DueDate,
    Currency,
    Subtotal,
    Discount,
    Freight,
    Tax,
    Total,
    Notes,
}

impl FieldName {
    pub const ALL: [FieldName; 10] = [
        FieldName::PoNumber,
        FieldName::OrderDate,
        FieldName::DueDate,
        FieldName::Currency,
        FieldName::Subtotal,
        FieldName::Discount,
        FieldName::Freight,
        FieldName::Tax,
        FieldName::Total,
        FieldName::Notes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::PoNumber => "po_number",
            FieldName::OrderDate => "order_date",
            FieldName::DueDate => "due_date",
            FieldName::Currency => "currency",
            FieldName::Subtotal => "subtotal",
            FieldName::Discount => "discount",
            FieldName::Freight => "freight",
            FieldName::Tax => "tax",
            FieldName::Total => "total",
            FieldName::Notes => "notes",
        }
    }

    pub fn default_kind(&self) -> ValueKind {
        match self {
            FieldName::PoNumber | FieldName::Currency | FieldName::Notes => ValueKind::Text,
            FieldName::OrderDate | FieldName::DueDate => ValueKind::Date,
            FieldName::Subtotal
            | FieldName::Discount
            | FieldName::Freight
            | FieldName::Tax
            | FieldName::Total => ValueKind::Currency,
        }
    }

    /// Money fields; rendered as amounts and placed on the last page only.
    pub fn is_total(&self) -> bool {
        self.default_kind() == ValueKind::Currency
    }
}

impl FromStr for FieldName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldName::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown field '{s}'"))
    }
}

/// A single purchase-order line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub line_no: u32,
    #[serde(default)]
    pub item_no: Option<String>,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub line_total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    /// Total before discount.
    #[serde(default)]
    pub subtotal: Option<f64>,
    #[serde(default)]
    pub discount: Option<f64>,
    #[serde(default)]
    pub freight: Option<f64>,
    #[serde(default)]
    pub tax: Option<f64>,
    /// Grand total / payment due.
    #[serde(default)]
    pub total: Option<f64>,
}

/// Non-fatal findings attached to a record for manual review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionWarning {
    /// A row inside the line-item block did not parse.
    RowSkipped { line: usize, text: String, reason: String },
    /// The configured start marker of the line-item block never appeared.
    BlockNotFound { marker: String },
    /// A field was located but its text did not parse.
    Unparsed { field: FieldName, text: String },
    /// Summed line totals disagree with an extracted total.
    Inconsistent {
        against: FieldName,
        expected: f64,
        found: f64,
    },
    /// The grand total was computed from subtotal and adjustments.
    TotalDerived { total: f64 },
}

impl ExtractionWarning {
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionWarning::RowSkipped { .. } => "RowSkipped",
            ExtractionWarning::BlockNotFound { .. } => "BlockNotFound",
            ExtractionWarning::Unparsed { .. } => "Unparsed",
            ExtractionWarning::Inconsistent { .. } => "ExtractionInconsistent",
            ExtractionWarning::TotalDerived { .. } => "TotalDerived",
        }
    }
}

/// All structured data we pull out of one PO screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPo {
    pub vendor_key: String,
    #[serde(default)]
    pub vendor_name: Option<String>,
    pub po_number: String,
    #[serde(default, with = "iso_date::option")]
    pub order_date: Option<Date>,
    #[serde(default, with = "iso_date::option")]
    pub due_date: Option<Date>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub totals: Totals,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub warnings: Vec<ExtractionWarning>,
}

impl ExtractedPo {
    pub fn new(vendor_key: impl Into<String>, po_number: impl Into<String>) -> Self {
        Self {
            vendor_key: vendor_key.into(),
            vendor_name: None,
            po_number: po_number.into(),
            order_date: None,
            due_date: None,
            currency: None,
            line_items: Vec::new(),
            totals: Totals::default(),
            notes: None,
            warnings: Vec::new(),
        }
    }

    pub fn line_sum(&self) -> f64 {
        self.line_items.iter().map(|i| i.line_total).sum()
    }

    pub fn has_field(&self, field: FieldName) -> bool {
        match field {
            FieldName::PoNumber => !self.po_number.trim().is_empty(),
            FieldName::OrderDate => self.order_date.is_some(),
            FieldName::DueDate => self.due_date.is_some(),
            FieldName::Currency => self.currency.is_some(),
            FieldName::Subtotal => self.totals.subtotal.is_some(),
            FieldName::Discount => self.totals.discount.is_some(),
            FieldName::Freight => self.totals.freight.is_some(),
            FieldName::Tax => self.totals.tax.is_some(),
            FieldName::Total => self.totals.total.is_some(),
            FieldName::Notes => self.notes.is_some(),
        }
    }

    pub fn is_inconsistent(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, ExtractionWarning::Inconsistent { .. }))
    }

    /// Fill in a missing grand total and cross-check line totals against the
    /// extracted totals. Earlier `Inconsistent` warnings are replaced, so the
    /// check can be re-run on a reloaded record.
    pub fn check_totals(&mut self, tolerance: f64) {
        self.warnings
            .retain(|w| !matches!(w, ExtractionWarning::Inconsistent { .. }));

        let t = &self.totals;
        let adjustments = t.freight.unwrap_or(0.0) + t.tax.unwrap_or(0.0) - t.discount.unwrap_or(0.0);

        if t.total.is_none() {
            if let Some(subtotal) = t.subtotal {
                let total = round_cents(subtotal + adjustments);
                self.totals.total = Some(total);
                self.warnings.push(ExtractionWarning::TotalDerived { total });
            }
        }

        let line_sum = self.line_sum();
        let checks = [
            (FieldName::Subtotal, self.totals.subtotal, line_sum),
            (FieldName::Total, self.totals.total, line_sum + adjustments),
        ];
        for (against, found, expected) in checks {
            let Some(found) = found else { continue };
            if (found - expected).abs() > tolerance {
                warn!(
                    field = against.as_str(),
                    expected = round_cents(expected),
                    found,
                    "Line totals disagree with extracted total"
                );
                self.warnings.push(ExtractionWarning::Inconsistent {
                    against,
                    expected: round_cents(expected),
                    found,
                });
            }
        }
    }

    /// Persist as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?).map_err(|e| Error::io(path, e))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Extract a structured PO from cleaned OCR text using the vendor's rules.
pub fn extract_po(text: &str, profile: &VendorProfile, tolerance: f64) -> Result<ExtractedPo> {
    extract_po_with(text, profile, tolerance, None)
}

/// Like [`extract_po`], with a PO number supplied by the operator. The
/// override wins over whatever the screen shows, and a screen without a
/// readable PO number no longer fails.
pub fn extract_po_with(
    text: &str,
    profile: &VendorProfile,
    tolerance: f64,
    po_override: Option<&str>,
) -> Result<ExtractedPo> {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let rules = &profile.rules;

    let mut po = ExtractedPo::new(profile.key.clone(), po_override.unwrap_or_default());
    po.vendor_name = Some(profile.name.clone());
    let mut missing = Vec::new();

    for (&field, rule) in &rules.fields {
        if field == FieldName::PoNumber && po_override.is_some() {
            continue;
        }
        let value = match rule.locate(text, &lines) {
            Some(raw) => {
                let parsed = parse_value(raw, rule.kind);
                if parsed.is_none() {
                    warn!(field = field.as_str(), raw = %raw, "Located field did not parse");
                    po.warnings.push(ExtractionWarning::Unparsed {
                        field,
                        text: raw.to_string(),
                    });
                }
                parsed
            }
            None => None,
        };

        let assigned = value.is_some_and(|v| assign(&mut po, field, v));
        debug!(field = field.as_str(), found = assigned, "Field rule applied");
        if !assigned && rule.required {
            missing.push(field);
        }
    }

    if !missing.is_empty() {
        warn!(vendor = %profile.key, missing = ?missing, "Required fields missing");
        return Err(Error::ExtractionFailed { missing });
    }

    extract_line_items(&lines, profile, &mut po);
    po.check_totals(tolerance);

    info!(
        vendor = %po.vendor_key,
        po_number = %po.po_number,
        line_items = po.line_items.len(),
        total = ?po.totals.total,
        warnings = po.warnings.len(),
        "Extraction result"
    );
    Ok(po)
}

/// Store `value` on the record. Returns false when the value cannot stand in
/// for that field (e.g. a date rule pointed at free text).
fn assign(po: &mut ExtractedPo, field: FieldName, value: FieldValue) -> bool {
    fn set<T>(slot: &mut Option<T>, v: Option<T>) -> bool {
        let found = v.is_some();
        if found {
            *slot = v;
        }
        found
    }

    match field {
        FieldName::PoNumber => {
            po.po_number = value.into_text();
            !po.po_number.is_empty()
        }
        FieldName::OrderDate => set(&mut po.order_date, value.as_date()),
        FieldName::DueDate => set(&mut po.due_date, value.as_date()),
        FieldName::Currency => set(&mut po.currency, Some(value.into_text().to_uppercase())),
        FieldName::Notes => set(&mut po.notes, Some(value.into_text())),
        FieldName::Subtotal => set(&mut po.totals.subtotal, value.as_number()),
        FieldName::Discount => set(&mut po.totals.discount, value.as_number()),
        FieldName::Freight => set(&mut po.totals.freight, value.as_number()),
        FieldName::Tax => set(&mut po.totals.tax, value.as_number()),
        FieldName::Total => set(&mut po.totals.total, value.as_number()),
    }
}

fn extract_line_items(lines: &[&str], profile: &VendorProfile, po: &mut ExtractedPo) {
    let block = &profile.rules.block;
    let Some(first) = block.first_row(lines) else {
        let marker = block
            .start
            .as_ref()
            .map(|re| re.as_str().to_string())
            .unwrap_or_default();
        warn!(marker = %marker, "Line-item block start marker not found");
        po.warnings.push(ExtractionWarning::BlockNotFound { marker });
        return;
    };

    // Without a start marker the block opens at the first row that parses.
    // Until then end-marker lines and lines with no amounts are headers.
    let mut opened = block.start.is_some();
    for (offset, row) in lines[first..].iter().enumerate() {
        let line = first + offset + 1;
        if block.is_end(row) {
            if opened {
                break;
            }
            debug!(line, "Header line above line items");
            continue;
        }
        match profile.rules.row_format.parse_row(row) {
            Ok(mut item) => {
                opened = true;
                item.line_no = po.line_items.len() as u32 + 1;
                po.line_items.push(item);
            }
            Err(_) if !opened && !looks_like_row(row) => {
                debug!(line, "Header line above line items");
            }
            Err(e) => {
                warn!(line, row = %row, reason = e.0, "Skipping line-item row");
                po.warnings.push(ExtractionWarning::RowSkipped {
                    line,
                    text: row.to_string(),
                    reason: e.0.to_string(),
                });
            }
        }
    }
}
