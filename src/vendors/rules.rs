// src/vendors/rules.rs

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::extract::FieldName;
use crate::extract::rows::RowFormat;
use crate::extract::values::ValueKind;

/// A rule as written in the registry file. Exactly one of `label`,
/// `pattern` or `line` must be set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub label: Option<String>,
    pub pattern: Option<String>,
    pub line: Option<usize>,
    pub kind: Option<ValueKind>,
    #[serde(default)]
    pub required: bool,
}

/// Where a field's text sits in the cleaned OCR output.
#[derive(Debug, Clone)]
pub enum Locator {
    /// Text following an anchor label on the same line, or the next line
    /// when the label stands alone.
    Label(String),
    /// First match of a regex; capture group 1 when present.
    Pattern(Regex),
    /// Fixed position in the cleaned line list.
    Line(usize),
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub locator: Locator,
    pub kind: ValueKind,
    pub required: bool,
}

impl Rule {
    pub fn compile(field: FieldName, spec: &RuleSpec) -> Result<Self, String> {
        let locator = match (&spec.label, &spec.pattern, spec.line) {
            (Some(label), None, None) if !label.trim().is_empty() => {
                Locator::Label(label.trim().to_string())
            }
            (None, Some(pattern), None) => Regex::new(pattern)
                .map(Locator::Pattern)
                .map_err(|e| format!("rule '{}': bad pattern: {e}", field.as_str()))?,
            (None, None, Some(line)) => Locator::Line(line),
            _ => {
                return Err(format!(
                    "rule '{}': set exactly one of label, pattern or line",
                    field.as_str()
                ));
            }
        };
        Ok(Self {
            locator,
            kind: spec.kind.unwrap_or_else(|| field.default_kind()),
            required: spec.required || field == FieldName::PoNumber,
        })
    }

    /// Find the raw text for this rule in `text` / `lines`.
    pub fn locate<'t>(&self, text: &'t str, lines: &[&'t str]) -> Option<&'t str> {
        match &self.locator {
            Locator::Label(label) => lines.iter().enumerate().find_map(|(i, line)| {
                let at = find_ignore_ascii_case(line, label)?;
                let rest = line[at + label.len()..]
                    .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '#' | '|' | '-'))
                    .trim_end();
                if rest.is_empty() {
                    lines.get(i + 1).copied()
                } else {
                    Some(rest)
                }
            }),
            Locator::Pattern(re) => {
                let cap = re.captures(text)?;
                cap.get(1).or_else(|| cap.get(0)).map(|m| m.as_str())
            }
            Locator::Line(n) => lines.get(*n).copied(),
        }
    }
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    let (h, n) = (haystack.as_bytes(), needle.as_bytes());
    if n.is_empty() || n.len() > h.len() {
        return None;
    }
    (0..=h.len() - n.len())
        .filter(|&i| haystack.is_char_boundary(i))
        .find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineBlockSpec {
    /// Regex for the header row; items start on the line after it.
    pub start: Option<String>,
    /// Regex for the first row after the items (usually the totals row).
    pub end: Option<String>,
}

/// Compiled bounds of the line-item block.
#[derive(Debug, Clone)]
pub struct LineBlock {
    pub start: Option<Regex>,
    pub end: Regex,
}

const DEFAULT_BLOCK_END: &str =
    r"(?i)^\s*(?:total|sub\s*-?\s*total|tax|gst|vat|freight|discount|amount\s+due)\b";

impl LineBlock {
    fn compile(spec: &LineBlockSpec) -> Result<Self, Vec<String>> {
        let mut problems = Vec::new();
        let start = spec.start.as_deref().and_then(|p| {
            Regex::new(p)
                .map_err(|e| problems.push(format!("line_items.start: bad pattern: {e}")))
                .ok()
        });
        let end = Regex::new(spec.end.as_deref().unwrap_or(DEFAULT_BLOCK_END))
            .map_err(|e| problems.push(format!("line_items.end: bad pattern: {e}")))
            .ok();
        match (end, problems.is_empty()) {
            (Some(end), true) => Ok(Self { start, end }),
            _ => Err(problems),
        }
    }

    /// Index of the first line that can hold a row: the line after the
    /// start marker, or the top when no marker is configured. `None` when a
    /// start marker is configured but never seen.
    pub fn first_row(&self, lines: &[&str]) -> Option<usize> {
        match &self.start {
            Some(re) => lines.iter().position(|l| re.is_match(l)).map(|p| p + 1),
            None => Some(0),
        }
    }

    /// Whether `line` closes the block.
    pub fn is_end(&self, line: &str) -> bool {
        self.end.is_match(line)
    }
}

/// Generic rules for SAP Business One purchase-order screens. Vendor rules
/// replace these field by field.
static BUILTIN_RULES: LazyLock<BTreeMap<FieldName, Rule>> = LazyLock::new(|| {
    [
        (
            FieldName::PoNumber,
            r"(?i)(?:\bP\.?O\b\.?\s*(?:#|No\.?|Number)?\s*[:#]?\s*|\bPurchase\s+Order\s*(?:#|No\.?|Number)?\s*[:#]?\s*|\bPrimary\s*[|\[\]()~/\s-]*)([A-Z0-9-]*\d[A-Z0-9-]*)",
        ),
        (
            FieldName::OrderDate,
            r"(?i)(?:Posting|Order|Document|PO)\s*Date\s*[:|]?\s*(\d[\d./-]{5,9})",
        ),
        (
            FieldName::DueDate,
            r"(?i)(?:Due|Delivery)\s*Date\s*[:|]?\s*(\d[\d./-]{5,9})",
        ),
        (FieldName::Currency, r"\b(AUD|USD|EUR|GBP|NZD|CAD|SGD)\b"),
        (
            FieldName::Subtotal,
            r"(?i)(?:Total\s*B[ae]f[oe]re\s*Discount|Sub\s*-?\s*total)[^\d\n]*(\d[\d,.]*)",
        ),
        (FieldName::Discount, r"(?im)^\s*Discount\b[^\d\n]*(\d[\d,.]*)"),
        (FieldName::Freight, r"(?im)^\s*Freight\b[^\d\n]*(\d[\d,.]*)"),
        (FieldName::Tax, r"(?im)^\s*(?:Tax|GST|VAT)\b[^\d\n]*(\d[\d,.]*)"),
        (
            FieldName::Total,
            r"(?im)^\s*(?:Total\s*Payment\s*Due|Grand\s*Total|Amount\s*Due|Total\s*Due|Total)\s*:?\s*(?:[A-Z]{3}\s*)?[$£€]?\s*(\d[\d,.]*)",
        ),
    ]
    .into_iter()
    .map(|(field, pattern)| {
        let spec = RuleSpec {
            pattern: Some(pattern.to_string()),
            ..RuleSpec::default()
        };
        (field, Rule::compile(field, &spec).expect("built-in rule"))
    })
    .collect()
});

/// Everything the extractor needs to know about one vendor's screen.
#[derive(Debug, Clone)]
pub struct VendorRules {
    /// Built-in rules merged with the vendor's own, in field order.
    pub fields: BTreeMap<FieldName, Rule>,
    pub row_format: RowFormat,
    pub block: LineBlock,
}

impl VendorRules {
    pub fn compile(
        specs: &BTreeMap<String, RuleSpec>,
        row_format: RowFormat,
        block: &LineBlockSpec,
    ) -> Result<Self, Vec<String>> {
        let mut problems = Vec::new();
        let mut fields = BUILTIN_RULES.clone();

        for (name, spec) in specs {
            let field = match FieldName::from_str(name) {
                Ok(f) => f,
                Err(e) => {
                    problems.push(e);
                    continue;
                }
            };
            match Rule::compile(field, spec) {
                Ok(rule) => {
                    fields.insert(field, rule);
                }
                Err(e) => problems.push(e),
            }
        }

        let block = match LineBlock::compile(block) {
            Ok(b) => Some(b),
            Err(mut e) => {
                problems.append(&mut e);
                None
            }
        };

        match block {
            Some(block) if problems.is_empty() => Ok(Self {
                fields,
                row_format,
                block,
            }),
            _ => Err(problems),
        }
    }
}
