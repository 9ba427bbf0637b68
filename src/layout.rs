// src/layout.rs

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use time::Date;
use time::format_description::OwnedFormatItem;

use crate::error::{Error, Result};
use crate::extract::{ExtractedPo, FieldName};
use crate::render::fonts;

pub const DEFAULT_FONT: &str = "Helvetica";
pub const DEFAULT_SIZE: f32 = 10.0;
pub const DEFAULT_DATE_FORMAT: &str = "[month]/[day]/[year]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Left,
    Right,
    Center,
}

fn default_page() -> usize {
    1
}

/// Where one value is drawn. Pages are 1-based; `x`/`y` are PDF points
/// from the bottom-left corner; `x` is the anchor for the alignment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Placement {
    #[serde(default = "default_page")]
    pub page: usize,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub font: Option<String>,
    #[serde(default)]
    pub size: Option<f32>,
    #[serde(default)]
    pub align: Align,
}

/// A line-item column. Its `y` comes from the table row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnSpec {
    pub x: f32,
    #[serde(default)]
    pub font: Option<String>,
    #[serde(default)]
    pub size: Option<f32>,
    #[serde(default)]
    pub align: Align,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TableColumn {
    LineNo,
    ItemNo,
    Description,
    Quantity,
    UnitPrice,
    LineTotal,
}

impl TableColumn {
    /// Columns a table must place whenever the record has line items.
    pub const REQUIRED: [TableColumn; 4] = [
        TableColumn::Description,
        TableColumn::Quantity,
        TableColumn::UnitPrice,
        TableColumn::LineTotal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableColumn::LineNo => "line_no",
            TableColumn::ItemNo => "item_no",
            TableColumn::Description => "description",
            TableColumn::Quantity => "quantity",
            TableColumn::UnitPrice => "unit_price",
            TableColumn::LineTotal => "line_total",
        }
    }
}

impl FromStr for TableColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            TableColumn::LineNo,
            TableColumn::ItemNo,
            TableColumn::Description,
            TableColumn::Quantity,
            TableColumn::UnitPrice,
            TableColumn::LineTotal,
        ]
        .into_iter()
        .find(|c| c.as_str() == s)
        .ok_or_else(|| format!("unknown table column '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    pub page: usize,
    /// Baseline of the first row.
    pub start_y: f32,
    pub row_height: f32,
    /// Rows that fit on one page; further rows go to continuation pages.
    pub max_rows: usize,
    pub columns: BTreeMap<TableColumn, ColumnSpec>,
}

/// White-out rectangle over template placeholder text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Mask {
    #[serde(default = "default_page")]
    pub page: usize,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TableFile {
    #[serde(default = "default_page")]
    page: usize,
    start_y: f32,
    row_height: f32,
    max_rows: usize,
    #[serde(default)]
    columns: BTreeMap<String, ColumnSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LayoutFile {
    #[serde(default)]
    fields: BTreeMap<String, Placement>,
    #[serde(default)]
    table: Option<TableFile>,
    #[serde(default)]
    masks: Vec<Mask>,
    #[serde(default)]
    date_format: Option<String>,
    #[serde(default)]
    currency_prefix: bool,
}

/// Per-vendor coordinates for every field the invoice template shows.
#[derive(Debug, Clone)]
pub struct LayoutMap {
    pub fields: BTreeMap<FieldName, Placement>,
    pub table: Option<TableSpec>,
    pub masks: Vec<Mask>,
    pub date_format: String,
    date_items: OwnedFormatItem,
    /// Print the record's currency code in front of amounts.
    pub currency_prefix: bool,
}

impl Default for LayoutMap {
    fn default() -> Self {
        Self {
            fields: BTreeMap::new(),
            table: None,
            masks: Vec::new(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            date_items: default_date_items(),
            currency_prefix: false,
        }
    }
}

fn default_date_items() -> OwnedFormatItem {
    time::macros::format_description!("[month]/[day]/[year]").into()
}

impl LayoutMap {
    /// Load and validate a layout file. Problems are returned as messages so
    /// the registry can report them alongside its own.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Vec<String>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| vec![format!("layout {}: {e}", path.display())])?;
        Self::from_toml(&content).map_err(|problems| {
            problems
                .into_iter()
                .map(|p| format!("layout {}: {p}", path.display()))
                .collect()
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, Vec<String>> {
        let file: LayoutFile = toml::from_str(content).map_err(|e| vec![e.to_string()])?;
        let mut problems = Vec::new();

        let mut fields = BTreeMap::new();
        for (name, placement) in file.fields {
            match FieldName::from_str(&name) {
                Ok(field) => {
                    check_page(placement.page, &name, &mut problems);
                    check_font(placement.font.as_deref(), &name, &mut problems);
                    fields.insert(field, placement);
                }
                Err(e) => problems.push(e),
            }
        }

        let table = file.table.map(|t| {
            let mut columns = BTreeMap::new();
            for (name, spec) in t.columns {
                match TableColumn::from_str(&name) {
                    Ok(col) => {
                        check_font(spec.font.as_deref(), &name, &mut problems);
                        columns.insert(col, spec);
                    }
                    Err(e) => problems.push(e),
                }
            }
            check_page(t.page, "table", &mut problems);
            if t.max_rows == 0 {
                problems.push("table: max_rows must be at least 1".to_string());
            }
            if t.row_height <= 0.0 {
                problems.push("table: row_height must be positive".to_string());
            }
            TableSpec {
                page: t.page,
                start_y: t.start_y,
                row_height: t.row_height,
                max_rows: t.max_rows,
                columns,
            }
        });

        for mask in &file.masks {
            check_page(mask.page, "mask", &mut problems);
        }

        let date_format = file
            .date_format
            .unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string());
        let date_items = time::format_description::parse_owned::<2>(&date_format)
            .map_err(|e| problems.push(format!("date_format '{date_format}': {e}")))
            .ok();

        match date_items {
            Some(date_items) if problems.is_empty() => Ok(Self {
                fields,
                table,
                masks: file.masks,
                date_format,
                date_items,
                currency_prefix: file.currency_prefix,
            }),
            _ => Err(problems),
        }
    }

    pub fn format_date(&self, date: Date) -> String {
        date.format(&self.date_items)
            .unwrap_or_else(|_| date.to_string())
    }

    /// Highest page any placement, mask or the table refers to.
    pub fn max_page(&self) -> usize {
        self.fields
            .values()
            .map(|p| p.page)
            .chain(self.masks.iter().map(|m| m.page))
            .chain(self.table.as_ref().map(|t| t.page))
            .max()
            .unwrap_or(1)
    }

    /// Every value present in `record` must have somewhere to go.
    pub fn check_covers(&self, record: &ExtractedPo) -> Result<()> {
        let mut missing: Vec<String> = FieldName::ALL
            .into_iter()
            .filter(|f| record.has_field(*f) && !self.fields.contains_key(f))
            .map(|f| f.as_str().to_string())
            .collect();

        if !record.line_items.is_empty() {
            match &self.table {
                None => missing.push("table".to_string()),
                Some(table) => {
                    let has_item_no = record.line_items.iter().any(|i| i.item_no.is_some());
                    let needed = TableColumn::REQUIRED
                        .iter()
                        .chain(has_item_no.then_some(&TableColumn::ItemNo));
                    missing.extend(
                        needed
                            .filter(|c| !table.columns.contains_key(*c))
                            .map(|c| format!("table.columns.{}", c.as_str())),
                    );
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::LayoutIncomplete {
                vendor: record.vendor_key.clone(),
                missing,
            })
        }
    }
}

fn check_page(page: usize, what: &str, problems: &mut Vec<String>) {
    if page == 0 {
        problems.push(format!("{what}: pages are numbered from 1"));
    }
}

fn check_font(font: Option<&str>, what: &str, problems: &mut Vec<String>) {
    if let Some(font) = font.filter(|f| !fonts::is_standard(f)) {
        problems.push(format!("{what}: '{font}' is not a standard PDF font"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::LineItem;
    use time::macros::date;

    const ACME_LAYOUT: &str = r#"
        date_format = "[day].[month].[year]"
        currency_prefix = true

        [fields.po_number]
        x = 450
        y = 720

        [fields.total]
        x = 540
        y = 140
        align = "right"
        font = "Helvetica-Bold"

        [table]
        start_y = 560
        row_height = 16
        max_rows = 20

        [table.columns.description]
        x = 60
        [table.columns.quantity]
        x = 330
        align = "right"
        [table.columns.unit_price]
        x = 430
        align = "right"
        [table.columns.line_total]
        x = 540
        align = "right"

        [[masks]]
        x = 440
        y = 710
        w = 120
        h = 18
    "#;

    fn record() -> ExtractedPo {
        let mut po = ExtractedPo::new("acme_associates", "10234");
        po.line_items.push(LineItem {
            line_no: 1,
            item_no: None,
            description: "Widget A".into(),
            quantity: 10.0,
            unit_price: 5.0,
            line_total: 50.0,
        });
        po.totals.total = Some(50.0);
        po
    }

    #[test]
    fn test_parse_layout() {
        let layout = LayoutMap::from_toml(ACME_LAYOUT).unwrap();
        assert_eq!(layout.fields[&FieldName::PoNumber].page, 1);
        assert_eq!(layout.fields[&FieldName::Total].align, Align::Right);
        let table = layout.table.as_ref().unwrap();
        assert_eq!(table.max_rows, 20);
        assert_eq!(table.columns.len(), 4);
        assert_eq!(layout.masks.len(), 1);
        assert!(layout.currency_prefix);
        assert_eq!(layout.format_date(date!(2026 - 01 - 27)), "27.01.2026");
        assert_eq!(layout.max_page(), 1);
    }

    #[test]
    fn test_default_date_format() {
        let layout = LayoutMap::default();
        assert_eq!(layout.format_date(date!(2026 - 01 - 27)), "01/27/2026");
    }

    #[test]
    fn test_layout_problems_are_collected() {
        let problems = LayoutMap::from_toml(
            r#"
            date_format = "[dya]"
            [fields.ship_to]
            x = 1
            y = 2
            [fields.total]
            page = 0
            x = 1
            y = 2
            [fields.tax]
            x = 1
            y = 2
            font = "Comic Sans"
            "#,
        )
        .unwrap_err();
        assert_eq!(problems.len(), 4, "{problems:?}");
    }

    #[test]
    fn test_covers_complete_record() {
        let layout = LayoutMap::from_toml(ACME_LAYOUT).unwrap();
        layout.check_covers(&record()).unwrap();
    }

    #[test]
    fn test_covers_reports_every_gap() {
        let layout = LayoutMap::from_toml(ACME_LAYOUT).unwrap();
        let mut po = record();
        po.order_date = Some(date!(2026 - 01 - 27));
        po.totals.tax = Some(5.0);
        po.line_items[0].item_no = Some("A00001".into());

        match layout.check_covers(&po).unwrap_err() {
            Error::LayoutIncomplete { vendor, missing } => {
                assert_eq!(vendor, "acme_associates");
                assert_eq!(
                    missing,
                    vec!["order_date", "tax", "table.columns.item_no"]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_items_without_table() {
        let layout = LayoutMap::from_toml("[fields.po_number]\nx = 1\ny = 2\n").unwrap();
        let err = layout.check_covers(&record()).unwrap_err();
        assert!(matches!(
            err,
            Error::LayoutIncomplete { ref missing, .. } if missing == &["total", "table"]
        ));
    }
}
