// src/render/mod.rs

pub mod fonts;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat, dictionary};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, info_span, warn};

use crate::error::{Error, Result};
use crate::extract::{ExtractedPo, FieldName, LineItem};
use crate::layout::{Align, DEFAULT_FONT, DEFAULT_SIZE, LayoutMap, TableColumn};
use fonts::{FontSet, text_width, win_ansi};

/// A finished invoice, still in memory.
#[derive(Debug, Clone)]
pub struct RenderedInvoice {
    pub bytes: Vec<u8>,
    pub pages: usize,
}

/// `1,234.56`, optionally prefixed with a currency code.
pub fn format_amount(value: f64, prefix: Option<&str>) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    let amount = format!("{sign}{grouped}.{:02}", cents % 100);
    match prefix {
        Some(p) if !p.is_empty() => format!("{p} {amount}"),
        _ => amount,
    }
}

/// Whole quantities print without decimals; others keep up to three.
pub fn format_quantity(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        let s = format!("{value:.3}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// One string to draw.
#[derive(Debug, Clone, PartialEq)]
struct TextRun {
    text: String,
    x: f32,
    y: f32,
    font: String,
    size: f32,
    align: Align,
}

/// Display text for a header/totals field, or `None` when the record has
/// no value for it.
fn field_text(record: &ExtractedPo, layout: &LayoutMap, field: FieldName) -> Option<String> {
    let prefix = if layout.currency_prefix {
        record.currency.as_deref()
    } else {
        None
    };
    let amount = |v: Option<f64>| v.map(|v| format_amount(v, prefix));
    match field {
        FieldName::PoNumber => Some(record.po_number.clone()),
        FieldName::OrderDate => record.order_date.map(|d| layout.format_date(d)),
        FieldName::DueDate => record.due_date.map(|d| layout.format_date(d)),
        FieldName::Currency => record.currency.clone(),
        FieldName::Notes => record.notes.clone(),
        FieldName::Subtotal => amount(record.totals.subtotal),
        FieldName::Discount => amount(record.totals.discount),
        FieldName::Freight => amount(record.totals.freight),
        FieldName::Tax => amount(record.totals.tax),
        FieldName::Total => amount(record.totals.total),
    }
}

fn column_text(item: &LineItem, column: TableColumn, prefix: Option<&str>) -> Option<String> {
    match column {
        TableColumn::LineNo => Some(item.line_no.to_string()),
        TableColumn::ItemNo => item.item_no.clone(),
        TableColumn::Description => Some(item.description.clone()),
        TableColumn::Quantity => Some(format_quantity(item.quantity)),
        TableColumn::UnitPrice => Some(format_amount(item.unit_price, prefix)),
        TableColumn::LineTotal => Some(format_amount(item.line_total, prefix)),
    }
}

/// Draw `record` onto a copy of `template` at the positions in `layout`.
///
/// Line items past the table's row budget go onto continuation pages that
/// repeat the table page. Header fields on that page repeat on each copy;
/// totals only appear on the last one.
pub fn render_invoice(
    record: &ExtractedPo,
    layout: &LayoutMap,
    template: &Path,
) -> Result<RenderedInvoice> {
    let span = info_span!("render", vendor = %record.vendor_key, po = %record.po_number);
    let _enter = span.enter();

    if !template.is_file() {
        return Err(Error::TemplateMissing(template.to_path_buf()));
    }
    let mut doc = Document::load(template)?;

    let template_pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    let needed = layout.max_page();
    if needed > template_pages.len() {
        return Err(Error::TemplatePages {
            path: template.to_path_buf(),
            needed,
            found: template_pages.len(),
        });
    }

    // Page sequence for the line-item table: the table page, then copies.
    let chunks: Vec<&[LineItem]> = match &layout.table {
        Some(table) if !record.line_items.is_empty() => {
            record.line_items.chunks(table.max_rows).collect()
        }
        _ => Vec::new(),
    };
    let table_page = layout.table.as_ref().map(|t| t.page);
    let mut table_pages = Vec::new();
    if let Some(page) = table_page {
        let original = template_pages[page - 1];
        table_pages.push(original);
        if chunks.len() > 1 {
            warn!(
                rows = record.line_items.len(),
                pages = chunks.len(),
                "Line items overflow the table; adding continuation pages"
            );
            table_pages.extend(add_continuation_pages(&mut doc, original, chunks.len() - 1)?);
        }
    }

    let mut runs: BTreeMap<ObjectId, Vec<TextRun>> = BTreeMap::new();

    for (&field, place) in &layout.fields {
        let Some(text) = field_text(record, layout, field) else {
            continue;
        };
        let targets: Vec<ObjectId> = if Some(place.page) == table_page {
            if field.is_total() {
                table_pages.last().copied().into_iter().collect()
            } else {
                table_pages.clone()
            }
        } else {
            vec![template_pages[place.page - 1]]
        };
        for page_id in targets {
            runs.entry(page_id).or_default().push(TextRun {
                text: text.clone(),
                x: place.x,
                y: place.y,
                font: place.font.clone().unwrap_or_else(|| DEFAULT_FONT.to_string()),
                size: place.size.unwrap_or(DEFAULT_SIZE),
                align: place.align,
            });
        }
    }

    if let Some(table) = &layout.table {
        let prefix = if layout.currency_prefix {
            record.currency.as_deref()
        } else {
            None
        };
        for (chunk, &page_id) in chunks.iter().zip(&table_pages) {
            for (row, item) in chunk.iter().enumerate() {
                let y = table.start_y - row as f32 * table.row_height;
                for (&column, spec) in &table.columns {
                    let Some(text) = column_text(item, column, prefix) else {
                        continue;
                    };
                    runs.entry(page_id).or_default().push(TextRun {
                        text,
                        x: spec.x,
                        y,
                        font: spec.font.clone().unwrap_or_else(|| DEFAULT_FONT.to_string()),
                        size: spec.size.unwrap_or(DEFAULT_SIZE),
                        align: spec.align,
                    });
                }
            }
        }
    }

    let mut fonts = FontSet::default();
    let mut overlays: BTreeMap<ObjectId, Vec<Operation>> = BTreeMap::new();

    for mask in &layout.masks {
        let mut targets = vec![template_pages[mask.page - 1]];
        if Some(mask.page) == table_page {
            targets = table_pages.clone();
        }
        for page_id in targets {
            overlays.entry(page_id).or_default().extend([
                Operation::new("q", vec![]),
                Operation::new("g", vec![1.into()]),
                Operation::new(
                    "re",
                    vec![mask.x.into(), mask.y.into(), mask.w.into(), mask.h.into()],
                ),
                Operation::new("f", vec![]),
                Operation::new("Q", vec![]),
            ]);
        }
    }

    let mut text_count = 0;
    for (page_id, page_runs) in &runs {
        let ops = overlays.entry(*page_id).or_default();
        ops.push(Operation::new("g", vec![0.into()]));
        for run in page_runs {
            let resource = fonts.resource(&mut doc, &run.font);
            let width = text_width(&run.font, &run.text, run.size);
            let x = match run.align {
                Align::Left => run.x,
                Align::Right => run.x - width,
                Align::Center => run.x - width / 2.0,
            };
            ops.extend([
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec![Object::Name(resource.into_bytes()), run.size.into()]),
                Operation::new("Td", vec![x.into(), run.y.into()]),
                Operation::new(
                    "Tj",
                    vec![Object::String(win_ansi(&run.text), StringFormat::Literal)],
                ),
                Operation::new("ET", vec![]),
            ]);
            text_count += 1;
        }
    }

    if !overlays.is_empty() {
        let open = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
        let close = doc.add_object(Stream::new(dictionary! {}, b"\nQ\n".to_vec()));
        for (page_id, operations) in overlays {
            let content = Content { operations }.encode()?;
            let overlay = doc.add_object(Stream::new(dictionary! {}, content));
            let resources = page_resources(&doc, page_id, &fonts);
            let mut contents = vec![Object::Reference(open)];
            contents.extend(template_contents(&doc, page_id));
            contents.extend([Object::Reference(close), Object::Reference(overlay)]);
            let page = doc.get_dictionary_mut(page_id)?;
            page.set("Contents", contents);
            page.set("Resources", resources);
            debug!(page = ?page_id, "Overlay attached");
        }
    }

    let pages = doc.get_pages().len();
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).map_err(|e| Error::Pdf(e.into()))?;

    info!(
        pages,
        texts = text_count,
        fonts = fonts.len(),
        masks = layout.masks.len(),
        bytes = bytes.len(),
        "Invoice rendered"
    );
    Ok(RenderedInvoice { bytes, pages })
}

/// The page's content stream references, with an indirect array spliced in.
fn template_contents(doc: &Document, page_id: ObjectId) -> Vec<Object> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };
    match page.get(b"Contents") {
        Ok(Object::Array(parts)) => parts.clone(),
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(parts)) => parts.clone(),
            Ok(_) => vec![Object::Reference(*id)],
            Err(_) => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Attribute lookup that follows the page tree's inheritance.
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..32 {
        if let Ok(value) = node.get(key) {
            return Some(value);
        }
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn resolve_dict(doc: &Document, obj: &Object) -> Option<Dictionary> {
    doc.dereference(obj)
        .ok()
        .and_then(|(_, resolved)| resolved.as_dict().ok())
        .cloned()
}

/// The page's effective resources with our fonts merged into `/Font`.
fn page_resources(doc: &Document, page_id: ObjectId, fonts: &FontSet) -> Dictionary {
    let mut resources = inherited(doc, page_id, b"Resources")
        .and_then(|r| resolve_dict(doc, r))
        .unwrap_or_default();
    let mut font_dict = resources
        .get(b"Font")
        .ok()
        .and_then(|f| resolve_dict(doc, f))
        .unwrap_or_default();
    for (name, id) in fonts.entries() {
        font_dict.set(name, id);
    }
    resources.set("Font", font_dict);
    resources
}

/// Insert `count` copies of `page_id` right after it and fix up the page
/// counts of every ancestor.
fn add_continuation_pages(
    doc: &mut Document,
    page_id: ObjectId,
    count: usize,
) -> Result<Vec<ObjectId>> {
    let mut copy = doc.get_dictionary(page_id)?.clone();
    copy.remove(b"Annots");
    let parent = copy.get(b"Parent")?.as_reference()?;

    let copies: Vec<ObjectId> = (0..count).map(|_| doc.add_object(copy.clone())).collect();

    let kids = doc.get_dictionary_mut(parent)?.get_mut(b"Kids")?.as_array_mut()?;
    let at = kids
        .iter()
        .position(|k| k.as_reference().ok() == Some(page_id))
        .map_or(kids.len(), |p| p + 1);
    for (offset, id) in copies.iter().enumerate() {
        kids.insert(at + offset, Object::Reference(*id));
    }

    let mut node = Some(parent);
    while let Some(id) = node {
        let dict = doc.get_dictionary_mut(id)?;
        let total = dict.get(b"Count")?.as_i64()?;
        dict.set("Count", total + count as i64);
        node = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }

    Ok(copies)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::extract::LineItem;
    use std::fs;

    /// A one- or two-page template with placeholder text, saved to `path`.
    pub(crate) fn write_template(path: &Path, pages: usize) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for n in 0..pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![60.into(), 780.into()]),
                    Operation::new(
                        "Tj",
                        vec![Object::string_literal(format!("INVOICE TEMPLATE {}", n + 1))],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        fs::write(path, bytes).unwrap();
    }

    /// Every string drawn with `Tj` on each page, in page order.
    pub(crate) fn page_strings(bytes: &[u8]) -> Vec<Vec<String>> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .into_values()
            .map(|id| {
                let content = Content::decode(&doc.get_page_content(id).unwrap()).unwrap();
                content
                    .operations
                    .iter()
                    .filter(|op| op.operator == "Tj")
                    .filter_map(|op| match op.operands.first() {
                        Some(Object::String(bytes, _)) => {
                            Some(bytes.iter().map(|&b| b as char).collect())
                        }
                        _ => None,
                    })
                    .collect()
            })
            .collect()
    }

    pub(crate) const LAYOUT: &str = r#"
        [fields.po_number]
        x = 450
        y = 720

        [fields.order_date]
        x = 450
        y = 700

        [fields.total]
        x = 540
        y = 140
        align = "right"
        font = "Helvetica-Bold"

        [table]
        start_y = 560
        row_height = 16
        max_rows = 2

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

    fn item(n: u32, desc: &str, qty: f64, price: f64) -> LineItem {
        LineItem {
            line_no: n,
            item_no: None,
            description: desc.to_string(),
            quantity: qty,
            unit_price: price,
            line_total: qty * price,
        }
    }

    fn record(items: usize) -> ExtractedPo {
        let mut po = ExtractedPo::new("acme_associates", "10234");
        po.line_items = (1..=items as u32)
            .map(|n| item(n, &format!("Widget {n}"), 10.0, 5.0))
            .collect();
        po.totals.total = Some(50.0 * items as f64);
        po
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(50.0, None), "50.00");
        assert_eq!(format_amount(1234.5, None), "1,234.50");
        assert_eq!(format_amount(1234567.891, Some("AUD")), "AUD 1,234,567.89");
        assert_eq!(format_amount(-15.0, None), "-15.00");
        assert_eq!(format_amount(0.0, Some("")), "0.00");
        assert_eq!(format_amount(999.999, None), "1,000.00");
    }

    #[test]
    fn test_format_quantity() {
        assert_eq!(format_quantity(10.0), "10");
        assert_eq!(format_quantity(2.5), "2.5");
        assert_eq!(format_quantity(0.125), "0.125");
    }

    #[test]
    fn test_single_page_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("acme.pdf");
        write_template(&template, 1);
        let layout = LayoutMap::from_toml(LAYOUT).unwrap();

        let out = render_invoice(&record(1), &layout, &template).unwrap();
        assert_eq!(out.pages, 1);
        let strings = page_strings(&out.bytes);
        assert_eq!(
            strings,
            vec![vec![
                "INVOICE TEMPLATE 1", "10234", "50.00", "Widget 1", "10", "5.00", "50.00",
            ]]
        );
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("acme.pdf");
        write_template(&template, 1);
        let layout = LayoutMap::from_toml(LAYOUT).unwrap();

        let a = render_invoice(&record(3), &layout, &template).unwrap();
        let b = render_invoice(&record(3), &layout, &template).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn test_overflow_adds_continuation_pages() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("acme.pdf");
        write_template(&template, 2);
        let layout = LayoutMap::from_toml(LAYOUT).unwrap();

        let out = render_invoice(&record(5), &layout, &template).unwrap();
        assert_eq!(out.pages, 4);

        let strings = page_strings(&out.bytes);
        let items_on = |page: &Vec<String>| page.iter().filter(|s| s.starts_with("Widget")).count();
        assert_eq!(strings.iter().map(items_on).collect::<Vec<_>>(), vec![2, 2, 1, 0]);

        // po number repeats on every table page; the total only on the last
        for page in &strings[..3] {
            assert!(page.contains(&"10234".to_string()));
        }
        assert!(!strings[0].contains(&"250.00".to_string()));
        assert!(strings[2].contains(&"250.00".to_string()));
        assert_eq!(strings[3], vec!["INVOICE TEMPLATE 2"]);
    }

    #[test]
    fn test_missing_template() {
        let layout = LayoutMap::from_toml(LAYOUT).unwrap();
        let err = render_invoice(&record(1), &layout, Path::new("/nonexistent/acme.pdf"))
            .unwrap_err();
        assert!(matches!(err, Error::TemplateMissing(_)));
    }

    #[test]
    fn test_layout_page_beyond_template() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("acme.pdf");
        write_template(&template, 1);
        let layout = LayoutMap::from_toml("[fields.notes]\npage = 2\nx = 1\ny = 1\n").unwrap();

        let err = render_invoice(&record(0), &layout, &template).unwrap_err();
        assert!(matches!(err, Error::TemplatePages { needed: 2, found: 1, .. }));
    }

    #[test]
    fn test_indirect_contents_array_is_spliced() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("acme.pdf");
        write_template(&template, 1);

        let mut doc = Document::load(&template).unwrap();
        let page_id = doc.get_pages()[&1];
        let stream = doc.get_dictionary(page_id).unwrap().get(b"Contents").unwrap().clone();
        let array_id = doc.add_object(Object::Array(vec![stream]));
        doc.get_dictionary_mut(page_id)
            .unwrap()
            .set("Contents", Object::Reference(array_id));
        doc.save(&template).unwrap();

        let layout = LayoutMap::from_toml(LAYOUT).unwrap();
        let out = render_invoice(&record(1), &layout, &template).unwrap();

        let rendered = Document::load_mem(&out.bytes).unwrap();
        let page = rendered.get_dictionary(rendered.get_pages()[&1]).unwrap();
        let parts = page.get(b"Contents").unwrap().as_array().unwrap();
        assert_eq!(parts.len(), 4);
        for part in parts {
            let id = part.as_reference().unwrap();
            assert!(rendered.get_object(id).unwrap().as_stream().is_ok());
        }
        assert_eq!(page_strings(&out.bytes)[0][0], "INVOICE TEMPLATE 1");
    }
}
