// tests/common/mod.rs

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use po_invoice::ocr::OcrBackend;
use std::fs;
use std::path::{Path, PathBuf};

/// Returns canned text regardless of the image.
pub struct CannedOcr(pub String);

impl OcrBackend for CannedOcr {
    fn name(&self) -> &str {
        "canned"
    }

    fn recognize(&self, _image: &image::GrayImage) -> po_invoice::Result<String> {
        Ok(self.0.clone())
    }
}

pub const ACME_LAYOUT: &str = r#"
date_format = "[day]/[month]/[year]"

[fields.po_number]
x = 450
y = 720

[fields.total]
x = 540
y = 140
align = "right"

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
"#;

pub const REGISTRY: &str = r#"
[[vendor]]
key = "acme_associates"
name = "Acme Associates"
markers = ["ACME ASSOCIATES"]
template = "templates/acme.pdf"
layout = "layouts/acme.toml"
"#;

/// Registry, layout, template and a blank screenshot under `dir`.
pub struct Fixture {
    pub registry: PathBuf,
    pub template: PathBuf,
    pub image: PathBuf,
}

pub fn fixture(dir: &Path) -> Fixture {
    fs::create_dir_all(dir.join("layouts")).unwrap();
    fs::create_dir_all(dir.join("templates")).unwrap();
    fs::write(dir.join("layouts/acme.toml"), ACME_LAYOUT).unwrap();

    let template = dir.join("templates/acme.pdf");
    write_template(&template);

    let registry = dir.join("vendors.toml");
    fs::write(&registry, REGISTRY).unwrap();

    let image = dir.join("po.png");
    image::RgbImage::from_pixel(16, 16, image::Rgb([255, 255, 255]))
        .save(&image)
        .unwrap();

    Fixture {
        registry,
        template,
        image,
    }
}

/// Single-page A4 template with one line of placeholder text.
pub fn write_template(path: &Path) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 14.into()]),
            Operation::new("Td", vec![60.into(), 780.into()]),
            Operation::new("Tj", vec![Object::string_literal("ACME ASSOCIATES INVOICE")]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
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
