// src/render/fonts.rs

use lopdf::{Document, ObjectId, dictionary};
use std::collections::BTreeMap;

/// The standard Type1 fonts every PDF reader ships.
pub const STANDARD_FONTS: [&str; 14] = [
    "Helvetica",
    "Helvetica-Bold",
    "Helvetica-Oblique",
    "Helvetica-BoldOblique",
    "Times-Roman",
    "Times-Bold",
    "Times-Italic",
    "Times-BoldItalic",
    "Courier",
    "Courier-Bold",
    "Courier-Oblique",
    "Courier-BoldOblique",
    "Symbol",
    "ZapfDingbats",
];

pub fn is_standard(name: &str) -> bool {
    STANDARD_FONTS.contains(&name)
}

pub fn is_symbolic(name: &str) -> bool {
    matches!(name, "Symbol" | "ZapfDingbats")
}

/// Font objects added to the document, one per base font, keyed by base
/// font name. Resource names are prefixed so they never clash with the
/// template's own fonts.
#[derive(Debug, Default)]
pub struct FontSet {
    fonts: BTreeMap<String, (String, ObjectId)>,
}

impl FontSet {
    /// Resource name for `base_font`, adding the font object on first use.
    pub fn resource(&mut self, doc: &mut Document, base_font: &str) -> String {
        let next = self.fonts.len() + 1;
        let (name, _) = self.fonts.entry(base_font.to_string()).or_insert_with(|| {
            let mut font = dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => base_font,
            };
            // symbolic fonts keep their built-in encoding
            if !is_symbolic(base_font) {
                font.set("Encoding", "WinAnsiEncoding");
            }
            let id = doc.add_object(font);
            (format!("POI{next}"), id)
        });
        name.clone()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, ObjectId)> {
        self.fonts.values().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }
}

/// Encode text for a WinAnsiEncoding font. Characters outside the code page
/// become `?`.
pub fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '€' => 0x80,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            '™' => 0x99,
            c if (c as u32) < 0x80 || (0xA0..=0xFF).contains(&(c as u32)) => c as u8,
            _ => b'?',
        })
        .collect()
}

/// Approximate advance width of `text` in points. Exact metrics only
/// matter for right and centre alignment, where a few points are fine.
pub fn text_width(base_font: &str, text: &str, size: f32) -> f32 {
    let units: u32 = if base_font.starts_with("Courier") {
        600 * text.chars().count() as u32
    } else {
        text.chars().map(proportional_width).sum()
    };
    units as f32 * size / 1000.0
}

fn proportional_width(c: char) -> u32 {
    match c {
        '0'..='9' | '$' | '€' | '£' => 556,
        ' ' | ',' | '.' | ':' | ';' | '/' | '!' | '|' => 278,
        '-' | '(' | ')' => 333,
        'i' | 'j' | 'l' => 222,
        'f' | 't' | 'I' => 278,
        'r' => 333,
        'm' => 833,
        'w' => 722,
        'M' => 833,
        'W' => 944,
        'A'..='Z' => 667,
        'a'..='z' => 520,
        _ => 556,
    }
}
