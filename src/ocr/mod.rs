// src/ocr/mod.rs

pub mod preprocess;
pub mod remote;
pub mod tesseract;

use image::{DynamicImage, GrayImage, ImageReader};
use std::path::Path;
use tracing::{info, info_span, warn};

use crate::config::{OcrBackendKind, OcrSection, PreprocessConfig};
use crate::error::{Error, Result};
pub use remote::RemoteBackend;
pub use tesseract::TesseractBackend;

/// Submit an image, get text back.
pub trait OcrBackend {
    fn name(&self) -> &str;
    fn recognize(&self, image: &GrayImage) -> Result<String>;
}

/// Text read from one screenshot.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrText {
    /// Backend output, untouched.
    pub raw: String,
    /// Trimmed lines, collapsed spaces, no blank lines.
    pub cleaned: String,
}

pub struct OcrEngine {
    backend: Box<dyn OcrBackend>,
    preprocess: PreprocessConfig,
}

impl OcrEngine {
    pub fn new(backend: Box<dyn OcrBackend>, preprocess: PreprocessConfig) -> Self {
        Self {
            backend,
            preprocess,
        }
    }

    pub fn from_config(cfg: &OcrSection) -> Result<Self> {
        let backend: Box<dyn OcrBackend> = match cfg.backend {
            OcrBackendKind::Tesseract => Box::new(TesseractBackend::new(&cfg.tesseract)),
            OcrBackendKind::Remote => Box::new(RemoteBackend::new(&cfg.remote)?),
        };
        info!(backend = backend.name(), "OCR backend selected");
        Ok(Self::new(backend, cfg.preprocess.clone()))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Load a PNG/JPEG screenshot and read it.
    pub fn read_path(&self, path: &Path) -> Result<OcrText> {
        let image = ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| Error::io(path, e))?
            .decode()?;
        self.read_image(&image)
    }

    pub fn read_image(&self, image: &DynamicImage) -> Result<OcrText> {
        let span = info_span!("ocr", backend = self.backend.name());
        let _enter = span.enter();

        let prepared = preprocess::prepare(image, &self.preprocess);
        let (w, h) = prepared.dimensions();
        info!(width = w, height = h, "Image preprocessed");

        let raw = self.backend.recognize(&prepared)?;
        let cleaned = clean_text(&raw);
        if cleaned.is_empty() {
            warn!(raw_chars = raw.len(), "OCR returned no usable text");
            return Err(Error::OcrEmptyResult);
        }
        info!(
            raw_chars = raw.len(),
            lines = cleaned.lines().count(),
            "OCR complete"
        );
        Ok(OcrText { raw, cleaned })
    }
}

/// Normalize OCR output: tabs become spaces, other control characters go,
/// runs of spaces collapse, lines are trimmed and blank lines dropped.
pub fn clean_text(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            line.chars()
                .filter_map(|c| match c {
                    '\t' => Some(' '),
                    '\u{feff}' => None,
                    c if c.is_control() => None,
                    c => Some(c),
                })
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::RgbImage;
    use std::cell::Cell;

    /// Replays recorded text instead of running a real engine.
    pub(crate) struct FixtureBackend {
        pub text: String,
        pub calls: Cell<usize>,
    }

    impl FixtureBackend {
        pub(crate) fn new(text: &str) -> Self {
            Self {
                text: text.to_string(),
                calls: Cell::new(0),
            }
        }
    }

    impl OcrBackend for FixtureBackend {
        fn name(&self) -> &str {
            "fixture"
        }

        fn recognize(&self, _image: &GrayImage) -> Result<String> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.text.clone())
        }
    }

    fn blank() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, image::Rgb([255, 255, 255])))
    }

    #[test]
    fn test_clean_text() {
        let raw = "  PO#:\t10234  \n\n\u{c}ACME   ASSOCIATES\r\n   \nWidget A  10 $5.00\u{7} $50.00\n";
        assert_eq!(
            clean_text(raw),
            "PO#: 10234\nACME ASSOCIATES\nWidget A 10 $5.00 $50.00"
        );
    }

    #[test]
    fn test_read_image_returns_raw_and_cleaned() {
        let engine = OcrEngine::new(
            Box::new(FixtureBackend::new("PO#: 10234 \n\n ACME ASSOCIATES")),
            PreprocessConfig::default(),
        );
        let text = engine.read_image(&blank()).unwrap();
        assert_eq!(text.raw, "PO#: 10234 \n\n ACME ASSOCIATES");
        assert_eq!(text.cleaned, "PO#: 10234\nACME ASSOCIATES");
        assert_eq!(engine.backend_name(), "fixture");
    }

    #[test]
    fn test_empty_result() {
        let engine = OcrEngine::new(
            Box::new(FixtureBackend::new(" \n\u{c}\n")),
            PreprocessConfig::default(),
        );
        assert!(matches!(
            engine.read_image(&blank()),
            Err(Error::OcrEmptyResult)
        ));
    }

    #[test]
    fn test_read_path_reports_missing_file() {
        let engine = OcrEngine::new(
            Box::new(FixtureBackend::new("x")),
            PreprocessConfig::default(),
        );
        let err = engine.read_path(Path::new("/nonexistent/po.png")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_read_path_decodes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("po.png");
        blank().save(&path).unwrap();

        let engine = OcrEngine::new(
            Box::new(FixtureBackend::new("PO#: 1")),
            PreprocessConfig::default(),
        );
        assert_eq!(engine.read_path(&path).unwrap().cleaned, "PO#: 1");
    }
}
