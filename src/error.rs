// src/error.rs

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::extract::FieldName;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can abort a run.
///
/// Non-fatal problems (a skipped row, a totals mismatch) never show up here;
/// they travel on the record as [`crate::extract::ExtractionWarning`]s.
#[derive(Debug, Error)]
pub enum Error {
    #[error("OCR backend unavailable: {0}")]
    OcrUnavailable(String),

    #[error("OCR produced no usable text")]
    OcrEmptyResult,

    #[error("unknown vendor: {0}")]
    VendorUnknown(String),

    #[error("text matches more than one vendor: {}", .0.join(", "))]
    VendorAmbiguous(Vec<String>),

    #[error("vendor configuration invalid:\n  {}", .0.join("\n  "))]
    VendorConfigInvalid(Vec<String>),

    #[error("required fields missing: {}", join_fields(.missing))]
    ExtractionFailed { missing: Vec<FieldName> },

    #[error("template missing: {}", .0.display())]
    TemplateMissing(PathBuf),

    #[error("layout needs page {needed} but template {} has {found}", path.display())]
    TemplatePages {
        path: PathBuf,
        needed: usize,
        found: usize,
    },

    #[error("layout for '{vendor}' has no entry for: {}", .missing.join(", "))]
    LayoutIncomplete { vendor: String, missing: Vec<String> },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image: {0}")]
    Image(#[from] image::ImageError),

    #[error("pdf: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("record: {0}")]
    Record(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("ledger: {0}")]
    Ledger(#[from] rusqlite::Error),
}

fn join_fields(fields: &[FieldName]) -> String {
    fields
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Flat classification of [`Error`], stable enough to log and store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    OcrUnavailable,
    OcrEmptyResult,
    VendorUnknown,
    VendorAmbiguous,
    VendorConfigInvalid,
    ExtractionFailed,
    TemplateMissing,
    TemplatePages,
    LayoutIncomplete,
    Io,
    Image,
    Pdf,
    Record,
    Config,
    Ledger,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::OcrUnavailable => "OCRUnavailable",
            ErrorKind::OcrEmptyResult => "OCREmptyResult",
            ErrorKind::VendorUnknown => "VendorUnknown",
            ErrorKind::VendorAmbiguous => "VendorAmbiguous",
            ErrorKind::VendorConfigInvalid => "VendorConfigInvalid",
            ErrorKind::ExtractionFailed => "ExtractionFailed",
            ErrorKind::TemplateMissing => "TemplateMissing",
            ErrorKind::TemplatePages => "TemplatePages",
            ErrorKind::LayoutIncomplete => "LayoutIncomplete",
            ErrorKind::Io => "Io",
            ErrorKind::Image => "Image",
            ErrorKind::Pdf => "Pdf",
            ErrorKind::Record => "Record",
            ErrorKind::Config => "Config",
            ErrorKind::Ledger => "Ledger",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The part of the system an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Ocr,
    Vendors,
    Extractor,
    Layout,
    Renderer,
    Pipeline,
    Config,
    Ledger,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Ocr => "ocr",
            Component::Vendors => "vendors",
            Component::Extractor => "extractor",
            Component::Layout => "layout",
            Component::Renderer => "renderer",
            Component::Pipeline => "pipeline",
            Component::Config => "config",
            Component::Ledger => "ledger",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::OcrUnavailable(_) => ErrorKind::OcrUnavailable,
            Error::OcrEmptyResult => ErrorKind::OcrEmptyResult,
            Error::VendorUnknown(_) => ErrorKind::VendorUnknown,
            Error::VendorAmbiguous(_) => ErrorKind::VendorAmbiguous,
            Error::VendorConfigInvalid(_) => ErrorKind::VendorConfigInvalid,
            Error::ExtractionFailed { .. } => ErrorKind::ExtractionFailed,
            Error::TemplateMissing(_) => ErrorKind::TemplateMissing,
            Error::TemplatePages { .. } => ErrorKind::TemplatePages,
            Error::LayoutIncomplete { .. } => ErrorKind::LayoutIncomplete,
            Error::Io { .. } => ErrorKind::Io,
            Error::Image(_) => ErrorKind::Image,
            Error::Pdf(_) => ErrorKind::Pdf,
            Error::Record(_) => ErrorKind::Record,
            Error::Config(_) => ErrorKind::Config,
            Error::Ledger(_) => ErrorKind::Ledger,
        }
    }

    /// Where the error came from. I/O errors belong to whichever stage hit
    /// them, so they report the pipeline.
    pub fn component(&self) -> Component {
        match self {
            Error::OcrUnavailable(_) | Error::OcrEmptyResult | Error::Image(_) => Component::Ocr,
            Error::VendorUnknown(_)
            | Error::VendorAmbiguous(_)
            | Error::VendorConfigInvalid(_) => Component::Vendors,
            Error::ExtractionFailed { .. } | Error::Record(_) => Component::Extractor,
            Error::LayoutIncomplete { .. } => Component::Layout,
            Error::TemplateMissing(_) | Error::TemplatePages { .. } | Error::Pdf(_) => {
                Component::Renderer
            }
            Error::Io { .. } => Component::Pipeline,
            Error::Config(_) => Component::Config,
            Error::Ledger(_) => Component::Ledger,
        }
    }
}
