// src/pipeline.rs

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{error, info, info_span, warn};

use crate::error::{Component, Error, ErrorKind, Result};
use crate::extract::{ExtractedPo, ExtractionWarning, FieldName, extract_po_with};
use crate::ocr::{OcrEngine, OcrText};
use crate::render::{RenderedInvoice, render_invoice};
use crate::vendors::{VendorProfile, VendorRegistry};

pub const OCR_DEBUG_FILE: &str = "ocr_debug.txt";

/// Where a run is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LoadingInput,
    Extracting,
    Validating,
    Rendering,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::LoadingInput => "loading_input",
            Stage::Extracting => "extracting",
            Stage::Validating => "validating",
            Stage::Rendering => "rendering",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// PO screenshot (PNG/JPEG); goes through OCR and extraction.
    Image(PathBuf),
    /// Previously extracted record (JSON); skips OCR.
    Record(PathBuf),
}

impl Input {
    pub fn path(&self) -> &Path {
        match self {
            Input::Image(p) | Input::Record(p) => p,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Use this vendor instead of detecting one.
    pub vendor: Option<String>,
    pub output_dir: Option<PathBuf>,
    /// Use this PO number instead of the extracted one.
    pub po_number: Option<String>,
}

/// Terminal error state of a run.
#[derive(Debug, Error)]
#[error("{stage} failed in {} ({}): {error}", .error.component(), .error.kind())]
pub struct PipelineFailure {
    pub stage: Stage,
    #[source]
    pub error: Error,
}

impl PipelineFailure {
    pub fn component(&self) -> Component {
        self.error.component()
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

fn at(stage: Stage) -> impl Fn(Error) -> PipelineFailure {
    move |error| PipelineFailure { stage, error }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub vendor_key: String,
    pub po_number: String,
    pub record_path: PathBuf,
    pub pdf_path: PathBuf,
    pub pdf_sha256: String,
    pub pages: usize,
    pub warnings: Vec<ExtractionWarning>,
}

/// Drives one screenshot or record through to a finished invoice.
pub struct Pipeline<'a> {
    registry: &'a VendorRegistry,
    ocr: Option<&'a OcrEngine>,
    output_dir: PathBuf,
    tolerance: f64,
    keep_debug_text: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(registry: &'a VendorRegistry, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            ocr: None,
            output_dir: output_dir.into(),
            tolerance: 0.01,
            keep_debug_text: false,
        }
    }

    pub fn with_ocr(mut self, ocr: &'a OcrEngine) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn keep_debug_text(mut self, keep: bool) -> Self {
        self.keep_debug_text = keep;
        self
    }

    pub fn run(&self, input: &Input, opts: &RunOptions) -> Result<RunReport, PipelineFailure> {
        let span = info_span!("run", input = %input.path().display());
        let _enter = span.enter();

        let result = self.run_stages(input, opts);
        match &result {
            Ok(report) => info!(
                stage = %Stage::Done,
                vendor = %report.vendor_key,
                po_number = %report.po_number,
                pdf = %report.pdf_path.display(),
                pages = report.pages,
                warnings = report.warnings.len(),
                "Run complete"
            ),
            Err(failure) => error!(
                stage = %failure.stage,
                component = %failure.component(),
                kind = %failure.kind(),
                error = %failure.error,
                "Run failed"
            ),
        }
        result
    }

    fn run_stages(&self, input: &Input, opts: &RunOptions) -> Result<RunReport, PipelineFailure> {
        let output_dir = opts.output_dir.as_deref().unwrap_or(&self.output_dir);

        info!(stage = %Stage::LoadingInput, "Stage started");
        let mut record = match input {
            Input::Image(path) => {
                let text = self.read_image(path).map_err(at(Stage::LoadingInput))?;
                info!(stage = %Stage::Extracting, "Stage started");
                self.extract(&text, opts, output_dir)
                    .map_err(at(Stage::Extracting))?
            }
            Input::Record(path) => ExtractedPo::load(path).map_err(at(Stage::LoadingInput))?,
        };

        info!(stage = %Stage::Validating, "Stage started");
        let reloaded = matches!(input, Input::Record(_));
        let profile = self
            .validate(&mut record, opts, reloaded)
            .map_err(at(Stage::Validating))?;

        info!(stage = %Stage::Rendering, "Stage started");
        let rendered = render_invoice(&record, &profile.layout, &profile.template)
            .map_err(at(Stage::Rendering))?;
        write_outputs(&record, &rendered, output_dir).map_err(at(Stage::Rendering))
    }

    fn read_image(&self, path: &Path) -> Result<OcrText> {
        let ocr = self
            .ocr
            .ok_or_else(|| Error::OcrUnavailable("no OCR engine configured".to_string()))?;
        ocr.read_path(path)
    }

    fn extract(&self, text: &OcrText, opts: &RunOptions, output_dir: &Path) -> Result<ExtractedPo> {
        if self.keep_debug_text {
            fs::create_dir_all(output_dir).map_err(|e| Error::io(output_dir, e))?;
            let debug_path = output_dir.join(OCR_DEBUG_FILE);
            fs::write(&debug_path, &text.raw).map_err(|e| Error::io(&debug_path, e))?;
            info!(path = %debug_path.display(), "OCR debug text written");
        }

        let profile = match &opts.vendor {
            Some(key) => self.registry.get(key)?,
            None => self.registry.detect(&text.cleaned)?,
        };
        extract_po_with(
            &text.cleaned,
            profile,
            self.tolerance,
            opts.po_number.as_deref(),
        )
    }

    /// Resolve the vendor and make sure the record can be rendered.
    fn validate(
        &self,
        record: &mut ExtractedPo,
        opts: &RunOptions,
        reloaded: bool,
    ) -> Result<&'a VendorProfile> {
        let registry: &'a VendorRegistry = self.registry;
        let profile = match (&opts.vendor, record.vendor_key.trim()) {
            (Some(key), _) => registry.get(key)?,
            (None, "") => registry.find_by_name(record.vendor_name.as_deref().unwrap_or_default())?,
            (None, key) => registry.get(key)?,
        };
        record.vendor_key = profile.key.clone();

        if let Some(po) = &opts.po_number {
            info!(po_number = %po, "Using PO number override");
            record.po_number = po.clone();
        }
        if !record.has_field(FieldName::PoNumber) {
            return Err(Error::ExtractionFailed {
                missing: vec![FieldName::PoNumber],
            });
        }

        if !profile.template.is_file() {
            return Err(Error::TemplateMissing(profile.template.clone()));
        }
        profile.layout.check_covers(record)?;

        if reloaded {
            record.check_totals(self.tolerance);
        }
        if !record.warnings.is_empty() {
            warn!(
                warnings = record.warnings.len(),
                inconsistent = record.is_inconsistent(),
                "Record carries warnings; review before sending"
            );
        }
        Ok(profile)
    }
}

/// Output file stem: `<vendor>_<po>` with anything unsafe in the PO number
/// replaced.
pub fn output_stem(record: &ExtractedPo) -> String {
    let po: String = record
        .po_number
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}_{po}", record.vendor_key)
}

fn write_outputs(
    record: &ExtractedPo,
    rendered: &RenderedInvoice,
    output_dir: &Path,
) -> Result<RunReport> {
    fs::create_dir_all(output_dir).map_err(|e| Error::io(output_dir, e))?;
    let stem = output_stem(record);
    let record_path = output_dir.join(format!("{stem}_extracted.json"));
    let pdf_path = output_dir.join(format!("{stem}_invoice.pdf"));

    // both files are staged before either is moved into place
    let staged_record = stage(output_dir, record.to_json()?.as_bytes())?;
    let staged_pdf = stage(output_dir, &rendered.bytes)?;
    persist(staged_pdf, &pdf_path)?;
    if let Err(e) = persist(staged_record, &record_path) {
        let _ = fs::remove_file(&pdf_path);
        return Err(e);
    }

    Ok(RunReport {
        vendor_key: record.vendor_key.clone(),
        po_number: record.po_number.clone(),
        record_path,
        pdf_path,
        pdf_sha256: format!("{:x}", Sha256::digest(&rendered.bytes)),
        pages: rendered.pages,
        warnings: record.warnings.clone(),
    })
}

/// Write `bytes` to a temp file in `dir`; it is removed unless persisted.
fn stage(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| Error::io(tmp.path(), e))?;
    tmp.flush().map_err(|e| Error::io(tmp.path(), e))?;
    Ok(tmp)
}

/// Rename a staged file into place.
fn persist(tmp: NamedTempFile, path: &Path) -> Result<()> {
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}
