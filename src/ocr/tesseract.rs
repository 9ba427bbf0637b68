// src/ocr/tesseract.rs

use image::{GrayImage, ImageFormat};
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info, warn};

use super::OcrBackend;
use crate::config::TesseractConfig;
use crate::error::{Error, Result};

/// Runs the `tesseract` binary on a temporary PNG, once per page
/// segmentation mode, and keeps the longest reading.
#[derive(Debug, Clone)]
pub struct TesseractBackend {
    command: PathBuf,
    lang: String,
    psm_modes: Vec<u8>,
}

impl TesseractBackend {
    pub fn new(cfg: &TesseractConfig) -> Self {
        let psm_modes = if cfg.psm_modes.is_empty() {
            vec![6]
        } else {
            cfg.psm_modes.clone()
        };
        Self {
            command: cfg.command.clone(),
            lang: cfg.lang.clone(),
            psm_modes,
        }
    }

    fn run(&self, input: &std::path::Path, psm: u8) -> Result<String> {
        let output = Command::new(&self.command)
            .arg(input)
            .arg("stdout")
            .args(["-l", self.lang.as_str(), "--psm", psm.to_string().as_str()])
            .output()
            .map_err(|e| Error::OcrUnavailable(format!("{}: {e}", self.command.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(psm, status = %output.status, stderr = %stderr.trim(), "tesseract failed");
            return Err(Error::OcrUnavailable(format!(
                "{} exited with {}: {}",
                self.command.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl OcrBackend for TesseractBackend {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &GrayImage) -> Result<String> {
        // Removed when `input` drops, on every path out of here.
        let input = tempfile::Builder::new()
            .prefix("po-ocr-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| Error::io(std::env::temp_dir(), e))?;
        image.save_with_format(input.path(), ImageFormat::Png)?;

        let mut best = String::new();
        for &psm in &self.psm_modes {
            let text = self.run(input.path(), psm)?;
            let chars = text.split_whitespace().map(str::len).sum::<usize>();
            debug!(psm, chars, "tesseract pass");
            if chars > best.split_whitespace().map(str::len).sum::<usize>() {
                best = text;
            }
        }
        info!(chars = best.len(), modes = self.psm_modes.len(), "tesseract finished");
        Ok(best)
    }
}
