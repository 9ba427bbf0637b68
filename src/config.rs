use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Vendor registry file (TOML).
    pub registry: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// SQLite run ledger; no ledger is kept when absent.
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,
    #[serde(default)]
    pub ocr: OcrSection,
    #[serde(default)]
    pub extraction: ExtractionSection,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OcrBackendKind {
    #[default]
    Tesseract,
    Remote,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OcrSection {
    #[serde(default)]
    pub backend: OcrBackendKind,
    /// Write the raw OCR text next to the outputs as `ocr_debug.txt`.
    #[serde(default)]
    pub keep_debug_text: bool,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    #[serde(default)]
    pub tesseract: TesseractConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessConfig {
    #[serde(default = "default_upscale")]
    pub upscale: u32,
    #[serde(default = "default_true")]
    pub contrast: bool,
    #[serde(default = "default_true")]
    pub binarize: bool,
}

/// Largest accepted preprocessing upscale factor.
pub const MAX_UPSCALE: u32 = 8;

fn default_upscale() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            upscale: default_upscale(),
            contrast: true,
            binarize: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TesseractConfig {
    #[serde(default = "default_tesseract_command")]
    pub command: PathBuf,
    #[serde(default = "default_lang")]
    pub lang: String,
    /// Page segmentation modes to try; the longest result wins.
    #[serde(default = "default_psm_modes")]
    pub psm_modes: Vec<u8>,
}

fn default_tesseract_command() -> PathBuf {
    PathBuf::from("tesseract")
}

fn default_lang() -> String {
    "eng".to_string()
}

fn default_psm_modes() -> Vec<u8> {
    vec![6, 4, 3]
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            command: default_tesseract_command(),
            lang: default_lang(),
            psm_modes: default_psm_modes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Name of the env var holding a bearer token, if the service wants one.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_remote_url() -> String {
    "http://localhost:8884/ocr".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: default_remote_url(),
            timeout_secs: default_timeout_secs(),
            api_key_env: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionSection {
    /// Allowed gap between summed line totals and the extracted totals.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_tolerance() -> f64 {
    0.01
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
        }
    }
}

impl Config {
    /// Load the config file. Relative paths inside it are resolved against
    /// the file's own directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let mut cfg = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            cfg.registry = base.join(&cfg.registry);
            cfg.output_dir = base.join(&cfg.output_dir);
            cfg.ledger_path = cfg.ledger_path.map(|p| base.join(p));
        }
        Ok(cfg)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        let upscale = cfg.ocr.preprocess.upscale;
        if !(1..=MAX_UPSCALE).contains(&upscale) {
            return Err(Error::Config(format!(
                "ocr.preprocess.upscale must be between 1 and {MAX_UPSCALE}, got {upscale}"
            )));
        }
        Ok(cfg)
    }
}
