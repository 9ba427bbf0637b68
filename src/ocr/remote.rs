// src/ocr/remote.rs

use image::{GrayImage, ImageFormat};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;
use tracing::{info, warn};

use super::OcrBackend;
use crate::config::RemoteConfig;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct OcrResponse {
    text: String,
}

/// POSTs the preprocessed PNG to an HTTP OCR service that answers with
/// `{"text": "..."}`.
pub struct RemoteBackend {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl RemoteBackend {
    pub fn new(cfg: &RemoteConfig) -> Result<Self> {
        let api_key = cfg
            .api_key_env
            .as_deref()
            .map(|var| {
                std::env::var(var)
                    .map_err(|_| Error::Config(format!("{var} env var required for remote OCR")))
            })
            .transpose()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| Error::OcrUnavailable(format!("http client: {e}")))?;

        info!(url = %cfg.url, auth = api_key.is_some(), "Using remote OCR backend");
        Ok(Self {
            client,
            url: cfg.url.clone(),
            api_key,
        })
    }
}

impl OcrBackend for RemoteBackend {
    fn name(&self) -> &str {
        "remote"
    }

    fn recognize(&self, image: &GrayImage) -> Result<String> {
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "image/png")
            .body(png);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(|e| {
            warn!(url = %self.url, error = %e, "OCR service not reachable");
            Error::OcrUnavailable(format!("{}: {e}", self.url))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(status = %status, body = %body, "OCR service returned error");
            return Err(Error::OcrUnavailable(format!("{} returned {status}", self.url)));
        }

        let parsed: OcrResponse = response
            .json()
            .map_err(|e| Error::OcrUnavailable(format!("bad response from {}: {e}", self.url)))?;
        info!(chars = parsed.text.len(), "Remote OCR response received");
        Ok(parsed.text)
    }
}
