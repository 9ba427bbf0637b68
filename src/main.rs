// src/main.rs

use anyhow::Context;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use po_invoice::config::Config;
use po_invoice::ledger::{RunEntry, RunLedger, timestamp};
use po_invoice::ocr::OcrEngine;
use po_invoice::pipeline::{Input, Pipeline, RunOptions};
use po_invoice::vendors::VendorRegistry;

/// Turn a PO screenshot into a filled-in vendor invoice PDF.
#[derive(Debug, Parser)]
#[command(name = "po-invoice", version)]
#[command(group(ArgGroup::new("input").required(true).args(["image", "record"])))]
struct Cli {
    /// PO screenshot (PNG or JPEG)
    #[arg(long)]
    image: Option<PathBuf>,

    /// Previously extracted record (JSON); skips OCR
    #[arg(long)]
    record: Option<PathBuf>,

    /// Vendor key; skips vendor detection
    #[arg(long)]
    vendor: Option<String>,

    /// Where the record and invoice are written
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Override PO number (if OCR fails to detect)
    #[arg(long)]
    po_number: Option<String>,

    #[arg(long, default_value = "po-invoice.toml")]
    config: PathBuf,
}

fn main() -> anyhow::Result<ExitCode> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    let registry = VendorRegistry::load(&cfg.registry)?;

    let input = match (cli.image, cli.record) {
        (Some(image), _) => Input::Image(image),
        (None, Some(record)) => Input::Record(record),
        (None, None) => anyhow::bail!("one of --image or --record is required"),
    };

    // OCR is only needed for screenshots
    let ocr = match input {
        Input::Image(_) => Some(OcrEngine::from_config(&cfg.ocr)?),
        Input::Record(_) => None,
    };

    let mut pipeline = Pipeline::new(&registry, &cfg.output_dir)
        .tolerance(cfg.extraction.tolerance)
        .keep_debug_text(cfg.ocr.keep_debug_text);
    if let Some(ocr) = &ocr {
        pipeline = pipeline.with_ocr(ocr);
    }

    let opts = RunOptions {
        vendor: cli.vendor,
        output_dir: cli.output_dir,
        po_number: cli.po_number,
    };

    let started_at = timestamp();
    let outcome = pipeline.run(&input, &opts);

    if let Some(ledger_path) = &cfg.ledger_path {
        let ledger = RunLedger::new(ledger_path)
            .with_context(|| format!("opening ledger {}", ledger_path.display()))?;
        ledger.record_run(&RunEntry::from_outcome(&input, &started_at, &outcome))?;
        let (total, succeeded, failed) = ledger.get_counts()?;
        info!(total, succeeded, failed, "LEDGER");
    }

    match outcome {
        Ok(report) => {
            for warning in &report.warnings {
                warn!(kind = warning.kind(), ?warning, "Review before sending");
            }
            println!("record:  {}", report.record_path.display());
            println!("invoice: {}", report.pdf_path.display());
            println!("sha256:  {}", report.pdf_sha256);
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            eprintln!(
                "error: stage={} component={} kind={}",
                failure.stage,
                failure.component(),
                failure.kind()
            );
            eprintln!("{}", failure.error);
            Ok(ExitCode::FAILURE)
        }
    }
}
