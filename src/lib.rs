// src/lib.rs

//! Purchase-order screenshots in, filled-in vendor invoice PDFs out.
//!
//! A run reads a PO screenshot with OCR, picks the vendor, extracts the PO
//! fields with that vendor's rules and overlays them onto the vendor's
//! invoice template. A previously extracted JSON record can be rendered
//! again without OCR.

pub mod config;
pub mod error;
pub mod extract;
pub mod layout;
pub mod ledger;
pub mod ocr;
pub mod pipeline;
pub mod render;
pub mod vendors;

pub use error::{Error, Result};
