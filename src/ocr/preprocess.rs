// src/ocr/preprocess.rs

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use tracing::warn;

use crate::config::PreprocessConfig;

/// Grayscale, upscale, stretch contrast and binarize a screenshot.
pub fn prepare(image: &DynamicImage, cfg: &PreprocessConfig) -> GrayImage {
    let mut gray = image.to_luma8();
    if cfg.upscale > 1 {
        let (w, h) = gray.dimensions();
        match (w.checked_mul(cfg.upscale), h.checked_mul(cfg.upscale)) {
            (Some(nw), Some(nh)) => {
                gray = imageops::resize(&gray, nw, nh, FilterType::CatmullRom);
            }
            _ => warn!(width = w, height = h, upscale = cfg.upscale, "Upscale too large, skipped"),
        }
    }
    if cfg.contrast {
        stretch_contrast(&mut gray, 0.01);
    }
    if cfg.binarize {
        let threshold = otsu_threshold(&gray);
        binarize(&mut gray, threshold);
    }
    gray
}

fn histogram(image: &GrayImage) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for Luma([v]) in image.pixels() {
        hist[*v as usize] += 1;
    }
    hist
}

/// Map the `clip` and `1 - clip` percentiles onto 0 and 255.
pub fn stretch_contrast(image: &mut GrayImage, clip: f64) {
    let hist = histogram(image);
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return;
    }
    let cut = (total as f64 * clip) as u64;

    let percentile = |from_low: bool| {
        let mut seen = 0;
        let bins: Box<dyn Iterator<Item = usize>> = if from_low {
            Box::new(0..256)
        } else {
            Box::new((0..256).rev())
        };
        for i in bins {
            seen += hist[i];
            if seen > cut {
                return i as u8;
            }
        }
        if from_low { 0 } else { 255 }
    };
    let lo = percentile(true);
    let hi = percentile(false);
    if hi <= lo {
        return;
    }

    let span = (hi - lo) as f32;
    for Luma([v]) in image.pixels_mut() {
        let stretched = (*v as f32 - lo as f32) * 255.0 / span;
        *v = stretched.round().clamp(0.0, 255.0) as u8;
    }
}

/// Otsu's threshold: the gray level that maximises between-class variance.
pub fn otsu_threshold(image: &GrayImage) -> u8 {
    let hist = histogram(image);
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return 127;
    }
    let sum_all: f64 = hist.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();

    let mut weight_bg = 0u64;
    let mut sum_bg = 0.0;
    let mut best = (0.0, 0u8);
    for (t, &count) in hist.iter().enumerate() {
        weight_bg += count;
        if weight_bg == 0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0 {
            break;
        }
        sum_bg += t as f64 * count as f64;
        let mean_bg = sum_bg / weight_bg as f64;
        let mean_fg = (sum_all - sum_bg) / weight_fg as f64;
        let between = weight_bg as f64 * weight_fg as f64 * (mean_bg - mean_fg).powi(2);
        if between > best.0 {
            best = (between, t as u8);
        }
    }
    best.1
}

pub fn binarize(image: &mut GrayImage, threshold: u8) {
    for Luma([v]) in image.pixels_mut() {
        *v = if *v > threshold { 255 } else { 0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    /// Dark text-ish block on a light grey background.
    fn screenshot() -> DynamicImage {
        let mut img = RgbImage::from_pixel(40, 20, image::Rgb([200, 200, 200]));
        for x in 10..30 {
            for y in 5..15 {
                img.put_pixel(x, y, image::Rgb([60, 60, 60]));
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_prepare_upscales_and_binarizes() {
        let out = prepare(&screenshot(), &PreprocessConfig::default());
        assert_eq!(out.dimensions(), (80, 40));
        assert!(out.pixels().all(|Luma([v])| *v == 0 || *v == 255));
        assert_eq!(out.get_pixel(2, 2), &Luma([255]));
        assert_eq!(out.get_pixel(40, 20), &Luma([0]));
    }

    #[test]
    fn test_prepare_steps_can_be_disabled() {
        let cfg = PreprocessConfig {
            upscale: 1,
            contrast: false,
            binarize: false,
        };
        let out = prepare(&screenshot(), &cfg);
        assert_eq!(out.dimensions(), (40, 20));
        assert_eq!(out.get_pixel(0, 0), &Luma([200]));
    }

    #[test]
    fn test_otsu_splits_two_levels() {
        let gray = screenshot().to_luma8();
        let t = otsu_threshold(&gray);
        assert!((60..200).contains(&t), "threshold {t}");
    }

    #[test]
    fn test_stretch_contrast_spans_full_range() {
        let mut gray = screenshot().to_luma8();
        stretch_contrast(&mut gray, 0.01);
        assert_eq!(gray.get_pixel(0, 0), &Luma([255]));
        assert_eq!(gray.get_pixel(15, 10), &Luma([0]));
    }

    #[test]
    fn test_oversized_upscale_is_skipped() {
        let cfg = PreprocessConfig {
            upscale: u32::MAX,
            contrast: false,
            binarize: false,
        };
        assert_eq!(prepare(&screenshot(), &cfg).dimensions(), (40, 20));
    }
}
