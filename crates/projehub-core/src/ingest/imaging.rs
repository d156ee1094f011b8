use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use crate::Result;

pub const DEFAULT_MAX_DIMENSION: u32 = 1024;
pub const DEFAULT_JPEG_QUALITY: u8 = 70;

/// Target size that fits within `max` on both axes, keeping the aspect ratio.
/// Images already within bounds are left alone. A zero bound is treated as one.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    let max = max.max(1);
    if width <= max && height <= max {
        return (width, height);
    }

    let scale = f64::from(max) / f64::from(width.max(height));
    let scaled = |side: u32| ((f64::from(side) * scale).round() as u32).clamp(1, max);

    (scaled(width), scaled(height))
}

fn select_filter(orig_width: u32, new_width: u32) -> FilterType {
    if orig_width > new_width * 2 {
        FilterType::Triangle
    } else {
        FilterType::CatmullRom
    }
}

/// Decode, shrink to `max_dimension`, and re-encode as JPEG.
pub fn recompress(data: &[u8], max_dimension: u32, quality: u8) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data)?;
    let (width, height) = img.dimensions();
    let (target_width, target_height) = fit_within(width, height, max_dimension);

    let img = if (target_width, target_height) == (width, height) {
        img
    } else {
        img.resize_exact(
            target_width,
            target_height,
            select_filter(width, target_width),
        )
    };

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());

    let mut buffer = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)))?;

    Ok(buffer)
}
