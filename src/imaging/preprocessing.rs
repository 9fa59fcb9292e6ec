use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageBuffer, Luma};
use ndarray::{Array3, ArrayViewMut3};

use super::FloatImage;
use crate::error::{Error, Result};
use crate::models::{INPUT_HEIGHT, INPUT_WIDTH};

const LUMA_R: f64 = 0.2989;
const LUMA_G: f64 = 0.5870;
const LUMA_B: f64 = 0.1140;

/// Load an image file as a luminance plane.
pub fn load_image(path: &Path) -> Result<FloatImage> {
    let img = image::open(path).map_err(|source| Error::Image {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(to_luminance(&img))
}

/// Grayscale projection shared by all three channels.
///
/// The luminance is truncated to a whole 8-bit level and then scaled to
/// `[0, 1]`.
pub fn to_luminance(img: &DynamicImage) -> FloatImage {
    let rgb = img.to_rgb8();
    ImageBuffer::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let gray = LUMA_R * r as f64 + LUMA_G * g as f64 + LUMA_B * b as f64;
        Luma([gray.trunc() as f32 / 255.0])
    })
}

/// Remove the sky above the roof line and the shop front below the
/// lowest floor boundary. Only the smallest and largest floor values matter.
pub fn crop_floors(img: &FloatImage, floors: &[f64]) -> Result<FloatImage> {
    let (Some(roof), Some(shop)) = (
        floors.iter().copied().min_by(f64::total_cmp),
        floors.iter().copied().max_by(f64::total_cmp),
    ) else {
        return Err(Error::DegenerateImage("no floor boundaries".to_string()));
    };

    let height = img.height();
    let top = ((roof * height as f64) as u32).min(height);
    let bottom = ((shop * height as f64) as u32).min(height);
    if bottom <= top {
        return Err(Error::DegenerateImage(format!(
            "floor crop [{}, {}) of a {}-row image is empty",
            top, bottom, height
        )));
    }

    Ok(imageops::crop_imm(img, 0, top, img.width(), bottom - top).to_image())
}

/// Left `width` columns of the image.
pub fn crop_left(img: &FloatImage, width: u32) -> Result<FloatImage> {
    if width == 0 || img.height() == 0 {
        return Err(Error::DegenerateImage(format!(
            "cannot crop {}x{} image to width {}",
            img.width(),
            img.height(),
            width
        )));
    }
    let width = width.min(img.width());
    Ok(imageops::crop_imm(img, 0, 0, width, img.height()).to_image())
}

/// Bicubic resize to the model input size.
pub fn resize_to_input(img: &FloatImage) -> FloatImage {
    imageops::resize(img, INPUT_WIDTH, INPUT_HEIGHT, FilterType::CatmullRom)
}

/// Zero mean, unit population variance over every pixel.
pub fn standardize(img: &FloatImage) -> Result<FloatImage> {
    let n = img.as_raw().len();
    if n == 0 {
        return Err(Error::DegenerateImage("empty image".to_string()));
    }

    let mean = img.as_raw().iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let var = img
        .as_raw()
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n as f64;
    let std = var.sqrt();
    if !std.is_finite() || std == 0.0 {
        return Err(Error::DegenerateImage(format!(
            "cannot standardize image with std {}",
            std
        )));
    }

    let mut out = img.clone();
    for p in out.pixels_mut() {
        p.0[0] = ((p.0[0] as f64 - mean) / std) as f32;
    }
    Ok(out)
}

/// Write the plane into a `(height, width, 3)` tensor, one copy per channel.
pub fn fill_tensor(img: &FloatImage, mut out: ArrayViewMut3<f32>) {
    for (x, y, p) in img.enumerate_pixels() {
        out.slice_mut(ndarray::s![y as usize, x as usize, ..]).fill(p.0[0]);
    }
}

pub fn to_tensor(img: &FloatImage) -> Array3<f32> {
    let mut out = Array3::zeros((img.height() as usize, img.width() as usize, 3));
    fill_tensor(img, out.view_mut());
    out
}
