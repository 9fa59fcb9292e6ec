use std::path::Path;

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

use super::FloatImage;
use crate::error::{Error, Result};

const LINE_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const LINE_WIDTH: u32 = 3;

/// Draw a full-height vertical line at each fractional x position.
pub fn draw_columns(img: &mut RgbImage, positions: &[f64]) {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    for &p in positions {
        let x = (width as f64 * p).round() as i32 - (LINE_WIDTH / 2) as i32;
        draw_filled_rect_mut(img, Rect::at(x, 0).of_size(LINE_WIDTH, height), LINE_COLOR);
    }
}

/// 8-bit preview of an unstandardized sample with its label drawn in.
pub fn sample_preview(img: &FloatImage, label: f64) -> RgbImage {
    let mut out = RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let v = (img.get_pixel(x, y).0[0] * 255.0).round().clamp(0.0, 255.0) as u8;
        Rgb([v, v, v])
    });
    draw_columns(&mut out, &[label]);
    out
}

/// Load `source` in color, draw the columns and save to `dest`.
pub fn save_prediction(source: &Path, positions: &[f64], dest: &Path) -> Result<()> {
    let mut img = image::open(source)
        .map_err(|e| Error::Image {
            path: source.to_path_buf(),
            source: e,
        })?
        .to_rgb8();
    draw_columns(&mut img, positions);
    img.save(dest).map_err(|e| Error::Image {
        path: dest.to_path_buf(),
        source: e,
    })
}
