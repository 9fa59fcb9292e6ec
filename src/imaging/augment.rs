//! Random translation and rotation of training samples.
//!
//! The random draw is separated from its application so that a given draw can
//! be replayed exactly, and the random source is always supplied by the
//! caller.

use image::imageops;
use image::{ImageBuffer, Luma};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use rand::Rng;

use super::FloatImage;

/// Pixels of padding on each side before the shifted window is cut out.
pub const SHIFT_MARGIN: u32 = 4;

/// Largest rotation magnitude in degrees.
pub const MAX_ROTATION_DEG: f32 = 0.5;

/// One set of augmentation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AugmentDraw {
    /// Left edge of the window inside the padded image.
    pub offset_x: u32,
    /// Top edge of the window inside the padded image.
    pub offset_y: u32,
    pub angle_deg: f32,
}

impl AugmentDraw {
    /// The draw that leaves image and label untouched.
    pub fn identity(margin: u32) -> Self {
        Self {
            offset_x: margin,
            offset_y: margin,
            angle_deg: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Augmenter {
    margin: u32,
    max_rotation_deg: f32,
}

impl Augmenter {
    /// Augmenter with the default shift margin and rotation range.
    pub fn new() -> Self {
        Self {
            margin: SHIFT_MARGIN,
            max_rotation_deg: MAX_ROTATION_DEG,
        }
    }

    pub fn with_margin(mut self, margin: u32) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_max_rotation(mut self, degrees: f32) -> Self {
        self.max_rotation_deg = degrees.abs();
        self
    }

    pub fn margin(&self) -> u32 {
        self.margin
    }

    /// Draw offsets and an angle from `rng`.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> AugmentDraw {
        let span = self.margin * 2;
        let (offset_x, offset_y) = if span == 0 {
            (0, 0)
        } else {
            (rng.random_range(0..span), rng.random_range(0..span))
        };
        let angle_deg = rng.random_range(-self.max_rotation_deg..=self.max_rotation_deg);
        AugmentDraw {
            offset_x,
            offset_y,
            angle_deg,
        }
    }

    /// Draw from `rng` and apply the result.
    pub fn augment<R: Rng + ?Sized>(
        &self,
        img: &FloatImage,
        label: f64,
        rng: &mut R,
    ) -> (FloatImage, f64) {
        let draw = self.draw(rng);
        self.apply(img, label, &draw)
    }

    /// Shift then rotate. The label follows the shift; the rotation is small
    /// enough to leave it unchanged.
    pub fn apply(&self, img: &FloatImage, label: f64, draw: &AugmentDraw) -> (FloatImage, f64) {
        let (width, height) = img.dimensions();
        let m = self.margin;

        let mut padded: FloatImage = ImageBuffer::new(width + 2 * m, height + 2 * m);
        imageops::replace(&mut padded, img, m as i64, m as i64);
        let offset_x = draw.offset_x.min(2 * m);
        let offset_y = draw.offset_y.min(2 * m);
        let shifted = imageops::crop_imm(&padded, offset_x, offset_y, width, height).to_image();

        let label = if width == 0 {
            label
        } else {
            ((label * width as f64 + m as f64 - offset_x as f64) / width as f64).clamp(0.0, 1.0)
        };

        if draw.angle_deg == 0.0 {
            return (shifted, label);
        }
        let rotated = rotate_about_center(
            &shifted,
            draw.angle_deg.to_radians(),
            Interpolation::Bicubic,
            Luma([0.0f32]),
        );
        (rotated, label)
    }
}

impl Default for Augmenter {
    fn default() -> Self {
        Self::new()
    }
}
