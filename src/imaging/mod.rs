pub mod augment;
pub mod preprocessing;
pub mod render;

use image::{ImageBuffer, Luma};

/// Single luminance plane with intensities in `[0, 1]`.
///
/// Facade images are processed as grayscale replicated into three equal
/// channels, so one plane carries all of the information until the image is
/// written into a model tensor.
pub type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

pub use augment::{AugmentDraw, Augmenter};
pub use preprocessing::{crop_floors, crop_left, load_image, resize_to_input, standardize};
