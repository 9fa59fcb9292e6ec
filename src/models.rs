use ndarray::{Array1, Array4, ArrayView3, Axis, s};

use crate::imaging::FloatImage;
use crate::pipeline::WalkEnd;

/// Model input width in pixels.
pub const INPUT_WIDTH: u32 = 160;
/// Model input height in pixels.
pub const INPUT_HEIGHT: u32 = 160;
pub const NUM_CHANNELS: usize = 3;

/// One expanded training example before standardization.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Input-sized crop.
    pub image: FloatImage,
    /// Column position relative to the crop width, in `[0, 1]`.
    pub label: f64,
}

/// Images and labels in two parallel arrays.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// `(n, INPUT_HEIGHT, INPUT_WIDTH, 3)` standardized images.
    pub images: Array4<f32>,
    /// `(n,)` labels.
    pub labels: Array1<f32>,
    /// Source file names, in input order.
    pub files: Vec<String>,
    /// For each source file, the index of its first (full-width) sample.
    pub base_indices: Vec<usize>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn image(&self, index: usize) -> ArrayView3<'_, f32> {
        self.images.index_axis(Axis(0), index)
    }

    /// Reorder the samples in place so that sample `k` becomes the old
    /// sample `order[k]`; `order` must be a permutation of `0..len`.
    pub fn permute(&mut self, order: &[usize]) {
        let mut position = vec![0; self.len()];
        for (new, &old) in order.iter().enumerate() {
            position[old] = new;
        }

        // Follow each cycle with a single spare row.
        let mut done = vec![false; self.len()];
        for start in 0..self.len() {
            if done[start] {
                continue;
            }
            let spare_image = self.images.index_axis(Axis(0), start).to_owned();
            let spare_label = self.labels[start];
            let mut k = start;
            loop {
                done[k] = true;
                let src = order[k];
                if src == start {
                    self.images.index_axis_mut(Axis(0), k).assign(&spare_image);
                    self.labels[k] = spare_label;
                    break;
                }
                let (mut dst_row, src_row) = self
                    .images
                    .multi_slice_mut((s![k, .., .., ..], s![src, .., .., ..]));
                dst_row.assign(&src_row);
                self.labels[k] = self.labels[src];
                k = src;
            }
        }

        for i in &mut self.base_indices {
            *i = position[*i];
        }
    }

    /// First index of the validation part, which is the trailing `fraction`
    /// of the samples.
    pub fn split_index(&self, fraction: f64) -> usize {
        let n = self.len();
        ((n as f64 * (1.0 - fraction)) as usize).min(n)
    }
}

/// Columns found on one image, left to right from the widest.
#[derive(Debug, Clone)]
pub struct ColumnWalk {
    pub file: String,
    /// Fractions of the full (floor-cropped) image width.
    pub positions: Vec<f64>,
    /// Number of model evaluations the walk took.
    pub predictions: usize,
    pub end: WalkEnd,
}

/// Regression quality over a dataset.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Metrics {
    pub mse: f64,
    pub mae: f64,
}
