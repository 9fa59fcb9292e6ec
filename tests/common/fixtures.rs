use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use facade_columns::{FloatImage, TrainedModel};
use image::{ImageBuffer, Luma, Rgb, RgbImage};
use ndarray::ArrayView3;

/// Luminance plane with a diagonal ramp, so it never standardizes to NaN.
pub fn ramp_image(width: u32, height: u32) -> FloatImage {
    ImageBuffer::from_fn(width, height, |x, y| {
        Luma([((x * 7 + y * 3) % 251) as f32 / 255.0])
    })
}

/// Plane whose value encodes the row index, to check vertical crops.
pub fn row_index_image(width: u32, height: u32) -> FloatImage {
    ImageBuffer::from_fn(width, height, |_, y| Luma([y as f32 / 255.0]))
}

/// Facade-like photo: textured wall with dark vertical bands at `columns`.
pub fn facade_photo(width: u32, height: u32, columns: &[f64]) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let on_column = columns
            .iter()
            .any(|c| (x as f64 - c * width as f64).abs() < 3.0);
        if on_column {
            Rgb([30, 30, 40])
        } else {
            let v = 150 + ((x * 5 + y * 11) % 60) as u8;
            Rgb([v, v.saturating_sub(10), v.saturating_sub(20)])
        }
    })
}

/// Write `img` as a JPEG under `dir`.
pub fn write_jpg(dir: &Path, name: &str, img: &RgbImage) -> PathBuf {
    let path = dir.join(name);
    img.save_with_format(&path, image::ImageFormat::Jpeg)
        .expect("Failed to save test image");
    path
}

/// A single annotated image: file name, columns, floors.
pub struct TestRecord<'a> {
    pub name: &'a str,
    pub columns: &'a [f64],
    pub floors: &'a [f64],
}

impl<'a> TestRecord<'a> {
    pub fn new(name: &'a str, columns: &'a [f64], floors: &'a [f64]) -> Self {
        Self {
            name,
            columns,
            floors,
        }
    }
}

fn join(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Write both annotation files under `dir` and return their paths.
pub fn write_annotations(dir: &Path, records: &[TestRecord]) -> (PathBuf, PathBuf) {
    let mut columns = String::new();
    let mut floors = String::new();
    for r in records {
        let values = join(r.columns);
        columns.push_str(&format!("{}\n{}\n{}\n", r.name, values, values));
        floors.push_str(&format!("{}\n{}\n", r.name, join(r.floors)));
    }
    columns.push('\n');
    floors.push('\n');

    let column_path = dir.join("column_annotation.txt");
    let floor_path = dir.join("floor_annotation.txt");
    fs::write(&column_path, columns).expect("Failed to write column annotation");
    fs::write(&floor_path, floors).expect("Failed to write floor annotation");
    (column_path, floor_path)
}

/// Model that always answers the same value.
pub struct ConstantModel(pub f32);

impl TrainedModel for ConstantModel {
    fn predict(&self, _image: ArrayView3<f32>) -> f32 {
        self.0
    }
}

/// Model that replays a fixed list of answers, then repeats the last one.
pub struct ScriptedModel {
    answers: Vec<f32>,
    calls: Cell<usize>,
}

impl ScriptedModel {
    pub fn new(answers: &[f32]) -> Self {
        Self {
            answers: answers.to_vec(),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl TrainedModel for ScriptedModel {
    fn predict(&self, _image: ArrayView3<f32>) -> f32 {
        let i = self.calls.get();
        self.calls.set(i + 1);
        self.answers[i.min(self.answers.len() - 1)]
    }
}
