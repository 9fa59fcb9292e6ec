//! Recursive narrowing shared by sample expansion and inference.
//!
//! Both walk a floor-cropped facade from its widest column towards the left
//! edge: take a column position, do something with the current view, then
//! restrict the view to the part of the image left of that column. Training
//! takes positions from the annotation, inference from the model.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::imaging::preprocessing::{crop_left, resize_to_input};
use crate::imaging::render::sample_preview;
use crate::imaging::FloatImage;

/// Debug output of intermediate samples
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Directory receiving one PNG per sample
    pub output_dir: PathBuf,
}

impl DebugConfig {
    /// Create the directory, or empty it if it already holds files.
    pub fn prepare(output_dir: PathBuf) -> Result<Self> {
        if output_dir.exists() {
            for entry in std::fs::read_dir(&output_dir)? {
                let path = entry?.path();
                if path.is_file() {
                    std::fs::remove_file(&path)?;
                }
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }

        Ok(Self { output_dir })
    }

    /// Save sample `index` with its label line as `<index>.png`.
    pub fn save_sample(&self, index: usize, image: &FloatImage, label: f64) -> Result<()> {
        let path = self.output_dir.join(format!("{}.png", index));
        sample_preview(image, label)
            .save(&path)
            .map_err(|source| Error::Image {
                path: path.clone(),
                source,
            })?;
        log::debug!("saved {}", path.display());
        Ok(())
    }
}

/// The part of a facade still in play during a walk.
#[derive(Debug, Clone)]
pub struct Narrowing {
    /// Floor-cropped original at full resolution.
    source: FloatImage,
    orig_width: u32,
    /// Current crop width in source pixels.
    width: u32,
    /// Current crop resized to the model input size.
    view: FloatImage,
}

impl Narrowing {
    /// Start a walk over the full floor-cropped image.
    pub fn new(source: FloatImage) -> Result<Self> {
        let orig_width = source.width();
        if orig_width == 0 || source.height() == 0 {
            return Err(Error::DegenerateImage(format!(
                "cannot walk a {}x{} image",
                source.width(),
                source.height()
            )));
        }
        let view = resize_to_input(&source);
        Ok(Self {
            source,
            orig_width,
            width: orig_width,
            view,
        })
    }

    pub fn orig_width(&self) -> u32 {
        self.orig_width
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn view(&self) -> &FloatImage {
        &self.view
    }

    /// Express a fraction of the full width as a fraction of the current crop.
    pub fn to_local(&self, global: f64) -> f64 {
        global * self.orig_width as f64 / self.width as f64
    }

    /// Express a fraction of the current crop as a fraction of the full
    /// width, clamped to `[0, 1]`.
    pub fn to_global(&self, local: f64) -> f64 {
        (local * self.width as f64 / self.orig_width as f64).clamp(0.0, 1.0)
    }

    /// Crop width, in source pixels, that narrowing to `global` yields.
    pub fn width_for(&self, global: f64) -> u32 {
        (self.orig_width as f64 * global).max(0.0) as u32
    }

    /// Restrict the view to the source columns left of `global`.
    pub fn narrow_to(&mut self, global: f64) -> Result<u32> {
        let width = self.width_for(global);
        if width == 0 {
            return Err(Error::DegenerateImage(format!(
                "narrowing to {} of {} pixels leaves no columns",
                global, self.orig_width
            )));
        }
        self.view = resize_to_input(&crop_left(&self.source, width)?);
        self.width = width.min(self.orig_width);
        Ok(self.width)
    }
}

/// Why a walk stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEnd {
    /// The source had no further positions.
    Exhausted,
    /// Only the first position was requested.
    FirstOnly,
    /// Narrowing would not have reduced the width.
    Stalled { width: u32, next_width: u32 },
    /// The view at `width` was flat and could not be standardized.
    Degenerate { width: u32 },
}

/// Supplies column positions, as fractions of the full width, during a walk.
pub trait PositionSource {
    /// Next position for the current view, or `None` to end the walk.
    fn next_position(&mut self, narrowing: &Narrowing) -> Result<Option<f64>>;

    /// Whether the walk must end instead of narrowing without progress.
    ///
    /// Annotated positions may repeat a column, which narrows to the same
    /// width; predicted ones must shrink the view every step.
    fn requires_progress(&self) -> bool {
        false
    }
}

/// Drive `source` over `narrowing`, calling `visit` with each position
/// before the view is narrowed past it.
pub fn walk<S, F>(
    narrowing: &mut Narrowing,
    source: &mut S,
    all_columns: bool,
    mut visit: F,
) -> Result<WalkEnd>
where
    S: PositionSource + ?Sized,
    F: FnMut(&Narrowing, f64) -> Result<()>,
{
    while let Some(position) = source.next_position(narrowing)? {
        visit(narrowing, position)?;

        if !all_columns {
            return Ok(WalkEnd::FirstOnly);
        }

        let next_width = narrowing.width_for(position);
        if source.requires_progress() && (next_width == 0 || next_width >= narrowing.width()) {
            return Ok(WalkEnd::Stalled {
                width: narrowing.width(),
                next_width,
            });
        }
        if position > 0.0 {
            narrowing.narrow_to(position)?;
        }
    }
    Ok(WalkEnd::Exhausted)
}

/// Positions taken from an annotation: every column, widest first, then a
/// final 0.0 meaning "no column left".
#[derive(Debug, Clone)]
pub struct AnnotatedPositions {
    values: std::vec::IntoIter<f64>,
}

impl AnnotatedPositions {
    pub fn new(columns: &[f64]) -> Self {
        let mut values = columns.to_vec();
        values.sort_by(|a, b| b.total_cmp(a));
        values.push(0.0);
        Self {
            values: values.into_iter(),
        }
    }
}

impl PositionSource for AnnotatedPositions {
    fn next_position(&mut self, _narrowing: &Narrowing) -> Result<Option<f64>> {
        Ok(self.values.next())
    }
}
