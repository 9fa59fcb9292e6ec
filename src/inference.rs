//! Column detection by repeated prediction.
//!
//! The model only ever answers "where is the next column from the left edge
//! of this view". Asking again on the part of the image left of each answer
//! walks across the facade one column at a time.

use std::path::{Path, PathBuf};

use crate::annotations::Annotations;
use crate::dataset::file_name;
use crate::error::{Error, Result};
use crate::imaging::preprocessing::{crop_floors, load_image, standardize, to_tensor};
use crate::imaging::FloatImage;
use crate::models::ColumnWalk;
use crate::pipeline::{Narrowing, PositionSource, WalkEnd, walk};
use crate::regressor::TrainedModel;

/// Predictions below this fraction of the full width mean "no more columns".
pub const STOP_THRESHOLD: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Keep walking after the first column.
    pub all_columns: bool,
    pub stop_threshold: f64,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            all_columns: false,
            stop_threshold: STOP_THRESHOLD,
        }
    }
}

impl WalkOptions {
    pub fn with_all_columns(mut self, all_columns: bool) -> Self {
        self.all_columns = all_columns;
        self
    }

    pub fn with_stop_threshold(mut self, threshold: f64) -> Self {
        self.stop_threshold = threshold;
        self
    }
}

/// Positions predicted by a model, one per view.
struct PredictedPositions<'m, M: ?Sized> {
    model: &'m M,
    stop_threshold: f64,
    predictions: usize,
    /// Width of a flat view that ended the walk.
    degenerate: Option<u32>,
}

impl<M: TrainedModel + ?Sized> PositionSource for PredictedPositions<'_, M> {
    fn next_position(&mut self, narrowing: &Narrowing) -> Result<Option<f64>> {
        let standardized = match standardize(narrowing.view()) {
            Ok(image) => image,
            Err(Error::DegenerateImage(reason)) => {
                self.degenerate = Some(narrowing.width());
                log::warn!(
                    "width {}/{}: {}, ending walk",
                    narrowing.width(),
                    narrowing.orig_width(),
                    reason
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let input = to_tensor(&standardized);
        let local = self.model.predict(input.view()) as f64;
        self.predictions += 1;

        let global = narrowing.to_global(local);
        log::trace!(
            "width {}/{}: predicted {:.4} -> {:.4}",
            narrowing.width(),
            narrowing.orig_width(),
            local,
            global
        );
        Ok((global >= self.stop_threshold).then_some(global))
    }

    fn requires_progress(&self) -> bool {
        true
    }
}

/// Runs a trained model across test images.
pub struct InferenceWalker<'a, M: ?Sized> {
    model: &'a M,
    annotations: &'a Annotations,
    options: WalkOptions,
}

impl<'a, M: TrainedModel + ?Sized> InferenceWalker<'a, M> {
    /// Walker using `annotations` to find each file's floors.
    pub fn new(model: &'a M, annotations: &'a Annotations, options: WalkOptions) -> Self {
        Self {
            model,
            annotations,
            options,
        }
    }

    /// Walk one floor-cropped image.
    pub fn walk(&self, file: &str, cropped: FloatImage) -> Result<ColumnWalk> {
        let mut narrowing = Narrowing::new(cropped)?;
        let mut source = PredictedPositions {
            model: self.model,
            stop_threshold: self.options.stop_threshold,
            predictions: 0,
            degenerate: None,
        };
        let mut positions = Vec::new();

        let end = walk(
            &mut narrowing,
            &mut source,
            self.options.all_columns,
            |_, position| {
                positions.push(position);
                Ok(())
            },
        )?;
        let end = match source.degenerate {
            Some(width) => WalkEnd::Degenerate { width },
            None => end,
        };
        log::debug!(
            "{}: {} columns after {} predictions ({:?})",
            file,
            positions.len(),
            source.predictions,
            end
        );

        Ok(ColumnWalk {
            file: file.to_string(),
            positions,
            predictions: source.predictions,
            end,
        })
    }

    /// Load `path`, crop it to its annotated floors and walk it.
    pub fn walk_file(&self, path: &Path) -> Result<ColumnWalk> {
        let name = file_name(path);
        let floors = self.annotations.floors(&name)?;
        let cropped = crop_floors(&load_image(path)?, floors)?;
        self.walk(&name, cropped)
    }

    /// Walk every file; a failure only affects its own entry.
    pub fn walk_files(&self, paths: &[PathBuf]) -> Vec<(PathBuf, Result<ColumnWalk>)> {
        paths
            .iter()
            .map(|path| {
                let result = self.walk_file(path);
                if let Err(e) = &result {
                    log::warn!("{}: {}", path.display(), e);
                }
                (path.clone(), result)
            })
            .collect()
    }
}
