//! Annotation-driven sample expansion and dataset assembly.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array4, ArrayViewMut1, ArrayViewMut4, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::annotations::Annotations;
use crate::error::{Error, Result};
use crate::imaging::preprocessing::{crop_floors, fill_tensor, load_image, standardize};
use crate::imaging::{Augmenter, FloatImage};
use crate::models::{Dataset, INPUT_HEIGHT, INPUT_WIDTH, NUM_CHANNELS, Sample};
use crate::pipeline::{AnnotatedPositions, DebugConfig, Narrowing, walk};

/// How annotated images are turned into samples.
#[derive(Debug, Clone)]
pub struct DatasetOptions {
    /// Perturbed copies per base sample; `None` disables augmentation.
    pub augmentation_factor: Option<usize>,
    /// Expand every annotated column, not only the widest.
    pub all_columns: bool,
    pub shuffle: bool,
    /// Seeds augmentation (per file) and shuffling.
    pub seed: u64,
    pub debug: Option<DebugConfig>,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            augmentation_factor: None,
            all_columns: false,
            shuffle: false,
            seed: 0,
            debug: None,
        }
    }
}

impl DatasetOptions {
    /// Produce `factor` perturbed copies of every base sample.
    pub fn with_augmentation(mut self, factor: usize) -> Self {
        self.augmentation_factor = Some(factor);
        self
    }

    /// Expand every annotated column instead of only the widest.
    pub fn with_all_columns(mut self, all_columns: bool) -> Self {
        self.all_columns = all_columns;
        self
    }

    /// Shuffle the finished dataset with the options' seed.
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Seed for per-file augmentation and the final shuffle.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Write a preview of every sample through `debug`.
    pub fn with_debug(mut self, debug: DebugConfig) -> Self {
        self.debug = Some(debug);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.augmentation_factor == Some(0) {
            return Err(Error::InvalidConfig(
                "augmentation factor must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Exact number of samples an image with `column_count` annotated
    /// columns expands to.
    pub fn samples_per_image(&self, column_count: usize) -> usize {
        let steps = if self.all_columns { column_count + 1 } else { 1 };
        steps * self.augmentation_factor.unwrap_or(1)
    }
}

/// Expands one floor-cropped image into its cascade of samples.
#[derive(Debug, Clone)]
pub struct SampleExpander {
    augmenter: Augmenter,
    augmentation_factor: Option<usize>,
    all_columns: bool,
}

impl SampleExpander {
    /// Expander using the default augmenter.
    pub fn new(options: &DatasetOptions) -> Self {
        Self {
            augmenter: Augmenter::new(),
            augmentation_factor: options.augmentation_factor,
            all_columns: options.all_columns,
        }
    }

    /// Replace the augmenter, e.g. to change the margin or rotation range.
    pub fn with_augmenter(mut self, augmenter: Augmenter) -> Self {
        self.augmenter = augmenter;
        self
    }

    /// One sample per annotated column, widest first, plus a final sample
    /// labelled 0 for "no column left"; each one repeated per augmentation.
    ///
    /// After a column is used the view narrows to the part of the image left
    /// of it, and later labels are re-expressed relative to that width.
    pub fn expand<R: Rng + ?Sized>(
        &self,
        cropped: FloatImage,
        columns: &[f64],
        rng: &mut R,
    ) -> Result<Vec<Sample>> {
        let mut samples = Vec::new();
        self.expand_with(cropped, columns, rng, |sample| {
            samples.push(sample);
            Ok(())
        })?;
        Ok(samples)
    }

    /// Same cascade as [`expand`](Self::expand), handing each sample to
    /// `sink` as soon as it is produced.
    pub fn expand_with<R, F>(
        &self,
        cropped: FloatImage,
        columns: &[f64],
        rng: &mut R,
        mut sink: F,
    ) -> Result<()>
    where
        R: Rng + ?Sized,
        F: FnMut(Sample) -> Result<()>,
    {
        let mut narrowing = Narrowing::new(cropped)?;
        let mut positions = AnnotatedPositions::new(columns);

        walk(&mut narrowing, &mut positions, self.all_columns, |view, position| {
            let label = view.to_local(position);
            match self.augmentation_factor {
                Some(factor) => {
                    for _ in 0..factor {
                        let (image, label) = self.augmenter.augment(view.view(), label, &mut *rng);
                        sink(Sample { image, label })?;
                    }
                    Ok(())
                }
                None => sink(Sample {
                    image: view.view().clone(),
                    label: label.clamp(0.0, 1.0),
                }),
            }
        })?;

        Ok(())
    }
}

/// Builds the (images, labels) tensors for a list of annotated files.
pub struct DatasetBuilder<'a> {
    annotations: &'a Annotations,
    options: DatasetOptions,
    expander: SampleExpander,
}

impl<'a> DatasetBuilder<'a> {
    /// Builder over `annotations`; the options are validated on build.
    pub fn new(annotations: &'a Annotations, options: DatasetOptions) -> Self {
        let expander = SampleExpander::new(&options);
        Self {
            annotations,
            options,
            expander,
        }
    }

    /// Replace the augmenter used by the expander.
    pub fn with_augmenter(mut self, augmenter: Augmenter) -> Self {
        self.expander = self.expander.with_augmenter(augmenter);
        self
    }

    pub fn options(&self) -> &DatasetOptions {
        &self.options
    }

    /// Per-file sample counts, failing on the first file without annotation.
    pub fn sample_counts(&self, names: &[String]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|name| {
                self.annotations.floors(name)?;
                let columns = self.annotations.columns(name)?;
                Ok(self.options.samples_per_image(columns.len()))
            })
            .collect()
    }

    /// Load, crop and expand every file in `paths`.
    pub fn build(&self, paths: &[PathBuf]) -> Result<Dataset> {
        let names = paths.iter().map(|p| file_name(p)).collect::<Vec<_>>();
        self.build_with(names, |i| load_image(&paths[i]))
    }

    /// Same as [`build`](Self::build) for images already in memory, keyed by
    /// annotation file name.
    pub fn build_from_images(&self, images: &[(String, FloatImage)]) -> Result<Dataset> {
        let names = images.iter().map(|(name, _)| name.clone()).collect();
        self.build_with(names, |i| Ok(images[i].1.clone()))
    }

    fn build_with<L>(&self, names: Vec<String>, load: L) -> Result<Dataset>
    where
        L: Fn(usize) -> Result<FloatImage> + Sync,
    {
        self.options.validate()?;
        let counts = self.sample_counts(&names)?;
        let total: usize = counts.iter().sum();
        log::info!("expanding {} images into {} samples", names.len(), total);

        let (height, width) = (INPUT_HEIGHT as usize, INPUT_WIDTH as usize);
        let mut images = Array4::<f32>::zeros((total, height, width, NUM_CHANNELS));
        let mut labels = Array1::<f32>::zeros(total);

        // One disjoint block of rows per file, at its precomputed offset.
        let mut blocks = Vec::with_capacity(names.len());
        let mut base_indices = Vec::with_capacity(names.len());
        let mut rest_images = images.view_mut();
        let mut rest_labels = labels.view_mut();
        let mut offset = 0;
        for &count in &counts {
            let (block_images, tail_images) = rest_images.split_at(Axis(0), count);
            let (block_labels, tail_labels) = rest_labels.split_at(Axis(0), count);
            blocks.push((offset, block_images, block_labels));
            base_indices.push(offset);
            rest_images = tail_images;
            rest_labels = tail_labels;
            offset += count;
        }

        blocks
            .into_par_iter()
            .enumerate()
            .try_for_each(|(i, (offset, block_images, block_labels))| {
                let image = load(i)?;
                self.fill_file(i, &names[i], image, offset, block_images, block_labels)
            })?;

        let mut dataset = Dataset {
            images,
            labels,
            files: names,
            base_indices,
        };

        if self.options.shuffle {
            let mut order: Vec<usize> = (0..dataset.len()).collect();
            order.shuffle(&mut StdRng::seed_from_u64(self.options.seed));
            dataset.permute(&order);
        }
        Ok(dataset)
    }

    /// Expand file `index` straight into its rows of the output tensors.
    fn fill_file(
        &self,
        index: usize,
        name: &str,
        image: FloatImage,
        offset: usize,
        mut images: ArrayViewMut4<f32>,
        mut labels: ArrayViewMut1<f32>,
    ) -> Result<()> {
        let expected = labels.len();
        let cropped = crop_floors(&image, self.annotations.floors(name)?)?;
        let mut rng = StdRng::seed_from_u64(self.file_seed(index));
        let mut written = 0;

        self.expander
            .expand_with(cropped, self.annotations.columns(name)?, &mut rng, |sample| {
                if written < expected {
                    let slot = offset + written;
                    if let Some(debug) = &self.options.debug {
                        debug.save_sample(slot, &sample.image, sample.label)?;
                    }
                    let standardized = standardize(&sample.image).map_err(|e| match e {
                        Error::DegenerateImage(reason) => {
                            Error::DegenerateImage(format!("{} sample {}: {}", name, slot, reason))
                        }
                        other => other,
                    })?;
                    fill_tensor(&standardized, images.index_axis_mut(Axis(0), written));
                    labels[written] = sample.label as f32;
                }
                written += 1;
                Ok(())
            })?;

        if written != expected {
            return Err(Error::SampleCount {
                file: name.to_string(),
                expected,
                actual: written,
            });
        }
        log::debug!("{}: {} samples", name, written);
        Ok(())
    }

    fn file_seed(&self, index: usize) -> u64 {
        self.options.seed.wrapping_add(1).wrapping_add(index as u64)
    }
}

/// File name component of `path`, used as the annotation key.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
