//! The `train` and `test` runs behind the command line.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::annotations::{AnnotationStore, Annotations};
use crate::dataset::{DatasetBuilder, DatasetOptions};
use crate::imaging::render::save_prediction;
use crate::inference::{InferenceWalker, WalkOptions};
use crate::models::Metrics;
use crate::pipeline::DebugConfig;
use crate::regressor::{
    FitOptions, ProfileModel, ProfileRegressor, Regressor, TrainedModel, model_path,
};

/// Where `--debug` writes sample previews.
pub const DEBUG_DIR: &str = "__debug__";

/// Annotation tables and the image directory they describe.
#[derive(Debug, Clone)]
pub struct InputConfig {
    pub input_dir: PathBuf,
    pub column_annotation: PathBuf,
    pub floor_annotation: PathBuf,
}

impl InputConfig {
    fn load(&self) -> Result<(Annotations, Vec<PathBuf>)> {
        let annotations = Annotations::load(
            &AnnotationStore::new(),
            &self.column_annotation,
            &self.floor_annotation,
        )
        .context("Failed to load annotations")?;
        let images = list_images(&self.input_dir)?;
        log::info!(
            "{} annotated files, {} images in {}",
            annotations.len(),
            images.len(),
            self.input_dir.display()
        );
        Ok((annotations, images))
    }
}

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub input: InputConfig,
    pub model_dir: PathBuf,
    pub num_epochs: usize,
    pub learning_rate: f64,
    pub augmentation_factor: usize,
    pub all_columns: bool,
    pub seed: u64,
    /// Write sample previews here and stop before training.
    pub debug_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TestConfig {
    pub input: InputConfig,
    pub model_dir: PathBuf,
    pub output_dir: PathBuf,
    pub all_columns: bool,
    /// Write sample previews here and stop before loading the model.
    pub debug_dir: Option<PathBuf>,
}

/// Outcome of a test run.
#[derive(Debug, Clone)]
pub struct TestReport {
    pub metrics: Metrics,
    /// Base-sample prediction per image, in input order.
    pub predictions: Vec<(String, f32)>,
    /// Images whose column walk was rendered.
    pub rendered: usize,
    /// Images whose column walk failed.
    pub failed: usize,
}

/// `*.jpg` files directly inside `dir`, sorted by name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read input directory {}", dir.display()))?;

    let mut images = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "jpg") {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

fn debug_config(dir: Option<&Path>) -> Result<Option<DebugConfig>> {
    dir.map(|dir| {
        DebugConfig::prepare(dir.to_path_buf())
            .with_context(|| format!("Failed to prepare debug directory {}", dir.display()))
    })
    .transpose()
}

/// Build the augmented training set and fit the model. Returns `None` in
/// debug mode, after the sample previews are written.
pub fn train(config: &TrainConfig) -> Result<Option<ProfileModel>> {
    let (annotations, images) = config.input.load()?;
    fs::create_dir_all(&config.model_dir)?;

    let mut options = DatasetOptions::default()
        .with_augmentation(config.augmentation_factor)
        .with_all_columns(config.all_columns)
        .with_shuffle(true)
        .with_seed(config.seed);
    let debug = debug_config(config.debug_dir.as_deref())?;
    if let Some(debug) = &debug {
        options = options.with_debug(debug.clone());
    }

    let dataset = DatasetBuilder::new(&annotations, options)
        .build(&images)
        .context("Failed to build training set")?;
    println!("Training set: {:?}", dataset.images.shape());
    if debug.is_some() {
        return Ok(None);
    }

    let path = model_path(&config.model_dir);
    let fit = FitOptions::default()
        .with_epochs(config.num_epochs)
        .with_learning_rate(config.learning_rate)
        .with_seed(config.seed)
        .with_checkpoint(path.clone());
    let model = ProfileRegressor::new(fit)
        .fit(&dataset)
        .context("Training failed")?;

    if let Some(summary) = &model.summary {
        println!(
            "Best {} {:.6} at epoch {} of {}, saved to {}",
            summary.monitored,
            summary.best_loss,
            summary.best_epoch,
            summary.epochs_run,
            path.display()
        );
    }
    Ok(Some(model))
}

/// Evaluate the saved model, write per-image predictions and render the
/// column walk of every image. Returns `None` in debug mode.
pub fn test(config: &TestConfig) -> Result<Option<TestReport>> {
    let (annotations, images) = config.input.load()?;
    fs::create_dir_all(&config.output_dir)?;

    let mut options = DatasetOptions::default().with_all_columns(config.all_columns);
    let debug = debug_config(config.debug_dir.as_deref())?;
    if let Some(debug) = &debug {
        options = options.with_debug(debug.clone());
    }
    let dataset = DatasetBuilder::new(&annotations, options)
        .build(&images)
        .context("Failed to build test set")?;
    if debug.is_some() {
        return Ok(None);
    }

    let path = model_path(&config.model_dir);
    let model = ProfileModel::load(&path)
        .with_context(|| format!("Failed to load model {}", path.display()))?;

    let metrics = model.evaluate(&dataset);
    println!("Evaluation: mse {:.6}, mae {:.6}", metrics.mse, metrics.mae);

    let predicted = model.predict_batch(dataset.images.view());
    let predictions: Vec<(String, f32)> = dataset
        .files
        .iter()
        .zip(&dataset.base_indices)
        .map(|(file, &i)| (file.clone(), predicted[i]))
        .collect();
    write_predictions(&config.output_dir.join("prediction.txt"), &predictions)?;

    let walker = InferenceWalker::new(
        &model,
        &annotations,
        WalkOptions::default().with_all_columns(config.all_columns),
    );
    let mut rendered = 0;
    let mut failed = 0;
    for (path, result) in walker.walk_files(&images) {
        // Walk failures are already logged by the walker.
        let Ok(walk) = result else {
            failed += 1;
            continue;
        };
        log::info!("{}: columns {:?}", walk.file, walk.positions);
        let dest = config.output_dir.join(&walk.file);
        match save_prediction(&path, &walk.positions, &dest) {
            Ok(()) => rendered += 1,
            Err(e) => {
                log::error!("{}: {}", path.display(), e);
                failed += 1;
            }
        }
    }
    println!(
        "Rendered {} images to {} ({} failed)",
        rendered,
        config.output_dir.display(),
        failed
    );

    Ok(Some(TestReport {
        metrics,
        predictions,
        rendered,
        failed,
    }))
}

/// One `filename,value` line per image.
pub fn write_predictions(path: &Path, predictions: &[(String, f32)]) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for (name, value) in predictions {
        writeln!(writer, "{},{}", name, value)?;
    }
    writer.flush()?;
    Ok(())
}
