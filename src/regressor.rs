//! Scalar regression over fixed-size facade images.
//!
//! [`Regressor`] and [`TrainedModel`] are the seam between the data pipeline
//! and whatever model sits behind it. [`ProfileRegressor`] is the model the
//! command line uses: a linear map from the image's column-intensity profile
//! to the column position, trained with Adam on mean squared error.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayView1, ArrayView3, ArrayView4, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

use crate::error::{Error, Result};
use crate::models::{Dataset, INPUT_HEIGHT, INPUT_WIDTH, Metrics};

/// A fitted model that maps one image to one scalar.
pub trait TrainedModel {
    /// Predict from a `(height, width, 3)` standardized image.
    fn predict(&self, image: ArrayView3<f32>) -> f32;

    fn predict_batch(&self, images: ArrayView4<f32>) -> Array1<f32> {
        images.outer_iter().map(|image| self.predict(image)).collect()
    }

    fn evaluate(&self, dataset: &Dataset) -> Metrics {
        let predictions = self.predict_batch(dataset.images.view());
        let n = dataset.len().max(1) as f64;
        let (se, ae) = predictions
            .iter()
            .zip(dataset.labels.iter())
            .fold((0.0, 0.0), |(se, ae), (&p, &y)| {
                let d = (p - y) as f64;
                (se + d * d, ae + d.abs())
            });
        Metrics {
            mse: se / n,
            mae: ae / n,
        }
    }
}

/// Something that can be trained on (image, label) pairs.
pub trait Regressor {
    type Model: TrainedModel;

    fn fit(&self, dataset: &Dataset) -> Result<Self::Model>;
}

/// Training loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitOptions {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Trailing fraction of the dataset held out for validation.
    pub validation_split: f64,
    /// Epochs without improvement of the monitored loss before stopping.
    pub patience: usize,
    /// L2 penalty on the weights.
    pub l2: f64,
    pub batch_size: usize,
    pub seed: u64,
    /// Where to write the best model each time it improves.
    #[serde(skip)]
    pub checkpoint: Option<PathBuf>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 10,
            learning_rate: 1e-4,
            validation_split: 0.2,
            patience: 10,
            l2: 1e-3,
            batch_size: 32,
            seed: 0,
            checkpoint: None,
        }
    }
}

impl FitOptions {
    /// Maximum number of passes over the training part.
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Adam step size.
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Seed for the per-epoch shuffle of training rows.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Save the best model to `path` whenever it improves.
    pub fn with_checkpoint(mut self, path: PathBuf) -> Self {
        self.checkpoint = Some(path);
        self
    }
}

/// How a training run went.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub samples: usize,
    pub epochs_run: usize,
    pub best_epoch: usize,
    /// `val_loss` when a validation split exists, `loss` otherwise.
    pub monitored: String,
    pub best_loss: f64,
    pub trained_at: String,
    pub options: FitOptions,
}

/// Linear model over the mean intensity of each image column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileModel {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub input_width: u32,
    pub input_height: u32,
    #[serde(default)]
    pub summary: Option<TrainingSummary>,
}

impl ProfileModel {
    /// Untrained model that predicts 0 everywhere.
    pub fn zeros() -> Self {
        Self {
            weights: vec![0.0; INPUT_WIDTH as usize],
            bias: 0.0,
            input_width: INPUT_WIDTH,
            input_height: INPUT_HEIGHT,
            summary: None,
        }
    }

    /// Write the model as pretty-printed JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Read a model and check it matches the input size of this build.
    pub fn load(path: &Path) -> Result<Self> {
        let model: Self = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        if model.input_width != INPUT_WIDTH
            || model.input_height != INPUT_HEIGHT
            || model.weights.len() != INPUT_WIDTH as usize
        {
            return Err(Error::Model(format!(
                "{} expects {}x{} input with {} weights, this build uses {}x{}",
                path.display(),
                model.input_width,
                model.input_height,
                model.weights.len(),
                INPUT_WIDTH,
                INPUT_HEIGHT
            )));
        }
        Ok(model)
    }

    fn predict_profile(&self, profile: ArrayView1<f64>) -> f64 {
        self.bias
            + self
                .weights
                .iter()
                .zip(profile.iter())
                .map(|(w, p)| w * p)
                .sum::<f64>()
    }
}

impl TrainedModel for ProfileModel {
    fn predict(&self, image: ArrayView3<f32>) -> f32 {
        self.predict_profile(column_profile(image).view()) as f32
    }
}

/// Mean over rows and channels for each image column.
pub fn column_profile(image: ArrayView3<f32>) -> Array1<f64> {
    let (height, width, channels) = image.dim();
    let mut profile = Array1::<f64>::zeros(width);
    for ((_, x, _), &v) in image.indexed_iter() {
        profile[x] += v as f64;
    }
    let n = (height * channels).max(1) as f64;
    profile.mapv_inplace(|v| v / n);
    profile
}

/// Trains a [`ProfileModel`].
#[derive(Debug, Clone, Default)]
pub struct ProfileRegressor {
    options: FitOptions,
}

impl ProfileRegressor {
    /// Trainer with the given loop settings.
    pub fn new(options: FitOptions) -> Self {
        Self { options }
    }
}

/// Adam moment estimates for the weights and the bias.
struct Adam {
    m: Array1<f64>,
    v: Array1<f64>,
    m_bias: f64,
    v_bias: f64,
    step: i32,
}

impl Adam {
    const BETA1: f64 = 0.9;
    const BETA2: f64 = 0.999;
    const EPSILON: f64 = 1e-7;

    fn new(len: usize) -> Self {
        Self {
            m: Array1::zeros(len),
            v: Array1::zeros(len),
            m_bias: 0.0,
            v_bias: 0.0,
            step: 0,
        }
    }

    fn update(&mut self, model: &mut ProfileModel, grad: &Array1<f64>, grad_bias: f64, lr: f64) {
        self.step += 1;
        let c1 = 1.0 - Self::BETA1.powi(self.step);
        let c2 = 1.0 - Self::BETA2.powi(self.step);

        for (i, w) in model.weights.iter_mut().enumerate() {
            self.m[i] = Self::BETA1 * self.m[i] + (1.0 - Self::BETA1) * grad[i];
            self.v[i] = Self::BETA2 * self.v[i] + (1.0 - Self::BETA2) * grad[i] * grad[i];
            *w -= lr * (self.m[i] / c1) / ((self.v[i] / c2).sqrt() + Self::EPSILON);
        }

        self.m_bias = Self::BETA1 * self.m_bias + (1.0 - Self::BETA1) * grad_bias;
        self.v_bias = Self::BETA2 * self.v_bias + (1.0 - Self::BETA2) * grad_bias * grad_bias;
        model.bias -= lr * (self.m_bias / c1) / ((self.v_bias / c2).sqrt() + Self::EPSILON);
    }
}

fn mse(model: &ProfileModel, features: &Array2<f64>, labels: &Array1<f64>, rows: &[usize]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    rows.iter()
        .map(|&i| (model.predict_profile(features.row(i)) - labels[i]).powi(2))
        .sum::<f64>()
        / rows.len() as f64
}

impl Regressor for ProfileRegressor {
    type Model = ProfileModel;

    fn fit(&self, dataset: &Dataset) -> Result<ProfileModel> {
        let opts = &self.options;
        let n = dataset.len();
        if n == 0 {
            return Err(Error::Model("cannot fit an empty dataset".to_string()));
        }
        if opts.batch_size == 0 || opts.epochs == 0 {
            return Err(Error::InvalidConfig(format!(
                "need at least one epoch and a positive batch size, got {} epochs of batch {}",
                opts.epochs, opts.batch_size
            )));
        }

        let width = dataset.images.len_of(Axis(2));
        if width != INPUT_WIDTH as usize {
            return Err(Error::Model(format!(
                "dataset images are {} wide, expected {}",
                width, INPUT_WIDTH
            )));
        }
        let mut features = Array2::<f64>::zeros((n, width));
        for (i, image) in dataset.images.outer_iter().enumerate() {
            features.row_mut(i).assign(&column_profile(image));
        }
        let labels = dataset.labels.mapv(|y| y as f64);

        let split = dataset.split_index(opts.validation_split);
        let (mut train, validation): (Vec<usize>, Vec<usize>) = if split == 0 || split == n {
            ((0..n).collect(), Vec::new())
        } else {
            ((0..split).collect(), (split..n).collect())
        };
        let monitored = if validation.is_empty() {
            log::warn!("no validation samples, monitoring training loss");
            "loss"
        } else {
            "val_loss"
        };
        log::info!(
            "training on {} samples, validating on {}",
            train.len(),
            validation.len()
        );

        let mut rng = StdRng::seed_from_u64(opts.seed);
        let mut model = ProfileModel::zeros();
        let mut adam = Adam::new(width);
        let mut best = (f64::INFINITY, model.clone(), 0);
        let mut wait = 0;
        let mut epochs_run = 0;

        for epoch in 1..=opts.epochs {
            epochs_run = epoch;
            train.shuffle(&mut rng);

            for batch in train.chunks(opts.batch_size) {
                let mut grad = Array1::<f64>::zeros(width);
                let mut grad_bias = 0.0;
                for &i in batch {
                    let row = features.row(i);
                    let err = model.predict_profile(row) - labels[i];
                    grad.scaled_add(2.0 * err, &row);
                    grad_bias += 2.0 * err;
                }
                let scale = 1.0 / batch.len() as f64;
                grad.mapv_inplace(|g| g * scale);
                for (g, w) in grad.iter_mut().zip(&model.weights) {
                    *g += 2.0 * opts.l2 * w;
                }
                adam.update(&mut model, &grad, grad_bias * scale, opts.learning_rate);
            }

            let loss = mse(&model, &features, &labels, &train);
            let val_loss = mse(&model, &features, &labels, &validation);
            let current = if validation.is_empty() { loss } else { val_loss };
            log::info!(
                "epoch {}/{}: loss {:.6} val_loss {:.6}",
                epoch,
                opts.epochs,
                loss,
                val_loss
            );

            if current < best.0 {
                best = (current, model.clone(), epoch);
                wait = 0;
                if let Some(path) = &opts.checkpoint {
                    model.save(path)?;
                    log::debug!(
                        "{} improved to {:.6}, saved {}",
                        monitored,
                        current,
                        path.display()
                    );
                }
            } else {
                wait += 1;
                if wait >= opts.patience {
                    log::info!("no {} improvement for {} epochs, stopping", monitored, wait);
                    break;
                }
            }
        }

        let (best_loss, mut model, best_epoch) = best;
        let trained_at = time::OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| Error::Model(e.to_string()))?;
        model.summary = Some(TrainingSummary {
            samples: n,
            epochs_run,
            best_epoch,
            monitored: monitored.to_string(),
            best_loss,
            trained_at,
            options: opts.clone(),
        });
        if let Some(path) = &opts.checkpoint {
            model.save(path)?;
        }
        Ok(model)
    }
}

/// Model artifact location, named after this program.
pub fn model_path(model_dir: &Path) -> PathBuf {
    model_dir.join(format!("{}_model.json", env!("CARGO_PKG_NAME")))
}
