pub mod annotations;
pub mod commands;
pub mod dataset;
pub mod error;
pub mod imaging;
pub mod inference;
pub mod models;
pub mod pipeline;
pub mod regressor;

pub use annotations::{AnnotationStore, Annotations, ColumnRecord, EmptyRecordPolicy};
pub use dataset::{DatasetBuilder, DatasetOptions, SampleExpander};
pub use error::{Error, Result};
pub use imaging::{AugmentDraw, Augmenter, FloatImage};
pub use inference::{InferenceWalker, STOP_THRESHOLD, WalkOptions};
pub use models::{ColumnWalk, Dataset, INPUT_HEIGHT, INPUT_WIDTH, Metrics, Sample};
pub use pipeline::{AnnotatedPositions, DebugConfig, Narrowing, PositionSource, WalkEnd, walk};
pub use regressor::{FitOptions, ProfileModel, ProfileRegressor, Regressor, TrainedModel};
