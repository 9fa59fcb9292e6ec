mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from facade_columns for tests
pub use facade_columns::{
    AnnotationStore, Annotations, Augmenter, Dataset, DatasetBuilder, DatasetOptions, Error,
    FloatImage, InferenceWalker, TrainedModel, WalkEnd, WalkOptions,
};
