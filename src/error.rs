use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{path}:{line}: cannot parse '{field}' as a number")]
    Parse {
        path: String,
        line: usize,
        field: String,
    },
    #[error("{path}:{line}: record for '{file}' has no values")]
    EmptyRecord {
        path: String,
        line: usize,
        file: String,
    },
    #[error("no annotation for '{file}' in the {table} table")]
    MissingAnnotation { file: String, table: &'static str },
    #[error("invalid annotation for '{file}': {reason}")]
    InvalidAnnotation { file: String, reason: String },
    #[error("failed to load image {path:?}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("degenerate image: {0}")]
    DegenerateImage(String),
    #[error("'{file}' produced {actual} samples, expected {expected}")]
    SampleCount {
        file: String,
        expected: usize,
        actual: usize,
    },
    #[error("model error: {0}")]
    Model(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
