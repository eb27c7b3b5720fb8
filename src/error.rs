use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("unsupported image format at {path}")]
    UnsupportedFormat { path: PathBuf },
    #[error("no images found in {path}")]
    EmptyDataset { path: PathBuf },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("tensor data error: {0}")]
    Tensor(String),
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("plot rendering failed: {0}")]
    Plot(String),
    #[error("AUC-ROC is undefined when only one class is present in the targets")]
    SingleClass,
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
