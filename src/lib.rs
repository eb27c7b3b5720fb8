//! Binary gender classification of face photographs with a small CNN.
//!
//! The pipeline runs load, split, augment, train, evaluate and plot in
//! sequence; [`pipeline::run`] drives a whole experiment.

pub mod augment;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod trainer;

pub use config::ExperimentConfig;
pub use data::{FaceDataset, Label, LabelStrategy, SubstringLabeler};
pub use error::{PipelineError, Result};
pub use model::Classifier;
