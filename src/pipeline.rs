use std::path::PathBuf;

use burn::{module::AutodiffModule, tensor::backend::AutodiffBackend};
use log::info;

use crate::{
    checkpoint::CheckpointStore,
    config::ExperimentConfig,
    data::{FaceDataset, LabelStrategy},
    error::Result,
    evaluator::{evaluate, Evaluation},
    metrics::TrainingHistory,
    report::render_history,
    trainer::ClassifierTrainer,
};

/// Where the run reads from and writes to.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub data_dir: PathBuf,
    pub checkpoint_dir: Option<PathBuf>,
    pub report_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitSizes {
    pub train: usize,
    pub validation: usize,
    pub test: usize,
}

pub struct Outcome {
    pub split_sizes: SplitSizes,
    pub history: TrainingHistory,
    pub evaluation: Evaluation,
    pub charts: Vec<PathBuf>,
}

/// Load, split, train, evaluate, plot: one forward pass through every
/// stage. Any failure aborts the run.
pub fn run<B: AutodiffBackend>(
    config: &ExperimentConfig,
    paths: &RunPaths,
    labeler: &dyn LabelStrategy,
    resume: bool,
    device: B::Device,
) -> Result<Outcome> {
    config.validate()?;

    let dataset = FaceDataset::load(&paths.data_dir, &config.image, labeler)?;
    let split = dataset.split(&config.split);
    let split_sizes = SplitSizes {
        train: split.train.len(),
        validation: split.validation.len(),
        test: split.test.len(),
    };

    println!("Training set size: {}", split_sizes.train);
    println!("Validation set size: {}", split_sizes.validation);
    println!("Test set size: {}", split_sizes.test);

    let checkpoints = paths.checkpoint_dir.as_deref().map(CheckpointStore::new);
    let mut trainer = ClassifierTrainer::<B>::new(&config.model, &config.training, device.clone())?;
    if let Some(store) = &checkpoints {
        if resume && !trainer.resume(store)? {
            info!("No checkpoint found in {}, starting fresh", store.dir().display());
        }
        store.save_config(config)?;
    }

    let history = trainer.train(
        &split.train,
        &split.validation,
        &config.augment,
        checkpoints.as_ref(),
    )?;
    history.print_history();

    let model = trainer.into_model().valid();
    let evaluation = evaluate(model, &split.test, config.training.batch_size, &device)?;

    evaluation.report.print_summary();
    println!("AUC-ROC: {}", evaluation.auc_roc);

    let charts = match &paths.report_dir {
        Some(dir) => render_history(&history, dir)?,
        None => Vec::new(),
    };

    Ok(Outcome {
        split_sizes,
        history,
        evaluation,
        charts,
    })
}
