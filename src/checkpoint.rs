//! Per-epoch checkpoint boundary.
//!
//! Layout of a checkpoint directory:
//! - `model-<epoch>.bin`: classifier parameters after `epoch` (burn `BinFileRecorder`)
//! - `history.json`: training history up to the last completed epoch
//! - `config.json`: the experiment that produced them
//!
//! `history.json` is the commit record: its length names the model file to
//! load, and it is replaced atomically only after that file is complete.

use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::{
    config::Config,
    module::Module,
    record::{BinFileRecorder, FullPrecisionSettings},
    tensor::backend::Backend,
};
use log::info;

use crate::{
    config::ExperimentConfig,
    error::{PipelineError, Result},
    metrics::TrainingHistory,
    model::Classifier,
};

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parameters saved after `epoch`. The recorder appends `.bin` to the
    /// stem it is given, so saves go through [`Self::model_stem`].
    pub fn model_path(&self, epoch: usize) -> PathBuf {
        self.model_stem(epoch).with_extension("bin")
    }

    fn model_stem(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("model-{epoch}"))
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join("history.json")
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join("config.json")
    }

    pub fn save_config(&self, config: &ExperimentConfig) -> Result<()> {
        self.ensure_dir()?;
        let path = self.config_path();
        config
            .save(&path)
            .map_err(|source| PipelineError::io(path, source))
    }

    /// Writes the model for the last epoch of `history`, then commits the
    /// history. The previous epoch's model is removed only after the commit.
    pub fn save<B: Backend>(&self, model: &Classifier<B>, history: &TrainingHistory) -> Result<()> {
        self.ensure_dir()?;
        let epoch = history.len();
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        model
            .clone()
            .save_file(self.model_stem(epoch), &recorder)
            .map_err(|e| PipelineError::Checkpoint(format!("failed to save model: {e}")))?;

        let path = self.history_path();
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(history).map_err(|source| PipelineError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&tmp, json).map_err(|source| PipelineError::io(&tmp, source))?;
        fs::rename(&tmp, &path).map_err(|source| PipelineError::io(&path, source))?;

        if epoch > 1 {
            let stale = self.model_path(epoch - 1);
            if stale.exists() {
                fs::remove_file(&stale).map_err(|source| PipelineError::io(&stale, source))?;
            }
        }

        info!("Checkpoint saved after epoch {} to {}", epoch, self.dir.display());
        Ok(())
    }

    /// Restores parameters into `model` and returns them with the saved
    /// history, or `None` when nothing has been committed yet.
    pub fn load<B: Backend>(
        &self,
        model: Classifier<B>,
        device: &B::Device,
    ) -> Result<Option<(Classifier<B>, TrainingHistory)>> {
        let history_path = self.history_path();
        if !history_path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&history_path).map_err(|source| PipelineError::io(&history_path, source))?;
        let history: TrainingHistory =
            serde_json::from_slice(&bytes).map_err(|source| PipelineError::Json {
                path: history_path.clone(),
                source,
            })?;

        let model_path = self.model_path(history.len());
        if !model_path.exists() {
            return Err(PipelineError::Checkpoint(format!(
                "history records {} epochs but {} is missing",
                history.len(),
                model_path.display()
            )));
        }

        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let model = model
            .load_file(self.model_stem(history.len()), &recorder, device)
            .map_err(|e| PipelineError::Checkpoint(format!("failed to load model: {e}")))?;

        info!("Resuming from checkpoint in {} after epoch {}", self.dir.display(), history.len());
        Ok(Some((model, history)))
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|source| PipelineError::io(&self.dir, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ClassifierConfig, metrics::EpochRecord};
    use burn::{backend::NdArray, tensor::Tensor};

    type TestBackend = NdArray;

    #[test]
    fn missing_checkpoint_loads_as_none() {
        let temp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(temp.path().join("absent"));
        let device = Default::default();
        let model = ClassifierConfig::new()
            .with_height(32)
            .with_width(24)
            .init::<TestBackend>(&device)
            .unwrap();
        assert!(store.load(model, &device).unwrap().is_none());
    }

    #[test]
    fn saved_model_and_history_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(temp.path().join("ckpt"));
        let device = Default::default();
        let config = ClassifierConfig::new().with_height(32).with_width(24);
        let model = config.init::<TestBackend>(&device).unwrap();

        let mut history = TrainingHistory::new();
        history.add(EpochRecord {
            epoch: 1,
            train_loss: 0.69,
            train_accuracy: 0.5,
            val_loss: 0.68,
            val_accuracy: 0.55,
        });
        store.save(&model, &history).unwrap();
        store.save_config(&ExperimentConfig::standard()).unwrap();
        assert!(store.config_path().exists());
        assert!(store.model_path(1).exists());

        let fresh = config.init::<TestBackend>(&device).unwrap();
        let (restored, restored_history) = store.load(fresh, &device).unwrap().unwrap();
        assert_eq!(restored_history, history);

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 24], &device);
        let expected = model.forward(input.clone()).into_data().to_vec::<f32>().unwrap();
        let actual = restored.forward(input).into_data().to_vec::<f32>().unwrap();
        assert_eq!(expected, actual);
    }

    fn record(epoch: usize) -> EpochRecord {
        EpochRecord {
            epoch,
            train_loss: 0.7,
            train_accuracy: 0.5,
            val_loss: 0.7,
            val_accuracy: 0.5,
        }
    }

    fn output(model: &Classifier<TestBackend>) -> Vec<f32> {
        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 24], &Default::default());
        model.forward(input).into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn uncommitted_model_is_ignored_on_load() {
        let temp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(temp.path());
        let device = Default::default();
        let config = ClassifierConfig::new().with_height(32).with_width(24);

        let committed = config.init::<TestBackend>(&device).unwrap();
        let mut history = TrainingHistory::new();
        history.add(record(1));
        store.save(&committed, &history).unwrap();

        // epoch 2 parameters written, history never replaced
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        config
            .init::<TestBackend>(&device)
            .unwrap()
            .save_file(store.model_stem(2), &recorder)
            .unwrap();
        assert!(store.model_path(2).exists());

        let (restored, restored_history) = store
            .load(config.init::<TestBackend>(&device).unwrap(), &device)
            .unwrap()
            .unwrap();
        assert_eq!(restored_history.len(), 1);
        assert_eq!(output(&restored), output(&committed));
    }

    #[test]
    fn committing_an_epoch_removes_the_previous_model() {
        let temp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(temp.path());
        let device = Default::default();
        let model = ClassifierConfig::new()
            .with_height(32)
            .with_width(24)
            .init::<TestBackend>(&device)
            .unwrap();

        let mut history = TrainingHistory::new();
        history.add(record(1));
        store.save(&model, &history).unwrap();
        history.add(record(2));
        store.save(&model, &history).unwrap();

        assert!(!store.model_path(1).exists());
        assert!(store.model_path(2).exists());
    }

    #[test]
    fn history_without_its_model_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(temp.path());
        let mut history = TrainingHistory::new();
        history.add(record(1));
        std::fs::write(store.history_path(), serde_json::to_vec(&history).unwrap()).unwrap();

        let device = Default::default();
        let model = ClassifierConfig::new()
            .with_height(32)
            .with_width(24)
            .init::<TestBackend>(&device)
            .unwrap();
        assert!(matches!(store.load(model, &device), Err(PipelineError::Checkpoint(_))));
    }
}
