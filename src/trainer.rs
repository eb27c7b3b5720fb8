use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    tensor::backend::AutodiffBackend,
};
use log::{debug, info};

use crate::{
    augment::AugmentedBatches,
    checkpoint::CheckpointStore,
    config::{AugmentConfig, ClassifierConfig, TrainingConfig},
    data::{FaceDataset, ImageBatcher, Label},
    error::Result,
    evaluator::{score, tensor_values},
    metrics::{EpochRecord, TrainingHistory},
    model::{binary_cross_entropy, Classifier},
};

pub struct ClassifierTrainer<B: AutodiffBackend> {
    pub model: Classifier<B>,
    pub batcher: ImageBatcher<B>,
    pub device: B::Device,
    pub config: TrainingConfig,
    history: TrainingHistory,
}

impl<B: AutodiffBackend> ClassifierTrainer<B> {
    pub fn new(
        model_config: &ClassifierConfig,
        train_config: &TrainingConfig,
        device: B::Device,
    ) -> Result<Self> {
        let model = model_config.init(&device)?;
        let batcher = ImageBatcher::new(device.clone());

        Ok(Self {
            model,
            batcher,
            device,
            config: train_config.clone(),
            history: TrainingHistory::new(),
        })
    }

    pub fn into_model(self) -> Classifier<B> {
        self.model
    }

    /// Loads the last checkpoint from `store`, if any. Returns whether
    /// training state was restored.
    pub fn resume(&mut self, store: &CheckpointStore) -> Result<bool> {
        match store.load(self.model.clone(), &self.device)? {
            Some((model, history)) => {
                self.model = model;
                self.history = history;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// One pass over freshly augmented training batches. Returns the
    /// sample-weighted `(loss, accuracy)` over the epoch, NaN when there
    /// was nothing to train on.
    pub fn train_epoch<O>(&mut self, batches: &mut AugmentedBatches<'_>, optim: &mut O) -> Result<(f64, f64)>
    where
        O: Optimizer<Classifier<B>, B>,
    {
        let mut total_loss = 0.0;
        let mut total_correct = 0;
        let mut total_samples = 0;

        for (step, items) in batches.epoch().enumerate() {
            let batch = self.batcher.batch(items.iter().map(|(image, label)| (image, *label)));

            let output = self.model.forward(batch.images);
            let loss = binary_cross_entropy(output.clone(), batch.targets);

            let loss_value = tensor_values(loss.clone().detach())?
                .first()
                .copied()
                .unwrap_or(f32::NAN) as f64;
            let probabilities = tensor_values(output.detach())?;

            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            self.model = optim.step(self.config.learning_rate, self.model.clone(), grads);

            total_correct += probabilities
                .iter()
                .zip(&items)
                .filter(|(p, (_, label))| Label::from_prediction(**p) == *label)
                .count();
            total_loss += loss_value * items.len() as f64;
            total_samples += items.len();
            debug!("step {}: loss {:.4}", step + 1, loss_value);
        }

        if total_samples == 0 {
            return Ok((f64::NAN, f64::NAN));
        }
        Ok((
            total_loss / total_samples as f64,
            total_correct as f64 / total_samples as f64,
        ))
    }

    /// `(loss, accuracy)` on unaugmented data with dropout disabled.
    pub fn validate(&self, dataset: &FaceDataset) -> Result<(f64, f64)> {
        let model = self.model.valid();
        let scores = score(&model, dataset, self.config.batch_size, &self.device)?;
        Ok((scores.loss, scores.accuracy(&dataset.labels)))
    }

    /// Runs the remaining epochs up to `num_epochs`, checkpointing after
    /// each one when a store is given.
    pub fn train(
        &mut self,
        train_dataset: &FaceDataset,
        val_dataset: &FaceDataset,
        augment: &AugmentConfig,
        checkpoints: Option<&CheckpointStore>,
    ) -> Result<TrainingHistory> {
        let num_epochs = self.config.num_epochs;
        let first_epoch = self.history.len() + 1;

        let mut batches = AugmentedBatches::new(train_dataset, augment, self.config.batch_size, first_epoch);
        let mut optim = self.config.optimizer.init::<B, Classifier<B>>();

        info!("Starting training for {} epochs...", num_epochs);
        info!("Train samples: {}", train_dataset.len());
        info!("Validation samples: {}", val_dataset.len());
        info!("Batch size: {}", self.config.batch_size);
        info!("Learning rate: {}", self.config.learning_rate);
        info!("Device: {:?}", self.device);
        if first_epoch > 1 {
            info!("Skipping {} epochs restored from checkpoint", first_epoch - 1);
        }

        for epoch in first_epoch..=num_epochs {
            let (train_loss, train_accuracy) = self.train_epoch(&mut batches, &mut optim)?;
            let (val_loss, val_accuracy) = self.validate(val_dataset)?;

            info!(
                "Epoch {}/{} - loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4}",
                epoch, num_epochs, train_loss, train_accuracy, val_loss, val_accuracy
            );

            self.history.add(EpochRecord {
                epoch,
                train_loss,
                train_accuracy,
                val_loss,
                val_accuracy,
            });

            if let Some(store) = checkpoints {
                store.save(&self.model, &self.history)?;
            }
        }

        info!("Training completed!");
        Ok(self.history.clone())
    }
}
