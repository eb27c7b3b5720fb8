use burn::tensor::{backend::Backend, Tensor};
use log::info;

use crate::{
    data::{FaceDataset, ImageBatcher, Label},
    error::{PipelineError, Result},
    metrics::{roc_auc, ClassificationReport},
    model::{binary_cross_entropy, Classifier},
};

pub(crate) fn tensor_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| PipelineError::Tensor(format!("{e:?}")))
}

/// Model outputs over a whole dataset, without augmentation.
#[derive(Debug, Clone)]
pub struct Scores {
    /// One class-1 probability per sample, in dataset order.
    pub probabilities: Vec<f32>,
    /// Sample-weighted mean binary cross-entropy, NaN for an empty dataset.
    pub loss: f64,
}

impl Scores {
    pub fn accuracy(&self, labels: &[Label]) -> f64 {
        accuracy(&self.probabilities, labels)
    }
}

/// Fraction of thresholded probabilities matching `labels`; NaN when empty.
pub fn accuracy(probabilities: &[f32], labels: &[Label]) -> f64 {
    if labels.is_empty() {
        return f64::NAN;
    }
    let correct = probabilities
        .iter()
        .zip(labels)
        .filter(|(p, label)| Label::from_prediction(**p) == **label)
        .count();
    correct as f64 / labels.len() as f64
}

pub fn score<B: Backend>(
    model: &Classifier<B>,
    dataset: &FaceDataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<Scores> {
    let batcher = ImageBatcher::<B>::new(device.clone());
    let mut probabilities = Vec::with_capacity(dataset.len());
    let mut total_loss = 0.0;

    for (images, labels) in dataset
        .images
        .chunks(batch_size.max(1))
        .zip(dataset.labels.chunks(batch_size.max(1)))
    {
        let batch = batcher.batch(images.iter().zip(labels.iter().copied()));
        let output = model.forward(batch.images);
        let loss = binary_cross_entropy(output.clone(), batch.targets);

        let batch_loss = tensor_values(loss)?.first().copied().unwrap_or(f32::NAN);
        total_loss += batch_loss as f64 * labels.len() as f64;
        probabilities.extend(tensor_values(output)?);
    }

    let loss = if dataset.is_empty() {
        f64::NAN
    } else {
        total_loss / dataset.len() as f64
    };
    Ok(Scores { probabilities, loss })
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub probabilities: Vec<f32>,
    pub predictions: Vec<Label>,
    pub report: ClassificationReport,
    pub auc_roc: f64,
}

/// Scores the held-out test set with the trained model, consuming it.
pub fn evaluate<B: Backend>(
    model: Classifier<B>,
    test: &FaceDataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<Evaluation> {
    info!("Evaluating on {} test images", test.len());
    let scores = score(&model, test, batch_size, device)?;
    let predictions: Vec<Label> = scores
        .probabilities
        .iter()
        .map(|p| Label::from_prediction(*p))
        .collect();

    let report = ClassificationReport::calculate(&predictions, &test.labels);
    let auc_roc = roc_auc(&scores.probabilities, &test.labels)?;

    Ok(Evaluation {
        probabilities: scores.probabilities,
        predictions,
        report,
        auc_roc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ClassifierConfig, data::ImageSample};
    use burn::backend::NdArray;

    fn dataset(n: usize) -> FaceDataset {
        let mut dataset = FaceDataset::default();
        for i in 0..n {
            let label = if i % 2 == 0 { Label::Male } else { Label::Female };
            let value = i as f32 / n as f32;
            let image = ImageSample::from_raw(vec![value; 32 * 24 * 3], 32, 24);
            dataset.push(image, label, format!("{i}.png"));
        }
        dataset
    }

    #[test]
    fn accuracy_uses_strict_threshold() {
        let labels = [Label::Male, Label::Female, Label::Female];
        assert_eq!(accuracy(&[0.5, 0.51, 0.9], &labels), 1.0);
        assert!(accuracy(&[], &[]).is_nan());
    }

    #[test]
    fn scores_follow_dataset_order_across_batches() {
        let device = Default::default();
        let model = ClassifierConfig::new()
            .with_height(32)
            .with_width(24)
            .init::<NdArray>(&device)
            .unwrap();
        let data = dataset(5);

        let batched = score(&model, &data, 2, &device).unwrap();
        let whole = score(&model, &data, 64, &device).unwrap();
        assert_eq!(batched.probabilities.len(), 5);
        for (a, b) in batched.probabilities.iter().zip(&whole.probabilities) {
            assert!((a - b).abs() < 1e-5);
        }
        assert!((batched.loss - whole.loss).abs() < 1e-4);
    }

    #[test]
    fn empty_dataset_scores_as_nan() {
        let device = Default::default();
        let model = ClassifierConfig::new()
            .with_height(32)
            .with_width(24)
            .init::<NdArray>(&device)
            .unwrap();
        let scores = score(&model, &FaceDataset::default(), 8, &device).unwrap();
        assert!(scores.probabilities.is_empty());
        assert!(scores.loss.is_nan());
        assert!(scores.accuracy(&[]).is_nan());
    }

    #[test]
    fn evaluation_thresholds_every_probability() {
        let device = Default::default();
        let model = ClassifierConfig::new()
            .with_height(32)
            .with_width(24)
            .init::<NdArray>(&device)
            .unwrap();
        let evaluation = evaluate(model, &dataset(6), 4, &device).unwrap();

        assert_eq!(evaluation.predictions.len(), 6);
        for (p, predicted) in evaluation.probabilities.iter().zip(&evaluation.predictions) {
            assert_eq!(*predicted == Label::Female, *p > 0.5);
        }
        assert!((0.0..=1.0).contains(&evaluation.auc_roc));
        assert_eq!(evaluation.report.weighted_avg.support, 6);
    }
}
