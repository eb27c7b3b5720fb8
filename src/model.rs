use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};

use crate::{config::ClassifierConfig, error::Result};

/// Probabilities are clamped to `[EPSILON, 1 - EPSILON]` before taking logs.
pub const EPSILON: f32 = 1e-7;

impl ClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Classifier<B>> {
        let flattened = self.flattened_features()?;
        let [c1, c2, c3] = self.channels;
        let conv = |channels: [usize; 2]| -> Conv2d<B> {
            Conv2dConfig::new(channels, [self.kernel_size, self.kernel_size])
                .with_padding(PaddingConfig2d::Valid)
                .init(device)
        };

        Ok(Classifier {
            conv1: conv([3, c1]),
            conv2: conv([c1, c2]),
            conv3: conv([c2, c3]),
            pool: MaxPool2dConfig::new([self.pool_size, self.pool_size])
                .with_strides([self.pool_size, self.pool_size])
                .init(),
            fc1: LinearConfig::new(flattened, self.hidden).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc2: LinearConfig::new(self.hidden, 1).init(device),
            relu: Relu::new(),
        })
    }
}

/// Three conv/pool stages followed by a dense head with a single sigmoid
/// output, the probability of class 1 (female).
#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    pool: MaxPool2d,
    fc1: Linear<B>,
    dropout: Dropout,
    fc2: Linear<B>,
    relu: Relu,
}

impl<B: Backend> Classifier<B> {
    /// `[batch, 3, height, width]` -> `[batch, 1]` pre-sigmoid scores.
    pub fn forward_logits(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(x);
        let x = self.max_pool(self.relu.forward(x));

        let x = self.conv2.forward(x);
        let x = self.max_pool(self.relu.forward(x));

        let x = self.conv3.forward(x);
        let x = self.max_pool(self.relu.forward(x));

        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.relu.forward(self.fc1.forward(x));
        let x = self.dropout.forward(x);

        self.fc2.forward(x)
    }

    /// Max-pools `x`, transposing maps that are taller than wide: the ndarray
    /// max-pool backward pass indexes out of bounds on those.
    fn max_pool(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = x.dims();
        if height > width {
            self.pool.forward(x.swap_dims(2, 3)).swap_dims(2, 3)
        } else {
            self.pool.forward(x)
        }
    }

    /// `[batch, 1]` probabilities in `(0, 1)`.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        sigmoid(self.forward_logits(x))
    }
}

/// Mean binary cross-entropy between probabilities and 0/1 targets.
pub fn binary_cross_entropy<B: Backend>(probs: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let probs = probs.clamp(EPSILON, 1.0 - EPSILON);
    let positive = targets.clone() * probs.clone().log();
    let negative = targets.neg().add_scalar(1.0) * probs.neg().add_scalar(1.0).log();
    (positive + negative).neg().mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        tensor::{Distribution, TensorData},
    };

    type TestBackend = NdArray;
    type TrainBackend = Autodiff<NdArray>;

    /// Forward, loss and backward on one batch; returns the loss.
    fn backward_step(height: usize, width: usize) -> f32 {
        let device = Default::default();
        let model = ClassifierConfig::new()
            .with_height(height)
            .with_width(width)
            .init::<TrainBackend>(&device)
            .unwrap();
        let input =
            Tensor::<TrainBackend, 4>::random([2, 3, height, width], Distribution::Uniform(0.0, 1.0), &device);
        let targets = Tensor::<TrainBackend, 2>::from_data(TensorData::new(vec![0.0f32, 1.0], [2, 1]), &device);

        let loss = binary_cross_entropy(model.forward(input), targets);
        let value = loss.clone().into_data().to_vec::<f32>().unwrap()[0];
        let grads = loss.backward();
        assert!(model.conv1.weight.val().grad(&grads).is_some());
        assert!(model.fc2.weight.val().grad(&grads).is_some());
        value
    }

    fn small_config() -> ClassifierConfig {
        ClassifierConfig::new().with_height(32).with_width(24)
    }

    #[test]
    fn forward_yields_one_probability_per_image() {
        let device = Default::default();
        let model = small_config().init::<TestBackend>(&device).unwrap();
        let input = Tensor::<TestBackend, 4>::random([3, 3, 32, 24], Distribution::Uniform(0.0, 1.0), &device);

        let output = model.forward(input);
        assert_eq!(output.dims(), [3, 1]);
        let values = output.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|p| *p > 0.0 && *p < 1.0));
    }

    #[test]
    fn standard_model_accepts_full_resolution_input() {
        let device = Default::default();
        let model = ClassifierConfig::new().init::<TestBackend>(&device).unwrap();
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 250, 200], &device);
        assert_eq!(model.forward(input).dims(), [1, 1]);
    }

    #[test]
    fn backward_pass_runs_on_portrait_and_landscape_inputs() {
        assert!(backward_step(32, 24).is_finite());
        assert!(backward_step(24, 32).is_finite());
        assert!(backward_step(30, 30).is_finite());
    }

    #[test]
    fn backward_pass_runs_at_full_resolution() {
        assert!(backward_step(250, 200).is_finite());
    }

    #[test]
    fn pooling_keeps_floor_dimensions_for_tall_maps() {
        let device = Default::default();
        let model = ClassifierConfig::new().init::<TestBackend>(&device).unwrap();
        let x = Tensor::<TestBackend, 4>::ones([1, 2, 7, 5], &device);
        assert_eq!(model.max_pool(x).dims(), [1, 2, 3, 2]);
    }

    #[test]
    fn too_small_input_is_rejected() {
        let device = Default::default();
        let config = ClassifierConfig::new().with_height(10).with_width(10);
        assert!(config.init::<TestBackend>(&device).is_err());
    }

    #[test]
    fn bce_matches_closed_form() {
        let device = Default::default();
        let probs = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![0.8f32, 0.4], [2, 1]), &device);
        let targets = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![1.0f32, 0.0], [2, 1]), &device);

        let loss = binary_cross_entropy(probs, targets).into_data().to_vec::<f32>().unwrap()[0];
        let expected = -((0.8f32).ln() + (0.6f32).ln()) / 2.0;
        assert!((loss - expected).abs() < 1e-5);
    }

    #[test]
    fn bce_stays_finite_on_saturated_probabilities() {
        let device = Default::default();
        let probs = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![0.0f32, 1.0], [2, 1]), &device);
        let targets = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![1.0f32, 0.0], [2, 1]), &device);

        let loss = binary_cross_entropy(probs, targets).into_data().to_vec::<f32>().unwrap()[0];
        assert!(loss.is_finite());
        assert!(loss > 10.0);
    }
}
