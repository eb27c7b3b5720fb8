//! Experiment configuration.
//!
//! Every knob of the experiment lives here as an immutable value passed by
//! reference into the loader, splitter, augmentation, model and trainer.
//! [`ExperimentConfig::standard`] reproduces the fixed experiment; tests build
//! smaller variants through the generated `with_*` setters.

use burn::{config::Config, optim::AdamConfig};

use crate::error::PipelineError;

#[derive(Config, Debug)]
pub struct ImageConfig {
    #[config(default = 250)]
    pub height: usize,
    #[config(default = 200)]
    pub width: usize,
}

impl ImageConfig {
    pub const CHANNELS: usize = 3;

    /// Number of `f32` values in one HWC image.
    pub fn sample_len(&self) -> usize {
        self.height * self.width * Self::CHANNELS
    }
}

#[derive(Config, Debug)]
pub struct SplitConfig {
    /// Fraction of the full set carved off as test data.
    #[config(default = 0.2)]
    pub test_fraction: f64,
    /// Fraction of the remainder carved off as validation data.
    #[config(default = 0.375)]
    pub validation_fraction: f64,
    #[config(default = 23)]
    pub test_seed: u64,
    #[config(default = 23)]
    pub validation_seed: u64,
}

#[derive(Config, Debug)]
pub struct AugmentConfig {
    /// Maximum absolute rotation, in degrees.
    #[config(default = 10.0)]
    pub rotation_degrees: f32,
    /// Zoom factors are drawn from `[1 - zoom_range, 1 + zoom_range]`.
    #[config(default = 0.1)]
    pub zoom_range: f32,
    #[config(default = 0.5)]
    pub flip_probability: f64,
    /// Seeds batch order and transforms; `None` draws from the OS.
    pub seed: Option<u64>,
}

#[derive(Config, Debug)]
pub struct ClassifierConfig {
    #[config(default = 250)]
    pub height: usize,
    #[config(default = 200)]
    pub width: usize,
    #[config(default = "[32, 64, 128]")]
    pub channels: [usize; 3],
    #[config(default = 3)]
    pub kernel_size: usize,
    #[config(default = 2)]
    pub pool_size: usize,
    #[config(default = 128)]
    pub hidden: usize,
    #[config(default = 0.5)]
    pub dropout: f64,
}

impl ClassifierConfig {
    /// Spatial size of the last feature map, `None` when the input is too
    /// small to survive the three conv/pool stages.
    pub fn feature_map_dims(&self) -> Option<[usize; 2]> {
        let stage = |dim: usize| -> Option<usize> {
            let conv = dim.checked_sub(self.kernel_size.saturating_sub(1))?;
            let pooled = conv.checked_div(self.pool_size)?;
            (pooled > 0).then_some(pooled)
        };
        let mut dims = [self.height, self.width];
        for _ in 0..self.channels.len() {
            dims = [stage(dims[0])?, stage(dims[1])?];
        }
        Some(dims)
    }

    /// Length of the flattened feature vector fed to the dense head.
    pub fn flattened_features(&self) -> crate::error::Result<usize> {
        let [h, w] = self.feature_map_dims().ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "input {}x{} is too small for {} conv/pool stages",
                self.height,
                self.width,
                self.channels.len()
            ))
        })?;
        Ok(self.channels[2] * h * w)
    }
}

#[derive(Config)]
pub struct TrainingConfig {
    pub optimizer: AdamConfig,
    #[config(default = 20)]
    pub num_epochs: usize,
    #[config(default = 64)]
    pub batch_size: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
}

#[derive(Config)]
pub struct ExperimentConfig {
    pub image: ImageConfig,
    pub split: SplitConfig,
    pub augment: AugmentConfig,
    pub model: ClassifierConfig,
    pub training: TrainingConfig,
}

impl ExperimentConfig {
    /// The fixed experiment: 250x200 RGB inputs, 50/30/20 split, 20 epochs of
    /// Adam at batch size 64.
    pub fn standard() -> Self {
        Self::new(
            ImageConfig::new(),
            SplitConfig::new(),
            AugmentConfig::new(),
            ClassifierConfig::new(),
            TrainingConfig::new(AdamConfig::new().with_epsilon(1e-7)),
        )
    }

    /// Same experiment on a different input resolution; the model follows
    /// the image size.
    pub fn with_image_size(self, height: usize, width: usize) -> Self {
        let image = ImageConfig::new().with_height(height).with_width(width);
        let model = self.model.with_height(height).with_width(width);
        Self {
            image,
            model,
            ..self
        }
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));

        for (name, fraction) in [
            ("test_fraction", self.split.test_fraction),
            ("validation_fraction", self.split.validation_fraction),
        ] {
            if !(fraction > 0.0 && fraction < 1.0) {
                return invalid(format!("{name} must lie in (0, 1), got {fraction}"));
            }
        }
        if self.training.batch_size == 0 {
            return invalid("batch_size must be at least 1".into());
        }
        if self.training.num_epochs == 0 {
            return invalid("num_epochs must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.augment.flip_probability) {
            return invalid(format!(
                "flip_probability must lie in [0, 1], got {}",
                self.augment.flip_probability
            ));
        }
        if !(0.0..1.0).contains(&self.augment.zoom_range) || self.augment.rotation_degrees < 0.0 {
            return invalid("augmentation ranges must be non-negative, zoom below 1".into());
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return invalid(format!("dropout must lie in [0, 1), got {}", self.model.dropout));
        }
        if self.model.kernel_size == 0 || self.model.pool_size == 0 {
            return invalid("kernel and pool sizes must be at least 1".into());
        }
        if (self.model.height, self.model.width) != (self.image.height, self.image.width) {
            return invalid(format!(
                "model expects {}x{} inputs but images are {}x{}",
                self.model.height, self.model.width, self.image.height, self.image.width
            ));
        }
        self.model.flattened_features()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_experiment_is_valid() {
        let config = ExperimentConfig::standard();
        config.validate().unwrap();
        assert_eq!(config.training.num_epochs, 20);
        assert_eq!(config.training.batch_size, 64);
        assert_eq!(config.image.sample_len(), 250 * 200 * 3);
    }

    #[test]
    fn standard_feature_map_matches_valid_convolutions() {
        let config = ClassifierConfig::new();
        // 250 -> 248 -> 124 -> 122 -> 61 -> 59 -> 29
        // 200 -> 198 ->  99 ->  97 -> 48 -> 46 -> 23
        assert_eq!(config.feature_map_dims(), Some([29, 23]));
        assert_eq!(config.flattened_features().unwrap(), 128 * 29 * 23);
    }

    #[test]
    fn tiny_inputs_are_rejected() {
        let config = ExperimentConfig::standard().with_image_size(16, 16);
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn mismatched_model_and_image_sizes_are_rejected() {
        let mut config = ExperimentConfig::standard();
        config.image = ImageConfig::new().with_height(32).with_width(24);
        assert!(config.validate().is_err());
    }

    #[test]
    fn fractions_outside_unit_interval_are_rejected() {
        let mut config = ExperimentConfig::standard();
        config.split = SplitConfig::new().with_test_fraction(1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn experiment_round_trips_through_json() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.json");
        let mut config = ExperimentConfig::standard().with_image_size(64, 48);
        config.augment.seed = Some(42);
        config.save(&path).unwrap();

        let loaded = ExperimentConfig::load(&path).unwrap();
        assert_eq!((loaded.image.height, loaded.image.width), (64, 48));
        assert_eq!((loaded.model.height, loaded.model.width), (64, 48));
        assert_eq!(loaded.augment.seed, Some(42));
        assert_eq!(loaded.split.test_seed, 23);
        assert_eq!(loaded.training.batch_size, 64);
        loaded.validate().unwrap();
    }
}
