//! On-the-fly training augmentation.
//!
//! Stored training images are never modified: every batch is built from
//! freshly transformed copies.

use log::debug;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, RngCore, SeedableRng};

use crate::{
    config::{AugmentConfig, ImageConfig},
    data::{FaceDataset, ImageSample, Label},
};

/// Restartable source of augmented training batches.
pub struct AugmentedBatches<'a> {
    dataset: &'a FaceDataset,
    config: &'a AugmentConfig,
    batch_size: usize,
    rng: StdRng,
}

impl<'a> AugmentedBatches<'a> {
    /// `first_epoch` is 1-based; a run resumed at epoch `k` draws a stream
    /// distinct from the one a fresh run starts with.
    pub fn new(dataset: &'a FaceDataset, config: &'a AugmentConfig, batch_size: usize, first_epoch: usize) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(epoch_seed(seed, first_epoch)),
            None => StdRng::from_os_rng(),
        };
        Self {
            dataset,
            config,
            batch_size: batch_size.max(1),
            rng,
        }
    }

    pub fn batches_per_epoch(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Starts a new epoch with a fresh sample order.
    pub fn epoch(&mut self) -> EpochBatches<'_, 'a> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        order.shuffle(&mut self.rng);
        debug!("Epoch order starts with {:?}", order.iter().take(8).collect::<Vec<_>>());
        EpochBatches {
            source: self,
            order,
            cursor: 0,
        }
    }
}

pub struct EpochBatches<'e, 'a> {
    source: &'e mut AugmentedBatches<'a>,
    order: Vec<usize>,
    cursor: usize,
}

impl Iterator for EpochBatches<'_, '_> {
    type Item = Vec<(ImageSample, Label)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.source.batch_size).min(self.order.len());
        let source = &mut *self.source;
        let batch = self.order[self.cursor..end]
            .iter()
            .map(|&idx| {
                let image = augment(&source.dataset.images[idx], source.config, &mut source.rng);
                (image, source.dataset.labels[idx])
            })
            .collect();
        self.cursor = end;
        Some(batch)
    }
}

fn epoch_seed(seed: u64, first_epoch: usize) -> u64 {
    let skipped = first_epoch.saturating_sub(1) as u64;
    seed ^ skipped.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// One randomly drawn augmentation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Rotation in radians.
    pub theta: f32,
    pub zoom_y: f32,
    pub zoom_x: f32,
    pub flip: bool,
}

impl Transform {
    /// Rotation uniform in `±rotation_degrees`, independent y/x zoom factors
    /// uniform in `[1 - zoom_range, 1 + zoom_range]`, flip with
    /// `flip_probability`.
    pub fn sample(config: &AugmentConfig, rng: &mut dyn RngCore) -> Self {
        let max_theta = config.rotation_degrees.to_radians();
        let zoom = 1.0 - config.zoom_range..=1.0 + config.zoom_range;
        Self {
            theta: rng.random_range(-max_theta..=max_theta),
            zoom_y: rng.random_range(zoom.clone()),
            zoom_x: rng.random_range(zoom),
            flip: rng.random_bool(config.flip_probability),
        }
    }

    pub fn apply(&self, sample: &ImageSample) -> ImageSample {
        let mut out = affine_resample(sample, self.theta, self.zoom_y, self.zoom_x);
        if self.flip {
            flip_horizontal(&mut out);
        }
        out
    }
}

/// Random rotation and zoom, then a random horizontal flip.
pub fn augment(sample: &ImageSample, config: &AugmentConfig, rng: &mut dyn RngCore) -> ImageSample {
    Transform::sample(config, rng).apply(sample)
}

/// Resamples `sample` around its centre. Each output pixel reads the input
/// at `R(theta) * diag(zoom_y, zoom_x) * (p - c) + c` with bilinear
/// interpolation; coordinates past the border take the nearest edge pixel.
pub fn affine_resample(sample: &ImageSample, theta: f32, zoom_y: f32, zoom_x: f32) -> ImageSample {
    let (h, w) = (sample.height, sample.width);
    let channels = ImageConfig::CHANNELS;
    let cy = (h as f32 - 1.0) / 2.0;
    let cx = (w as f32 - 1.0) / 2.0;
    let (sin, cos) = theta.sin_cos();

    let mut data = Vec::with_capacity(sample.data.len());
    for y in 0..h {
        for x in 0..w {
            let dy = (y as f32 - cy) * zoom_y;
            let dx = (x as f32 - cx) * zoom_x;
            let src_y = (cos * dy - sin * dx + cy).clamp(0.0, (h - 1) as f32);
            let src_x = (sin * dy + cos * dx + cx).clamp(0.0, (w - 1) as f32);

            let (y0, x0) = (src_y.floor() as usize, src_x.floor() as usize);
            let (y1, x1) = ((y0 + 1).min(h - 1), (x0 + 1).min(w - 1));
            let (fy, fx) = (src_y - y0 as f32, src_x - x0 as f32);

            for c in 0..channels {
                let top = sample.value(y0, x0, c) * (1.0 - fx) + sample.value(y0, x1, c) * fx;
                let bottom = sample.value(y1, x0, c) * (1.0 - fx) + sample.value(y1, x1, c) * fx;
                data.push(top * (1.0 - fy) + bottom * fy);
            }
        }
    }
    ImageSample::from_raw(data, h, w)
}

pub fn flip_horizontal(sample: &mut ImageSample) {
    let channels = ImageConfig::CHANNELS;
    let row_len = sample.width * channels;
    for row in sample.data.chunks_exact_mut(row_len) {
        for x in 0..sample.width / 2 {
            let mirror = sample.width - 1 - x;
            for c in 0..channels {
                row.swap(x * channels + c, mirror * channels + c);
            }
        }
    }
}
