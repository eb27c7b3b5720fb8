use std::path::{Path, PathBuf};

use burn::tensor::{backend::Backend, Shape, Tensor, TensorData};
use image::{imageops::FilterType, DynamicImage, ImageError, ImageReader};
use log::{debug, info};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::{
    config::{ImageConfig, SplitConfig},
    error::{PipelineError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Male,
    Female,
}

impl Label {
    pub const ALL: [Label; 2] = [Label::Male, Label::Female];

    pub fn to_index(&self) -> usize {
        match self {
            Label::Male => 0,
            Label::Female => 1,
        }
    }

    pub fn from_prediction(probability: f32) -> Self {
        if probability > 0.5 {
            Label::Female
        } else {
            Label::Male
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Label::Male => "male",
            Label::Female => "female",
        }
    }
}

/// Derives a [`Label`] from a file name.
pub trait LabelStrategy {
    fn label(&self, file_name: &str) -> Label;
}

/// Labels a file `Male` iff its name contains `marker` anywhere.
///
/// A marker appearing incidentally in a name (an extension, a
/// photographer tag) still yields `Male`.
#[derive(Debug, Clone)]
pub struct SubstringLabeler {
    pub marker: String,
}

impl SubstringLabeler {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl Default for SubstringLabeler {
    fn default() -> Self {
        Self::new("m")
    }
}

impl LabelStrategy for SubstringLabeler {
    fn label(&self, file_name: &str) -> Label {
        if file_name.contains(self.marker.as_str()) {
            Label::Male
        } else {
            Label::Female
        }
    }
}

/// A resized, normalized RGB image in HWC layout with values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSample {
    pub data: Vec<f32>,
    pub height: usize,
    pub width: usize,
}

impl ImageSample {
    pub fn from_image(img: &DynamicImage, config: &ImageConfig) -> Self {
        let (width, height) = (config.width as u32, config.height as u32);
        let rgb_img = img
            .resize_exact(width, height, FilterType::Nearest)
            .to_rgb8();

        let data = rgb_img
            .pixels()
            .flat_map(|pixel| pixel.0)
            .map(|channel| channel as f32 / 255.0)
            .collect();

        Self {
            data,
            height: config.height,
            width: config.width,
        }
    }

    pub fn from_raw(data: Vec<f32>, height: usize, width: usize) -> Self {
        debug_assert_eq!(data.len(), height * width * ImageConfig::CHANNELS);
        Self {
            data,
            height,
            width,
        }
    }

    /// `[height, width, channels]`.
    pub fn shape(&self) -> [usize; 3] {
        [self.height, self.width, ImageConfig::CHANNELS]
    }

    pub fn value(&self, y: usize, x: usize, channel: usize) -> f32 {
        self.data[(y * self.width + x) * ImageConfig::CHANNELS + channel]
    }
}

/// Decodes an image, sniffing the container format from its content and
/// falling back to the file extension.
pub fn decode_image(path: &Path) -> Result<DynamicImage> {
    let reader = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|source| PipelineError::io(path, source))?;

    if reader.format().is_none() {
        return Err(PipelineError::UnsupportedFormat {
            path: path.to_path_buf(),
        });
    }

    reader.decode().map_err(|source| match source {
        ImageError::Unsupported(_) => PipelineError::UnsupportedFormat {
            path: path.to_path_buf(),
        },
        ImageError::IoError(source) => PipelineError::io(path, source),
        source => PipelineError::Decode {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Images and labels held in parallel: `labels[i]` belongs to `images[i]`.
#[derive(Debug, Clone, Default)]
pub struct FaceDataset {
    pub images: Vec<ImageSample>,
    pub labels: Vec<Label>,
    pub file_names: Vec<String>,
}

impl FaceDataset {
    /// Decodes every entry of `dir` in file-name order. Any unreadable or
    /// undecodable entry aborts the whole load.
    pub fn load(dir: &Path, config: &ImageConfig, labeler: &dyn LabelStrategy) -> Result<Self> {
        let mut paths = std::fs::read_dir(dir)
            .map_err(|source| PipelineError::io(dir, source))?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<std::io::Result<Vec<PathBuf>>>()
            .map_err(|source| PipelineError::io(dir, source))?;
        paths.sort();

        if paths.is_empty() {
            return Err(PipelineError::EmptyDataset {
                path: dir.to_path_buf(),
            });
        }

        info!("Loading {} images from {}", paths.len(), dir.display());
        let mut dataset = Self::default();
        for path in paths {
            let img = decode_image(&path)?;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let label = labeler.label(&file_name);
            debug!("{} -> {}", file_name, label.name());

            dataset.push(ImageSample::from_image(&img, config), label, file_name);
        }

        let (male, female) = dataset.class_counts();
        info!("Loaded {} images ({} male, {} female)", dataset.len(), male, female);
        Ok(dataset)
    }

    pub fn push(&mut self, image: ImageSample, label: Label, file_name: String) {
        self.images.push(image);
        self.labels.push(label);
        self.file_names.push(file_name);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// `(male, female)` sample counts.
    pub fn class_counts(&self) -> (usize, usize) {
        let male = self.labels.iter().filter(|l| **l == Label::Male).count();
        (male, self.len() - male)
    }

    /// Moves the samples into train/validation/test subsets. Within each
    /// subset samples follow the permutation order of [`split_indices`].
    pub fn split(self, config: &SplitConfig) -> DatasetSplit {
        let indices = split_indices(self.len(), config);

        let mut slots: Vec<Option<(ImageSample, Label, String)>> = self
            .images
            .into_iter()
            .zip(self.labels)
            .zip(self.file_names)
            .map(|((image, label), name)| Some((image, label, name)))
            .collect();

        let mut take = |subset: &[usize]| {
            let mut out = FaceDataset::default();
            for (image, label, name) in subset.iter().filter_map(|&idx| slots[idx].take()) {
                out.push(image, label, name);
            }
            out
        };

        DatasetSplit {
            train: take(&indices.train),
            validation: take(&indices.validation),
            test: take(&indices.test),
            indices,
        }
    }
}

/// Positions into the original load order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    pub test: Vec<usize>,
}

pub struct DatasetSplit {
    pub train: FaceDataset,
    pub validation: FaceDataset,
    pub test: FaceDataset,
    pub indices: SplitIndices,
}

/// Two sequential seeded partitions: first `test_fraction` of all `n`
/// indices, then the validation share out of what remains.
pub fn split_indices(n: usize, config: &SplitConfig) -> SplitIndices {
    let n_test = ((config.test_fraction * n as f64).round() as usize).min(n);
    let n_validation = ((config.validation_fraction * (1.0 - config.test_fraction) * n as f64)
        .round() as usize)
        .min(n - n_test);

    let mut permutation: Vec<usize> = (0..n).collect();
    permutation.shuffle(&mut StdRng::seed_from_u64(config.test_seed));
    let test = permutation[..n_test].to_vec();
    let remaining = &permutation[n_test..];

    let mut order: Vec<usize> = (0..remaining.len()).collect();
    order.shuffle(&mut StdRng::seed_from_u64(config.validation_seed));
    let validation = order[..n_validation].iter().map(|&i| remaining[i]).collect();
    let train = order[n_validation..].iter().map(|&i| remaining[i]).collect();

    SplitIndices {
        train,
        validation,
        test,
    }
}

#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// `[batch, 3, height, width]`.
    pub images: Tensor<B, 4>,
    /// `[batch, 1]`, 0.0 for male and 1.0 for female.
    pub targets: Tensor<B, 2>,
}

pub struct ImageBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    pub fn batch<'a, I>(&self, items: I) -> ImageBatch<B>
    where
        I: IntoIterator<Item = (&'a ImageSample, Label)>,
    {
        let mut image_buffer = Vec::new();
        let mut label_buffer = Vec::new();
        let mut dims = (0, 0);

        for (image, label) in items {
            dims = (image.height, image.width);
            image_buffer.extend_from_slice(&image.data);
            label_buffer.push(label.to_index() as f32);
        }

        let batch_size = label_buffer.len();
        let (height, width) = dims;

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(
                image_buffer,
                Shape::new([batch_size, height, width, ImageConfig::CHANNELS]),
            ),
            &self.device,
        )
        .permute([0, 3, 1, 2]);

        let targets = Tensor::<B, 2>::from_data(
            TensorData::new(label_buffer, Shape::new([batch_size, 1])),
            &self.device,
        );

        ImageBatch { images, targets }
    }
}
