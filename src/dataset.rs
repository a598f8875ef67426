use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use log::{debug, info};
use ndarray::{ArrayD, Axis, Slice};
use walkdir::WalkDir;

use crate::config::EvaluationConfig;
use crate::error::{Error, Result};
use crate::preprocessing;

/// A batch of samples and their class indices.
/// Axis 0 of `samples` is the batch axis and has the same length as `labels`.
#[derive(Debug, Clone)]
pub struct Batch
{
    pub samples: ArrayD<f32>,
    pub labels: Vec<usize>,
}

/// A finite, restartable sequence of labeled batches.
pub trait DataSource
{
    /// Ordered class names. Label `i` refers to `classes()[i]`.
    fn classes(&self) -> &[String];

    fn num_batches(&self) -> usize;

    /// Iterates the batches from the start. Each call begins a fresh pass.
    fn batches(&self) -> Box<dyn Iterator<Item = Result<Batch>> + '_>;
}

/// Samples already held in memory, served in fixed-size batches.
pub struct InMemoryDataset
{
    samples: ArrayD<f32>,
    labels: Vec<usize>,
    classes: Vec<String>,
    batch_size: usize,
}

impl InMemoryDataset
{
    pub fn new(samples: ArrayD<f32>, labels: Vec<usize>, classes: Vec<String>, batch_size: usize) -> Result<Self>
    {
        let num_samples = if samples.ndim() == 0 { 0 } else { samples.len_of(Axis(0)) };
        if num_samples != labels.len() {
            return Err(Error::BatchSizeMismatch { embeddings: num_samples, labels: labels.len() });
        }

        Ok(InMemoryDataset {
            samples,
            labels,
            classes,
            batch_size: batch_size.max(1),
        })
    }

    pub fn labels(&self) -> &[usize]
    {
        &self.labels
    }
}

impl DataSource for InMemoryDataset
{
    fn classes(&self) -> &[String]
    {
        &self.classes
    }

    fn num_batches(&self) -> usize
    {
        self.labels.len().div_ceil(self.batch_size)
    }

    fn batches(&self) -> Box<dyn Iterator<Item = Result<Batch>> + '_>
    {
        let num_samples = self.labels.len();
        Box::new((0..num_samples).step_by(self.batch_size).map(move |start| {
            let end = (start + self.batch_size).min(num_samples);
            Ok(Batch {
                samples: self.samples.slice_axis(Axis(0), Slice::from(start..end)).to_owned(),
                labels: self.labels[start..end].to_vec(),
            })
        }))
    }
}

/// Images laid out as `root/<class name>/<image files>`.
///
/// Class names are the sorted names of the root's subdirectories, and images are
/// found recursively inside each of them. Files whose extension is not a known
/// image format are skipped.
pub struct ImageFolder
{
    classes: Vec<String>,
    files: Vec<(PathBuf, usize)>,
    batch_size: usize,
    image_size: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl ImageFolder
{
    pub fn open(root: &Path, config: &EvaluationConfig) -> Result<Self>
    {
        if !root.is_dir() {
            return Err(Error::NotADirectory(root.to_path_buf()));
        }

        let mut classes: Vec<String> = std::fs::read_dir(root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        classes.sort();

        let mut files = Vec::new();
        for (label, class) in classes.iter().enumerate()
        {
            let mut class_files: Vec<PathBuf> = WalkDir::new(root.join(class))
                .follow_links(true)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| is_image_file(path))
                .collect();
            class_files.sort();
            debug!("Found {} images for class {:?}", class_files.len(), class);
            files.extend(class_files.into_iter().map(|path| (path, label)));
        }

        if files.is_empty() {
            return Err(Error::EmptyDataset(root.to_path_buf()));
        }
        info!("Loaded image folder {:?}: {} images in {} classes", root, files.len(), classes.len());

        Ok(ImageFolder {
            classes,
            files,
            batch_size: config.batch_size.max(1),
            image_size: config.image_size,
            mean: config.mean,
            std: config.std,
        })
    }

    pub fn len(&self) -> usize
    {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.files.is_empty()
    }

    fn load_batch(&self, chunk: &[(PathBuf, usize)]) -> Result<Batch>
    {
        let paths: Vec<PathBuf> = chunk.iter().map(|(path, _)| path.clone()).collect();
        let images = preprocessing::load_image_batch(&paths)
            .into_iter()
            .collect::<Result<Vec<DynamicImage>>>()?;
        let images = preprocessing::resize_images(images, self.image_size);
        let samples = preprocessing::images_to_input(&images, self.image_size, self.mean, self.std);

        Ok(Batch {
            samples: samples.into_dyn(),
            labels: chunk.iter().map(|(_, label)| *label).collect(),
        })
    }
}

impl DataSource for ImageFolder
{
    fn classes(&self) -> &[String]
    {
        &self.classes
    }

    fn num_batches(&self) -> usize
    {
        self.files.len().div_ceil(self.batch_size)
    }

    fn batches(&self) -> Box<dyn Iterator<Item = Result<Batch>> + '_>
    {
        Box::new(self.files.chunks(self.batch_size).map(|chunk| self.load_batch(chunk)))
    }
}

fn is_image_file(path: &Path) -> bool
{
    ImageFormat::from_path(path)
        .map(|format| format.reading_enabled())
        .unwrap_or(false)
}
