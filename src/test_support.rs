// Deterministic encoders, datasets and sinks shared by the unit tests.

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayD, ArrayViewD, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::config::{EvaluationConfig, TsneConfig};
use crate::dataset::InMemoryDataset;
use crate::model::Encoder;
use crate::tracking::{TrackedImage, TrackingSink};

pub fn class_names(num_classes: usize) -> Vec<String>
{
    (0..num_classes).map(|i| format!("class_{}", i)).collect()
}

/// `num_samples` samples of length `input_dim`, with labels cycling through the classes.
/// Each class is a noisy blob around its own center.
pub fn synthetic_dataset(num_classes: usize, num_samples: usize, input_dim: usize, batch_size: usize) -> InMemoryDataset
{
    let mut rng = StdRng::seed_from_u64(99);
    let labels: Vec<usize> = (0..num_samples).map(|i| i % num_classes).collect();
    let samples = Array2::from_shape_fn((num_samples, input_dim), |(i, d)| {
        let center = if d % num_classes == labels[i] { 5.0 } else { 0.0 };
        center + rng.gen::<f32>()
    });

    InMemoryDataset::new(samples.into_dyn(), labels, class_names(num_classes), batch_size).unwrap()
}

pub fn fast_tsne_config() -> TsneConfig
{
    TsneConfig {
        perplexity: 5.0,
        max_iter: 300,
        ..TsneConfig::default()
    }
}

pub fn fast_config(publish: bool) -> EvaluationConfig
{
    EvaluationConfig {
        publish,
        tsne: fast_tsne_config(),
        ..EvaluationConfig::default()
    }
}

/// Flattens each sample and multiplies it by a fixed random matrix.
pub struct LinearEncoder
{
    weights: Array2<f32>,
    fail: bool,
    pub in_eval_mode: bool,
    pub forward_calls: usize,
}

impl LinearEncoder
{
    pub fn new(input_dim: usize, output_dim: usize, seed: u64) -> Self
    {
        let mut rng = StdRng::seed_from_u64(seed);
        LinearEncoder {
            weights: Array2::from_shape_fn((input_dim, output_dim), |_| rng.gen::<f32>() - 0.5),
            fail: false,
            in_eval_mode: false,
            forward_calls: 0,
        }
    }

    pub fn failing(mut self) -> Self
    {
        self.fail = true;
        self
    }
}

impl Encoder for LinearEncoder
{
    fn eval(&mut self)
    {
        self.in_eval_mode = true;
    }

    fn forward(&mut self, samples: ArrayViewD<'_, f32>) -> anyhow::Result<ArrayD<f32>>
    {
        self.forward_calls += 1;
        if self.fail {
            anyhow::bail!("encoder failure");
        }

        let batch_size = samples.len_of(Axis(0));
        let flat = samples.to_shape((batch_size, self.weights.nrows()))?;
        Ok(flat.dot(&self.weights).into_dyn())
    }
}

#[derive(Default)]
pub struct CountingSink
{
    pub calls: usize,
    pub last: BTreeMap<String, TrackedImage>,
}

impl TrackingSink for CountingSink
{
    fn log(&mut self, images: &BTreeMap<String, TrackedImage>) -> anyhow::Result<()>
    {
        self.calls += 1;
        self.last = images.clone();
        Ok(())
    }
}

pub struct FailingSink;

impl TrackingSink for FailingSink
{
    fn log(&mut self, _images: &BTreeMap<String, TrackedImage>) -> anyhow::Result<()>
    {
        anyhow::bail!("tracker unavailable")
    }
}
