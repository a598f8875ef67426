/// Configuration for an evaluation run.
/// Every field has a default, so a config file only needs to name what it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::features::StudentFeatureSource;

// ImageNet statistics, which most pretrained vision backbones expect.
pub const DEFAULT_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const DEFAULT_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig
{
    pub batch_size: usize,
    /// Images are resized to a square of this side length before encoding.
    pub image_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub student_features: StudentFeatureSource,
    /// Send both plots to the tracking sink after they are written.
    pub publish: bool,
    pub tsne: TsneConfig,
    pub plot: PlotConfig,
}

impl Default for EvaluationConfig
{
    fn default() -> Self
    {
        EvaluationConfig {
            batch_size: 32,
            image_size: 224,
            mean: DEFAULT_MEAN,
            std: DEFAULT_STD,
            student_features: StudentFeatureSource::default(),
            publish: false,
            tsne: TsneConfig::default(),
            plot: PlotConfig::default(),
        }
    }
}

impl EvaluationConfig
{
    pub fn from_json_file(path: &Path) -> Result<Self>
    {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Parameters of the t-SNE projection.
/// Defaults follow the values scikit-learn uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TsneConfig
{
    pub perplexity: f64,
    pub early_exaggeration: f64,
    /// `None` picks the learning rate from the number of points,
    /// max(N / early_exaggeration / 4, 50).
    pub learning_rate: Option<f64>,
    pub max_iter: usize,
    /// Number of iterations run with early exaggeration and low momentum.
    pub exaggeration_iter: usize,
    pub min_grad_norm: f64,
    pub seed: u64,
}

impl Default for TsneConfig
{
    fn default() -> Self
    {
        TsneConfig {
            perplexity: 30.0,
            early_exaggeration: 12.0,
            learning_rate: None,
            max_iter: 1000,
            exaggeration_iter: 250,
            min_grad_norm: 1e-7,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig
{
    pub width: u32,
    pub height: u32,
    /// Both axes span [-axis_limit, axis_limit] so plots from different epochs share a scale.
    pub axis_limit: f64,
    pub point_size: u32,
}

impl Default for PlotConfig
{
    fn default() -> Self
    {
        // 15 x 15 inches at 80 dpi.
        PlotConfig {
            width: 1200,
            height: 1200,
            axis_limit: 80.0,
            point_size: 4,
        }
    }
}
