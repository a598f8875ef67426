use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use log::info;

use crate::config::EvaluationConfig;
use crate::dataset::DataSource;
use crate::error::Result;
use crate::features::extract_features;
use crate::model::Encoder;
use crate::plot::tsne_graph;
use crate::tracking::{TrackedImage, TrackingSink};

pub const TEACHER_NAME: &str = "teacher";
pub const STUDENT_NAME: &str = "student";
pub const TEACHER_TSNE_KEY: &str = "teacher_tsne";
pub const STUDENT_TSNE_KEY: &str = "student_tsne";

/// Paths of the two plots written by one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsnePaths
{
    pub teacher: PathBuf,
    pub student: PathBuf,
}

/// Plots the teacher's and the student's embeddings of a dataset side by side, once per epoch.
pub struct Evaluation
{
    config: EvaluationConfig,
}

impl Evaluation
{
    pub fn new(config: EvaluationConfig) -> Self
    {
        Evaluation { config }
    }

    pub fn config(&self) -> &EvaluationConfig
    {
        &self.config
    }

    /// Extracts features with both models, writes one t-SNE plot per model under `output_dir`,
    /// and, if the config's `publish` flag is set, hands both plots to `sink` under the keys
    /// "teacher_tsne" and "student_tsne". The sink is not touched otherwise.
    ///
    /// Both models are switched to evaluation mode. Any failure aborts the whole evaluation;
    /// nothing is published unless both plots were written.
    pub fn run<T, S, D, K>(
        &self,
        teacher: &mut T,
        student: &mut S,
        data: &D,
        output_dir: &Path,
        epoch: impl Display,
        sink: &mut K,
    ) -> Result<TsnePaths>
    where
        T: Encoder + ?Sized,
        S: Encoder + ?Sized,
        D: DataSource + ?Sized,
        K: TrackingSink + ?Sized,
    {
        let classes = data.classes();
        info!("Evaluating epoch {} on {} batches over {} classes", epoch, data.num_batches(), classes.len());

        let features = extract_features(teacher, student, data, classes, self.config.student_features)?;

        let teacher_tsne_path = tsne_graph(&features.teacher, output_dir, &epoch, TEACHER_NAME, classes, &self.config.tsne, &self.config.plot)?;
        let student_tsne_path = tsne_graph(&features.student, output_dir, &epoch, STUDENT_NAME, classes, &self.config.tsne, &self.config.plot)?;

        if self.config.publish {
            let mut images = BTreeMap::new();
            images.insert(
                TEACHER_TSNE_KEY.to_string(),
                TrackedImage::new(&teacher_tsne_path).with_caption(format!("{}, Epoch: {}", TEACHER_NAME, epoch)),
            );
            images.insert(
                STUDENT_TSNE_KEY.to_string(),
                TrackedImage::new(&student_tsne_path).with_caption(format!("{}, Epoch: {}", STUDENT_NAME, epoch)),
            );
            sink.log(&images)?;
            info!("Published t-SNE plots for epoch {}", epoch);
        }

        Ok(TsnePaths {
            teacher: teacher_tsne_path,
            student: student_tsne_path,
        })
    }
}
