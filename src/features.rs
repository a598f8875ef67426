/// Runs the teacher and student encoders over a data source and collects
/// one labeled feature vector per sample for each of them.

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};

use crate::dataset::DataSource;
use crate::error::{Error, Result};
use crate::model::{normalize, Encoder};

/// A single sample's embedding, tagged with its class name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledFeature
{
    pub label: String,
    /// The sample's embedding, flattened to one dimension.
    pub feature: Vec<f32>,
}

/// Both record sets of one evaluation, index aligned with the data source's iteration order.
#[derive(Debug, Clone, Default)]
pub struct ExtractedFeatures
{
    pub teacher: Vec<LabeledFeature>,
    pub student: Vec<LabeledFeature>,
}

/// Where the "student" features come from.
///
/// `TeacherTwiceNormalized` runs the student model but throws its output away, recording the
/// teacher's output normalized twice in its place. This is very likely a copy-paste slip, but
/// every plot made so far was made this way, so it stays the default until the intended
/// behaviour is confirmed. `StudentNormalized` records the student model's own normalized output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentFeatureSource
{
    #[default]
    TeacherTwiceNormalized,
    StudentNormalized,
}

/// Extracts teacher and student features for every sample in `data`.
///
/// Both encoders are switched to evaluation mode first. The teacher features are recorded as the
/// model returns them; the student features are normalized, and where they come from depends on
/// `student_features`.
///
/// Fails with `Error::LabelOutOfRange` if the data source yields a label with no entry in `classes`.
pub fn extract_features<T, S, D>(
    teacher: &mut T,
    student: &mut S,
    data: &D,
    classes: &[String],
    student_features: StudentFeatureSource,
) -> Result<ExtractedFeatures>
where
    T: Encoder + ?Sized,
    S: Encoder + ?Sized,
    D: DataSource + ?Sized,
{
    teacher.eval();
    student.eval();

    if student_features == StudentFeatureSource::TeacherTwiceNormalized {
        warn!("Student features are the teacher's output normalized twice; the student model's output is discarded. \
               Set student_features to \"student_normalized\" to plot the student model's own embeddings.");
    }

    let progress = ProgressBar::new(data.num_batches() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let mut results = ExtractedFeatures::default();

    for batch in data.batches()
    {
        let batch = batch?;

        let feats_teacher = teacher.forward(batch.samples.view())?;
        let feats_student = student.forward(batch.samples.view())?;

        let feats_student = match student_features {
            StudentFeatureSource::TeacherTwiceNormalized => {
                let feats_student = normalize(&feats_teacher)?;
                normalize(&feats_student)?
            },
            StudentFeatureSource::StudentNormalized => normalize(&feats_student)?,
        };

        let teacher_rows = rows_for_labels(&feats_teacher, batch.labels.len())?;
        let student_rows = rows_for_labels(&feats_student, batch.labels.len())?;

        for ((label, feat_t), feat_s) in batch.labels.iter().zip(teacher_rows).zip(student_rows)
        {
            let label = class_name(classes, *label)?;

            results.teacher.push(LabeledFeature {
                label: label.clone(),
                feature: feat_t,
            });

            results.student.push(LabeledFeature {
                label,
                feature: feat_s,
            });
        }

        progress.inc(1);
    }

    progress.finish_and_clear();
    debug!("Extracted {} teacher and {} student features", results.teacher.len(), results.student.len());

    Ok(results)
}

fn class_name(classes: &[String], label: usize) -> Result<String>
{
    classes
        .get(label)
        .cloned()
        .ok_or(Error::LabelOutOfRange { label, num_classes: classes.len() })
}

// Splits an embedding batch into one flattened vector per sample.
fn rows_for_labels(embeddings: &ArrayD<f32>, num_labels: usize) -> Result<Vec<Vec<f32>>>
{
    if embeddings.ndim() < 2 {
        return Err(Error::EmbeddingRank(embeddings.ndim()));
    }
    let num_embeddings = embeddings.len_of(Axis(0));
    if num_embeddings != num_labels {
        return Err(Error::BatchSizeMismatch { embeddings: num_embeddings, labels: num_labels });
    }

    Ok(embeddings
        .axis_iter(Axis(0))
        .map(|row| row.iter().copied().collect())
        .collect())
}
