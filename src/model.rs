use ndarray::{ArrayD, ArrayViewD, Axis};

use crate::error::{Error, Result};

/// Smallest denominator used when normalizing, so zero vectors stay zero instead of becoming NaN.
pub const NORMALIZE_EPS: f32 = 1e-12;

/// A model that maps a batch of samples to a batch of embeddings.
///
/// Axis 0 of both the input and the output is the batch axis. The output may have any
/// number of trailing axes; each sample's embedding is flattened when it is recorded.
///
/// Implementations are expected to return host-resident arrays, so any copy off an
/// accelerator happens inside `forward()`.
pub trait Encoder
{
    /// Switches the model to inference behaviour (no dropout, frozen batch statistics).
    fn eval(&mut self);

    fn forward(&mut self, samples: ArrayViewD<'_, f32>) -> anyhow::Result<ArrayD<f32>>;
}

/// Returns a copy of `feature_vectors` L2 normalized along axis 1.
///
/// For the usual (batch_size, feature_length) output this makes every row unit length.
/// Higher rank outputs are normalized along axis 1 for each position of the remaining axes,
/// which is what torch's functional normalize does with its default arguments.
pub fn normalize(feature_vectors: &ArrayD<f32>) -> Result<ArrayD<f32>>
{
    let mut output = feature_vectors.clone();
    normalize_feature_vectors(&mut output)?;
    Ok(output)
}

pub fn normalize_feature_vectors(feature_vectors: &mut ArrayD<f32>) -> Result<()>
{
    if feature_vectors.ndim() < 2 {
        return Err(Error::EmbeddingRank(feature_vectors.ndim()));
    }

    feature_vectors.lanes_mut(Axis(1)).into_iter().for_each(|mut lane| {
        let norm = lane.dot(&lane).sqrt();
        lane /= norm.max(NORMALIZE_EPS);
    });

    Ok(())
}
