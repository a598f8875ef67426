use std::path::Path;

use log::info;
use ndarray::{ArrayD, ArrayViewD};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;

use crate::model::Encoder;

pub const DEFAULT_INTRA_THREADS: usize = 4;

/// An encoder backed by an ONNX graph, run with the ONNX runtime.
///
/// The graph takes one input, the sample batch, and the embedding is read from its first output
/// unless another output is named with `with_output()`.
///
/// Graphs are exported from the training framework in inference mode, so `eval()` has
/// nothing to switch.
pub struct OnnxEncoder
{
    session: Session,
    output_name: Option<String>,
}

impl OnnxEncoder
{
    pub fn new(model_path: &Path, intra_threads: usize) -> anyhow::Result<Self>
    {
        let session = build_session(model_path, intra_threads)?;
        info!("Loaded ONNX model {:?}", model_path);

        Ok(OnnxEncoder {
            session,
            output_name: None,
        })
    }

    /// Reads the embedding from the output called `output_name` instead of the first one.
    pub fn with_output(mut self, output_name: impl Into<String>) -> Self
    {
        self.output_name = Some(output_name.into());
        self
    }
}

fn build_session(model_path: &Path, intra_threads: usize) -> ort::Result<Session>
{
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .commit_from_file(model_path)
}

impl Encoder for OnnxEncoder
{
    fn eval(&mut self) {}

    /// Returns the output tensor as is; for most backbones that is (batch_size, feature_length).
    fn forward(&mut self, samples: ArrayViewD<'_, f32>) -> anyhow::Result<ArrayD<f32>>
    {
        // ONNX runtime wants a contiguous buffer.
        let samples = samples.as_standard_layout();
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(&samples)?])?;

        let output = match &self.output_name {
            Some(name) => &outputs[name.as_str()],
            None => &outputs[0],
        };

        Ok(output.try_extract_array::<f32>()?.to_owned())
    }
}
