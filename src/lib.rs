pub mod error;
pub mod config;
pub mod model;
pub mod preprocessing;
pub mod dataset;
pub mod features;
pub mod tsne;
pub mod plot;
pub mod tracking;
pub mod evaluation;
#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
