use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
    #[error("Label index {label} is out of range for {num_classes} classes.")]
    LabelOutOfRange { label: usize, num_classes: usize },
    #[error("Feature {index} flattens to {found} values, but the first feature has {expected}.")]
    DimensionMismatch { index: usize, expected: usize, found: usize },
    #[error("The model returned {embeddings} embeddings for a batch of {labels} labels.")]
    BatchSizeMismatch { embeddings: usize, labels: usize },
    #[error("Embedding batches must have at least 2 dimensions (batch, features); got {0}.")]
    EmbeddingRank(usize),
    #[error("Cannot project an empty set of features.")]
    EmptyFeatures,
    #[error("Error rendering plot: {0}")]
    Plot(String),
    #[error("The path is not a directory: {0:?}")]
    NotADirectory(PathBuf),
    #[error("No images were found under {0:?}")]
    EmptyDataset(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;
