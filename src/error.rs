use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no file named {name} (or {name}.gz) in {}", dir.display())]
    MissingFile { name: String, dir: PathBuf },

    #[error("{}: expected IDX magic number {expected}, found {found}", path.display())]
    BadMagic {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("{}: truncated IDX data, expected {expected} bytes but found {found}", path.display())]
    Truncated {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("{}: IDX header dimensions {dims:?} are too large", path.display())]
    OversizedHeader { path: PathBuf, dims: Vec<usize> },

    #[error("split has {images} images but {labels} labels")]
    CountMismatch { images: usize, labels: usize },

    #[error("label {label} at position {position} is out of range for {num_classes} classes")]
    LabelOutOfRange {
        label: usize,
        position: usize,
        num_classes: usize,
    },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("index {index:?} is out of bounds for shape {shape:?}")]
    IndexOutOfBounds {
        index: Vec<usize>,
        shape: Vec<usize>,
    },

    #[error("backward() needs a single element tensor, got shape {0:?}")]
    NonScalarBackward(Vec<usize>),

    #[error("unknown activation `{0}`")]
    UnknownActivation(String),

    #[error("unknown loss `{0}`")]
    UnknownLoss(String),

    #[error("unknown optimizer `{0}`")]
    UnknownOptimizer(String),

    #[error("model must be compiled before calling `{0}`")]
    NotCompiled(&'static str),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("loss became {loss} at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize, loss: f64 },

    #[error("batch producer thread panicked")]
    BatchProducer,

    #[error("failed to parse config {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
