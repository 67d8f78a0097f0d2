//! evaluation: multi-crop ensembling and rank-K accuracy over chunkset stores.

pub mod classifier;
pub mod crops;
pub mod ranked;
pub mod report;

use chunk_dataset::DatasetError;
use thiserror::Error;

pub type EvalResult<T> = Result<T, EvalError>;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("dimension mismatch: {0}")]
    Dimension(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

pub use classifier::Classifier;
pub use crops::{MultiCropEvaluator, CROP_COUNT};
pub use ranked::{rank_k_accuracy, ranked_classes, RankAccuracy};
pub use report::{evaluate_stream, evaluate_stream_with_crops, EvaluationReport};
