use crate::EvalResult;
use ndarray::{Array2, ArrayView4};

/// Inference seam: a batch of images in, one score row per image out.
///
/// `Sync` so crop sets can be scored from several rayon workers at once.
pub trait Classifier: Sync {
    fn classify(&self, batch: ArrayView4<'_, f32>) -> EvalResult<Array2<f32>>;
}

impl<F> Classifier for F
where
    F: Fn(ArrayView4<'_, f32>) -> EvalResult<Array2<f32>> + Sync,
{
    fn classify(&self, batch: ArrayView4<'_, f32>) -> EvalResult<Array2<f32>> {
        self(batch)
    }
}
