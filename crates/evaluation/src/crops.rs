//! Ten-crop test-time augmentation.

use crate::classifier::Classifier;
use crate::{EvalError, EvalResult};
use chunk_dataset::preprocess::{multi_crop, to_layout};
use chunk_dataset::Layout;
use ndarray::{Array1, Array2, ArrayView3, Axis};
use rayon::prelude::*;

pub const CROP_COUNT: usize = 10;

/// Scores an image as the mean of its four corner crops, center crop, and
/// their horizontal mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiCropEvaluator {
    pub width: usize,
    pub height: usize,
    /// Layout handed to the classifier.
    pub layout: Layout,
}

impl MultiCropEvaluator {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            layout: Layout::ChannelsLast,
        }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// `image` is HWC and strictly larger than the crop in both dimensions.
    pub fn predict_with_crops<C: Classifier + ?Sized>(
        &self,
        image: &ArrayView3<'_, f32>,
        classifier: &C,
    ) -> EvalResult<Array1<f32>> {
        let crops = multi_crop(image, self.width, self.height, true)?;
        let crops: Vec<_> = crops
            .into_iter()
            .map(|c| to_layout(c, self.layout))
            .collect();
        let views: Vec<_> = crops.iter().map(|c| c.view()).collect();
        let batch = ndarray::stack(Axis(0), &views)
            .map_err(|e| EvalError::Dimension(format!("crop batch: {e}")))?;
        let scores = classifier.classify(batch.view())?;
        if scores.nrows() != CROP_COUNT {
            return Err(EvalError::Dimension(format!(
                "classifier returned {} rows for {CROP_COUNT} crops",
                scores.nrows()
            )));
        }
        Ok(mean_rows(&scores))
    }

    /// Crop-averaged scores for each image, computed in parallel. Row `i`
    /// belongs to `images[i]`.
    pub fn predict_batch_with_crops<C: Classifier + ?Sized>(
        &self,
        images: &[ArrayView3<'_, f32>],
        classifier: &C,
    ) -> EvalResult<Array2<f32>> {
        let rows = images
            .par_iter()
            .map(|img| self.predict_with_crops(img, classifier))
            .collect::<EvalResult<Vec<_>>>()?;
        let views: Vec<_> = rows.iter().map(|r| r.view()).collect();
        if views.is_empty() {
            return Ok(Array2::zeros((0, 0)));
        }
        ndarray::stack(Axis(0), &views)
            .map_err(|e| EvalError::Dimension(format!("classifier rows differ in width: {e}")))
    }
}

fn mean_rows(scores: &Array2<f32>) -> Array1<f32> {
    let n = scores.nrows() as f64;
    let mut sums = vec![0f64; scores.ncols()];
    for row in scores.rows() {
        for (sum, v) in sums.iter_mut().zip(row.iter()) {
            *sum += f64::from(*v);
        }
    }
    sums.into_iter().map(|s| (s / n) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, ArrayView4};

    #[test]
    fn mean_rows_is_exact_for_identical_rows() {
        let row = [0.1f32, 0.7, 0.2];
        let scores = Array2::from_shape_fn((10, 3), |(_, c)| row[c]);
        assert_eq!(mean_rows(&scores).to_vec(), row.to_vec());
    }

    #[test]
    fn classifier_sees_ten_crops_in_requested_layout() {
        let evaluator = MultiCropEvaluator::new(3, 2).with_layout(Layout::ChannelsFirst);
        let image = Array3::<f32>::zeros((5, 6, 3));
        let classifier = |batch: ArrayView4<'_, f32>| -> EvalResult<Array2<f32>> {
            assert_eq!(batch.dim(), (10, 3, 2, 3));
            Ok(Array2::zeros((10, 4)))
        };
        let out = evaluator
            .predict_with_crops(&image.view(), &classifier)
            .unwrap();
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn wrong_row_count_is_a_dimension_error() {
        let evaluator = MultiCropEvaluator::new(2, 2);
        let image = Array3::<f32>::zeros((4, 4, 3));
        let classifier =
            |_: ArrayView4<'_, f32>| -> EvalResult<Array2<f32>> { Ok(Array2::zeros((9, 2))) };
        assert!(matches!(
            evaluator.predict_with_crops(&image.view(), &classifier),
            Err(EvalError::Dimension(_))
        ));
    }

    #[test]
    fn source_no_larger_than_crop_is_rejected() {
        let evaluator = MultiCropEvaluator::new(4, 4);
        let image = Array3::<f32>::zeros((4, 8, 3));
        let classifier =
            |_: ArrayView4<'_, f32>| -> EvalResult<Array2<f32>> { Ok(Array2::zeros((10, 2))) };
        assert!(matches!(
            evaluator.predict_with_crops(&image.view(), &classifier),
            Err(EvalError::Dataset(_))
        ));
    }
}
