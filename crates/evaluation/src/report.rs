//! One-pass evaluation drivers over generated batches.

use crate::classifier::Classifier;
use crate::crops::MultiCropEvaluator;
use crate::ranked::{rank_k_accuracy, RankAccuracy};
use crate::{EvalError, EvalResult};
use chunk_dataset::{Batch, DatasetResult, Layout};
use ndarray::{Array2, ArrayView2, ArrayView3};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationReport {
    pub samples: usize,
    pub k: usize,
    pub accuracy: RankAccuracy,
}

#[derive(Default)]
struct ScoreCollector {
    scores: Vec<f32>,
    labels: Vec<u32>,
    width: Option<usize>,
}

impl ScoreCollector {
    fn push(&mut self, rows: ArrayView2<'_, f32>, labels: Vec<u32>) -> EvalResult<()> {
        if rows.nrows() != labels.len() {
            return Err(EvalError::Dimension(format!(
                "classifier returned {} rows for a batch of {}",
                rows.nrows(),
                labels.len()
            )));
        }
        let width = *self.width.get_or_insert(rows.ncols());
        if rows.ncols() != width {
            return Err(EvalError::Dimension(format!(
                "score width changed from {width} to {}",
                rows.ncols()
            )));
        }
        self.scores.extend(rows.iter().copied());
        self.labels.extend(labels);
        Ok(())
    }

    fn finish(self, k: usize, started: Instant, label: &str) -> EvalResult<EvaluationReport> {
        let n = self.labels.len();
        let preds = Array2::from_shape_vec((n, self.width.unwrap_or(0)), self.scores)
            .map_err(|e| EvalError::Dimension(e.to_string()))?;
        let accuracy = rank_k_accuracy(preds.view(), &self.labels, k)?;
        tracing::info!(
            mode = label,
            samples = n,
            rank1 = accuracy.rank1,
            rank_k = accuracy.rank_k,
            k,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "evaluation finished"
        );
        Ok(EvaluationReport {
            samples: n,
            k,
            accuracy,
        })
    }
}

/// Score every batch once with `classifier` and report rank-1 / rank-`k` accuracy.
pub fn evaluate_stream<I, C>(batches: I, classifier: &C, k: usize) -> EvalResult<EvaluationReport>
where
    I: IntoIterator<Item = DatasetResult<Batch>>,
    C: Classifier + ?Sized,
{
    let started = Instant::now();
    let mut collector = ScoreCollector::default();
    for batch in batches {
        let batch = batch?;
        let scores = classifier.classify(batch.images.view())?;
        collector.push(scores.view(), batch.labels.indices())?;
    }
    collector.finish(k, started, "plain")
}

/// Same as [`evaluate_stream`] but each image is scored as the mean over its ten crops.
/// Batches must be channels-last; the evaluator applies its own layout.
pub fn evaluate_stream_with_crops<I, C>(
    batches: I,
    evaluator: &MultiCropEvaluator,
    classifier: &C,
    k: usize,
) -> EvalResult<EvaluationReport>
where
    I: IntoIterator<Item = DatasetResult<Batch>>,
    C: Classifier + ?Sized,
{
    let started = Instant::now();
    let mut collector = ScoreCollector::default();
    for batch in batches {
        let batch = batch?;
        if batch.layout != Layout::ChannelsLast {
            return Err(EvalError::Dimension(
                "multi-crop evaluation needs channels-last batches".into(),
            ));
        }
        let images: Vec<ArrayView3<'_, f32>> = batch.images.outer_iter().collect();
        let scores = evaluator.predict_batch_with_crops(&images, classifier)?;
        collector.push(scores.view(), batch.labels.indices())?;
    }
    collector.finish(k, started, "multi_crop")
}
