//! End-to-end evaluation over real stores: generator → classifier → rank-K.

use chunk_dataset::{
    DatasetGenerator, DatasetWriter, GeneratorConfig, Passes, PreprocessorChain, ReadMode,
    RecordShape, WriterConfig,
};
use evaluation::{
    evaluate_stream, evaluate_stream_with_crops, EvalResult, MultiCropEvaluator, RankAccuracy,
};
use ndarray::{Array2, Array3, ArrayView4, Axis};

const CLASSES: usize = 4;

/// Scores class `c` by how close the image mean is to `10 * c`.
fn mean_classifier(batch: ArrayView4<'_, f32>) -> EvalResult<Array2<f32>> {
    let mut out = Array2::<f32>::zeros((batch.len_of(Axis(0)), CLASSES));
    for (i, image) in batch.outer_iter().enumerate() {
        let mean = image.mean().unwrap_or(0.0);
        for c in 0..CLASSES {
            out[[i, c]] = 1.0 / (1.0 + (mean - 10.0 * c as f32).abs());
        }
    }
    Ok(out)
}

#[test]
fn uniform_image_crop_average_equals_whole_image_score() -> anyhow::Result<()> {
    let image = Array3::<f32>::from_elem((12, 16, 3), 13.0);
    let evaluator = MultiCropEvaluator::new(8, 6);
    let averaged = evaluator.predict_with_crops(&image.view(), &mean_classifier)?;
    let whole = mean_classifier(image.view().insert_axis(Axis(0)))?;
    assert_eq!(averaged, whole.row(0).to_owned());
    Ok(())
}

#[test]
fn batched_crops_keep_image_order() -> anyhow::Result<()> {
    let images: Vec<Array3<f32>> = (0..6)
        .map(|i| Array3::from_shape_fn((6, 6, 3), |(y, x, _)| (i * 5 + y + x) as f32))
        .collect();
    let views: Vec<_> = images.iter().map(|i| i.view()).collect();
    let evaluator = MultiCropEvaluator::new(4, 4);
    let batched = evaluator.predict_batch_with_crops(&views, &mean_classifier)?;
    assert_eq!(batched.dim(), (6, CLASSES));
    for (i, view) in views.iter().enumerate() {
        let single = evaluator.predict_with_crops(view, &mean_classifier)?;
        assert_eq!(batched.row(i), single);
    }
    Ok(())
}

#[test]
fn generator_pass_reports_plain_and_crop_accuracy() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("eval.cks");
    let n = 9;
    let mut writer = DatasetWriter::create(
        WriterConfig::new(&path, n, RecordShape::new(10, 10, 3)).with_chunk_size(4),
    )?;
    for i in 0..n {
        let label = (i % CLASSES) as u32;
        writer.add_one(Array3::from_elem((10, 10, 3), 10.0 * label as f32), label)?;
    }
    writer.close()?;

    let generator = DatasetGenerator::open(
        &path,
        GeneratorConfig {
            batch_size: 4,
            read_mode: ReadMode::Streamed,
            ..Default::default()
        },
        PreprocessorChain::identity(),
    )?;
    let plain = evaluate_stream(generator.generate(Passes::Finite(1))?, &mean_classifier, 2)?;
    assert_eq!(plain.samples, n);
    assert_eq!(
        plain.accuracy,
        RankAccuracy {
            rank1: 1.0,
            rank_k: 1.0
        }
    );

    let evaluator = MultiCropEvaluator::new(8, 8);
    let cropped = evaluate_stream_with_crops(
        generator.generate(Passes::Finite(1))?,
        &evaluator,
        &mean_classifier,
        2,
    )?;
    assert_eq!(cropped.samples, n);
    assert_eq!(cropped.accuracy, plain.accuracy);
    Ok(())
}
