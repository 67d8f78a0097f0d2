//! Build train/val/test stores and the channel-mean artifact from image folders.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use chunk_dataset::preprocess::aspect_resize;
use chunk_dataset::{
    ChannelMeanAccumulator, ChannelMeans, DatasetError, DatasetResult, DatasetWriter, RecordShape,
    StoreDescriptor, WriterConfig,
};
use ndarray::Array3;
use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::labels::{labeled_images, LabelEncoder};
use crate::splits::stratified_split;

#[derive(Debug, Clone)]
pub struct BuildSummary {
    pub train: StoreDescriptor,
    pub val: StoreDescriptor,
    pub test: StoreDescriptor,
    pub means: ChannelMeans,
}

/// Decode an image file into an RGB `Array3<f32>` (HWC, values 0..=255).
pub fn load_image(path: &Path) -> DatasetResult<Array3<f32>> {
    let img = image::open(path)
        .map_err(|source| DatasetError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();
    let (w, h) = img.dimensions();
    let values: Vec<f32> = img.into_raw().into_iter().map(f32::from).collect();
    Array3::from_shape_vec((h as usize, w as usize, 3), values)
        .map_err(|e| DatasetError::Schema(format!("{}: {e}", path.display())))
}

struct SplitJob<'a> {
    name: &'static str,
    paths: Vec<PathBuf>,
    labels: Vec<u32>,
    store: &'a Path,
    class_names: &'a [String],
}

pub fn build_datasets(cfg: &PipelineConfig) -> anyhow::Result<BuildSummary> {
    let started = Instant::now();
    let (train_paths, train_names) = labeled_images(&cfg.train_images)?;
    if train_paths.is_empty() {
        anyhow::bail!("no images found under {}", cfg.train_images.display());
    }
    let (train_encoder, train_labels) = LabelEncoder::fit_transform(&train_names);

    let (test_paths, test_names) = labeled_images(&cfg.test_images)?;
    let (test_encoder, test_labels) = LabelEncoder::fit_transform(&test_names);
    if !test_paths.is_empty() && test_encoder.classes() != train_encoder.classes() {
        tracing::warn!(
            train = ?train_encoder.classes(),
            test = ?test_encoder.classes(),
            "train and test splits have different class sets; label ids will not line up"
        );
    }

    let split = stratified_split(&train_labels, cfg.num_val_images, cfg.split_seed)
        .context("splitting validation images from train")?;
    let pick = |idx: &[usize]| -> (Vec<PathBuf>, Vec<u32>) {
        idx.iter()
            .map(|&i| (train_paths[i].clone(), train_labels[i]))
            .unzip()
    };
    let (tr_paths, tr_labels) = pick(&split.train);
    let (val_paths, val_labels) = pick(&split.val);
    tracing::info!(
        train = tr_paths.len(),
        val = val_paths.len(),
        test = test_paths.len(),
        classes = train_encoder.num_classes(),
        "indexed images"
    );

    let mut means = ChannelMeanAccumulator::new();
    let train = build_store(
        cfg,
        SplitJob {
            name: "train",
            paths: tr_paths,
            labels: tr_labels,
            store: &cfg.train_store,
            class_names: train_encoder.classes(),
        },
        Some(&mut means),
    )?;
    let val = build_store(
        cfg,
        SplitJob {
            name: "val",
            paths: val_paths,
            labels: val_labels,
            store: &cfg.val_store,
            class_names: train_encoder.classes(),
        },
        None,
    )?;
    let test = build_store(
        cfg,
        SplitJob {
            name: "test",
            paths: test_paths,
            labels: test_labels,
            store: &cfg.test_store,
            class_names: test_encoder.classes(),
        },
        None,
    )?;

    let means = means.finish()?;
    means
        .save(&cfg.means_path)
        .with_context(|| format!("writing means {}", cfg.means_path.display()))?;
    tracing::info!(
        path = %cfg.means_path.display(),
        r = means.r,
        g = means.g,
        b = means.b,
        elapsed_s = started.elapsed().as_secs_f64(),
        "serialized channel means"
    );
    Ok(BuildSummary {
        train,
        val,
        test,
        means,
    })
}

fn build_store(
    cfg: &PipelineConfig,
    job: SplitJob<'_>,
    mut means: Option<&mut ChannelMeanAccumulator>,
) -> anyhow::Result<StoreDescriptor> {
    tracing::info!(
        split = job.name,
        path = %job.store.display(),
        records = job.paths.len(),
        "building store"
    );
    let writer_cfg = WriterConfig {
        path: job.store.to_path_buf(),
        total_count: job.paths.len(),
        record_shape: RecordShape::new(cfg.image_height, cfg.image_width, 3),
        dtype: cfg.dtype,
        label_name_capacity: cfg.label_name_capacity,
        chunk_size: cfg.chunk_size,
    };
    let mut writer = DatasetWriter::create(writer_cfg)
        .with_context(|| format!("creating {} store {}", job.name, job.store.display()))?;
    writer.store_label_names(job.class_names)?;

    let chunk = cfg.chunk_size.max(1);
    for (paths, labels) in job.paths.chunks(chunk).zip(job.labels.chunks(chunk)) {
        let decode_start = Instant::now();
        let images = paths
            .par_iter()
            .map(|p| {
                let img = load_image(p)?;
                aspect_resize(&img.view(), cfg.image_width, cfg.image_height)
            })
            .collect::<DatasetResult<Vec<_>>>()?;
        if let Some(acc) = means.as_deref_mut() {
            for img in &images {
                acc.observe(&img.view())?;
            }
        }
        writer.add(&images, labels)?;
        tracing::debug!(
            split = job.name,
            written = writer.cursor() + writer.buffered(),
            total = job.paths.len(),
            decode_ms = decode_start.elapsed().as_secs_f64() * 1000.0,
            "processed chunk"
        );
    }
    let desc = writer.close()?;
    tracing::info!(split = job.name, records = desc.count, "store complete");
    Ok(desc)
}
