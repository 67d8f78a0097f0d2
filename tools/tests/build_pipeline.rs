//! End-to-end build: image folders → train/val/test stores + means artifact.

use std::path::Path;

use chunk_dataset::{ChannelMeans, ReadMode, StoreReader};
use chunkset_tools::{build_datasets, PipelineConfig};
use image::{Rgb, RgbImage};

fn write_image(path: &Path, w: u32, h: u32, color: [u8; 3]) -> anyhow::Result<()> {
    RgbImage::from_pixel(w, h, Rgb(color)).save(path)?;
    Ok(())
}

fn config(root: &Path) -> PipelineConfig {
    let out = root.join("output");
    PipelineConfig {
        train_images: root.join("train"),
        test_images: root.join("test"),
        train_store: out.join("train.cks"),
        val_store: out.join("val.cks"),
        test_store: out.join("test.cks"),
        means_path: out.join("means.json"),
        num_val_images: 2,
        image_width: 8,
        image_height: 8,
        chunk_size: 3,
        ..Default::default()
    }
}

#[test]
fn builds_stratified_stores_and_train_means() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    std::fs::create_dir_all(root.join("train"))?;
    std::fs::create_dir_all(root.join("test"))?;
    for i in 0..6 {
        // Mixed aspect ratios; uniform colors survive resizing exactly.
        write_image(&root.join(format!("train/cat.{i}.png")), 20, 12, [200, 0, 0])?;
        write_image(&root.join(format!("train/dog.{i}.png")), 10, 16, [0, 0, 100])?;
    }
    write_image(&root.join("test/cat.100.png"), 9, 9, [200, 0, 0])?;
    write_image(&root.join("test/dog.100.png"), 9, 9, [0, 0, 100])?;

    let cfg = config(root);
    let summary = build_datasets(&cfg)?;
    assert_eq!(summary.train.count, 10);
    assert_eq!(summary.val.count, 2);
    assert_eq!(summary.test.count, 2);

    let train = StoreReader::open(&cfg.train_store, ReadMode::Mmap)?;
    assert!(train.verify_checksum()?);
    assert_eq!(train.label_names(), Some(&["cat".to_string(), "dog".to_string()][..]));
    let labels = train.labels()?;
    assert_eq!(labels.iter().filter(|&&l| l == 0).count(), 5);
    let (records, labels) = train.read_range(0, train.count())?;
    for (record, label) in records.iter().zip(&labels) {
        assert_eq!(record.dim(), (8, 8, 3));
        let expected = if *label == 0 { [200.0, 0.0, 0.0] } else { [0.0, 0.0, 100.0] };
        assert_eq!(record[[4, 4, 0]], expected[0]);
        assert_eq!(record[[4, 4, 2]], expected[2]);
    }

    let val = StoreReader::open(&cfg.val_store, ReadMode::Streamed)?;
    let mut val_labels = val.labels()?;
    val_labels.sort_unstable();
    assert_eq!(val_labels, vec![0, 1]);

    assert_eq!(summary.means, ChannelMeans::new(100.0, 0.0, 50.0));
    assert_eq!(ChannelMeans::load(&cfg.means_path)?, summary.means);
    Ok(())
}

#[test]
fn missing_test_root_builds_an_empty_test_store() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    std::fs::create_dir_all(root.join("train"))?;
    for i in 0..3 {
        write_image(&root.join(format!("train/cat.{i}.png")), 8, 8, [10, 20, 30])?;
        write_image(&root.join(format!("train/dog.{i}.png")), 8, 8, [10, 20, 30])?;
    }

    let cfg = config(root);
    let summary = build_datasets(&cfg)?;
    assert_eq!(summary.train.count, 4);
    assert_eq!(summary.val.count, 2);
    assert_eq!(summary.test.count, 0);
    let test = StoreReader::open(&cfg.test_store, ReadMode::Streamed)?;
    assert!(test.is_empty());
    Ok(())
}

#[test]
fn missing_train_root_fails_the_build() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let err = build_datasets(&config(tmp.path())).unwrap_err();
    assert!(format!("{err:#}").contains("no images found"), "{err:#}");
    Ok(())
}

#[test]
fn undecodable_images_fail_the_build() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    std::fs::create_dir_all(root.join("train"))?;
    std::fs::create_dir_all(root.join("test"))?;
    for i in 0..3 {
        write_image(&root.join(format!("train/cat.{i}.png")), 10, 10, [1, 2, 3])?;
    }
    std::fs::write(root.join("train/cat.9.png"), b"not a png")?;
    let cfg = PipelineConfig {
        num_val_images: 1,
        ..config(root)
    };
    assert!(build_datasets(&cfg).is_err());
    Ok(())
}
