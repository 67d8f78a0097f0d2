use std::fs;
use std::path::PathBuf;

use chunk_dataset::RecordDType;
use chunkset_tools::PipelineConfig;

fn write_temp_config(contents: &str) -> anyhow::Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("chunkset.toml");
    fs::write(&path, contents)?;
    Ok((dir, path))
}

#[test]
fn loads_minimal_config() -> anyhow::Result<()> {
    let (_dir, path) = write_temp_config("datasets_root = \"/srv/kaggle\"\n")?;
    let cfg = PipelineConfig::from_path(&path)?;
    assert_eq!(cfg.train_images, PathBuf::from("/srv/kaggle/train"));
    assert_eq!(cfg.test_images, PathBuf::from("/srv/kaggle/test"));
    assert_eq!(cfg.image_width, 300);
    assert_eq!(cfg.chunk_size, 1000);
    assert_eq!(cfg.dtype, RecordDType::F32);
    Ok(())
}

#[test]
fn explicit_store_paths_win_over_output_root() -> anyhow::Result<()> {
    let (_dir, path) = write_temp_config(
        r#"
output_root = "out"

[store]
val = "elsewhere/val.cks"
chunk_size = 64
"#,
    )?;
    let cfg = PipelineConfig::from_path(&path)?;
    assert_eq!(cfg.train_store, PathBuf::from("out/train.cks"));
    assert_eq!(cfg.val_store, PathBuf::from("elsewhere/val.cks"));
    assert_eq!(cfg.chunk_size, 64);
    Ok(())
}

#[test]
fn malformed_config_reports_the_path() -> anyhow::Result<()> {
    let (_dir, path) = write_temp_config("[store\nwidth = 3")?;
    let err = PipelineConfig::from_path(&path).unwrap_err();
    assert!(format!("{err:#}").contains("chunkset.toml"));
    Ok(())
}
