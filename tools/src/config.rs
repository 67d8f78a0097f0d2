use std::path::{Path, PathBuf};

use anyhow::Context;
use chunk_dataset::RecordDType;
use serde::Deserialize;

const DEFAULT_CONFIG_NAME: &str = "chunkset.toml";
const DEFAULT_NUM_VAL_IMAGES: usize = 2500;
const DEFAULT_IMAGE_SIZE: usize = 300;
const DEFAULT_SPLIT_SEED: u64 = 42;

/// Settings for the dataset build pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub train_images: PathBuf,
    pub test_images: PathBuf,
    pub train_store: PathBuf,
    pub val_store: PathBuf,
    pub test_store: PathBuf,
    pub means_path: PathBuf,
    /// Images moved from the train split into the validation split.
    pub num_val_images: usize,
    pub image_width: usize,
    pub image_height: usize,
    pub chunk_size: usize,
    pub dtype: RecordDType,
    pub label_name_capacity: usize,
    pub split_seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let datasets = PathBuf::from("datasets");
        let output = PathBuf::from("output");
        Self {
            train_images: datasets.join("train"),
            test_images: datasets.join("test"),
            train_store: output.join("train.cks"),
            val_store: output.join("val.cks"),
            test_store: output.join("test.cks"),
            means_path: output.join("means.json"),
            num_val_images: DEFAULT_NUM_VAL_IMAGES,
            image_width: DEFAULT_IMAGE_SIZE,
            image_height: DEFAULT_IMAGE_SIZE,
            chunk_size: chunk_dataset::DEFAULT_CHUNK_SIZE,
            dtype: RecordDType::F32,
            label_name_capacity: 0,
            split_seed: DEFAULT_SPLIT_SEED,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    datasets_root: Option<String>,
    output_root: Option<String>,
    train_images: Option<String>,
    test_images: Option<String>,
    split: Option<SplitSection>,
    store: Option<StoreSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SplitSection {
    num_val_images: Option<usize>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StoreSection {
    width: Option<usize>,
    height: Option<usize>,
    chunk_size: Option<usize>,
    dtype: Option<RecordDType>,
    label_name_capacity: Option<usize>,
    train: Option<String>,
    val: Option<String>,
    test: Option<String>,
    means: Option<String>,
}

impl PipelineConfig {
    /// Load from `CHUNKSET_CONFIG`, else `./chunkset.toml`, else defaults.
    pub fn load() -> Self {
        let path = std::env::var("CHUNKSET_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_NAME));
        let cfg = if path.exists() {
            Self::from_path(&path).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "config unreadable; using defaults");
                Self::default()
            })
        } else {
            Self::default()
        };
        cfg.warn_if_invalid();
        cfg
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let file: PipelineConfigFile = toml::from_str(raw)?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let defaults = Self::default();
        let datasets_root = file
            .datasets_root
            .map(|v| expand_path(&v))
            .unwrap_or_else(|| PathBuf::from("datasets"));
        let output_root = file
            .output_root
            .map(|v| expand_path(&v))
            .unwrap_or_else(|| PathBuf::from("output"));
        let split = file.split.unwrap_or_default();
        let store = file.store.unwrap_or_default();

        PipelineConfig {
            train_images: file
                .train_images
                .map(|v| expand_path(&v))
                .unwrap_or_else(|| datasets_root.join("train")),
            test_images: file
                .test_images
                .map(|v| expand_path(&v))
                .unwrap_or_else(|| datasets_root.join("test")),
            train_store: store
                .train
                .map(|v| expand_path(&v))
                .unwrap_or_else(|| output_root.join("train.cks")),
            val_store: store
                .val
                .map(|v| expand_path(&v))
                .unwrap_or_else(|| output_root.join("val.cks")),
            test_store: store
                .test
                .map(|v| expand_path(&v))
                .unwrap_or_else(|| output_root.join("test.cks")),
            means_path: store
                .means
                .map(|v| expand_path(&v))
                .unwrap_or_else(|| output_root.join("means.json")),
            num_val_images: split.num_val_images.unwrap_or(defaults.num_val_images),
            image_width: store.width.unwrap_or(defaults.image_width),
            image_height: store.height.unwrap_or(defaults.image_height),
            chunk_size: store.chunk_size.unwrap_or(defaults.chunk_size),
            dtype: store.dtype.unwrap_or(defaults.dtype),
            label_name_capacity: store
                .label_name_capacity
                .unwrap_or(defaults.label_name_capacity),
            split_seed: split.seed.unwrap_or(defaults.split_seed),
        }
    }

    fn warn_if_invalid(&self) {
        if self.image_width == 0 || self.image_height == 0 {
            tracing::warn!(
                width = self.image_width,
                height = self.image_height,
                "pipeline config: image size has a zero dimension; builds will fail"
            );
        }
        if self.chunk_size == 0 {
            tracing::warn!("pipeline config: store.chunk_size is 0; builds will fail");
        }
        if self.num_val_images == 0 {
            tracing::warn!("pipeline config: split.num_val_images is 0; val store will be empty");
        }
        if self.train_images == self.test_images {
            tracing::warn!(
                path = %self.train_images.display(),
                "pipeline config: train and test images share a root"
            );
        }
    }
}

fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

fn expand_env(input: &str) -> String {
    let mut out = String::new();
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&format!("${{{key}}}")),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_vars_expand_and_unknown_ones_survive() {
        std::env::set_var("CHUNKSET_TEST_ROOT", "/data");
        assert_eq!(expand_env("${CHUNKSET_TEST_ROOT}/imgs"), "/data/imgs");
        assert_eq!(
            expand_env("${CHUNKSET_TEST_MISSING_VAR}/x"),
            "${CHUNKSET_TEST_MISSING_VAR}/x"
        );
        assert_eq!(expand_env("a${b"), "a${b");
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            output_root = "out"
            [split]
            num_val_images = 10
            [store]
            width = 64
            dtype = "u8"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.train_store, PathBuf::from("out/train.cks"));
        assert_eq!(cfg.means_path, PathBuf::from("out/means.json"));
        assert_eq!(cfg.num_val_images, 10);
        assert_eq!(cfg.image_width, 64);
        assert_eq!(cfg.image_height, 300);
        assert_eq!(cfg.dtype, RecordDType::U8);
        assert_eq!(cfg.split_seed, 42);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(PipelineConfig::from_toml_str("bogus = 1").is_err());
    }
}
