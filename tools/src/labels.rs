use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// Class name encoded in a file name: everything before the first `.`
/// (`cat.1234.jpg` → `cat`).
pub fn label_from_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let label = name.split('.').next()?;
    (!label.is_empty()).then(|| label.to_string())
}

/// Recursively list image files under `root`, sorted by path.
///
/// A missing `root` is logged and yields no images; the caller decides whether an
/// empty split is fatal.
pub fn index_images(root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !root.exists() {
        tracing::warn!(root = %root.display(), "image root does not exist; treating as empty");
        return Ok(out);
    }
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries =
            fs::read_dir(&dir).with_context(|| format!("listing images in {}", dir.display()))?;
        for entry in entries {
            let path = entry
                .with_context(|| format!("reading entry in {}", dir.display()))?
                .path();
            if path.is_dir() {
                pending.push(path);
            } else if is_image(&path) {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Maps class names to dense ordinals in sorted name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Self {
        let classes: BTreeSet<&str> = labels.iter().map(|l| l.as_ref()).collect();
        Self {
            classes: classes.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn encode(&self, label: &str) -> Option<u32> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(label))
            .ok()
            .map(|i| i as u32)
    }

    pub fn decode(&self, index: u32) -> Option<&str> {
        self.classes.get(index as usize).map(String::as_str)
    }

    pub fn transform<S: AsRef<str>>(&self, labels: &[S]) -> anyhow::Result<Vec<u32>> {
        labels
            .iter()
            .map(|l| {
                self.encode(l.as_ref())
                    .ok_or_else(|| anyhow::anyhow!("unknown label {:?}", l.as_ref()))
            })
            .collect()
    }

    pub fn fit_transform<S: AsRef<str>>(labels: &[S]) -> (Self, Vec<u32>) {
        let encoder = Self::fit(labels);
        let encoded = labels
            .iter()
            .filter_map(|l| encoder.encode(l.as_ref()))
            .collect();
        (encoder, encoded)
    }
}

/// Index `root` and derive a label for every image from its file name.
pub fn labeled_images(root: &Path) -> anyhow::Result<(Vec<PathBuf>, Vec<String>)> {
    let paths = index_images(root)?;
    let labels = paths
        .iter()
        .map(|p| {
            label_from_path(p).ok_or_else(|| anyhow::anyhow!("no label in {}", p.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok((paths, labels))
}
