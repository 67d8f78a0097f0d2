use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Per-channel color means computed over a training split.
///
/// Serialized as `{"R": .., "G": .., "B": ..}` so the artifact stays readable by
/// tooling that expects upper-case channel keys.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelMeans {
    #[serde(rename = "R")]
    pub r: f64,
    #[serde(rename = "G")]
    pub g: f64,
    #[serde(rename = "B")]
    pub b: f64,
}

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("channel mean {channel} is not a finite non-negative value: {value}")]
    InvalidMean { channel: &'static str, value: f64 },
}

impl ChannelMeans {
    pub fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.r, self.g, self.b]
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        for (channel, value) in [("R", self.r), ("G", self.g), ("B", self.b)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ContractError::InvalidMean { channel, value });
            }
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), ContractError> {
        self.validate()?;
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| ContractError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let data = serde_json::to_vec(self).map_err(|e| ContractError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;
        fs::write(path, data).map_err(|e| ContractError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ContractError> {
        let raw = fs::read(path).map_err(|e| ContractError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let means: ChannelMeans =
            serde_json::from_slice(&raw).map_err(|e| ContractError::Json {
                path: path.to_path_buf(),
                source: e,
            })?;
        means.validate()?;
        Ok(means)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_upper_case_keys() {
        let means = ChannelMeans::new(124.5, 116.25, 104.0);
        let json = serde_json::to_value(means).unwrap();
        assert_eq!(json["R"], 124.5);
        assert_eq!(json["G"], 116.25);
        assert_eq!(json["B"], 104.0);
    }

    #[test]
    fn parses_artifact_written_by_other_tools() {
        let raw = r#"{"R": 123.68, "G": 116.779, "B": 103.939}"#;
        let means: ChannelMeans = serde_json::from_str(raw).unwrap();
        assert!((means.g - 116.779).abs() < 1e-9);
    }

    #[test]
    fn negative_mean_is_rejected() {
        let err = ChannelMeans::new(-1.0, 0.0, 0.0).validate().unwrap_err();
        assert!(matches!(err, ContractError::InvalidMean { channel: "R", .. }));
    }
}
