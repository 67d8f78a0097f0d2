//! Core types and error definitions for chunk_dataset.

use std::path::PathBuf;
use thiserror::Error;

pub use data_contracts::{RecordDType, RecordShape};

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("capacity exceeded: {requested} records requested but store declares {declared}")]
    Capacity { requested: usize, declared: usize },
    #[error("illegal state: {0}")]
    State(String),
    #[error("{0} is closed")]
    Closed(&'static str),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
    #[error("precondition violated: {0}")]
    Precondition(String),
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
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("malformed store {path}: {msg}")]
    Format { path: PathBuf, msg: String },
}

impl DatasetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DatasetError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        DatasetError::Format {
            path: path.into(),
            msg: msg.into(),
        }
    }
}

/// How a reader maps the records region of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Memory-mapped file; chunk reads copy out of the mapping.
    #[default]
    Mmap,
    /// Seek + read per chunk; nothing stays resident between reads.
    Streamed,
}

impl ReadMode {
    pub fn from_env() -> Self {
        match std::env::var("CHUNKSET_READ_MODE").as_deref() {
            Ok("streamed") | Ok("stream") => ReadMode::Streamed,
            Ok("mmap") => ReadMode::Mmap,
            _ => ReadMode::Mmap,
        }
    }
}

/// Number of traversals a generator makes over its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Passes {
    Finite(usize),
    Infinite,
}

impl Passes {
    pub fn is_infinite(&self) -> bool {
        matches!(self, Passes::Infinite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_error_names_the_resource() {
        let msg = DatasetError::Closed("dataset writer").to_string();
        assert_eq!(msg, "dataset writer is closed");
    }

    #[test]
    fn capacity_error_reports_counts() {
        let msg = DatasetError::Capacity {
            requested: 11,
            declared: 10,
        }
        .to_string();
        assert!(msg.contains("11"));
        assert!(msg.contains("10"));
    }
}
