//! Chunked binary image stores and streaming batch generation for chunkset.
//!
//! This crate provides utilities for:
//! - Writing fixed-capacity `CKS1` stores in buffered chunks
//! - Reading stores back through a memory map or per-chunk file reads
//! - Ordered image preprocessing chains (resize, mean subtraction, crops)
//! - Batch generation with within-chunk shuffling and one-hot labels
//! - Background prefetch and channel-mean accumulation

// Module declarations
mod format;
pub mod generator;
pub mod means;
pub mod prefetch;
pub mod preprocess;
pub mod reader;
pub mod types;
pub mod writer;

#[cfg(feature = "burn-runtime")]
pub mod burn_bridge;

// Re-export public API
pub use generator::{Batch, BatchLabels, BatchStream, DatasetGenerator, GeneratorConfig};
pub use means::ChannelMeanAccumulator;
pub use prefetch::{prefetch, Prefetch, DEFAULT_PREFETCH_DEPTH};
pub use preprocess::{Image, Layout, Preprocessor, PreprocessorChain, PreprocessorChainBuilder};
pub use reader::StoreReader;
pub use types::*;
pub use writer::{DatasetWriter, WriterConfig, DEFAULT_CHUNK_SIZE};

pub use data_contracts::{ChannelMeans, StoreDescriptor};

#[cfg(feature = "burn-runtime")]
pub use burn_bridge::{BurnBatch, BurnLabels};
