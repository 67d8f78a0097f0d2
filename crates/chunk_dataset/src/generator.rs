//! Chunked batch generation over a closed store.

use crate::prefetch::{prefetch, Prefetch};
use crate::preprocess::{Layout, PreprocessorChain};
use crate::reader::StoreReader;
use crate::types::{DatasetError, DatasetResult, Passes, ReadMode};
use ndarray::{Array2, Array3, Array4, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

pub(crate) const DEFAULT_LOG_EVERY_RECORDS: usize = 1000;

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub batch_size: usize,
    /// Batches read per chunk; one chunk is `extra_targets × batch_size` records.
    pub extra_targets: usize,
    /// One-hot encode labels to width `num_classes`.
    pub binarize: bool,
    pub num_classes: usize,
    /// Shuffle record order within each chunk.
    pub shuffle: bool,
    /// Seed for shuffling and random preprocessors; `None` draws from the thread RNG.
    pub seed: Option<u64>,
    pub read_mode: ReadMode,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            extra_targets: 1,
            binarize: false,
            num_classes: 0,
            shuffle: false,
            seed: None,
            read_mode: ReadMode::from_env(),
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> DatasetResult<()> {
        if self.batch_size == 0 {
            return Err(DatasetError::Schema("batch_size must be greater than zero".into()));
        }
        if self.extra_targets == 0 {
            return Err(DatasetError::Schema("extra_targets must be greater than zero".into()));
        }
        if self.binarize && self.num_classes == 0 {
            return Err(DatasetError::Schema(
                "binarize requires a positive num_classes".into(),
            ));
        }
        Ok(())
    }

    pub fn chunk_len(&self) -> usize {
        self.batch_size * self.extra_targets
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchLabels {
    Indices(Vec<u32>),
    /// `batch × num_classes`, exactly one 1.0 per row.
    OneHot(Array2<f32>),
}

impl BatchLabels {
    pub fn len(&self) -> usize {
        match self {
            BatchLabels::Indices(v) => v.len(),
            BatchLabels::OneHot(m) => m.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Class index per row, recovered from one-hot rows when binarized.
    pub fn indices(&self) -> Vec<u32> {
        match self {
            BatchLabels::Indices(v) => v.clone(),
            BatchLabels::OneHot(m) => m
                .rows()
                .into_iter()
                .map(|row| row.iter().position(|v| *v == 1.0).unwrap_or(0) as u32)
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Batch {
    /// Preprocessed images stacked on axis 0, each in `layout`.
    pub images: Array4<f32>,
    pub labels: BatchLabels,
    pub layout: Layout,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.images.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Re-reads a closed store in contiguous chunks and yields preprocessed batches.
pub struct DatasetGenerator {
    reader: Option<Arc<StoreReader>>,
    chain: Arc<PreprocessorChain>,
    config: GeneratorConfig,
}

impl DatasetGenerator {
    pub fn open(
        path: impl AsRef<Path>,
        config: GeneratorConfig,
        chain: PreprocessorChain,
    ) -> DatasetResult<Self> {
        config.validate()?;
        if chain.expands() {
            return Err(DatasetError::Schema(format!(
                "generator chains must map one image to one image: {}",
                chain.describe()
            )));
        }
        let reader = StoreReader::open(path, config.read_mode)?;
        tracing::info!(
            path = %reader.path().display(),
            count = reader.count(),
            batch_size = config.batch_size,
            chunk = config.chunk_len(),
            shuffle = config.shuffle,
            chain = %chain.describe(),
            "opened dataset generator"
        );
        Ok(Self {
            reader: Some(Arc::new(reader)),
            chain: Arc::new(chain),
            config,
        })
    }

    fn reader(&self) -> DatasetResult<&Arc<StoreReader>> {
        self.reader
            .as_ref()
            .ok_or(DatasetError::Closed("dataset generator"))
    }

    pub fn count(&self) -> DatasetResult<usize> {
        Ok(self.reader()?.count())
    }

    pub fn label_names(&self) -> DatasetResult<Option<&[String]>> {
        Ok(self.reader()?.label_names())
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn chain(&self) -> &PreprocessorChain {
        &self.chain
    }

    /// Lazy stream of batches. Each call starts again from record 0.
    pub fn generate(&self, passes: Passes) -> DatasetResult<BatchStream> {
        let reader = Arc::clone(self.reader()?);
        Ok(BatchStream::new(
            reader,
            Arc::clone(&self.chain),
            self.config.clone(),
            passes,
        ))
    }

    /// Release the store. Streams already handed out keep their own handle.
    pub fn close(&mut self) -> DatasetResult<()> {
        match self.reader.take() {
            Some(reader) => {
                tracing::debug!(path = %reader.path().display(), "closed dataset generator");
                Ok(())
            }
            None => Err(DatasetError::Closed("dataset generator")),
        }
    }
}

/// Owned batch iterator; safe to move onto a prefetch thread.
pub struct BatchStream {
    reader: Arc<StoreReader>,
    chain: Arc<PreprocessorChain>,
    config: GeneratorConfig,
    passes: Passes,
    pass: usize,
    position: usize,
    pending: VecDeque<(Array3<f32>, u32)>,
    rng: StdRng,
    done: bool,
    processed: usize,
    last_logged: usize,
    log_every: Option<usize>,
    started: Instant,
}

impl BatchStream {
    fn new(
        reader: Arc<StoreReader>,
        chain: Arc<PreprocessorChain>,
        config: GeneratorConfig,
        passes: Passes,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let log_every = match std::env::var("CHUNKSET_LOG_EVERY") {
            Ok(val) => {
                if val.eq_ignore_ascii_case("off") || val.trim() == "0" {
                    None
                } else {
                    val.trim().parse::<usize>().ok().filter(|v| *v > 0)
                }
            }
            Err(_) => Some(DEFAULT_LOG_EVERY_RECORDS),
        };
        let done = reader.is_empty() || passes == Passes::Finite(0);
        Self {
            reader,
            chain,
            config,
            passes,
            pass: 0,
            position: 0,
            pending: VecDeque::new(),
            rng,
            done,
            processed: 0,
            last_logged: 0,
            log_every,
            started: Instant::now(),
        }
    }

    /// Batches yielded by one full traversal.
    pub fn batches_per_pass(&self) -> usize {
        self.reader.count().div_ceil(self.config.batch_size)
    }

    /// Completed traversals so far.
    pub fn pass(&self) -> usize {
        self.pass
    }

    pub fn prefetch(self, depth: usize) -> Prefetch<DatasetResult<Batch>> {
        prefetch(self, depth)
    }

    fn load_chunk(&mut self) -> DatasetResult<bool> {
        let count = self.reader.count();
        if self.position >= count {
            self.pass += 1;
            if let Passes::Finite(n) = self.passes {
                if self.pass >= n {
                    return Ok(false);
                }
            }
            self.position = 0;
        }
        let end = (self.position + self.config.chunk_len()).min(count);
        let (records, labels) = self.reader.read_range(self.position, end)?;
        tracing::debug!(start = self.position, end, pass = self.pass, "loaded chunk");
        self.position = end;
        let mut pairs: Vec<(Array3<f32>, u32)> = records.into_iter().zip(labels).collect();
        if self.config.shuffle {
            pairs.shuffle(&mut self.rng);
        }
        self.pending.extend(pairs);
        Ok(true)
    }

    fn next_batch(&mut self) -> DatasetResult<Option<Batch>> {
        if self.pending.is_empty() && !self.load_chunk()? {
            return Ok(None);
        }
        let take = self.config.batch_size.min(self.pending.len());
        let mut images = Vec::with_capacity(take);
        let mut labels = Vec::with_capacity(take);
        for (record, label) in self.pending.drain(..take) {
            images.push(self.chain.apply(record, &mut self.rng)?);
            labels.push(label);
        }
        let batch = self.assemble(images, labels)?;
        self.log_progress(take);
        Ok(Some(batch))
    }

    fn assemble(&self, images: Vec<Array3<f32>>, labels: Vec<u32>) -> DatasetResult<Batch> {
        let views: Vec<_> = images.iter().map(|img| img.view()).collect();
        let images = ndarray::stack(Axis(0), &views).map_err(|e| {
            DatasetError::Schema(format!("preprocessed images differ in shape: {e}"))
        })?;
        let labels = if self.config.binarize {
            let classes = self.config.num_classes;
            let mut one_hot = Array2::<f32>::zeros((labels.len(), classes));
            for (row, &label) in labels.iter().enumerate() {
                let col = label as usize;
                if col >= classes {
                    return Err(DatasetError::Schema(format!(
                        "label {label} out of range for {classes} classes"
                    )));
                }
                one_hot[[row, col]] = 1.0;
            }
            BatchLabels::OneHot(one_hot)
        } else {
            BatchLabels::Indices(labels)
        };
        Ok(Batch {
            images,
            labels,
            layout: self.chain.output_layout(),
        })
    }

    fn log_progress(&mut self, records: usize) {
        self.processed += records;
        let Some(every) = self.log_every else {
            return;
        };
        if self.processed - self.last_logged >= every {
            let secs = self.started.elapsed().as_secs_f64().max(1e-9);
            tracing::info!(
                path = %self.reader.path().display(),
                records = self.processed,
                pass = self.pass,
                records_per_sec = self.processed as f64 / secs,
                "generator progress"
            );
            self.last_logged = self.processed;
        }
    }
}

impl Iterator for BatchStream {
    type Item = DatasetResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
