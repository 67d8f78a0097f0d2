//! Buffered, fixed-capacity writer for `CKS1` stores.

use crate::format::{encode_label_names, encode_record, StoreHeader, CHECKSUM_LEN};
use crate::types::{DatasetError, DatasetResult, RecordDType, RecordShape};
use data_contracts::StoreDescriptor;
use ndarray::Array3;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub path: PathBuf,
    /// Number of records the store will hold once closed.
    pub total_count: usize,
    pub record_shape: RecordShape,
    pub dtype: RecordDType,
    /// Maximum number of label names; 0 means no limit.
    pub label_name_capacity: usize,
    /// Records buffered before a flush.
    pub chunk_size: usize,
}

impl WriterConfig {
    pub fn new(path: impl Into<PathBuf>, total_count: usize, record_shape: RecordShape) -> Self {
        Self {
            path: path.into(),
            total_count,
            record_shape,
            dtype: RecordDType::F32,
            label_name_capacity: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_dtype(mut self, dtype: RecordDType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_label_name_capacity(mut self, capacity: usize) -> Self {
        self.label_name_capacity = capacity;
        self
    }
}

#[derive(Debug)]
enum WriterState {
    Open,
    Poisoned(String),
    Closed,
}

/// Streams records into a pre-sized store file, `chunk_size` records at a time.
///
/// The header is written with state "building" on create and only marked
/// complete by a successful [`DatasetWriter::close`].
pub struct DatasetWriter {
    path: PathBuf,
    file: Option<File>,
    header: StoreHeader,
    chunk_size: usize,
    cursor: usize,
    buffered: usize,
    record_buf: Vec<u8>,
    label_buf: Vec<u8>,
    label_names: Option<Vec<String>>,
    records_hasher: Sha256,
    state: WriterState,
}

impl DatasetWriter {
    pub fn create(config: WriterConfig) -> DatasetResult<Self> {
        if config.chunk_size == 0 {
            return Err(DatasetError::Schema("chunk_size must be greater than zero".into()));
        }
        if config.record_shape.is_empty() {
            return Err(DatasetError::Schema(format!(
                "record shape {:?} has no elements",
                config.record_shape
            )));
        }
        let path = config.path;
        let header = StoreHeader::new(
            config.record_shape,
            config.dtype,
            config.total_count,
            config.label_name_capacity,
            &path,
        )?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| DatasetError::io(parent, e))?;
            }
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| DatasetError::io(&path, e))?;
        file.set_len(header.labels_end())
            .map_err(|e| DatasetError::io(&path, e))?;
        file.write_all(&header.encode())
            .map_err(|e| DatasetError::io(&path, e))?;
        tracing::info!(
            path = %path.display(),
            count = config.total_count,
            shape = ?config.record_shape.dims(),
            dtype = ?config.dtype,
            chunk_size = config.chunk_size,
            "created dataset store"
        );
        let chunk_size = config.chunk_size;
        Ok(Self {
            path,
            file: Some(file),
            record_buf: Vec::with_capacity(chunk_size.min(4096) * header.record_bytes()),
            label_buf: Vec::with_capacity(chunk_size.min(4096) * 4),
            header,
            chunk_size,
            cursor: 0,
            buffered: 0,
            label_names: None,
            records_hasher: Sha256::new(),
            state: WriterState::Open,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn total_count(&self) -> usize {
        self.header.count
    }

    /// Records already flushed to disk.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Records waiting in the write buffer.
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, WriterState::Closed)
    }

    fn ensure_open(&self) -> DatasetResult<()> {
        match &self.state {
            WriterState::Open => Ok(()),
            WriterState::Poisoned(reason) => Err(DatasetError::State(format!(
                "writer for {} failed earlier: {reason}",
                self.path.display()
            ))),
            WriterState::Closed => Err(DatasetError::Closed("dataset writer")),
        }
    }

    /// Append records with their labels.
    ///
    /// The whole slice is validated before anything is buffered, so a validation
    /// error leaves the writer untouched. A flush that fails partway through keeps
    /// the chunks already written and poisons the writer.
    pub fn add(&mut self, records: &[Array3<f32>], labels: &[u32]) -> DatasetResult<()> {
        self.ensure_open()?;
        if records.len() != labels.len() {
            return Err(DatasetError::Schema(format!(
                "{} records but {} labels",
                records.len(),
                labels.len()
            )));
        }
        let expected = self.header.shape.dims();
        if let Some((i, bad)) = records.iter().enumerate().find(|(_, r)| r.dim() != expected) {
            return Err(DatasetError::Schema(format!(
                "record {i} has shape {:?}, store expects {expected:?}",
                bad.dim()
            )));
        }
        let requested = self.cursor + self.buffered + records.len();
        if requested > self.header.count {
            return Err(DatasetError::Capacity {
                requested,
                declared: self.header.count,
            });
        }
        for (record, label) in records.iter().zip(labels) {
            encode_record(&record.view(), self.header.dtype, &mut self.record_buf);
            self.label_buf.extend_from_slice(&label.to_le_bytes());
            self.buffered += 1;
            if self.buffered >= self.chunk_size {
                self.flush()?;
            }
        }
        Ok(())
    }

    pub fn add_one(&mut self, record: Array3<f32>, label: u32) -> DatasetResult<()> {
        self.add(std::slice::from_ref(&record), &[label])
    }

    /// Attach the label-name table. Allowed once, before close.
    pub fn store_label_names<S: AsRef<str>>(&mut self, names: &[S]) -> DatasetResult<()> {
        self.ensure_open()?;
        if self.label_names.is_some() {
            return Err(DatasetError::State("label names already stored".into()));
        }
        let capacity = self.header.label_name_capacity;
        if capacity > 0 && names.len() > capacity {
            return Err(DatasetError::Capacity {
                requested: names.len(),
                declared: capacity,
            });
        }
        self.label_names = Some(names.iter().map(|n| n.as_ref().to_string()).collect());
        Ok(())
    }

    fn poison(&mut self, err: DatasetError) -> DatasetError {
        tracing::error!(path = %self.path.display(), error = %err, "dataset writer poisoned");
        self.state = WriterState::Poisoned(err.to_string());
        err
    }

    fn flush(&mut self) -> DatasetResult<()> {
        if self.buffered == 0 {
            return Ok(());
        }
        let record_offset = self.header.record_offset(self.cursor);
        let label_offset = self.header.label_offset(self.cursor);
        let result = match self.file.as_mut() {
            Some(file) => write_at(file, record_offset, &self.record_buf)
                .and_then(|_| write_at(file, label_offset, &self.label_buf)),
            None => Err(std::io::Error::other("store file already released")),
        };
        if let Err(e) = result {
            let err = DatasetError::io(&self.path, e);
            return Err(self.poison(err));
        }
        self.records_hasher.update(&self.record_buf);
        tracing::debug!(
            path = %self.path.display(),
            start = self.cursor,
            records = self.buffered,
            "flushed chunk"
        );
        self.cursor += self.buffered;
        self.buffered = 0;
        self.record_buf.clear();
        self.label_buf.clear();
        Ok(())
    }

    /// Flush, seal and sync the store. Fails with `State` if fewer records than
    /// declared were added; the writer stays open so the caller can finish.
    pub fn close(&mut self) -> DatasetResult<StoreDescriptor> {
        self.ensure_open()?;
        self.flush()?;
        if self.cursor != self.header.count {
            return Err(DatasetError::State(format!(
                "store {} declares {} records but only {} were written",
                self.path.display(),
                self.header.count,
                self.cursor
            )));
        }
        let checksum = match self.seal() {
            Ok(checksum) => checksum,
            Err(e) => {
                let err = DatasetError::io(&self.path, e);
                return Err(self.poison(err));
            }
        };
        self.file = None;
        self.state = WriterState::Closed;
        tracing::info!(
            path = %self.path.display(),
            count = self.header.count,
            checksum = %checksum,
            "closed dataset store"
        );
        Ok(StoreDescriptor {
            path: self.path.clone(),
            format_version: self.header.version,
            dtype: self.header.dtype,
            shape: self.header.shape,
            count: self.header.count,
            label_names: self.label_names.clone(),
            checksum_sha256: Some(checksum),
        })
    }

    fn seal(&mut self) -> std::io::Result<String> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| std::io::Error::other("store file already released"))?;

        let mut hasher = self.records_hasher.clone();
        file.seek(SeekFrom::Start(self.header.labels_offset))?;
        let mut remaining = (self.header.labels_end() - self.header.labels_offset) as usize;
        let mut buf = vec![0u8; remaining.min(1 << 16)];
        while remaining > 0 {
            let n = remaining.min(buf.len());
            file.read_exact(&mut buf[..n])?;
            hasher.update(&buf[..n]);
            remaining -= n;
        }
        let digest = hasher.finalize();

        let mut tail_offset = self.header.labels_end();
        if let Some(names) = &self.label_names {
            let table = encode_label_names(names);
            write_at(file, tail_offset, &table)?;
            self.header.names_offset = tail_offset;
            tail_offset += table.len() as u64;
        }
        write_at(file, tail_offset, &digest)?;
        self.header.checksum_offset = tail_offset;
        file.set_len(tail_offset + CHECKSUM_LEN as u64)?;

        self.header.complete = true;
        write_at(file, 0, &self.header.encode())?;
        file.sync_all()?;
        Ok(format!("{:x}", digest))
    }
}

impl Drop for DatasetWriter {
    fn drop(&mut self) {
        if matches!(self.state, WriterState::Open) {
            tracing::warn!(
                path = %self.path.display(),
                written = self.cursor,
                declared = self.header.count,
                "dataset writer dropped without close; store left incomplete"
            );
        }
    }
}

fn write_at(file: &mut File, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)
}
