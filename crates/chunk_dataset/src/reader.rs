//! Read-only access to closed `CKS1` stores.

use crate::format::{
    decode_label_names, decode_record, read_u32_le, StoreHeader, CHECKSUM_LEN, HEADER_LEN,
    LABEL_BYTES,
};
use crate::types::{DatasetError, DatasetResult, ReadMode, RecordDType, RecordShape};
use data_contracts::StoreDescriptor;
use memmap2::{Mmap, MmapOptions};
use ndarray::Array3;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

enum StoreBacking {
    Mmap(Mmap),
    /// Reopened per read; nothing stays resident between chunks.
    Streamed,
}

pub struct StoreReader {
    path: PathBuf,
    header: StoreHeader,
    label_names: Option<Vec<String>>,
    backing: StoreBacking,
}

impl std::fmt::Debug for StoreReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreReader")
            .field("path", &self.path)
            .field("count", &self.header.count)
            .field("shape", &self.header.shape)
            .field("mode", &self.mode())
            .finish()
    }
}

impl StoreReader {
    pub fn open(path: impl AsRef<Path>, mode: ReadMode) -> DatasetResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| DatasetError::io(&path, e))?;
        let file_len = file
            .metadata()
            .map_err(|e| DatasetError::io(&path, e))?
            .len();
        let (header, label_names, backing) = match mode {
            ReadMode::Mmap => {
                let mmap = unsafe {
                    MmapOptions::new()
                        .map(&file)
                        .map_err(|e| DatasetError::io(&path, e))?
                };
                let header = StoreHeader::decode(&mmap[..], &path)?;
                check_header(&header, file_len, &path)?;
                let names = if header.names_offset != 0 {
                    let start = header.names_offset as usize;
                    let end = header.checksum_offset as usize;
                    if end < start {
                        return Err(DatasetError::format(&path, "label-name table out of range"));
                    }
                    Some(decode_label_names(&mmap[start..end], &path)?)
                } else {
                    None
                };
                (header, names, StoreBacking::Mmap(mmap))
            }
            ReadMode::Streamed => {
                let mut file = BufReader::new(file);
                let mut raw = [0u8; HEADER_LEN];
                file.read_exact(&mut raw)
                    .map_err(|_| DatasetError::format(&path, "store too small for header"))?;
                let header = StoreHeader::decode(&raw, &path)?;
                check_header(&header, file_len, &path)?;
                let names = if header.names_offset != 0 {
                    if header.checksum_offset < header.names_offset {
                        return Err(DatasetError::format(&path, "label-name table out of range"));
                    }
                    let len = (header.checksum_offset - header.names_offset) as usize;
                    let table = read_region(&mut file, header.names_offset, len, &path)?;
                    Some(decode_label_names(&table, &path)?)
                } else {
                    None
                };
                (header, names, StoreBacking::Streamed)
            }
        };
        tracing::debug!(
            path = %path.display(),
            count = header.count,
            mode = ?mode,
            "opened dataset store"
        );
        Ok(Self {
            path,
            header,
            label_names,
            backing,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn count(&self) -> usize {
        self.header.count
    }

    pub fn is_empty(&self) -> bool {
        self.header.count == 0
    }

    pub fn shape(&self) -> RecordShape {
        self.header.shape
    }

    pub fn dtype(&self) -> RecordDType {
        self.header.dtype
    }

    pub fn label_names(&self) -> Option<&[String]> {
        self.label_names.as_deref()
    }

    pub fn mode(&self) -> ReadMode {
        match self.backing {
            StoreBacking::Mmap(_) => ReadMode::Mmap,
            StoreBacking::Streamed => ReadMode::Streamed,
        }
    }

    /// Records and labels for the index range `start..end`, in store order.
    pub fn read_range(
        &self,
        start: usize,
        end: usize,
    ) -> DatasetResult<(Vec<Array3<f32>>, Vec<u32>)> {
        if start > end || end > self.header.count {
            return Err(DatasetError::Precondition(format!(
                "range {start}..{end} outside store of {} records",
                self.header.count
            )));
        }
        let n = end - start;
        if n == 0 {
            return Ok((Vec::new(), Vec::new()));
        }
        let record_bytes = self.header.record_bytes();
        let records_start = self.header.record_offset(start);
        let labels_start = self.header.label_offset(start);
        let mut records = Vec::with_capacity(n);
        let labels: Vec<u32> = match &self.backing {
            StoreBacking::Mmap(mmap) => {
                let rs = records_start as usize;
                let region = &mmap[rs..rs + n * record_bytes];
                for bytes in region.chunks_exact(record_bytes) {
                    records.push(decode_record(bytes, self.header.dtype, self.header.shape)?);
                }
                let ls = labels_start as usize;
                mmap[ls..ls + n * LABEL_BYTES]
                    .chunks_exact(LABEL_BYTES)
                    .map(read_u32_le)
                    .collect()
            }
            StoreBacking::Streamed => {
                let mut file = self.open_file()?;
                let region = read_region(&mut file, records_start, n * record_bytes, &self.path)?;
                for bytes in region.chunks_exact(record_bytes) {
                    records.push(decode_record(bytes, self.header.dtype, self.header.shape)?);
                }
                read_region(&mut file, labels_start, n * LABEL_BYTES, &self.path)?
                    .chunks_exact(LABEL_BYTES)
                    .map(read_u32_le)
                    .collect()
            }
        };
        Ok((records, labels))
    }

    pub fn labels(&self) -> DatasetResult<Vec<u32>> {
        let start = self.header.labels_offset;
        let len = self.header.count * LABEL_BYTES;
        let bytes = match &self.backing {
            StoreBacking::Mmap(mmap) => mmap[start as usize..start as usize + len].to_vec(),
            StoreBacking::Streamed => read_region(&mut self.open_file()?, start, len, &self.path)?,
        };
        Ok(bytes.chunks_exact(LABEL_BYTES).map(read_u32_le).collect())
    }

    fn stored_checksum(&self) -> DatasetResult<Option<[u8; CHECKSUM_LEN]>> {
        if self.header.checksum_offset == 0 {
            return Ok(None);
        }
        let offset = self.header.checksum_offset;
        let mut out = [0u8; CHECKSUM_LEN];
        match &self.backing {
            StoreBacking::Mmap(mmap) => {
                out.copy_from_slice(&mmap[offset as usize..offset as usize + CHECKSUM_LEN]);
            }
            StoreBacking::Streamed => {
                out.copy_from_slice(&read_region(
                    &mut self.open_file()?,
                    offset,
                    CHECKSUM_LEN,
                    &self.path,
                )?);
            }
        }
        Ok(Some(out))
    }

    /// Recompute the SHA256 over the records and labels regions and compare it with
    /// the stored digest. Returns `Ok(false)` on mismatch.
    pub fn verify_checksum(&self) -> DatasetResult<bool> {
        let Some(expected) = self.stored_checksum()? else {
            return Err(DatasetError::format(&self.path, "store has no checksum"));
        };
        let start = self.header.records_offset;
        let end = self.header.labels_end();
        let mut hasher = Sha256::new();
        match &self.backing {
            StoreBacking::Mmap(mmap) => hasher.update(&mmap[start as usize..end as usize]),
            StoreBacking::Streamed => {
                let mut file = self.open_file()?;
                file.seek(SeekFrom::Start(start))
                    .map_err(|e| DatasetError::io(&self.path, e))?;
                let mut remaining = (end - start) as usize;
                let mut buf = vec![0u8; remaining.min(1 << 16)];
                while remaining > 0 {
                    let n = remaining.min(buf.len());
                    file.read_exact(&mut buf[..n])
                        .map_err(|e| DatasetError::io(&self.path, e))?;
                    hasher.update(&buf[..n]);
                    remaining -= n;
                }
            }
        }
        let actual = hasher.finalize();
        let ok = actual.as_slice() == expected.as_slice();
        if !ok {
            tracing::warn!(path = %self.path.display(), "store checksum mismatch");
        }
        Ok(ok)
    }

    pub fn describe(&self) -> DatasetResult<StoreDescriptor> {
        let checksum = self.stored_checksum()?.map(|bytes| {
            bytes.iter().map(|b| format!("{b:02x}")).collect::<String>()
        });
        Ok(StoreDescriptor {
            path: self.path.clone(),
            format_version: self.header.version,
            dtype: self.header.dtype,
            shape: self.header.shape,
            count: self.header.count,
            label_names: self.label_names.clone(),
            checksum_sha256: checksum,
        })
    }

    /// Write [`StoreReader::describe`] as pretty JSON next to the store.
    pub fn save_descriptor(&self, path: &Path) -> DatasetResult<StoreDescriptor> {
        let desc = self.describe()?;
        let json = serde_json::to_vec_pretty(&desc).map_err(|e| DatasetError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, json).map_err(|e| DatasetError::io(path, e))?;
        Ok(desc)
    }

    fn open_file(&self) -> DatasetResult<BufReader<File>> {
        File::open(&self.path)
            .map(BufReader::new)
            .map_err(|e| DatasetError::io(&self.path, e))
    }
}

fn check_header(header: &StoreHeader, file_len: u64, path: &Path) -> DatasetResult<()> {
    if !header.complete {
        return Err(DatasetError::format(path, "store was never closed"));
    }
    header.validate_len(file_len, path)
}

fn read_region<R: Read + Seek>(
    file: &mut R,
    offset: u64,
    len: usize,
    path: &Path,
) -> DatasetResult<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| DatasetError::io(path, e))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)
        .map_err(|e| DatasetError::io(path, e))?;
    Ok(buf)
}
