//! On-disk layout of a chunked store (`CKS1`).
//!
//! ```text
//! [header: 80 bytes][records: N × H × W × C × dtype][labels: N × u32][label names][sha256: 32]
//! ```
//! All integers are little-endian. The label-name table and checksum are
//! appended on close; their offsets are zero while the store is being built.

use crate::types::{DatasetError, DatasetResult, RecordDType, RecordShape};
use ndarray::{Array3, ArrayView3};
use std::path::Path;

pub(crate) const MAGIC: &[u8; 4] = b"CKS1";
pub(crate) const FORMAT_VERSION: u32 = 1;
pub(crate) const HEADER_LEN: usize = 80;
pub(crate) const LABEL_BYTES: usize = std::mem::size_of::<u32>();
pub(crate) const CHECKSUM_LEN: usize = 32;

const STATE_BUILDING: u32 = 0;
const STATE_COMPLETE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StoreHeader {
    pub version: u32,
    pub dtype: RecordDType,
    pub complete: bool,
    pub shape: RecordShape,
    pub label_name_capacity: usize,
    pub count: usize,
    pub records_offset: u64,
    pub labels_offset: u64,
    pub names_offset: u64,
    pub checksum_offset: u64,
}

impl StoreHeader {
    pub fn new(
        shape: RecordShape,
        dtype: RecordDType,
        count: usize,
        label_name_capacity: usize,
        path: &Path,
    ) -> DatasetResult<Self> {
        let records_bytes = checked_record_bytes(shape, dtype)
            .and_then(|v| v.checked_mul(count))
            .ok_or_else(|| DatasetError::format(path, "overflow computing records region"))?;
        let labels_offset = (HEADER_LEN as u64)
            .checked_add(records_bytes as u64)
            .ok_or_else(|| DatasetError::format(path, "overflow computing labels offset"))?;
        Ok(Self {
            version: FORMAT_VERSION,
            dtype,
            complete: false,
            shape,
            label_name_capacity,
            count,
            records_offset: HEADER_LEN as u64,
            labels_offset,
            names_offset: 0,
            checksum_offset: 0,
        })
    }

    pub fn record_bytes(&self) -> usize {
        self.shape.elems() * self.dtype.size_of()
    }

    pub fn labels_end(&self) -> u64 {
        self.labels_offset + (self.count * LABEL_BYTES) as u64
    }

    pub fn record_offset(&self, index: usize) -> u64 {
        self.records_offset + (index * self.record_bytes()) as u64
    }

    pub fn label_offset(&self, index: usize) -> u64 {
        self.labels_offset + (index * LABEL_BYTES) as u64
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(MAGIC);
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..12].copy_from_slice(&self.dtype.code().to_le_bytes());
        let state = if self.complete {
            STATE_COMPLETE
        } else {
            STATE_BUILDING
        };
        out[12..16].copy_from_slice(&state.to_le_bytes());
        out[16..20].copy_from_slice(&(self.shape.height as u32).to_le_bytes());
        out[20..24].copy_from_slice(&(self.shape.width as u32).to_le_bytes());
        out[24..28].copy_from_slice(&(self.shape.channels as u32).to_le_bytes());
        out[28..32].copy_from_slice(&(self.label_name_capacity as u32).to_le_bytes());
        out[32..40].copy_from_slice(&(self.count as u64).to_le_bytes());
        out[40..48].copy_from_slice(&self.records_offset.to_le_bytes());
        out[48..56].copy_from_slice(&self.labels_offset.to_le_bytes());
        out[56..64].copy_from_slice(&self.names_offset.to_le_bytes());
        out[64..72].copy_from_slice(&self.checksum_offset.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8], path: &Path) -> DatasetResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(DatasetError::format(path, "store too small for header"));
        }
        if &data[0..4] != MAGIC {
            return Err(DatasetError::format(path, "bad magic"));
        }
        let version = read_u32_le(&data[4..8]);
        if version != FORMAT_VERSION {
            return Err(DatasetError::format(
                path,
                format!("unsupported format version {version}"),
            ));
        }
        let dtype_code = read_u32_le(&data[8..12]);
        let dtype = RecordDType::from_code(dtype_code)
            .ok_or_else(|| DatasetError::format(path, format!("unsupported dtype {dtype_code}")))?;
        let complete = match read_u32_le(&data[12..16]) {
            STATE_BUILDING => false,
            STATE_COMPLETE => true,
            other => {
                return Err(DatasetError::format(path, format!("unknown store state {other}")))
            }
        };
        let shape = RecordShape::new(
            read_u32_le(&data[16..20]) as usize,
            read_u32_le(&data[20..24]) as usize,
            read_u32_le(&data[24..28]) as usize,
        );
        match checked_record_bytes(shape, dtype) {
            None => return Err(DatasetError::format(path, "overflow computing record size")),
            Some(0) => return Err(DatasetError::format(path, "record shape has no elements")),
            Some(_) => {}
        }
        Ok(Self {
            version,
            dtype,
            complete,
            shape,
            label_name_capacity: read_u32_le(&data[28..32]) as usize,
            count: read_u64_le(&data[32..40]) as usize,
            records_offset: read_u64_le(&data[40..48]),
            labels_offset: read_u64_le(&data[48..56]),
            names_offset: read_u64_le(&data[56..64]),
            checksum_offset: read_u64_le(&data[64..72]),
        })
    }

    /// Checks that every region the header points at fits inside a file of `file_len` bytes.
    pub fn validate_len(&self, file_len: u64, path: &Path) -> DatasetResult<()> {
        let records_bytes = (self.count as u64)
            .checked_mul(self.record_bytes() as u64)
            .ok_or_else(|| DatasetError::format(path, "overflow computing records region"))?;
        let records_end = self
            .records_offset
            .checked_add(records_bytes)
            .ok_or_else(|| DatasetError::format(path, "overflow computing records end"))?;
        if records_end > self.labels_offset {
            return Err(DatasetError::format(path, "records region overlaps labels"));
        }
        let labels_end = (self.count as u64)
            .checked_mul(LABEL_BYTES as u64)
            .and_then(|v| self.labels_offset.checked_add(v))
            .ok_or_else(|| DatasetError::format(path, "overflow computing labels end"))?;
        if labels_end > file_len {
            return Err(DatasetError::format(path, "store truncated"));
        }
        if self.names_offset != 0 && self.names_offset >= file_len {
            return Err(DatasetError::format(path, "label-name table out of range"));
        }
        if self.checksum_offset != 0
            && self
                .checksum_offset
                .checked_add(CHECKSUM_LEN as u64)
                .map_or(true, |end| end > file_len)
        {
            return Err(DatasetError::format(path, "checksum out of range"));
        }
        Ok(())
    }
}

/// Bytes per record, or `None` when the shape overflows `usize`.
pub(crate) fn checked_record_bytes(shape: RecordShape, dtype: RecordDType) -> Option<usize> {
    shape
        .height
        .checked_mul(shape.width)
        .and_then(|v| v.checked_mul(shape.channels))
        .and_then(|v| v.checked_mul(dtype.size_of()))
}

pub(crate) fn read_u32_le(data: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(data);
    u32::from_le_bytes(arr)
}

pub(crate) fn read_u64_le(data: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(data);
    u64::from_le_bytes(arr)
}

/// Appends the encoded samples of one record in HWC order.
pub(crate) fn encode_record(record: &ArrayView3<f32>, dtype: RecordDType, out: &mut Vec<u8>) {
    match dtype {
        RecordDType::U8 => out.extend(record.iter().map(|v| v.round().clamp(0.0, 255.0) as u8)),
        RecordDType::F32 => {
            for v in record.iter() {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
}

pub(crate) fn decode_record(
    bytes: &[u8],
    dtype: RecordDType,
    shape: RecordShape,
) -> DatasetResult<Array3<f32>> {
    let values: Vec<f32> = match dtype {
        RecordDType::U8 => bytes.iter().map(|b| f32::from(*b)).collect(),
        RecordDType::F32 => bytes
            .chunks_exact(4)
            .map(|c| {
                let mut arr = [0u8; 4];
                arr.copy_from_slice(c);
                f32::from_le_bytes(arr)
            })
            .collect(),
    };
    if values.len() != shape.elems() {
        return Err(DatasetError::Dimension {
            expected: shape.elems(),
            actual: values.len(),
        });
    }
    Array3::from_shape_vec(shape.dims(), values)
        .map_err(|e| DatasetError::Schema(format!("record does not match shape {shape:?}: {e}")))
}

pub(crate) fn encode_label_names(names: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(names.len() as u32).to_le_bytes());
    for name in names {
        out.extend_from_slice(&(name.len() as u32).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
    }
    out
}

pub(crate) fn decode_label_names(data: &[u8], path: &Path) -> DatasetResult<Vec<String>> {
    if data.len() < 4 {
        return Err(DatasetError::format(path, "label-name table truncated"));
    }
    let count = read_u32_le(&data[0..4]) as usize;
    let mut names = Vec::with_capacity(count.min(1 << 16));
    let mut pos = 4usize;
    for i in 0..count {
        if pos + 4 > data.len() {
            return Err(DatasetError::format(path, format!("label name {i} truncated")));
        }
        let len = read_u32_le(&data[pos..pos + 4]) as usize;
        pos += 4;
        if pos + len > data.len() {
            return Err(DatasetError::format(path, format!("label name {i} truncated")));
        }
        let name = std::str::from_utf8(&data[pos..pos + len])
            .map_err(|e| DatasetError::format(path, format!("label name {i} is not utf-8: {e}")))?;
        names.push(name.to_string());
        pos += len;
    }
    Ok(names)
}
