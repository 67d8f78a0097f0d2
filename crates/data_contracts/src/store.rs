use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Element type used for the records region of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordDType {
    U8,
    F32,
}

impl RecordDType {
    pub fn code(&self) -> u32 {
        match self {
            RecordDType::U8 => 0,
            RecordDType::F32 => 1,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(RecordDType::U8),
            1 => Some(RecordDType::F32),
            _ => None,
        }
    }

    pub fn size_of(&self) -> usize {
        match self {
            RecordDType::U8 => 1,
            RecordDType::F32 => std::mem::size_of::<f32>(),
        }
    }
}

/// Shape of one record, height × width × channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl RecordShape {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    pub fn elems(&self) -> usize {
        self.height * self.width * self.channels
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        (self.height, self.width, self.channels)
    }

    pub fn is_empty(&self) -> bool {
        self.elems() == 0
    }
}

/// Summary of a closed store, emitted by the writer on close and by readers on request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDescriptor {
    pub path: PathBuf,
    pub format_version: u32,
    pub dtype: RecordDType,
    pub shape: RecordShape,
    pub count: usize,
    pub label_names: Option<Vec<String>>,
    /// Hex-encoded SHA256 over the records and labels regions.
    pub checksum_sha256: Option<String>,
}

impl StoreDescriptor {
    pub fn num_classes(&self) -> Option<usize> {
        self.label_names.as_ref().map(|n| n.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtype_codes_round_trip() {
        for dtype in [RecordDType::U8, RecordDType::F32] {
            assert_eq!(RecordDType::from_code(dtype.code()), Some(dtype));
        }
        assert_eq!(RecordDType::from_code(7), None);
    }

    #[test]
    fn shape_counts_elements() {
        let shape = RecordShape::new(4, 5, 3);
        assert_eq!(shape.elems(), 60);
        assert!(!shape.is_empty());
        assert!(RecordShape::new(0, 5, 3).is_empty());
    }
}
