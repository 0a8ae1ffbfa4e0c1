use md5::{Digest, Md5};

use crate::patch_format::{self, ParseError};

/// Default file size ceiling: 256 MiB.
pub const DEFAULT_MAX_SIZE: u64 = 1 << 28;

/// MD5 digest of the whole unpatched file.
pub type Checksum = [u8; 16];

/// Compute the reference checksum of a buffer.
pub fn checksum_bytes(data: &[u8]) -> Checksum {
    let digest = Md5::digest(data);
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

/// A single `(offset, expected original byte, new byte)` edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteEdit {
    pub offset: u64,
    pub original: u8,
    pub patched: u8,
}

impl ByteEdit {
    pub fn new(offset: u64, original: u8, patched: u8) -> Self {
        Self {
            offset,
            original,
            patched,
        }
    }
}

/// Everything needed to patch one file: where it lives relative to the
/// installation directory, which bytes change, and what the unpatched file
/// is expected to look like.
///
/// Built once by a loader and only read afterwards.
#[derive(Debug, Clone)]
pub struct PatchDescriptor {
    relative_path: String,
    edits: Vec<ByteEdit>,
    checksum: Option<Checksum>,
    max_size: u64,
}

impl PatchDescriptor {
    pub fn new(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            edits: Vec::new(),
            checksum: None,
            max_size: DEFAULT_MAX_SIZE,
        }
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn set_relative_path(&mut self, relative_path: impl Into<String>) {
        self.relative_path = relative_path.into();
    }

    /// Edits in declaration order.
    pub fn edits(&self) -> &[ByteEdit] {
        &self.edits
    }

    pub fn clear_edits(&mut self) {
        self.edits.clear();
    }

    pub fn add_edit(&mut self, offset: u64, original: u8, patched: u8) {
        self.edits.push(ByteEdit::new(offset, original, patched));
    }

    /// Append the edits described by `.1337` text, subtracting `base_offset`
    /// from every address.
    ///
    /// All-or-nothing: if any line is rejected, the edit list is left exactly
    /// as it was before the call. Returns the number of edits added.
    pub fn add_edits_from_1337(&mut self, text: &str, base_offset: u64) -> Result<usize, ParseError> {
        let before = self.edits.len();
        match patch_format::parse_into(text, base_offset, &mut self.edits) {
            Ok(()) => Ok(self.edits.len() - before),
            Err(e) => {
                tracing::debug!(
                    discarded = self.edits.len() - before,
                    "rolling back partially parsed edits: {e}"
                );
                self.edits.truncate(before);
                Err(e)
            }
        }
    }

    pub fn checksum(&self) -> Option<&Checksum> {
        self.checksum.as_ref()
    }

    pub fn set_checksum(&mut self, checksum: Checksum) {
        self.checksum = Some(checksum);
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn set_max_size(&mut self, max_size: u64) {
        self.max_size = max_size;
    }

    /// Highest offset touched by any edit (0 when there are none).
    pub fn largest_offset(&self) -> u64 {
        self.edits.iter().map(|e| e.offset).max().unwrap_or(0)
    }
}
