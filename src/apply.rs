use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::descriptor::{checksum_bytes, PatchDescriptor};
use crate::util::{FileStore, LocalFs};

/// Edit offsets at or above this are never addressed, whatever the file size.
pub const ADDRESS_CEILING: u64 = 1 << 31;

/// Index of `offset` in a buffer of `len` bytes, refusing anything at or
/// above [`ADDRESS_CEILING`].
fn buffer_index(offset: u64, len: usize) -> Option<usize> {
    if offset >= ADDRESS_CEILING {
        return None;
    }
    let idx = usize::try_from(offset).ok()?;
    (idx < len).then_some(idx)
}

fn buffer_capacity(size: u64) -> Result<usize, ApplyError> {
    usize::try_from(size).map_err(|_| ApplyError::Unknown("file size exceeds the address space"))
}

/// Independent switches for [`PatchEngine::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyFlags {
    /// Patch even when the bytes at the edit offsets match neither the
    /// original nor the patched values.
    pub force: bool,
    /// Classify and compute the result, but never write it back.
    pub dry_run: bool,
    /// Compare the whole file against the descriptor's checksum and report
    /// drift as [`Applied::SuccessModified`].
    pub verify_checksum: bool,
}

impl ApplyFlags {
    pub const NONE: ApplyFlags = ApplyFlags {
        force: false,
        dry_run: false,
        verify_checksum: false,
    };

    pub fn force(mut self, on: bool) -> Self {
        self.force = on;
        self
    }

    pub fn dry_run(mut self, on: bool) -> Self {
        self.dry_run = on;
        self
    }

    pub fn verify_checksum(mut self, on: bool) -> Self {
        self.verify_checksum = on;
        self
    }
}

impl Default for ApplyFlags {
    fn default() -> Self {
        Self::NONE.verify_checksum(true)
    }
}

/// Successful apply outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Success,
    /// Applied, but the file did not match the known unpatched checksum.
    SuccessModified,
}

impl fmt::Display for Applied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Applied::Success => f.write_str("Success."),
            Applied::SuccessModified => {
                f.write_str("Success. (Patch applied to modified target file)")
            }
        }
    }
}

/// Every way an apply can end without patching. The `Display` strings are
/// stable and meant to be shown to users as-is.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("Patch is already installed.")]
    AlreadyInstalled,
    #[error(
        "Target file is not compatible with this patch. Forcing the patch installation will \
         override this error but is not recommended."
    )]
    Incompatible { offset: u64 },
    #[error("Target file is not compatible with this patch.")]
    IncompatibleHard { size: u64 },
    #[error(
        "Target file not found. Please check whether you have selected the correct installation \
         directory."
    )]
    FileNotFound { path: PathBuf },
    #[error("Failed to read target file.")]
    FileReadFailed(#[source] io::Error),
    #[error("Failed to write target file.")]
    FileWriteFailed(#[source] io::Error),
    #[error("Unknown error.")]
    Unknown(&'static str),
}

impl ApplyError {
    /// Only soft incompatibility can be overridden with [`ApplyFlags::force`].
    pub fn is_forceable(&self) -> bool {
        matches!(self, ApplyError::Incompatible { .. })
    }
}

/// Stateless operations on one [`PatchDescriptor`]: apply, plus the backup
/// slot in [`crate::backup`].
pub struct PatchEngine<'a, F: FileStore = LocalFs> {
    pub(crate) descriptor: &'a PatchDescriptor,
    pub(crate) fs: F,
}

impl<'a> PatchEngine<'a, LocalFs> {
    pub fn new(descriptor: &'a PatchDescriptor) -> Self {
        Self::with_store(descriptor, LocalFs)
    }
}

impl<'a, F: FileStore> PatchEngine<'a, F> {
    pub fn with_store(descriptor: &'a PatchDescriptor, fs: F) -> Self {
        Self { descriptor, fs }
    }

    pub fn descriptor(&self) -> &PatchDescriptor {
        self.descriptor
    }

    pub fn relative_path(&self) -> &str {
        self.descriptor.relative_path()
    }

    /// Full path of the file this patch targets inside `dir`.
    pub fn target_path(&self, dir: &Path) -> PathBuf {
        dir.join(self.descriptor.relative_path())
    }

    /// Classify the target without touching it: a dry run with checksum
    /// verification.
    pub fn scan(&self, dir: &Path) -> Result<Applied, ApplyError> {
        self.apply(dir, ApplyFlags::default().dry_run(true))
    }

    /// Classify the target file and, if it is unpatched (or `force` is set),
    /// write all edits back in one go.
    ///
    /// The file state is read fresh on every call.
    pub fn apply(&self, dir: &Path, flags: ApplyFlags) -> Result<Applied, ApplyError> {
        let path = self.target_path(dir);
        if !self.fs.exists(&path) {
            return Err(ApplyError::FileNotFound { path });
        }

        let size = self.fs.size(&path).map_err(ApplyError::FileReadFailed)?;
        let largest = self.descriptor.largest_offset();
        if size > self.descriptor.max_size() || size <= largest {
            warn!(
                size,
                max_size = self.descriptor.max_size(),
                largest_offset = largest,
                "target has the wrong size: {}",
                path.display()
            );
            return Err(ApplyError::IncompatibleHard { size });
        }

        let mut file = self.fs.open_rw(&path).map_err(ApplyError::FileReadFailed)?;
        let mut data = Vec::with_capacity(buffer_capacity(size)?);
        file.read_to_end(&mut data)
            .map_err(ApplyError::FileReadFailed)?;
        if data.len() as u64 != size {
            return Err(ApplyError::Unknown("file size changed while reading"));
        }
        file.seek(SeekFrom::Start(0))
            .map_err(|_| ApplyError::Unknown("failed to rewind target file"))?;

        let checksum_matches = if flags.verify_checksum {
            let matches = self.descriptor.checksum() == Some(&checksum_bytes(&data));
            if !matches {
                info!("target does not match the reference checksum: {}", path.display());
            }
            matches
        } else {
            true
        };

        let mut all_original = true;
        let mut all_patched = true;
        for edit in self.descriptor.edits() {
            let idx = buffer_index(edit.offset, data.len())
                .ok_or(ApplyError::Unknown("edit offset outside of the file buffer"))?;
            let current = data[idx];
            all_original &= current == edit.original;
            all_patched &= current == edit.patched;

            // Unforced, the bytes seen so far must be either all unpatched or
            // all patched.
            if !flags.force && !all_original && !all_patched {
                warn!(
                    offset = edit.offset,
                    found = current,
                    original = edit.original,
                    patched = edit.patched,
                    "unexpected byte in target"
                );
                return Err(ApplyError::Incompatible {
                    offset: edit.offset,
                });
            }
            data[idx] = edit.patched;
        }

        if all_patched {
            debug!("all edits already present in {}", path.display());
            return Err(ApplyError::AlreadyInstalled);
        }

        if flags.dry_run {
            debug!("dry run, leaving {} untouched", path.display());
        } else {
            file.write_all(&data)
                .and_then(|()| file.flush())
                .map_err(ApplyError::FileWriteFailed)?;
            info!(
                edits = self.descriptor.edits().len(),
                forced = flags.force && !all_original,
                "patched {}",
                path.display()
            );
        }

        if flags.verify_checksum && !checksum_matches {
            Ok(Applied::SuccessModified)
        } else {
            Ok(Applied::Success)
        }
    }
}
