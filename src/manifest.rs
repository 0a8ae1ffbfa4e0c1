//! TOML manifest describing one patch.
//!
//! ```toml
//! path        = "Titanfall2.exe"
//! checksum    = "0123456789abcdef0123456789abcdef"
//! base_offset = 0x140000000
//! edits_file  = "delta_buf.1337"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::descriptor::{Checksum, PatchDescriptor, DEFAULT_MAX_SIZE};
use crate::patch_format::ParseError;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid manifest")]
    Toml(#[from] toml::de::Error),
    #[error("manifest must set exactly one of `edits` and `edits_file`")]
    EditsSource,
    #[error("checksum is not valid hex")]
    ChecksumHex(#[from] hex::FromHexError),
    #[error("checksum must be 16 bytes, got {0}")]
    ChecksumLength(usize),
    #[error("patch contains no edits")]
    Empty,
    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    path: String,
    checksum: Option<String>,
    #[serde(default)]
    base_offset: u64,
    #[serde(default = "default_max_size")]
    max_size: u64,
    edits: Option<String>,
    edits_file: Option<PathBuf>,
}

fn default_max_size() -> u64 {
    DEFAULT_MAX_SIZE
}

fn parse_checksum(text: &str) -> Result<Checksum, ManifestError> {
    let bytes = hex::decode(text.trim())?;
    Checksum::try_from(bytes.as_slice()).map_err(|_| ManifestError::ChecksumLength(bytes.len()))
}

/// Build a descriptor from manifest text. `base_dir` resolves `edits_file`.
pub fn from_str(text: &str, base_dir: &Path) -> Result<PatchDescriptor, ManifestError> {
    let raw: RawManifest = toml::from_str(text)?;

    let edits = match (raw.edits, raw.edits_file) {
        (Some(inline), None) => inline,
        (None, Some(file)) => {
            let path = base_dir.join(file);
            std::fs::read_to_string(&path).map_err(|source| ManifestError::Read { path, source })?
        }
        _ => return Err(ManifestError::EditsSource),
    };

    let mut descriptor = PatchDescriptor::new(raw.path);
    descriptor.set_max_size(raw.max_size);
    if let Some(checksum) = raw.checksum.as_deref() {
        descriptor.set_checksum(parse_checksum(checksum)?);
    }
    if descriptor.add_edits_from_1337(&edits, raw.base_offset)? == 0 {
        return Err(ManifestError::Empty);
    }

    tracing::debug!(
        path = descriptor.relative_path(),
        edits = descriptor.edits().len(),
        "loaded patch manifest"
    );
    Ok(descriptor)
}

/// Load a manifest file; `edits_file` is resolved next to it.
pub fn load(path: &Path) -> Result<PatchDescriptor, ManifestError> {
    let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    from_str(&text, base_dir)
}
