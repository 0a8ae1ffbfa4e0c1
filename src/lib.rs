//! Apply a fixed set of single-byte edits to one executable, refusing files
//! that are neither the known unpatched build nor already patched, and keep a
//! single backup copy next to it.

pub mod apply;
pub mod backup;
pub mod descriptor;
pub mod manifest;
pub mod patch_format;
pub mod util;

pub use apply::{Applied, ApplyError, ApplyFlags, PatchEngine};
pub use backup::BackupError;
pub use descriptor::{ByteEdit, PatchDescriptor};
