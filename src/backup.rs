use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::apply::PatchEngine;
use crate::util::FileStore;

/// Inserted before the file extension to name the backup copy.
pub const BACKUP_MARKER: &str = "_backup";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("target file not found: {0}")]
    TargetMissing(PathBuf),
    #[error("a backup already exists: {0}")]
    AlreadyExists(PathBuf),
    #[error("no backup available: {0}")]
    NotFound(PathBuf),
    #[error("failed to copy {} to {}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove {}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("backup copy does not match the target file: {0}")]
    Verify(PathBuf),
}

/// Derive the backup location for `target`: the marker goes right before the
/// last `.` of the file name, or at the end when there is none.
///
/// `Game.exe` becomes `Game_backup.exe`, `data` becomes `data_backup`.
pub fn backup_path(target: &Path) -> PathBuf {
    let Some(name) = target.file_name() else {
        let mut raw = target.as_os_str().to_owned();
        raw.push(BACKUP_MARKER);
        return PathBuf::from(raw);
    };
    let bytes = name.as_encoded_bytes();
    let mut renamed = OsString::with_capacity(bytes.len() + BACKUP_MARKER.len());
    match bytes.iter().rposition(|&b| b == b'.') {
        Some(idx) => {
            // SAFETY: both halves come from `name` and are split right before
            // an ASCII '.', which is a valid boundary for the encoding.
            let (stem, ext) = unsafe {
                (
                    OsStr::from_encoded_bytes_unchecked(&bytes[..idx]),
                    OsStr::from_encoded_bytes_unchecked(&bytes[idx..]),
                )
            };
            renamed.push(stem);
            renamed.push(BACKUP_MARKER);
            renamed.push(ext);
        }
        None => {
            renamed.push(name);
            renamed.push(BACKUP_MARKER);
        }
    }
    target.with_file_name(renamed)
}

impl<F: FileStore> PatchEngine<'_, F> {
    pub fn backup_path(&self, dir: &Path) -> PathBuf {
        backup_path(&self.target_path(dir))
    }

    pub fn backup_exists(&self, dir: &Path) -> bool {
        self.fs.exists(&self.backup_path(dir))
    }

    /// Copy the target file into the backup slot. An existing backup is
    /// never overwritten.
    pub fn backup_create(&self, dir: &Path) -> Result<(), BackupError> {
        let target = self.target_path(dir);
        if !self.fs.exists(&target) {
            return Err(BackupError::TargetMissing(target));
        }
        let backup = backup_path(&target);
        if self.fs.exists(&backup) {
            return Err(BackupError::AlreadyExists(backup));
        }

        let copied = match self.fs.copy_new(&target, &backup) {
            Ok(copied) => copied,
            // Someone else's file: leave it alone.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(BackupError::AlreadyExists(backup));
            }
            Err(source) => {
                self.discard_backup(&backup);
                return Err(BackupError::Copy {
                    from: target,
                    to: backup,
                    source,
                });
            }
        };

        if let Err(e) = self.verify_copy(&target, &backup) {
            self.discard_backup(&backup);
            return Err(e);
        }

        info!(bytes = copied, "created backup {}", backup.display());
        Ok(())
    }

    /// Empty the slot after a failed create so a later attempt can retry.
    fn discard_backup(&self, backup: &Path) {
        if !self.fs.exists(backup) {
            return;
        }
        if let Err(e) = self.fs.remove(backup) {
            warn!("failed to discard bad backup {}: {e}", backup.display());
        }
    }

    fn verify_copy(&self, target: &Path, backup: &Path) -> Result<(), BackupError> {
        let hash = |path: &Path| {
            self.fs.content_hash(path).map_err(|source| BackupError::Copy {
                from: target.to_path_buf(),
                to: backup.to_path_buf(),
                source,
            })
        };
        if hash(target)? != hash(backup)? {
            return Err(BackupError::Verify(backup.to_path_buf()));
        }
        Ok(())
    }

    /// Replace the target file with the backup copy. The backup itself is
    /// kept.
    pub fn backup_restore(&self, dir: &Path) -> Result<(), BackupError> {
        let target = self.target_path(dir);
        let backup = backup_path(&target);
        if !self.fs.exists(&backup) {
            return Err(BackupError::NotFound(backup));
        }

        let removed = if self.fs.exists(&target) {
            self.fs.remove(&target)
        } else {
            Ok(())
        };
        // Copy even if the removal failed so the target is not left missing.
        let copied = self.fs.copy(&backup, &target);

        removed.map_err(|source| BackupError::Remove {
            path: target.clone(),
            source,
        })?;
        let bytes = copied.map_err(|source| BackupError::Copy {
            from: backup.clone(),
            to: target.clone(),
            source,
        })?;

        info!(bytes, "restored {} from backup", target.display());
        Ok(())
    }
}
