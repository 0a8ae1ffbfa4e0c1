use memmap2::Mmap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::Path;

/// The filesystem operations the engine and backup manager depend on.
///
/// Every call is scoped to a single path and is synchronous. Handles returned
/// by [`FileStore::open_rw`] are closed when dropped.
pub trait FileStore {
    type Handle: Read + Write + Seek;

    fn exists(&self, path: &Path) -> bool;

    fn size(&self, path: &Path) -> io::Result<u64>;

    /// Open an existing file for reading and writing without truncating it.
    fn open_rw(&self, path: &Path) -> io::Result<Self::Handle>;

    /// Copy `from` to `to`, replacing `to` if it exists. Returns the number
    /// of bytes copied.
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;

    /// Copy `from` to a new file at `to`. Fails with
    /// [`io::ErrorKind::AlreadyExists`] if `to` is already there.
    fn copy_new(&self, from: &Path, to: &Path) -> io::Result<u64>;

    fn remove(&self, path: &Path) -> io::Result<()>;

    /// BLAKE3 hash of the file's full contents.
    fn content_hash(&self, path: &Path) -> io::Result<[u8; 32]>;
}

/// [`FileStore`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl FileStore for LocalFs {
    type Handle = File;

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    fn open_rw(&self, path: &Path) -> io::Result<File> {
        OpenOptions::new().read(true).write(true).open(path)
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        std::fs::copy(from, to)
    }

    fn copy_new(&self, from: &Path, to: &Path) -> io::Result<u64> {
        let mut src = File::open(from)?;
        let mut dst = OpenOptions::new().write(true).create_new(true).open(to)?;
        let copied = io::copy(&mut src, &mut dst)?;
        dst.flush()?;
        Ok(copied)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn content_hash(&self, path: &Path) -> io::Result<[u8; 32]> {
        let map = mmap_file(path)?;
        Ok(hash_bytes(&map))
    }
}

/// Memory-map a file for read-only access.
///
/// # Safety
/// The mapping is read-only. Callers must not concurrently truncate or replace
/// the underlying file while the `Mmap` is live.
pub fn mmap_file(path: &Path) -> io::Result<Mmap> {
    let file = File::open(path)?;
    // SAFETY: read-only mapping; the tool assumes nobody else touches the file during a call.
    unsafe { Mmap::map(&file) }
}

/// Compute the BLAKE3 hash of a byte slice.
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}
