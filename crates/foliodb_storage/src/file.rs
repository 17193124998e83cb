//! File-based storage backend and the fsync discipline around it.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Returns the temporary companion file used by crash-safe rewrites.
pub fn temp_file_name(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push("~");
    PathBuf::from(name)
}

/// Opens a file (or directory) and fsyncs it.
///
/// Directories are opened read-only. On platforms that refuse to fsync
/// a directory the flush is a silent no-op; this limits durability only
/// for the very first creation of a datafile.
pub fn flush_to_storage(path: &Path, is_dir: bool) -> StorageResult<()> {
    let file = if is_dir {
        File::open(path)?
    } else {
        OpenOptions::new().read(true).write(true).open(path)?
    };
    match file.sync_all() {
        Ok(()) => Ok(()),
        Err(e)
            if is_dir
                && matches!(
                    e.kind(),
                    ErrorKind::PermissionDenied | ErrorKind::InvalidInput | ErrorKind::Unsupported
                ) =>
        {
            tracing::debug!(path = %path.display(), "directory fsync not supported, skipping");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Fully replaces `path` with `data`, surviving a crash at any point.
///
/// Sequence: fsync the parent directory, fsync the current file if it
/// exists, write `path~`, fsync it, rename it over `path`, fsync the
/// parent directory again. The rename is atomic on POSIX, so a reader
/// always sees either the old contents or the new ones.
pub fn crash_safe_write_file(path: &Path, data: &[u8]) -> StorageResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        Some(_) => Path::new("."),
        None => return Err(StorageError::bad_path(path)),
    };
    let temp = temp_file_name(path);

    flush_to_storage(parent, true)?;
    if path.exists() {
        flush_to_storage(path, false)?;
    }

    let mut file = File::create(&temp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&temp, path)?;
    flush_to_storage(parent, true)?;
    Ok(())
}

/// Guarantees a usable datafile at `path`.
///
/// If `path` exists it is left alone. If only `path~` exists, a prior
/// rewrite crashed after the temporary file was durable but before the
/// rename; the temporary file holds a complete state and is promoted.
/// Otherwise an empty datafile is created.
pub fn ensure_datafile_integrity(path: &Path) -> StorageResult<()> {
    if path.exists() {
        return Ok(());
    }
    let temp = temp_file_name(path);
    if temp.exists() {
        tracing::warn!(path = %path.display(), "recovering datafile from temporary companion");
        std::fs::rename(&temp, path)?;
        return Ok(());
    }
    File::create(path)?;
    Ok(())
}

/// On-disk backend for one datafile.
///
/// Appends open the file per call in append mode and fsync before
/// returning; rewrites go through [`crash_safe_write_file`].
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Creates a backend for `path`, creating parent directories.
    ///
    /// The datafile itself is not created until `ensure_integrity`.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Returns the path to the underlying datafile.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn ensure_integrity(&mut self) -> StorageResult<()> {
        ensure_datafile_integrity(&self.path)
    }

    fn read_all(&mut self) -> StorageResult<String> {
        Ok(std::fs::read_to_string(&self.path)?)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    }

    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
        crash_safe_write_file(&self.path, data)
    }
}
