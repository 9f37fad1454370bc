//! File-backed shared mappings.
//!
//! Every mapping is `MAP_SHARED` over a regular file, so any process that maps
//! the same path (or inherits the mapping) observes the same bytes.

use memmap2::MmapMut;
use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

pub struct SharedFile {
    _file: File,
    mmap: MmapMut,
    path: PathBuf,
}

impl SharedFile {
    /// Create a fresh file of `size_bytes` and map it read-write.
    ///
    /// Fails with `AlreadyExists` rather than truncating a file that another
    /// run may still have mapped. If sizing or mapping fails, the new file is
    /// removed again.
    pub fn create<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)?;

        let mapped = file
            .set_len(size_bytes)
            .and_then(|()| unsafe { MmapMut::map_mut(&file) });
        match mapped {
            Ok(mmap) => Ok(Self {
                _file: file,
                mmap,
                path: path.to_path_buf(),
            }),
            Err(e) => {
                drop(file);
                let _ = std::fs::remove_file(path);
                Err(e)
            }
        }
    }

    /// Open an existing file and map it read-write
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            _file: file,
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Return raw pointer to start of the mapped data
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
