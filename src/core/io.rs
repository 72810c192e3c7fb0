//! Disk I/O for array files

use crate::core::error::{Result, StoreError};
use crate::core::header::{Header, HEADER_SIZE};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Open handle on an array file
#[derive(Debug)]
pub struct ArrayFile {
    file: File,
    path: PathBuf,
    writable: bool,
}

impl ArrayFile {
    /// Create a new array file holding `header` followed by a zeroed data
    /// region of `data_bytes`
    pub fn create<P: AsRef<Path>>(path: P, header: &Header, data_bytes: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| StoreError::io_at(format!("creating {}", path.display()), e))?;

        file.write_all(&header.to_bytes())
            .map_err(|e| StoreError::io_at(format!("writing header of {}", path.display()), e))?;
        // extending the length fills the data region with zeros
        file.set_len(HEADER_SIZE as u64 + data_bytes)
            .map_err(|e| StoreError::io_at(format!("sizing {}", path.display()), e))?;
        file.flush()
            .map_err(|e| StoreError::io_at(format!("flushing {}", path.display()), e))?;

        Ok(ArrayFile {
            file,
            path,
            writable: true,
        })
    }

    /// Open an existing array file
    pub fn open<P: AsRef<Path>>(path: P, writable: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&path)
            .map_err(|e| StoreError::io_at(format!("opening {}", path.display()), e))?;

        Ok(ArrayFile {
            file,
            path,
            writable,
        })
    }

    /// Reopen the same path with a different access mode
    pub fn reopen(&mut self, writable: bool) -> Result<()> {
        if writable == self.writable {
            return Ok(());
        }
        let reopened = Self::open(&self.path, writable)?;
        *self = reopened;
        Ok(())
    }

    /// Read the header
    pub fn read_header(&mut self) -> Result<Header> {
        let mut buffer = vec![0u8; HEADER_SIZE];
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_exact(&mut buffer))
            .map_err(|e| StoreError::io_at(format!("reading header of {}", self.path.display()), e))?;
        Header::from_bytes(&buffer)
    }

    /// Write the header
    pub fn write_header(&mut self, header: &Header) -> Result<()> {
        if !self.writable {
            return Err(StoreError::state(format!(
                "{} is open read-only",
                self.path.display()
            )));
        }
        let bytes = header.to_bytes();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&bytes))
            .and_then(|()| self.file.flush())
            .map_err(|e| StoreError::io_at(format!("writing header of {}", self.path.display()), e))?;
        Ok(())
    }

    /// Current length of the file in bytes
    pub fn len(&self) -> Result<u64> {
        let metadata = self
            .file
            .metadata()
            .map_err(|e| StoreError::io_at(format!("reading metadata of {}", self.path.display()), e))?;
        Ok(metadata.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Track a rename of the underlying file
    pub(crate) fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Sync all writes to disk
    pub fn sync(&mut self) -> Result<()> {
        if self.writable {
            self.file
                .sync_all()
                .map_err(|e| StoreError::io_at(format!("syncing {}", self.path.display()), e))?;
        }
        Ok(())
    }
}
