//! Shared core of the file-backed backends
//!
//! Owns the file handle and the window cache. A point's data offset (from
//! [`BlockLayout::data_offset`]) is split into a window index and an offset
//! inside that window; single-window backends simply use one window spanning
//! the whole data region.

use super::ensure_writable;
use crate::core::codec::{ElementCodec, ELEMENT_BYTES};
use crate::core::error::{Result, StoreError};
use crate::core::header::Header;
use crate::core::io::ArrayFile;
use crate::core::layout::{next_index, BlockLayout};
use crate::core::window::MapMode;
use crate::core::window_cache::{CacheLimits, CacheStats, WindowCache};
use parking_lot::{Mutex, MutexGuard};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub(crate) struct MappedStore {
    layout: BlockLayout,
    codec: ElementCodec,
    /// `None` once closed
    file: Option<ArrayFile>,
    cache: Mutex<WindowCache>,
    window_bytes: u64,
    writable: bool,
}

impl std::fmt::Debug for MappedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedStore")
            .field("path", &self.path())
            .field("sizes", &self.layout.sizes())
            .field("window_bytes", &self.window_bytes)
            .field("windows", &self.cache.lock().len())
            .field("writable", &self.writable)
            .finish()
    }
}

impl MappedStore {
    pub(crate) fn new(
        file: ArrayFile,
        layout: BlockLayout,
        codec: ElementCodec,
        window_bytes: u64,
        limits: CacheLimits,
    ) -> Result<Self> {
        if window_bytes == 0 || window_bytes % ELEMENT_BYTES as u64 != 0 {
            return Err(StoreError::Config(format!(
                "window size {} is not a positive multiple of {}",
                window_bytes, ELEMENT_BYTES
            )));
        }

        let required = layout.file_bytes();
        let actual = file.len()?;
        if actual < required {
            return Err(StoreError::InvalidHeader(format!(
                "{} holds {} bytes but its layout needs {}",
                file.path().display(),
                actual,
                required
            )));
        }

        let writable = file.is_writable();
        let mode = MapMode::from_writable(writable);
        let windows = WindowCache::partition(
            layout.header_size(),
            layout.data_bytes(),
            window_bytes,
            mode,
            codec,
        )?;
        debug!(
            path = %file.path().display(),
            windows = windows.len(),
            window_bytes,
            writable,
            "opened mapped store"
        );
        let cache = WindowCache::new(windows, limits, mode)?;

        Ok(MappedStore {
            layout,
            codec,
            file: Some(file),
            cache: Mutex::new(cache),
            window_bytes,
            writable,
        })
    }

    pub(crate) fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub(crate) fn codec(&self) -> ElementCodec {
        self.codec
    }

    pub(crate) fn window_bytes(&self) -> u64 {
        self.window_bytes
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path())
    }

    pub(crate) fn rebind_path(&mut self, path: PathBuf) {
        if let Some(file) = self.file.as_mut() {
            file.set_path(path);
        }
    }

    pub(crate) fn cache(&self) -> MutexGuard<'_, WindowCache> {
        self.cache.lock()
    }

    pub(crate) fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    fn open_file(&self) -> Result<&ArrayFile> {
        self.file
            .as_ref()
            .ok_or_else(|| StoreError::state("backend is closed"))
    }

    /// Window index and in-window offset of a data-region byte offset
    pub(crate) fn split(&self, data_offset: u64) -> (usize, usize) {
        (
            (data_offset / self.window_bytes) as usize,
            (data_offset % self.window_bytes) as usize,
        )
    }

    pub(crate) fn read_at(&self, data_offset: u64) -> Result<f64> {
        let file = self.open_file()?;
        let (window, offset) = self.split(data_offset);
        let mut cache = self.cache.lock();
        cache.get(file.file(), window)?.read_element(offset)
    }

    pub(crate) fn write_at(&mut self, data_offset: u64, value: f64) -> Result<()> {
        ensure_writable(self.file.is_none(), self.writable)?;
        let (window, offset) = self.split(data_offset);
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| StoreError::state("backend is closed"))?
            .file();
        self.cache.get_mut().get(file, window)?.write_element(offset, value)
    }

    pub(crate) fn read_point(&self, indices: &[usize]) -> Result<f64> {
        let offset = self.layout.data_offset(indices)?;
        self.read_at(offset)
    }

    pub(crate) fn write_point(&mut self, indices: &[usize], value: f64) -> Result<()> {
        let offset = self.layout.data_offset(indices)?;
        self.write_at(offset, value)
    }

    /// Sum every logical point under a single cache lock
    pub(crate) fn sum_all(&self) -> Result<f64> {
        let file = self.open_file()?.file();
        let sizes = self.layout.sizes().to_vec();
        let mut index = vec![0usize; sizes.len()];
        let mut cache = self.cache.lock();
        let mut sum = 0.0;
        loop {
            let data_offset =
                self.layout.element_address_unchecked(&index) * ELEMENT_BYTES as u64;
            let (window, offset) = self.split(data_offset);
            sum += cache.get(file, window)?.read_element(offset)?;
            if !next_index(&mut index, &sizes) {
                break;
            }
        }
        Ok(sum)
    }

    pub(crate) fn zero_all(&mut self) -> Result<()> {
        ensure_writable(self.file.is_none(), self.writable)?;
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| StoreError::state("backend is closed"))?
            .file();
        let cache = self.cache.get_mut();
        for window in 0..cache.len() {
            cache.get(file, window)?.fill_zero()?;
        }
        Ok(())
    }

    pub(crate) fn force_to_stable(&mut self) -> Result<()> {
        if !self.writable {
            return Ok(());
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        self.cache.get_mut().flush_all()?;
        file.sync()
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.writable
    }

    /// Re-establish mappings in the new mode, flushing before a demotion
    pub(crate) fn set_writable(&mut self, writable: bool) -> Result<()> {
        if self.file.is_none() {
            return Err(StoreError::state("backend is closed"));
        }
        if writable == self.writable {
            return Ok(());
        }
        if !writable {
            self.force_to_stable()?;
        }

        let previous = self.writable;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StoreError::state("backend is closed"))?;
        file.reopen(writable)?;
        if let Err(e) = self.cache.get_mut().set_mode(MapMode::from_writable(writable)) {
            if let Err(restore) = file.reopen(previous) {
                warn!(error = %restore, "failed to restore file mode");
            }
            return Err(e);
        }

        debug!(writable, "changed backend writability");
        self.writable = writable;
        Ok(())
    }

    pub(crate) fn write_header(&mut self, header: &Header) -> Result<()> {
        ensure_writable(self.file.is_none(), self.writable)?;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StoreError::state("backend is closed"))?;
        file.write_header(header)
    }

    /// Flush, unmap, and release the file handle
    ///
    /// The handle is released even when flushing fails; the first failure is
    /// logged and returned.
    pub(crate) fn close(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Ok(());
        }

        let mut result = Ok(());
        if self.writable {
            if let Err(e) = self.force_to_stable() {
                warn!(error = %e, "flush failed while closing backend");
                result = Err(e);
            }
        }
        if let Err(e) = self.cache.get_mut().unmap_all() {
            warn!(error = %e, "unmap failed while closing backend");
            if result.is_ok() {
                result = Err(e);
            }
        }
        if let Some(file) = self.file.take() {
            debug!(path = %file.path().display(), "closed mapped store");
        }
        result
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}

impl Drop for MappedStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close mapped store on drop");
        }
    }
}

/// Implement [`ArrayStorage`](super::ArrayStorage) and the common inherent
/// methods for a backend wrapping a `store: MappedStore` field
macro_rules! mapped_backend {
    ($backend:ty) => {
        impl $backend {
            /// Backing file path, `None` once closed
            pub fn path(&self) -> Option<&std::path::Path> {
                self.store.path()
            }

            pub fn write_header(&mut self, header: &$crate::core::header::Header) -> $crate::core::error::Result<()> {
                self.store.write_header(header)
            }

            pub fn cache_stats(&self) -> $crate::core::window_cache::CacheStats {
                self.store.cache_stats()
            }

            pub(crate) fn rebind_path(&mut self, path: std::path::PathBuf) {
                self.store.rebind_path(path)
            }
        }

        impl $crate::core::backend::ArrayStorage for $backend {
            fn layout(&self) -> &$crate::core::layout::BlockLayout {
                self.store.layout()
            }

            fn codec(&self) -> $crate::core::codec::ElementCodec {
                self.store.codec()
            }

            fn read_point(&self, indices: &[usize]) -> $crate::core::error::Result<f64> {
                self.store.read_point(indices)
            }

            fn write_point(&mut self, indices: &[usize], value: f64) -> $crate::core::error::Result<()> {
                self.store.write_point(indices, value)
            }

            fn zero_all(&mut self) -> $crate::core::error::Result<()> {
                self.store.zero_all()
            }

            fn force_to_stable(&mut self) -> $crate::core::error::Result<()> {
                self.store.force_to_stable()
            }

            fn is_writable(&self) -> bool {
                self.store.is_writable()
            }

            fn set_writable(&mut self, writable: bool) -> $crate::core::error::Result<()> {
                self.store.set_writable(writable)
            }

            fn close(&mut self) -> $crate::core::error::Result<()> {
                self.store.close()
            }

            fn is_closed(&self) -> bool {
                self.store.is_closed()
            }

            fn sum_all(&self) -> $crate::core::error::Result<f64> {
                self.store.sum_all()
            }
        }
    };
}

pub(crate) use mapped_backend;
