//! Multi-window backend for arrays too large to map at once
//!
//! The data region is split into fixed-size windows; at most
//! `max_resident_windows` of them stay mapped, the rest are remapped on
//! demand through the LRU [`WindowCache`](crate::core::window_cache::WindowCache).

use super::mapped::{mapped_backend, MappedStore};
use crate::core::codec::ElementCodec;
use crate::core::config::StoreConfig;
use crate::core::error::Result;
use crate::core::io::ArrayFile;
use crate::core::layout::BlockLayout;
use crate::core::window_cache::CacheLimits;

#[derive(Debug)]
pub struct MultiWindowBackend {
    store: MappedStore,
}

impl MultiWindowBackend {
    pub fn open(
        file: ArrayFile,
        layout: BlockLayout,
        codec: ElementCodec,
        config: &StoreConfig,
    ) -> Result<Self> {
        let limits = CacheLimits {
            max_resident: config.max_resident_windows,
            min_tracked_bytes: config.min_tracked_window_bytes,
        };
        Ok(MultiWindowBackend {
            store: MappedStore::new(file, layout, codec, config.window_bytes, limits)?,
        })
    }

    pub fn window_bytes(&self) -> u64 {
        self.store.window_bytes()
    }

    pub fn window_count(&self) -> usize {
        self.store.cache().len()
    }

    /// Window holding the point at `indices` and its byte offset inside it
    pub fn window_for(&self, indices: &[usize]) -> Result<(usize, usize)> {
        let offset = self.store.layout().data_offset(indices)?;
        Ok(self.store.split(offset))
    }

    /// Keep a window mapped regardless of recency
    pub fn pin_window(&self, index: usize) -> Result<()> {
        self.store.cache().pin(index)
    }

    pub fn unpin_window(&self, index: usize) {
        self.store.cache().unpin(index)
    }
}

mapped_backend!(MultiWindowBackend);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::ArrayStorage;
    use crate::core::error::StoreError;
    use crate::core::header::{Header, HEADER_SIZE};
    use tempfile::TempDir;

    fn config(window_bytes: u64, max_resident: usize) -> StoreConfig {
        StoreConfig::default()
            .with_window_bytes(window_bytes)
            .with_max_resident_windows(max_resident)
            .with_min_tracked_window_bytes(0)
    }

    fn create(dir: &TempDir, sizes: &[usize], config: &StoreConfig) -> MultiWindowBackend {
        let layout = BlockLayout::create_full_matrix(HEADER_SIZE as u64, sizes).unwrap();
        let header = Header::for_layout(&layout, ElementCodec::default());
        let file =
            ArrayFile::create(dir.path().join("multi.spst"), &header, layout.data_bytes()).unwrap();
        MultiWindowBackend::open(file, layout, ElementCodec::default(), config).unwrap()
    }

    #[test]
    fn test_window_partition() {
        let dir = TempDir::new().unwrap();
        let backend = create(&dir, &[1000], &config(1024, 2));
        // 4000 data bytes over 1 KiB windows
        assert_eq!(backend.window_count(), 4);
        assert_eq!(backend.window_for(&[0]).unwrap(), (0, 0));
        assert_eq!(backend.window_for(&[256]).unwrap(), (1, 0));
        assert_eq!(backend.window_for(&[999]).unwrap(), (3, 924));
    }

    #[test]
    fn test_resident_bound_across_sweep() {
        let dir = TempDir::new().unwrap();
        let mut backend = create(&dir, &[4096], &config(1024, 2));

        for i in 0..4096 {
            backend.write_point(&[i], i as f64).unwrap();
            assert!(backend.cache_stats().mapped <= 2);
        }
        for i in (0..4096).step_by(97) {
            assert_eq!(backend.read_point(&[i]).unwrap(), i as f64);
        }
        assert!(backend.cache_stats().evictions > 0);
    }

    #[test]
    fn test_pinned_window_stays_mapped() {
        let dir = TempDir::new().unwrap();
        let mut backend = create(&dir, &[1024], &config(1024, 2));

        backend.write_point(&[0], 1.0).unwrap();
        backend.pin_window(0).unwrap();
        for i in (256..1024).step_by(256) {
            backend.write_point(&[i], 2.0).unwrap();
        }
        assert!(backend.store.cache().is_mapped(0));
        assert_eq!(backend.cache_stats().pinned, 1);

        backend.unpin_window(0);
        assert_eq!(backend.cache_stats().pinned, 0);
        assert!(matches!(
            backend.pin_window(99),
            Err(StoreError::State(_))
        ));
    }

    #[test]
    fn test_sum_and_zero() {
        let dir = TempDir::new().unwrap();
        let mut backend = create(&dir, &[64, 64], &config(1024, 3));
        backend.write_point(&[0, 0], 1.0).unwrap();
        backend.write_point(&[63, 63], 2.0).unwrap();
        assert_eq!(backend.sum_all().unwrap(), 3.0);

        backend.zero_all().unwrap();
        assert_eq!(backend.sum_all().unwrap(), 0.0);
        assert!(backend.cache_stats().mapped <= 3);
    }
}
