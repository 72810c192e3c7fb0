//! Bounded LRU registry of mapped windows
//!
//! The cache owns every [`MappedWindow`] of one backend. Windows are mapped on
//! first use and ordered by recency; when the number of resident tracked
//! windows would exceed `max_resident`, the least-recently-used unpinned
//! window is unmapped and dropped from the recency list.
//!
//! Windows smaller than `min_tracked_bytes` are not worth evicting: they stay
//! mapped once touched and do not count against the bound.
//!
//! The cache is not internally synchronized; backends guard it with a single
//! `parking_lot::Mutex`.

use crate::core::error::{Result, StoreError};
use crate::core::window::{MapMode, MappedWindow};
use lru::LruCache;
use std::collections::HashSet;
use std::fs::File;
use tracing::{debug, warn};

/// Limits applied by a [`WindowCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub max_resident: usize,
    pub min_tracked_bytes: u64,
}

/// Window cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found the window already mapped
    pub hits: u64,
    /// Lookups that had to establish a mapping
    pub misses: u64,
    /// Mappings released by eviction
    pub evictions: u64,
    /// Tracked windows currently mapped
    pub resident: usize,
    /// All windows currently mapped, tracked or not
    pub mapped: usize,
    pub pinned: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Calculate hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

pub struct WindowCache {
    windows: Vec<MappedWindow>,
    /// Mapped tracked windows, most recent first
    recency: LruCache<usize, ()>,
    pinned: HashSet<usize>,
    limits: CacheLimits,
    mode: MapMode,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl WindowCache {
    /// Create a cache over `windows`, none of which are mapped yet
    pub fn new(windows: Vec<MappedWindow>, limits: CacheLimits, mode: MapMode) -> Result<Self> {
        if limits.max_resident == 0 {
            return Err(StoreError::Config(
                "window cache needs room for at least one window".to_string(),
            ));
        }
        if windows.iter().any(|w| w.mode() != mode || w.is_mapped()) {
            return Err(StoreError::state(
                "windows must be unmapped and share the cache mode",
            ));
        }

        Ok(WindowCache {
            windows,
            recency: LruCache::unbounded(),
            pinned: HashSet::new(),
            limits,
            mode,
            hits: 0,
            misses: 0,
            evictions: 0,
        })
    }

    /// Split `data_len` bytes starting at file offset `data_start` into
    /// consecutive windows of `window_bytes` (the last may be shorter)
    pub fn partition(
        data_start: u64,
        data_len: u64,
        window_bytes: u64,
        mode: MapMode,
        codec: crate::core::codec::ElementCodec,
    ) -> Result<Vec<MappedWindow>> {
        if window_bytes == 0 {
            return Err(StoreError::Config("window size must be non-zero".to_string()));
        }
        let count = (data_len + window_bytes - 1) / window_bytes;
        (0..count)
            .map(|i| {
                let offset = i * window_bytes;
                let len = usize::try_from(window_bytes.min(data_len - offset)).map_err(|_| {
                    StoreError::Config(format!(
                        "window of {} bytes exceeds the address space",
                        window_bytes
                    ))
                })?;
                Ok(MappedWindow::new(i as usize, data_start + offset, len, mode, codec))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn mode(&self) -> MapMode {
        self.mode
    }

    fn is_tracked(&self, index: usize) -> bool {
        self.windows[index].len() as u64 >= self.limits.min_tracked_bytes
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.windows.len() {
            return Err(StoreError::state(format!(
                "window {} does not exist ({} windows)",
                index,
                self.windows.len()
            )));
        }
        Ok(())
    }

    /// Fetch window `index`, mapping it if needed and marking it most
    /// recently used
    pub fn get(&mut self, file: &File, index: usize) -> Result<&mut MappedWindow> {
        self.check_index(index)?;
        let tracked = self.is_tracked(index);

        if self.windows[index].is_mapped() {
            self.hits += 1;
            if tracked {
                self.recency.promote(&index);
            }
        } else {
            self.misses += 1;
            if tracked {
                self.make_room()?;
            }
            self.windows[index].map(file)?;
            if tracked {
                self.recency.push(index, ());
            }
        }

        Ok(&mut self.windows[index])
    }

    /// Mark a mapped window most recently used without remapping it
    pub fn touch(&mut self, index: usize) -> bool {
        self.recency.promote(&index);
        self.recency.contains(&index)
    }

    /// Exclude a window from eviction
    pub fn pin(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        self.pinned.insert(index);
        Ok(())
    }

    pub fn unpin(&mut self, index: usize) {
        self.pinned.remove(&index);
    }

    /// Evict until the resident count is within the bound
    pub fn evict(&mut self) -> Result<usize> {
        let mut evicted = 0;
        while self.recency.len() > self.limits.max_resident {
            if !self.evict_one()? {
                break;
            }
            evicted += 1;
        }
        Ok(evicted)
    }

    /// Evict so one more tracked window can be mapped
    fn make_room(&mut self) -> Result<()> {
        while self.recency.len() >= self.limits.max_resident {
            if !self.evict_one()? {
                return Err(StoreError::state(format!(
                    "all {} resident windows are pinned",
                    self.recency.len()
                )));
            }
        }
        Ok(())
    }

    /// Unmap the least recently used unpinned window
    fn evict_one(&mut self) -> Result<bool> {
        let victim = self
            .recency
            .iter()
            .rev()
            .map(|(&index, _)| index)
            .find(|index| !self.pinned.contains(index));

        let Some(index) = victim else {
            return Ok(false);
        };

        self.recency.pop(&index);
        self.evictions += 1;
        debug!(window = index, "evicting window");
        self.windows[index].unmap()?;
        Ok(true)
    }

    /// Flush every mapped read-write window
    pub fn flush_all(&self) -> Result<()> {
        for window in self.windows.iter().filter(|w| w.is_mapped()) {
            window.flush()?;
        }
        Ok(())
    }

    /// Unmap every window, returning the first failure after releasing all
    pub fn unmap_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for window in self.windows.iter_mut() {
            if let Err(e) = window.unmap() {
                warn!(window = window.index(), error = %e, "failed to release window");
                first_error.get_or_insert(e);
            }
        }
        self.recency.clear();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Switch every window to `mode`, releasing current mappings first
    pub fn set_mode(&mut self, mode: MapMode) -> Result<()> {
        self.unmap_all()?;
        for window in self.windows.iter_mut() {
            window.set_mode(mode)?;
        }
        self.mode = mode;
        Ok(())
    }

    /// Tracked windows currently mapped
    pub fn resident_count(&self) -> usize {
        self.recency.len()
    }

    /// All windows currently mapped
    pub fn mapped_count(&self) -> usize {
        self.windows.iter().filter(|w| w.is_mapped()).count()
    }

    pub fn is_mapped(&self, index: usize) -> bool {
        self.windows.get(index).map_or(false, |w| w.is_mapped())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            resident: self.recency.len(),
            mapped: self.mapped_count(),
            pinned: self.pinned.len(),
            capacity: self.limits.max_resident,
        }
    }
}
