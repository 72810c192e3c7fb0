//! One memory mapping over a byte range of an array file
//!
//! A window's mapping is established lazily and released exactly once, either
//! by [`WindowCache`](crate::core::window_cache::WindowCache) eviction or when
//! the window is dropped. Read-write mappings are flushed before release.

use crate::core::codec::{ElementCodec, ELEMENT_BYTES};
use crate::core::error::{Result, StoreError};
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::File;
use tracing::{debug, warn};

/// Access mode of a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    ReadOnly,
    ReadWrite,
}

impl MapMode {
    pub fn from_writable(writable: bool) -> Self {
        if writable {
            MapMode::ReadWrite
        } else {
            MapMode::ReadOnly
        }
    }
}

enum WindowMap {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl WindowMap {
    fn bytes(&self) -> &[u8] {
        match self {
            WindowMap::ReadOnly(map) => &map[..],
            WindowMap::ReadWrite(map) => &map[..],
        }
    }
}

/// A lazily mapped byte range of the backing file
pub struct MappedWindow {
    index: usize,
    start: u64,
    len: usize,
    mode: MapMode,
    codec: ElementCodec,
    map: Option<WindowMap>,
}

impl std::fmt::Debug for MappedWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedWindow")
            .field("index", &self.index)
            .field("start", &self.start)
            .field("len", &self.len)
            .field("mode", &self.mode)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

impl MappedWindow {
    /// Describe a window without mapping it
    pub fn new(index: usize, start: u64, len: usize, mode: MapMode, codec: ElementCodec) -> Self {
        MappedWindow {
            index,
            start,
            len,
            mode,
            codec,
            map: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// First file byte covered by this window
    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn mode(&self) -> MapMode {
        self.mode
    }

    pub fn is_mapped(&self) -> bool {
        self.map.is_some()
    }

    /// Establish the mapping if absent
    pub(crate) fn map(&mut self, file: &File) -> Result<()> {
        if self.map.is_some() {
            return Ok(());
        }

        let mut options = MmapOptions::new();
        options.offset(self.start).len(self.len);

        // SAFETY: the owning backend holds the only writable handle on this
        // file (single-writer per array file) and never truncates it while
        // windows are mapped.
        let map = match self.mode {
            MapMode::ReadOnly => unsafe { options.map(file) }.map(WindowMap::ReadOnly),
            MapMode::ReadWrite => unsafe { options.map_mut(file) }.map(WindowMap::ReadWrite),
        }
        .map_err(|source| StoreError::Mapping {
            start: self.start,
            len: self.len,
            source,
        })?;

        debug!(
            window = self.index,
            start = self.start,
            len = self.len,
            mode = ?self.mode,
            "mapped window"
        );
        self.map = Some(map);
        Ok(())
    }

    /// Release the mapping, flushing first when writable
    ///
    /// The mapping is dropped even if the flush fails.
    pub(crate) fn unmap(&mut self) -> Result<()> {
        let Some(map) = self.map.take() else {
            return Ok(());
        };

        let flushed = match &map {
            WindowMap::ReadWrite(m) => m.flush().map_err(|source| StoreError::Mapping {
                start: self.start,
                len: self.len,
                source,
            }),
            WindowMap::ReadOnly(_) => Ok(()),
        };
        drop(map);

        debug!(window = self.index, start = self.start, "unmapped window");
        flushed
    }

    /// Change the access mode of an unmapped window
    pub(crate) fn set_mode(&mut self, mode: MapMode) -> Result<()> {
        if self.map.is_some() {
            return Err(StoreError::state(format!(
                "window {} must be unmapped before changing mode",
                self.index
            )));
        }
        self.mode = mode;
        Ok(())
    }

    /// Flush pending writes of a read-write mapping
    pub fn flush(&self) -> Result<()> {
        if let Some(WindowMap::ReadWrite(map)) = &self.map {
            map.flush().map_err(|source| StoreError::Mapping {
                start: self.start,
                len: self.len,
                source,
            })?;
        }
        Ok(())
    }

    fn check_offset(&self, offset: usize, len: usize) -> Result<()> {
        if offset + len > self.len {
            return Err(StoreError::state(format!(
                "offset {} (+{}) past end of window {} (len {})",
                offset, len, self.index, self.len
            )));
        }
        Ok(())
    }

    fn mapped(&self) -> Result<&WindowMap> {
        self.map
            .as_ref()
            .ok_or_else(|| StoreError::state(format!("window {} is not mapped", self.index)))
    }

    fn mapped_mut(&mut self) -> Result<&mut MmapMut> {
        match self.map.as_mut() {
            Some(WindowMap::ReadWrite(map)) => Ok(map),
            Some(WindowMap::ReadOnly(_)) => Err(StoreError::state(format!(
                "window {} is mapped read-only",
                self.index
            ))),
            None => Err(StoreError::state(format!("window {} is not mapped", self.index))),
        }
    }

    /// Decode the element at `offset` bytes into the window
    pub fn read_element(&self, offset: usize) -> Result<f64> {
        self.check_offset(offset, ELEMENT_BYTES)?;
        let bytes = self.mapped()?.bytes();
        Ok(self.codec.decode(&bytes[offset..offset + ELEMENT_BYTES]))
    }

    /// Encode `value` at `offset` bytes into the window
    pub fn write_element(&mut self, offset: usize, value: f64) -> Result<()> {
        self.check_offset(offset, ELEMENT_BYTES)?;
        let codec = self.codec;
        let map = self.mapped_mut()?;
        codec.encode(value, &mut map[offset..offset + ELEMENT_BYTES]);
        Ok(())
    }

    /// Zero every byte in the window
    pub fn fill_zero(&mut self) -> Result<()> {
        self.mapped_mut()?.fill(0);
        Ok(())
    }
}

impl Drop for MappedWindow {
    fn drop(&mut self) {
        if let Err(e) = self.unmap() {
            warn!(window = self.index, error = %e, "failed to flush window on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_file(len: usize) -> tempfile::NamedTempFile {
        let mut temp = tempfile::NamedTempFile::new().unwrap();
        temp.write_all(&vec![0u8; len]).unwrap();
        temp.flush().unwrap();
        temp
    }

    #[test]
    fn test_lazy_mapping() {
        let temp = scratch_file(4096);
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(temp.path())
            .unwrap();

        let mut window = MappedWindow::new(0, 1024, 1024, MapMode::ReadWrite, ElementCodec::default());
        assert!(!window.is_mapped());
        assert!(window.read_element(0).is_err());

        window.map(&file).unwrap();
        assert!(window.is_mapped());
        window.write_element(8, 2.25).unwrap();
        assert_eq!(window.read_element(8).unwrap(), 2.25);

        window.unmap().unwrap();
        assert!(!window.is_mapped());
        // second unmap is a no-op
        window.unmap().unwrap();

        window.map(&file).unwrap();
        assert_eq!(window.read_element(8).unwrap(), 2.25);
    }

    #[test]
    fn test_unaligned_start_offset() {
        let temp = scratch_file(8192);
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(temp.path())
            .unwrap();

        let mut window = MappedWindow::new(3, 100, 400, MapMode::ReadWrite, ElementCodec::default());
        window.map(&file).unwrap();
        window.write_element(0, 7.0).unwrap();
        window.unmap().unwrap();

        let bytes = std::fs::read(temp.path()).unwrap();
        assert_eq!(&bytes[100..104], &7.0f32.to_ne_bytes());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let temp = scratch_file(1024);
        let file = std::fs::File::open(temp.path()).unwrap();

        let mut window = MappedWindow::new(0, 0, 1024, MapMode::ReadOnly, ElementCodec::default());
        window.map(&file).unwrap();
        assert_eq!(window.read_element(0).unwrap(), 0.0);
        assert!(matches!(
            window.write_element(0, 1.0),
            Err(StoreError::State(_))
        ));
        assert!(window.set_mode(MapMode::ReadWrite).is_err());

        window.unmap().unwrap();
        assert!(window.set_mode(MapMode::ReadWrite).is_ok());
    }

    #[test]
    fn test_offset_past_end() {
        let temp = scratch_file(64);
        let file = std::fs::File::open(temp.path()).unwrap();
        let mut window = MappedWindow::new(0, 0, 64, MapMode::ReadOnly, ElementCodec::default());
        window.map(&file).unwrap();
        assert!(window.read_element(60).is_ok());
        assert!(window.read_element(62).is_err());
    }
}
