//! Single-mapping backend for sub-cube layouts
//!
//! Storage and mapping match [`SingleWindowBackend`](super::SingleWindowBackend);
//! only the address arithmetic differs, since each block of a submatrix
//! layout is a contiguous sub-cube. Whole blocks can be moved in one call.

use super::ensure_writable;
use super::mapped::{mapped_backend, MappedStore};
use crate::core::codec::{ElementCodec, ELEMENT_BYTES};
use crate::core::error::{Result, StoreError};
use crate::core::io::ArrayFile;
use crate::core::layout::BlockLayout;
use crate::core::window_cache::CacheLimits;

#[derive(Debug)]
pub struct SubmatrixWindowBackend {
    store: MappedStore,
}

impl SubmatrixWindowBackend {
    pub fn open(file: ArrayFile, layout: BlockLayout, codec: ElementCodec) -> Result<Self> {
        if !layout.is_submatrix() {
            return Err(StoreError::InvalidLayout(format!(
                "submatrix backend cannot serve a {:?} layout",
                layout.kind()
            )));
        }
        let window_bytes = layout.data_bytes();
        let limits = CacheLimits {
            max_resident: 1,
            min_tracked_bytes: 0,
        };
        Ok(SubmatrixWindowBackend {
            store: MappedStore::new(file, layout, codec, window_bytes, limits)?,
        })
    }

    /// Number of sub-cubes along each dimension
    pub fn block_counts(&self) -> &[usize] {
        self.store.layout().n_blocks()
    }

    /// Read every slot of one sub-cube, dimension 0 fastest
    ///
    /// Edge blocks include their padding slots.
    pub fn read_block(&self, block_coords: &[usize]) -> Result<Vec<f64>> {
        let layout = self.store.layout();
        let base = layout.block_base(block_coords)?;
        (0..layout.block_elements() as u64)
            .map(|slot| self.store.read_at((base + slot) * ELEMENT_BYTES as u64))
            .collect()
    }

    /// Overwrite one sub-cube; `values` must cover every slot
    pub fn write_block(&mut self, block_coords: &[usize], values: &[f64]) -> Result<()> {
        ensure_writable(self.store.is_closed(), self.store.is_writable())?;
        let layout = self.store.layout();
        let base = layout.block_base(block_coords)?;
        if values.len() != layout.block_elements() {
            return Err(StoreError::DimensionMismatch {
                expected: layout.block_elements(),
                actual: values.len(),
            });
        }
        for (slot, &value) in values.iter().enumerate() {
            self.store
                .write_at((base + slot as u64) * ELEMENT_BYTES as u64, value)?;
        }
        Ok(())
    }
}

mapped_backend!(SubmatrixWindowBackend);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::ArrayStorage;
    use crate::core::header::{Header, HEADER_SIZE};
    use crate::core::layout::FixedBlockSizes;
    use tempfile::TempDir;

    fn create(dir: &TempDir, sizes: &[usize], blocks: &[usize]) -> SubmatrixWindowBackend {
        let layout = BlockLayout::create_submatrix(
            HEADER_SIZE as u64,
            sizes,
            &FixedBlockSizes(blocks.to_vec()),
        )
        .unwrap();
        let header = Header::for_layout(&layout, ElementCodec::default());
        let file =
            ArrayFile::create(dir.path().join("sub.spst"), &header, layout.data_bytes()).unwrap();
        SubmatrixWindowBackend::open(file, layout, ElementCodec::default()).unwrap()
    }

    #[test]
    fn test_rejects_plain_layout() {
        let dir = TempDir::new().unwrap();
        let layout = BlockLayout::create_full_matrix(HEADER_SIZE as u64, &[4, 4]).unwrap();
        let header = Header::for_layout(&layout, ElementCodec::default());
        let file =
            ArrayFile::create(dir.path().join("full.spst"), &header, layout.data_bytes()).unwrap();
        assert!(matches!(
            SubmatrixWindowBackend::open(file, layout, ElementCodec::default()),
            Err(StoreError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_point_in_last_block() {
        let dir = TempDir::new().unwrap();
        let mut backend = create(&dir, &[4, 4], &[2, 2]);
        assert_eq!(backend.element_position(&[3, 3]).unwrap(), 15);

        backend.write_point(&[3, 3], 6.0).unwrap();
        let block = backend.read_block(&[1, 1]).unwrap();
        assert_eq!(block, vec![0.0, 0.0, 0.0, 6.0]);
    }

    #[test]
    fn test_block_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut backend = create(&dir, &[4, 4], &[2, 2]);
        assert_eq!(backend.block_counts(), &[2, 2]);

        backend.write_block(&[1, 0], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(backend.read_point(&[2, 0]).unwrap(), 1.0);
        assert_eq!(backend.read_point(&[3, 0]).unwrap(), 2.0);
        assert_eq!(backend.read_point(&[2, 1]).unwrap(), 3.0);
        assert_eq!(backend.read_point(&[3, 1]).unwrap(), 4.0);
        assert_eq!(backend.sum_all().unwrap(), 10.0);

        assert!(backend.write_block(&[0, 0], &[1.0]).is_err());
        assert!(matches!(
            backend.read_block(&[2, 0]),
            Err(StoreError::AddressRange { dim: 0, .. })
        ));
    }

    #[test]
    fn test_block_write_needs_writable() {
        let dir = TempDir::new().unwrap();
        let mut backend = create(&dir, &[4], &[2]);
        backend.set_writable(false).unwrap();
        assert!(matches!(
            backend.write_block(&[0], &[1.0, 2.0]),
            Err(StoreError::State(_))
        ));
    }
}
