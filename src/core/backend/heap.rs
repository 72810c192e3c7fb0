//! RAM-resident backend
//!
//! Holds the whole data region in one in-process buffer encoded exactly as it
//! would be on disk. Nothing is persisted; copying out goes through the
//! migrator.

use super::{ensure_writable, ArrayStorage};
use crate::core::codec::{ElementCodec, ELEMENT_BYTES};
use crate::core::error::{Result, StoreError};
use crate::core::layout::BlockLayout;

#[derive(Debug)]
pub struct HeapBackend {
    layout: BlockLayout,
    codec: ElementCodec,
    data: Vec<u8>,
    writable: bool,
    closed: bool,
}

impl HeapBackend {
    /// Allocate a zeroed buffer for `layout`
    pub fn new(layout: BlockLayout, codec: ElementCodec) -> Self {
        let data = vec![0u8; layout.data_bytes() as usize];
        HeapBackend {
            layout,
            codec,
            data,
            writable: true,
            closed: false,
        }
    }

    /// Bytes held by the buffer
    pub fn allocated_bytes(&self) -> usize {
        self.data.len()
    }

    fn offset(&self, indices: &[usize]) -> Result<usize> {
        if self.closed {
            return Err(StoreError::state("backend is closed"));
        }
        Ok(self.layout.data_offset(indices)? as usize)
    }
}

impl ArrayStorage for HeapBackend {
    fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    fn codec(&self) -> ElementCodec {
        self.codec
    }

    fn read_point(&self, indices: &[usize]) -> Result<f64> {
        let offset = self.offset(indices)?;
        Ok(self.codec.decode(&self.data[offset..offset + ELEMENT_BYTES]))
    }

    fn write_point(&mut self, indices: &[usize], value: f64) -> Result<()> {
        ensure_writable(self.closed, self.writable)?;
        let offset = self.offset(indices)?;
        self.codec
            .encode(value, &mut self.data[offset..offset + ELEMENT_BYTES]);
        Ok(())
    }

    fn zero_all(&mut self) -> Result<()> {
        ensure_writable(self.closed, self.writable)?;
        self.data.fill(0);
        Ok(())
    }

    fn force_to_stable(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn set_writable(&mut self, writable: bool) -> Result<()> {
        if self.closed {
            return Err(StoreError::state("backend is closed"));
        }
        self.writable = writable;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.data = Vec::new();
            self.closed = true;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_matrix_scenario() {
        let layout = BlockLayout::create_full_matrix(0, &[4, 4, 4]).unwrap();
        let mut heap = HeapBackend::new(layout, ElementCodec::default());
        assert_eq!(heap.allocated_bytes(), 64 * 4);

        heap.write_point(&[1, 2, 3], 1.5).unwrap();
        assert_eq!(heap.read_point(&[1, 2, 3]).unwrap(), 1.5);
        assert_eq!(heap.read_point(&[0, 0, 0]).unwrap(), 0.0);
        assert_eq!(heap.sum_all().unwrap(), 1.5);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let layout = BlockLayout::create_full_matrix(0, &[4]).unwrap();
        let mut heap = HeapBackend::new(layout, ElementCodec::default());
        heap.set_writable(false).unwrap();

        assert!(matches!(
            heap.write_point(&[0], 1.0),
            Err(StoreError::State(_))
        ));
        assert!(heap.zero_all().is_err());
        assert_eq!(heap.read_point(&[0]).unwrap(), 0.0);
    }

    #[test]
    fn test_close_twice_is_noop() {
        let layout = BlockLayout::create_full_matrix(0, &[4]).unwrap();
        let mut heap = HeapBackend::new(layout, ElementCodec::default());
        heap.force_to_stable().unwrap();
        heap.close().unwrap();
        heap.close().unwrap();
        assert!(heap.is_closed());
        assert!(heap.read_point(&[0]).is_err());
    }

    #[test]
    fn test_zero_all() {
        let layout = BlockLayout::create_full_matrix(0, &[3, 3]).unwrap();
        let mut heap = HeapBackend::new(layout, ElementCodec::default());
        heap.write_point(&[2, 2], 9.0).unwrap();
        heap.zero_all().unwrap();
        assert_eq!(heap.sum_all().unwrap(), 0.0);
    }
}
