//! Storage backends
//!
//! Four interchangeable strategies implement the point-addressable
//! [`ArrayStorage`] contract:
//!
//! - [`heap::HeapBackend`] - RAM-resident buffer, no file
//! - [`single::SingleWindowBackend`] - whole data region in one mapping
//! - [`submatrix::SubmatrixWindowBackend`] - one mapping over sub-cube blocks
//! - [`multi::MultiWindowBackend`] - fixed-size windows behind an LRU cache
//!
//! [`StorageBackend`] is the closed set of these, chosen once at open/create
//! time by the [`selector`](crate::core::selector).

pub mod heap;
pub(crate) mod mapped;
pub mod multi;
pub mod single;
pub mod submatrix;

use crate::core::codec::ElementCodec;
use crate::core::error::{Result, StoreError};
use crate::core::header::Header;
use crate::core::layout::{next_index, BlockLayout};
use crate::core::window_cache::CacheStats;
use std::ops::RangeInclusive;
use std::path::Path;

pub use heap::HeapBackend;
pub use multi::MultiWindowBackend;
pub use single::SingleWindowBackend;
pub use submatrix::SubmatrixWindowBackend;

/// Which backend strategy an array uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum BackendKind {
    Heap,
    SingleWindow,
    Submatrix,
    MultiWindow,
}

/// A contiguous run along one dimension with every other index fixed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorSelection {
    /// Dimension the run follows
    pub dim: usize,
    /// First point of the run (complex points when `complex`)
    pub first: usize,
    /// Last point of the run, inclusive
    pub last: usize,
    /// One index per dimension; the entry at `dim` is ignored
    pub fixed: Vec<usize>,
    /// Points along `dim` are real/imaginary pairs
    pub complex: bool,
}

impl VectorSelection {
    pub fn new(dim: usize, first: usize, last: usize, fixed: Vec<usize>) -> Self {
        VectorSelection {
            dim,
            first,
            last,
            fixed,
            complex: false,
        }
    }

    pub fn complex(mut self, complex: bool) -> Self {
        self.complex = complex;
        self
    }

    /// Number of stored values the run covers, `None` if it overflows
    pub fn value_count(&self) -> Option<usize> {
        let raw = self.raw_range()?;
        raw.end().checked_sub(*raw.start())?.checked_add(1)
    }

    /// Raw indices along `dim` covered by the run, `None` if they overflow
    pub fn raw_range(&self) -> Option<RangeInclusive<usize>> {
        if self.complex {
            let start = self.first.checked_mul(2)?;
            let end = self.last.checked_mul(2)?.checked_add(1)?;
            Some(start..=end)
        } else {
            Some(self.first..=self.last)
        }
    }

    /// Check the selection against `layout`, returning the starting index
    /// and the raw range along `dim`
    fn resolve(&self, layout: &BlockLayout) -> Result<(Vec<usize>, RangeInclusive<usize>)> {
        if self.first > self.last {
            return Err(StoreError::state(format!(
                "vector range {}..={} is empty",
                self.first, self.last
            )));
        }
        let size = layout.size(self.dim)?;
        let mut index = self.fixed.clone();
        if index.len() != layout.n_dim() {
            return Err(StoreError::DimensionMismatch {
                expected: layout.n_dim(),
                actual: index.len(),
            });
        }

        let raw = match self.raw_range() {
            Some(raw) if *raw.end() < size => raw,
            Some(raw) => {
                return Err(StoreError::AddressRange {
                    dim: self.dim,
                    index: *raw.end(),
                    size,
                })
            }
            None => {
                return Err(StoreError::AddressRange {
                    dim: self.dim,
                    index: self.last,
                    size,
                })
            }
        };
        index[self.dim] = *raw.start();
        layout.check_indices(&index)?;
        Ok((index, raw))
    }
}

/// Point-addressable storage contract shared by every backend
pub trait ArrayStorage {
    fn layout(&self) -> &BlockLayout;

    fn codec(&self) -> ElementCodec;

    fn read_point(&self, indices: &[usize]) -> Result<f64>;

    fn write_point(&mut self, indices: &[usize], value: f64) -> Result<()>;

    /// Set every stored element to zero
    fn zero_all(&mut self) -> Result<()>;

    /// Force pending writes to stable storage
    fn force_to_stable(&mut self) -> Result<()>;

    fn is_writable(&self) -> bool;

    fn set_writable(&mut self, writable: bool) -> Result<()>;

    /// Release the backing resources; repeated calls are no-ops
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Read a contiguous run of values along one dimension
    fn read_vector(&self, selection: &VectorSelection) -> Result<Vec<f64>> {
        let (mut index, range) = selection.resolve(self.layout())?;
        let mut values = Vec::with_capacity(range.end() - range.start() + 1);
        for raw in range {
            index[selection.dim] = raw;
            values.push(self.read_point(&index)?);
        }
        Ok(values)
    }

    /// Write a contiguous run of values along one dimension
    fn write_vector(&mut self, selection: &VectorSelection, values: &[f64]) -> Result<()> {
        let (mut index, range) = selection.resolve(self.layout())?;
        let expected = range.end() - range.start() + 1;
        if values.len() != expected {
            return Err(StoreError::DimensionMismatch {
                expected,
                actual: values.len(),
            });
        }
        for (raw, &value) in range.zip(values) {
            index[selection.dim] = raw;
            self.write_point(&index, value)?;
        }
        Ok(())
    }

    /// Sum of every logical point
    fn sum_all(&self) -> Result<f64> {
        let sizes = self.layout().sizes().to_vec();
        let mut index = vec![0usize; sizes.len()];
        let mut sum = 0.0;
        loop {
            sum += self.read_point(&index)?;
            if !next_index(&mut index, &sizes) {
                break;
            }
        }
        Ok(sum)
    }

    fn element_position(&self, indices: &[usize]) -> Result<u64> {
        self.layout().element_address(indices)
    }

    fn byte_position(&self, indices: &[usize]) -> Result<u64> {
        self.layout().byte_address(indices)
    }

    fn size(&self, dim: usize) -> Result<usize> {
        self.layout().size(dim)
    }

    fn total_element_count(&self) -> u64 {
        self.layout().total_elements()
    }
}

/// Fail unless a backend may accept writes
pub(crate) fn ensure_writable(closed: bool, writable: bool) -> Result<()> {
    if closed {
        return Err(StoreError::state("backend is closed"));
    }
    if !writable {
        return Err(StoreError::state("backend is read-only"));
    }
    Ok(())
}

/// The closed set of storage strategies
#[derive(Debug)]
pub enum StorageBackend {
    Heap(HeapBackend),
    Single(SingleWindowBackend),
    Submatrix(SubmatrixWindowBackend),
    Multi(MultiWindowBackend),
}

macro_rules! dispatch {
    ($self:expr, $backend:ident => $body:expr) => {
        match $self {
            StorageBackend::Heap($backend) => $body,
            StorageBackend::Single($backend) => $body,
            StorageBackend::Submatrix($backend) => $body,
            StorageBackend::Multi($backend) => $body,
        }
    };
}

impl StorageBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            StorageBackend::Heap(_) => BackendKind::Heap,
            StorageBackend::Single(_) => BackendKind::SingleWindow,
            StorageBackend::Submatrix(_) => BackendKind::Submatrix,
            StorageBackend::Multi(_) => BackendKind::MultiWindow,
        }
    }

    /// Backing file path, if the backend is file-backed and open
    pub fn path(&self) -> Option<&Path> {
        match self {
            StorageBackend::Heap(_) => None,
            StorageBackend::Single(b) => b.path(),
            StorageBackend::Submatrix(b) => b.path(),
            StorageBackend::Multi(b) => b.path(),
        }
    }

    /// Persist `header` to the backing file
    pub fn write_header(&mut self, header: &Header) -> Result<()> {
        match self {
            StorageBackend::Heap(_) => Err(StoreError::state("heap backends have no file header")),
            StorageBackend::Single(b) => b.write_header(header),
            StorageBackend::Submatrix(b) => b.write_header(header),
            StorageBackend::Multi(b) => b.write_header(header),
        }
    }

    /// Window cache statistics for mapped backends
    pub fn cache_stats(&self) -> Option<CacheStats> {
        match self {
            StorageBackend::Heap(_) => None,
            StorageBackend::Single(b) => Some(b.cache_stats()),
            StorageBackend::Submatrix(b) => Some(b.cache_stats()),
            StorageBackend::Multi(b) => Some(b.cache_stats()),
        }
    }

    pub(crate) fn rebind_path(&mut self, path: std::path::PathBuf) {
        match self {
            StorageBackend::Heap(_) => {}
            StorageBackend::Single(b) => b.rebind_path(path),
            StorageBackend::Submatrix(b) => b.rebind_path(path),
            StorageBackend::Multi(b) => b.rebind_path(path),
        }
    }
}

impl ArrayStorage for StorageBackend {
    fn layout(&self) -> &BlockLayout {
        dispatch!(self, b => b.layout())
    }

    fn codec(&self) -> ElementCodec {
        dispatch!(self, b => b.codec())
    }

    fn read_point(&self, indices: &[usize]) -> Result<f64> {
        dispatch!(self, b => b.read_point(indices))
    }

    fn write_point(&mut self, indices: &[usize], value: f64) -> Result<()> {
        dispatch!(self, b => b.write_point(indices, value))
    }

    fn zero_all(&mut self) -> Result<()> {
        dispatch!(self, b => b.zero_all())
    }

    fn force_to_stable(&mut self) -> Result<()> {
        dispatch!(self, b => b.force_to_stable())
    }

    fn is_writable(&self) -> bool {
        dispatch!(self, b => b.is_writable())
    }

    fn set_writable(&mut self, writable: bool) -> Result<()> {
        dispatch!(self, b => b.set_writable(writable))
    }

    fn close(&mut self) -> Result<()> {
        dispatch!(self, b => b.close())
    }

    fn is_closed(&self) -> bool {
        dispatch!(self, b => b.is_closed())
    }

    fn read_vector(&self, selection: &VectorSelection) -> Result<Vec<f64>> {
        dispatch!(self, b => b.read_vector(selection))
    }

    fn write_vector(&mut self, selection: &VectorSelection, values: &[f64]) -> Result<()> {
        dispatch!(self, b => b.write_vector(selection, values))
    }

    fn sum_all(&self) -> Result<f64> {
        dispatch!(self, b => b.sum_all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::layout::BlockLayout;

    fn heap(sizes: &[usize]) -> StorageBackend {
        let layout = BlockLayout::create_full_matrix(0, sizes).unwrap();
        StorageBackend::Heap(HeapBackend::new(layout, ElementCodec::default()))
    }

    #[test]
    fn test_vector_round_trip() {
        let mut backend = heap(&[8, 4]);
        let selection = VectorSelection::new(0, 2, 5, vec![0, 3]);
        backend
            .write_vector(&selection, &[1.0, 2.0, 3.0, 4.0])
            .unwrap();

        assert_eq!(backend.read_point(&[2, 3]).unwrap(), 1.0);
        assert_eq!(backend.read_point(&[5, 3]).unwrap(), 4.0);
        assert_eq!(
            backend.read_vector(&selection).unwrap(),
            vec![1.0, 2.0, 3.0, 4.0]
        );
        assert_eq!(backend.sum_all().unwrap(), 10.0);
    }

    #[test]
    fn test_complex_vector_reads_pairs() {
        let mut backend = heap(&[8, 2]);
        for i in 0..8 {
            backend.write_point(&[i, 1], i as f64).unwrap();
        }

        let selection = VectorSelection::new(0, 1, 2, vec![0, 1]).complex(true);
        assert_eq!(selection.value_count(), Some(4));
        assert_eq!(
            backend.read_vector(&selection).unwrap(),
            vec![2.0, 3.0, 4.0, 5.0]
        );
    }

    #[test]
    fn test_vector_bounds() {
        let backend = heap(&[8, 4]);
        let past_end = VectorSelection::new(1, 0, 4, vec![0, 0]);
        assert!(matches!(
            backend.read_vector(&past_end),
            Err(StoreError::AddressRange { dim: 1, .. })
        ));

        let complex_past_end = VectorSelection::new(0, 0, 4, vec![0, 0]).complex(true);
        assert!(backend.read_vector(&complex_past_end).is_err());

        // doubling a huge complex bound must not wrap into a valid range
        let overflowing = VectorSelection::new(0, 0, usize::MAX / 2 + 1, vec![0, 0]).complex(true);
        assert_eq!(overflowing.raw_range(), None);
        assert!(matches!(
            backend.read_vector(&overflowing),
            Err(StoreError::AddressRange { dim: 0, size: 8, .. })
        ));

        let wrong_rank = VectorSelection::new(0, 0, 1, vec![0]);
        assert!(matches!(
            backend.read_vector(&wrong_rank),
            Err(StoreError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_write_vector_length_mismatch() {
        let mut backend = heap(&[8]);
        let selection = VectorSelection::new(0, 0, 3, vec![0]);
        assert!(backend.write_vector(&selection, &[1.0]).is_err());
    }

    #[test]
    fn test_positions_match_layout() {
        let backend = heap(&[4, 4, 4]);
        assert_eq!(backend.element_position(&[1, 2, 3]).unwrap(), 57);
        assert_eq!(backend.byte_position(&[1, 2, 3]).unwrap(), 57 * 4);
        assert_eq!(backend.size(2).unwrap(), 4);
        assert_eq!(backend.total_element_count(), 64);
        assert_eq!(backend.kind(), BackendKind::Heap);
        assert!(backend.path().is_none());
    }
}
