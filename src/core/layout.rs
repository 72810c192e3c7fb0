//! Block layout geometry
//!
//! A [`BlockLayout`] maps a logical multi-index to the element slot it is
//! stored in. Dimension 0 varies fastest. Three kinds share one address
//! function:
//!
//! - **Full matrix**: one block spanning every dimension (plain strided order)
//! - **Block matrix**: fixed-size blocks, optionally followed by a per-block
//!   header of reserved elements
//! - **Submatrix**: fixed-size blocks stored back to back as sub-cubes
//!
//! ```text
//! element = block_number * (block_elements + block_header_elements) + intra
//! block_number = Σ (index[d] / block_size[d]) * block_stride[d]
//! intra        = Σ (index[d] % block_size[d]) * point_stride[d]
//! ```
//!
//! A full-matrix layout is the degenerate case with one block, so every
//! backend reaches the same slot for the same indices.

use crate::core::codec::ELEMENT_BYTES;
use crate::core::error::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// Maximum number of dimensions an array may have
pub const MAX_DIMENSIONS: usize = 8;

/// Default target element count per block
pub const DEFAULT_BLOCK_TARGET_ELEMENTS: usize = 8192;

/// How blocks are arranged in the data region
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutKind {
    FullMatrix = 0,
    BlockMatrix = 1,
    Submatrix = 2,
}

impl LayoutKind {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::FullMatrix),
            1 => Ok(Self::BlockMatrix),
            2 => Ok(Self::Submatrix),
            other => Err(StoreError::InvalidHeader(format!(
                "unknown layout kind tag {}",
                other
            ))),
        }
    }
}

/// Chooses a block size for every dimension
pub trait BlockSizePolicy: Send + Sync {
    /// Return one block size per entry of `sizes`, each in `1..=size`
    fn block_sizes(&self, sizes: &[usize]) -> Vec<usize>;
}

/// Doubles block sizes round-robin while the block stays within a budget
///
/// Starting from 1 in every dimension, each round tries to double every
/// dimension's block size (capped at the dimension size). A doubling is kept
/// only while the block element count stays at or under `target_elements`.
/// Small dimensions end up with a block size equal to their own size.
#[derive(Debug, Clone, Copy)]
pub struct TargetElementsPolicy {
    pub target_elements: usize,
}

impl TargetElementsPolicy {
    pub fn new(target_elements: usize) -> Self {
        TargetElementsPolicy { target_elements }
    }
}

impl Default for TargetElementsPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_TARGET_ELEMENTS)
    }
}

impl BlockSizePolicy for TargetElementsPolicy {
    fn block_sizes(&self, sizes: &[usize]) -> Vec<usize> {
        let target = self.target_elements.max(1);
        let mut blocks = vec![1usize; sizes.len()];
        let mut product = 1usize;

        loop {
            let mut grew = false;
            for (dim, &size) in sizes.iter().enumerate() {
                if blocks[dim] >= size {
                    continue;
                }
                let candidate = (blocks[dim] * 2).min(size);
                let next = product / blocks[dim] * candidate;
                if next <= target {
                    product = next;
                    blocks[dim] = candidate;
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        blocks
    }
}

/// Uses caller-supplied block sizes, clamped to each dimension
#[derive(Debug, Clone)]
pub struct FixedBlockSizes(pub Vec<usize>);

impl BlockSizePolicy for FixedBlockSizes {
    fn block_sizes(&self, sizes: &[usize]) -> Vec<usize> {
        sizes
            .iter()
            .enumerate()
            .map(|(dim, &size)| self.0.get(dim).copied().unwrap_or(size).clamp(1, size))
            .collect()
    }
}

/// Immutable geometry of an array's data region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    kind: LayoutKind,
    header_size: u64,
    block_header_elements: usize,
    sizes: Vec<usize>,
    block_sizes: Vec<usize>,
    n_blocks: Vec<usize>,
    /// Stride in blocks for moving one block along each dimension
    block_strides: Vec<usize>,
    /// Stride in elements for moving one point inside a block
    point_strides: Vec<usize>,
    block_elements: usize,
}

impl BlockLayout {
    /// Layout with a single block covering the whole array
    pub fn create_full_matrix(header_size: u64, sizes: &[usize]) -> Result<Self> {
        Self::from_parts(LayoutKind::FullMatrix, header_size, sizes, sizes, 0)
    }

    /// Blocked layout with sizes chosen by `policy`
    pub fn create_block_matrix(
        header_size: u64,
        sizes: &[usize],
        policy: &dyn BlockSizePolicy,
    ) -> Result<Self> {
        let block_sizes = policy.block_sizes(sizes);
        Self::from_parts(LayoutKind::BlockMatrix, header_size, sizes, &block_sizes, 0)
    }

    /// Blocked layout stored as contiguous sub-cubes
    pub fn create_submatrix(
        header_size: u64,
        sizes: &[usize],
        policy: &dyn BlockSizePolicy,
    ) -> Result<Self> {
        let block_sizes = policy.block_sizes(sizes);
        Self::from_parts(LayoutKind::Submatrix, header_size, sizes, &block_sizes, 0)
    }

    /// Build a layout of `kind` for new `sizes`, keeping this layout's
    /// header sizes
    pub fn reshaped(&self, sizes: &[usize], policy: &dyn BlockSizePolicy) -> Result<Self> {
        let block_sizes = match self.kind {
            LayoutKind::FullMatrix => sizes.to_vec(),
            LayoutKind::BlockMatrix | LayoutKind::Submatrix => policy.block_sizes(sizes),
        };
        Self::from_parts(
            self.kind,
            self.header_size,
            sizes,
            &block_sizes,
            self.block_header_elements,
        )
    }

    /// Reserve `elements` header slots after every block
    ///
    /// Only block-matrix layouts carry per-block headers.
    pub fn with_block_header(self, elements: usize) -> Result<Self> {
        if self.kind != LayoutKind::BlockMatrix && elements != 0 {
            return Err(StoreError::InvalidLayout(format!(
                "{:?} layouts have no per-block header",
                self.kind
            )));
        }
        Ok(BlockLayout {
            block_header_elements: elements,
            ..self
        })
    }

    /// Rebuild a layout from its persisted description
    pub fn from_parts(
        kind: LayoutKind,
        header_size: u64,
        sizes: &[usize],
        block_sizes: &[usize],
        block_header_elements: usize,
    ) -> Result<Self> {
        let n_dim = sizes.len();
        if n_dim == 0 || n_dim > MAX_DIMENSIONS {
            return Err(StoreError::InvalidLayout(format!(
                "dimension count {} outside 1..={}",
                n_dim, MAX_DIMENSIONS
            )));
        }
        if block_sizes.len() != n_dim {
            return Err(StoreError::DimensionMismatch {
                expected: n_dim,
                actual: block_sizes.len(),
            });
        }
        for (dim, (&size, &block)) in sizes.iter().zip(block_sizes).enumerate() {
            if size == 0 {
                return Err(StoreError::InvalidLayout(format!("dimension {} has size 0", dim)));
            }
            if block == 0 || block > size {
                return Err(StoreError::InvalidLayout(format!(
                    "block size {} invalid for dimension {} of size {}",
                    block, dim, size
                )));
            }
        }
        if kind == LayoutKind::FullMatrix && block_sizes != sizes {
            return Err(StoreError::InvalidLayout(
                "full-matrix block sizes must equal dimension sizes".to_string(),
            ));
        }
        if kind != LayoutKind::BlockMatrix && block_header_elements != 0 {
            return Err(StoreError::InvalidLayout(format!(
                "{:?} layouts have no per-block header",
                kind
            )));
        }

        let n_blocks: Vec<usize> = sizes
            .iter()
            .zip(block_sizes)
            .map(|(&size, &block)| (size + block - 1) / block)
            .collect();

        let mut block_strides = Vec::with_capacity(n_dim);
        let mut point_strides = Vec::with_capacity(n_dim);
        let mut block_stride = 1usize;
        let mut point_stride = 1usize;
        for dim in 0..n_dim {
            block_strides.push(block_stride);
            point_strides.push(point_stride);
            block_stride = block_stride.checked_mul(n_blocks[dim]).ok_or_else(overflow)?;
            point_stride = point_stride.checked_mul(block_sizes[dim]).ok_or_else(overflow)?;
        }

        let layout = BlockLayout {
            kind,
            header_size,
            block_header_elements,
            sizes: sizes.to_vec(),
            block_sizes: block_sizes.to_vec(),
            n_blocks,
            block_strides,
            point_strides,
            block_elements: point_stride,
        };
        layout
            .stored_elements_checked()
            .and_then(|n| n.checked_mul(ELEMENT_BYTES as u64))
            .ok_or_else(overflow)?;

        Ok(layout)
    }

    pub fn kind(&self) -> LayoutKind {
        self.kind
    }

    pub fn is_submatrix(&self) -> bool {
        self.kind == LayoutKind::Submatrix
    }

    pub fn n_dim(&self) -> usize {
        self.sizes.len()
    }

    pub fn header_size(&self) -> u64 {
        self.header_size
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn size(&self, dim: usize) -> Result<usize> {
        // a missing dimension is reported against the dimension count
        self.sizes.get(dim).copied().ok_or(StoreError::AddressRange {
            dim,
            index: dim,
            size: self.sizes.len(),
        })
    }

    pub fn block_sizes(&self) -> &[usize] {
        &self.block_sizes
    }

    pub fn n_blocks(&self) -> &[usize] {
        &self.n_blocks
    }

    pub fn block_strides(&self) -> &[usize] {
        &self.block_strides
    }

    pub fn point_strides(&self) -> &[usize] {
        &self.point_strides
    }

    pub fn block_elements(&self) -> usize {
        self.block_elements
    }

    pub fn block_header_elements(&self) -> usize {
        self.block_header_elements
    }

    /// Elements occupied by one block including its header
    pub fn block_footprint(&self) -> usize {
        self.block_elements + self.block_header_elements
    }

    pub fn total_blocks(&self) -> usize {
        self.n_blocks.iter().product()
    }

    /// Number of logical points
    pub fn total_elements(&self) -> u64 {
        self.sizes.iter().map(|&s| s as u64).product()
    }

    /// Number of element slots in the data region, padding included
    pub fn stored_elements(&self) -> u64 {
        self.total_blocks() as u64 * self.block_footprint() as u64
    }

    fn stored_elements_checked(&self) -> Option<u64> {
        let mut blocks = 1u64;
        for &n in &self.n_blocks {
            blocks = blocks.checked_mul(n as u64)?;
        }
        blocks.checked_mul(self.block_footprint() as u64)
    }

    /// Size of the data region in bytes
    pub fn data_bytes(&self) -> u64 {
        self.stored_elements() * ELEMENT_BYTES as u64
    }

    /// Size of the whole file in bytes
    pub fn file_bytes(&self) -> u64 {
        self.header_size + self.data_bytes()
    }

    /// Fail with `AddressRange` unless every index is inside its dimension
    pub fn check_indices(&self, indices: &[usize]) -> Result<()> {
        if indices.len() != self.sizes.len() {
            return Err(StoreError::DimensionMismatch {
                expected: self.sizes.len(),
                actual: indices.len(),
            });
        }
        for (dim, (&index, &size)) in indices.iter().zip(&self.sizes).enumerate() {
            if index >= size {
                return Err(StoreError::AddressRange { dim, index, size });
            }
        }
        Ok(())
    }

    /// Element slot of `indices`, counted from the start of the data region
    pub fn element_address(&self, indices: &[usize]) -> Result<u64> {
        self.check_indices(indices)?;
        Ok(self.element_address_unchecked(indices))
    }

    /// Absolute byte position of `indices` in the file
    pub fn byte_address(&self, indices: &[usize]) -> Result<u64> {
        Ok(self.header_size + self.data_offset(indices)?)
    }

    /// Byte offset of `indices` relative to the data region
    pub fn data_offset(&self, indices: &[usize]) -> Result<u64> {
        Ok(self.element_address(indices)? * ELEMENT_BYTES as u64)
    }

    pub(crate) fn element_address_unchecked(&self, indices: &[usize]) -> u64 {
        let mut block_number = 0u64;
        let mut intra = 0u64;
        for dim in 0..self.sizes.len() {
            let block = self.block_sizes[dim];
            let index = indices[dim];
            block_number += ((index / block) * self.block_strides[dim]) as u64;
            intra += ((index % block) * self.point_strides[dim]) as u64;
        }
        block_number * self.block_footprint() as u64 + intra
    }

    /// Element slot where block `block_coords` begins
    pub fn block_base(&self, block_coords: &[usize]) -> Result<u64> {
        if block_coords.len() != self.n_dim() {
            return Err(StoreError::DimensionMismatch {
                expected: self.n_dim(),
                actual: block_coords.len(),
            });
        }
        let mut block_number = 0u64;
        for (dim, (&coord, &count)) in block_coords.iter().zip(&self.n_blocks).enumerate() {
            if coord >= count {
                return Err(StoreError::AddressRange {
                    dim,
                    index: coord,
                    size: count,
                });
            }
            block_number += (coord * self.block_strides[dim]) as u64;
        }
        Ok(block_number * self.block_footprint() as u64)
    }
}

fn overflow() -> StoreError {
    StoreError::InvalidLayout("array too large to address".to_string())
}

/// Advance `index` to the next multi-index of `sizes`, dimension 0 fastest
///
/// Returns `false` once every index has been visited.
pub fn next_index(index: &mut [usize], sizes: &[usize]) -> bool {
    for dim in 0..sizes.len() {
        index[dim] += 1;
        if index[dim] < sizes[dim] {
            return true;
        }
        index[dim] = 0;
    }
    false
}

/// Enumerates every multi-index of a shape, dimension 0 fastest
#[derive(Debug, Clone)]
pub struct IndexIter {
    sizes: Vec<usize>,
    current: Option<Vec<usize>>,
}

impl IndexIter {
    pub fn new(sizes: &[usize]) -> Self {
        let current = if sizes.is_empty() || sizes.contains(&0) {
            None
        } else {
            Some(vec![0; sizes.len()])
        };
        IndexIter {
            sizes: sizes.to_vec(),
            current,
        }
    }
}

impl Iterator for IndexIter {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current.take()?;
        let mut next = current.clone();
        if next_index(&mut next, &self.sizes) {
            self.current = Some(next);
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_matrix_is_strided() {
        let layout = BlockLayout::create_full_matrix(0, &[4, 4, 4]).unwrap();
        assert_eq!(layout.point_strides(), &[1, 4, 16]);
        assert_eq!(layout.total_blocks(), 1);
        assert_eq!(layout.element_address(&[1, 2, 3]).unwrap(), 1 + 2 * 4 + 3 * 16);
        assert_eq!(layout.data_bytes(), 64 * 4);
    }

    #[test]
    fn test_block_matrix_address_lands_in_block() {
        let layout =
            BlockLayout::create_block_matrix(0, &[4, 4], &FixedBlockSizes(vec![2, 2])).unwrap();
        assert_eq!(layout.n_blocks(), &[2, 2]);
        assert_eq!(layout.block_strides(), &[1, 2]);
        assert_eq!(layout.point_strides(), &[1, 2]);

        let base = layout.block_base(&[1, 1]).unwrap();
        assert_eq!(base, 12);
        // local (1, 1) inside the block
        assert_eq!(layout.element_address(&[3, 3]).unwrap(), base + 1 + 2);
    }

    #[test]
    fn test_block_header_spacing() {
        let layout = BlockLayout::create_block_matrix(16, &[4, 4], &FixedBlockSizes(vec![2, 2]))
            .unwrap()
            .with_block_header(2)
            .unwrap();
        assert_eq!(layout.block_footprint(), 6);
        assert_eq!(layout.element_address(&[2, 0]).unwrap(), 6);
        assert_eq!(layout.byte_address(&[2, 0]).unwrap(), 16 + 24);
        assert_eq!(layout.stored_elements(), 24);
    }

    #[test]
    fn test_submatrix_rejects_block_header() {
        let layout =
            BlockLayout::create_submatrix(0, &[8, 8], &FixedBlockSizes(vec![4, 4])).unwrap();
        assert!(matches!(
            layout.with_block_header(1),
            Err(StoreError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_partial_last_block_rounds_up() {
        let layout =
            BlockLayout::create_block_matrix(0, &[5, 3], &FixedBlockSizes(vec![2, 2])).unwrap();
        assert_eq!(layout.n_blocks(), &[3, 2]);
        for dim in 0..2 {
            assert!(layout.block_sizes()[dim] * layout.n_blocks()[dim] >= layout.sizes()[dim]);
        }
        assert_eq!(layout.stored_elements(), 6 * 4);
        assert_eq!(layout.total_elements(), 15);
    }

    #[test]
    fn test_out_of_range_index() {
        let layout = BlockLayout::create_full_matrix(0, &[4, 4]).unwrap();
        assert!(matches!(
            layout.element_address(&[4, 0]),
            Err(StoreError::AddressRange { dim: 0, index: 4, size: 4 })
        ));
        assert!(matches!(
            layout.element_address(&[1]),
            Err(StoreError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_strides_increase_with_dimension() {
        let policy = TargetElementsPolicy::new(64);
        let layout = BlockLayout::create_block_matrix(0, &[100, 50, 7], &policy).unwrap();
        let strides = layout.point_strides();
        assert!(strides.windows(2).all(|w| w[0] <= w[1]));
        let blocks = layout.block_strides();
        assert!(blocks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_target_policy_respects_budget() {
        let policy = TargetElementsPolicy::new(8192);
        let blocks = policy.block_sizes(&[1024, 512]);
        assert_eq!(blocks, vec![128, 64]);

        let blocks = policy.block_sizes(&[4, 100_000]);
        assert_eq!(blocks[0], 4);
        assert_eq!(blocks[1], 2048);
        assert!(blocks.iter().product::<usize>() <= 8192);
    }

    #[test]
    fn test_target_policy_small_array_is_one_block() {
        let policy = TargetElementsPolicy::new(8192);
        assert_eq!(policy.block_sizes(&[16, 8, 4]), vec![16, 8, 4]);
    }

    #[test]
    fn test_reshaped_keeps_kind() {
        let layout = BlockLayout::create_full_matrix(64, &[4, 4]).unwrap();
        let grown = layout
            .reshaped(&[8, 6], &TargetElementsPolicy::default())
            .unwrap();
        assert_eq!(grown.kind(), LayoutKind::FullMatrix);
        assert_eq!(grown.block_sizes(), &[8, 6]);
        assert_eq!(grown.header_size(), 64);
    }

    #[test]
    fn test_index_iter_order() {
        let all: Vec<Vec<usize>> = IndexIter::new(&[2, 3]).collect();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0], vec![0, 0]);
        assert_eq!(all[1], vec![1, 0]);
        assert_eq!(all[2], vec![0, 1]);
        assert_eq!(all[5], vec![1, 2]);
    }

    #[test]
    fn test_full_matrix_addresses_follow_iteration_order() {
        let layout = BlockLayout::create_full_matrix(0, &[3, 2, 2]).unwrap();
        for (n, idx) in IndexIter::new(layout.sizes()).enumerate() {
            assert_eq!(layout.element_address(&idx).unwrap(), n as u64);
        }
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(BlockLayout::create_full_matrix(0, &[]).is_err());
        assert!(BlockLayout::create_full_matrix(0, &[4, 0]).is_err());
        assert!(BlockLayout::create_full_matrix(0, &[1; 9]).is_err());
        assert!(BlockLayout::from_parts(LayoutKind::BlockMatrix, 0, &[4], &[5], 0).is_err());
    }
}
