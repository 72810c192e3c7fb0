//! # Specstore - Out-of-Core N-Dimensional Array Storage
//!
//! `specstore` stores large N-dimensional arrays of 4-byte elements (spectra,
//! images, hypercubes) in files that are addressed point by point through
//! memory mappings, so arrays far larger than RAM can be read and written
//! without loading them.
//!
//! - **Block layouts**: full-matrix, blocked, or sub-cube storage with one
//!   shared address function
//! - **Four backends**: heap buffer, single mapping, sub-cube mapping, and
//!   windowed mappings behind a bounded LRU cache
//! - **Safe resizing**: shape changes copy into a new file that is renamed
//!   over the original only after the copy is flushed
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use specstore::{Dataset, DatasetSpec, StoreConfig, Result};
//!
//! # fn main() -> Result<()> {
//! let config = StoreConfig::default();
//! let mut data = Dataset::create("spectrum.spst", DatasetSpec::new(&[4096, 512]), &config)?;
//!
//! data.write_point(&[10, 20], 1.5)?;
//! assert_eq!(data.read_point(&[10, 20])?, 1.5);
//!
//! // grow the second dimension, keeping existing values
//! data.resize(&[4096, 1024])?;
//! data.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Sharing across threads
//!
//! Reads take `&self`; writes and structural operations (`resize`,
//! `persist_to`, `close`) take `&mut self`. Wrap a dataset in a
//! `parking_lot::RwLock` to share it:
//!
//! ```rust,no_run
//! use parking_lot::RwLock;
//! use specstore::{Dataset, OpenMode, StoreConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> specstore::Result<()> {
//! let data = Arc::new(RwLock::new(Dataset::open(
//!     "spectrum.spst",
//!     OpenMode::ReadOnly,
//!     &StoreConfig::default(),
//! )?));
//! let sum = data.read().sum_all()?;
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use crate::core::{
    backend::{ArrayStorage, BackendKind, StorageBackend, VectorSelection},
    codec::{ByteOrder, ElementCodec, ElementType},
    config::StoreConfig,
    error::{Result, StoreError},
    header::{DimensionInfo, Header, HEADER_SIZE},
    layout::{BlockLayout, BlockSizePolicy, IndexIter, LayoutKind, TargetElementsPolicy},
    migrate::{MigrationReport, StorageMigrator},
    selector::{BackendSelector, StorageMode},
    window_cache::CacheStats,
};

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Shape and storage options for a new dataset
///
/// # Examples
///
/// ```rust
/// use specstore::{DatasetSpec, ElementType, LayoutKind};
///
/// let spec = DatasetSpec::new(&[1024, 256])
///     .element_type(ElementType::Int32)
///     .layout(LayoutKind::BlockMatrix)
///     .complex(0, true)
///     .label(1, "15N");
/// assert_eq!(spec.sizes(), &[1024, 256]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSpec {
    sizes: Vec<usize>,
    element_type: ElementType,
    byte_order: ByteOrder,
    layout: LayoutKind,
    complex: Vec<bool>,
    labels: Vec<Option<String>>,
}

impl DatasetSpec {
    /// Float32 full-matrix dataset in native byte order
    pub fn new(sizes: &[usize]) -> Self {
        DatasetSpec {
            sizes: sizes.to_vec(),
            element_type: ElementType::Float32,
            byte_order: ByteOrder::native(),
            layout: LayoutKind::FullMatrix,
            complex: vec![false; sizes.len()],
            labels: vec![None; sizes.len()],
        }
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn element_type(mut self, element_type: ElementType) -> Self {
        self.element_type = element_type;
        self
    }

    pub fn byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn layout(mut self, layout: LayoutKind) -> Self {
        self.layout = layout;
        self
    }

    /// Mark dimension `dim` as holding real/imaginary pairs
    ///
    /// Out-of-range dimensions are ignored.
    pub fn complex(mut self, dim: usize, complex: bool) -> Self {
        if let Some(flag) = self.complex.get_mut(dim) {
            *flag = complex;
        }
        self
    }

    pub fn label<S: Into<String>>(mut self, dim: usize, label: S) -> Self {
        if let Some(slot) = self.labels.get_mut(dim) {
            *slot = Some(label.into());
        }
        self
    }

    fn codec(&self) -> ElementCodec {
        ElementCodec::new(self.element_type, self.byte_order)
    }

    fn build_layout(&self, config: &StoreConfig) -> Result<BlockLayout> {
        let header_size = HEADER_SIZE as u64;
        let policy = config.block_policy();
        match self.layout {
            LayoutKind::FullMatrix => BlockLayout::create_full_matrix(header_size, &self.sizes),
            LayoutKind::BlockMatrix => {
                BlockLayout::create_block_matrix(header_size, &self.sizes, &policy)
            }
            LayoutKind::Submatrix => {
                BlockLayout::create_submatrix(header_size, &self.sizes, &policy)
            }
        }
    }

    fn build_header(&self, layout: &BlockLayout) -> Result<Header> {
        let mut header = Header::for_layout(layout, self.codec());
        for (info, (&complex, label)) in header
            .dims
            .iter_mut()
            .zip(self.complex.iter().zip(&self.labels))
        {
            info.complex = complex;
            if let Some(label) = label {
                info.label = label.clone();
            }
        }
        header.validate()?;
        Ok(header)
    }
}

/// Access mode for [`Dataset::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

impl OpenMode {
    pub fn is_writable(self) -> bool {
        self == OpenMode::ReadWrite
    }
}

/// Summary of an open dataset
#[derive(Debug, Clone, Serialize)]
pub struct DatasetInfo {
    pub path: Option<PathBuf>,
    pub backend: BackendKind,
    pub writable: bool,
    pub total_elements: u64,
    pub data_bytes: u64,
    pub cache: Option<CacheStatsInfo>,
    pub header: Header,
}

/// Serializable view of [`CacheStats`]
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStatsInfo {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub resident: usize,
    pub mapped: usize,
    pub pinned: usize,
    pub capacity: usize,
    pub hit_rate: f64,
}

impl From<CacheStats> for CacheStatsInfo {
    fn from(stats: CacheStats) -> Self {
        CacheStatsInfo {
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            resident: stats.resident,
            mapped: stats.mapped,
            pinned: stats.pinned,
            capacity: stats.capacity,
            hit_rate: stats.hit_rate(),
        }
    }
}

/// An N-dimensional array with its header and storage backend
///
/// # Examples
///
/// ```rust
/// use specstore::{Dataset, DatasetSpec, StoreConfig};
///
/// # fn main() -> specstore::Result<()> {
/// let mut data = Dataset::create_in_memory(DatasetSpec::new(&[4, 4, 4]), &StoreConfig::default())?;
/// data.write_point(&[1, 2, 3], 1.5)?;
/// assert_eq!(data.sum_all()?, 1.5);
/// assert!(data.is_dirty());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Dataset {
    header: Header,
    backend: StorageBackend,
    config: StoreConfig,
    dirty: bool,
    header_dirty: bool,
    spill_path: Option<PathBuf>,
    /// Scratch file created when a heap array spilled; removed on close
    scratch: Option<PathBuf>,
}

impl Dataset {
    /// Create a zero-filled array file at `path`
    ///
    /// The backend variant is chosen from the data size and layout.
    pub fn create<P: AsRef<Path>>(path: P, spec: DatasetSpec, config: &StoreConfig) -> Result<Self> {
        config.check()?;
        let layout = spec.build_layout(config)?;
        let header = spec.build_header(&layout)?;
        info!(
            path = %path.as_ref().display(),
            sizes = ?spec.sizes(),
            data_bytes = layout.data_bytes(),
            "creating dataset"
        );
        let backend = BackendSelector::new(config).create(path, &header)?;
        Ok(Self::from_parts(header, backend, config))
    }

    /// Create a heap-resident array with no backing file
    ///
    /// Use [`persist_to`](Self::persist_to) to write it out.
    pub fn create_in_memory(spec: DatasetSpec, config: &StoreConfig) -> Result<Self> {
        config.check()?;
        let layout = spec.build_layout(config)?;
        let header = spec.build_header(&layout)?;
        debug!(sizes = ?spec.sizes(), "creating in-memory dataset");
        let backend =
            BackendSelector::new(config).build(None, layout, header.codec(), StorageMode::Heap)?;
        Ok(Self::from_parts(header, backend, config))
    }

    /// Open an existing array file
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode, config: &StoreConfig) -> Result<Self> {
        config.check()?;
        info!(path = %path.as_ref().display(), ?mode, "opening dataset");
        let (header, backend) = BackendSelector::new(config).open(path, mode.is_writable())?;
        Ok(Self::from_parts(header, backend, config))
    }

    fn from_parts(header: Header, backend: StorageBackend, config: &StoreConfig) -> Self {
        Dataset {
            header,
            backend,
            config: config.clone(),
            dirty: false,
            header_dirty: false,
            spill_path: None,
            scratch: None,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.backend.is_closed() {
            return Err(StoreError::state("dataset is closed"));
        }
        Ok(())
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn layout(&self) -> &BlockLayout {
        self.backend.layout()
    }

    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Backing file path, `None` for in-memory or closed datasets
    pub fn path(&self) -> Option<&Path> {
        self.backend.path()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn n_dim(&self) -> usize {
        self.header.n_dim()
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.header.sizes()
    }

    pub fn size(&self, dim: usize) -> Result<usize> {
        self.backend.size(dim)
    }

    pub fn total_element_count(&self) -> u64 {
        self.backend.total_element_count()
    }

    pub fn element_position(&self, indices: &[usize]) -> Result<u64> {
        self.backend.element_position(indices)
    }

    pub fn byte_position(&self, indices: &[usize]) -> Result<u64> {
        self.backend.byte_position(indices)
    }

    pub fn read_point(&self, indices: &[usize]) -> Result<f64> {
        self.backend.read_point(indices)
    }

    pub fn write_point(&mut self, indices: &[usize], value: f64) -> Result<()> {
        self.backend.write_point(indices, value)?;
        self.dirty = true;
        Ok(())
    }

    fn selection(&self, dim: usize, first: usize, last: usize, fixed: &[usize]) -> Result<VectorSelection> {
        let info = self.dimension(dim)?;
        Ok(VectorSelection::new(dim, first, last, fixed.to_vec()).complex(info.complex))
    }

    /// Read points `first..=last` along `dim` with the other indices fixed
    ///
    /// On a complex dimension `first` and `last` count complex points and the
    /// result interleaves real and imaginary parts.
    pub fn read_vector(&self, dim: usize, first: usize, last: usize, fixed: &[usize]) -> Result<Vec<f64>> {
        let selection = self.selection(dim, first, last, fixed)?;
        self.backend.read_vector(&selection)
    }

    pub fn write_vector(
        &mut self,
        dim: usize,
        first: usize,
        last: usize,
        fixed: &[usize],
        values: &[f64],
    ) -> Result<()> {
        let selection = self.selection(dim, first, last, fixed)?;
        self.backend.write_vector(&selection, values)?;
        self.dirty = true;
        Ok(())
    }

    pub fn sum_all(&self) -> Result<f64> {
        self.backend.sum_all()
    }

    pub fn zero_all(&mut self) -> Result<()> {
        self.backend.zero_all()?;
        self.dirty = true;
        Ok(())
    }

    /// Whether values changed since the last [`clear_dirty`](Self::clear_dirty)
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn is_writable(&self) -> bool {
        self.backend.is_writable()
    }

    /// Switch between read-only and read-write access
    pub fn set_writable(&mut self, writable: bool) -> Result<()> {
        self.ensure_open()?;
        if !writable {
            self.write_pending_header()?;
        }
        self.backend.set_writable(writable)
    }

    pub fn is_closed(&self) -> bool {
        self.backend.is_closed()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.backend.cache_stats()
    }

    pub fn dimension(&self, dim: usize) -> Result<&DimensionInfo> {
        self.header.dims.get(dim).ok_or(StoreError::AddressRange {
            dim,
            index: dim,
            size: self.header.n_dim(),
        })
    }

    fn dimension_mut(&mut self, dim: usize) -> Result<&mut DimensionInfo> {
        self.ensure_open()?;
        if !self.backend.is_writable() {
            return Err(StoreError::state("dataset is read-only"));
        }
        let n_dim = self.header.n_dim();
        let info = self.header.dims.get_mut(dim).ok_or(StoreError::AddressRange {
            dim,
            index: dim,
            size: n_dim,
        })?;
        self.header_dirty = true;
        Ok(info)
    }

    /// Set a dimension's label (at most 16 bytes)
    pub fn set_label(&mut self, dim: usize, label: &str) -> Result<()> {
        if label.len() > 16 {
            return Err(StoreError::InvalidHeader(format!(
                "label {:?} longer than 16 bytes",
                label
            )));
        }
        self.dimension_mut(dim)?.label = label.to_string();
        Ok(())
    }

    /// Set spectrometer frequency and sweep width of a dimension
    pub fn set_spectral_width(&mut self, dim: usize, sf: f64, sw: f64) -> Result<()> {
        let info = self.dimension_mut(dim)?;
        info.sf = sf;
        info.sw = sw;
        Ok(())
    }

    /// Set the reference value and the point it sits at
    pub fn set_reference(&mut self, dim: usize, ref_value: f64, ref_point: f64) -> Result<()> {
        let info = self.dimension_mut(dim)?;
        info.ref_value = ref_value;
        info.ref_point = ref_point;
        Ok(())
    }

    fn write_pending_header(&mut self) -> Result<()> {
        if self.header_dirty && self.backend.path().is_some() && self.backend.is_writable() {
            self.backend.write_header(&self.header)?;
        }
        self.header_dirty = false;
        Ok(())
    }

    /// Force pending values and header changes to stable storage
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.write_pending_header()?;
        self.backend.force_to_stable()
    }

    /// Change the array's shape, keeping every value inside the new bounds
    ///
    /// Points outside the old shape read back as zero.
    pub fn resize(&mut self, sizes: &[usize]) -> Result<MigrationReport> {
        self.ensure_open()?;
        if !self.backend.is_writable() {
            return Err(StoreError::state("cannot resize a read-only dataset"));
        }
        self.write_pending_header()?;

        let mut migrator = StorageMigrator::new(&self.config);
        if let Some(path) = &self.spill_path {
            migrator = migrator.with_spill_path(path);
        }
        let report = migrator.migrate(&mut self.backend, &self.header, sizes)?;
        if self.spill_path.is_none() && report.spilled_to.is_some() {
            self.scratch = report.spilled_to.clone();
        }
        self.header = report.header.clone();
        self.dirty = true;
        info!(sizes = ?sizes, backend = ?report.to_kind, "resized dataset");
        Ok(report)
    }

    /// File an in-memory dataset moves into if a resize outgrows the heap
    ///
    /// Without one, such a resize spills into a scratch file that is
    /// deleted when the dataset closes.
    pub fn set_spill_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.spill_path = Some(path.into());
    }

    /// Copy an in-memory dataset into a new file and switch to it
    pub fn persist_to<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.ensure_open()?;
        if self.backend.path().is_some() {
            return Err(StoreError::state("dataset is already file-backed"));
        }

        let migrator = StorageMigrator::new(&self.config);
        let target = migrator.materialize(&self.backend, &self.header, path.as_ref())?;
        let mut heap = std::mem::replace(&mut self.backend, target);
        if let Err(e) = heap.close() {
            warn!(error = %e, "failed to release heap buffer after persisting");
        }
        self.header_dirty = false;
        info!(path = %path.as_ref().display(), "persisted dataset");
        Ok(())
    }

    /// Summary suitable for display or JSON output
    pub fn info(&self) -> DatasetInfo {
        DatasetInfo {
            path: self.path().map(Path::to_path_buf),
            backend: self.backend_kind(),
            writable: self.is_writable(),
            total_elements: self.total_element_count(),
            data_bytes: self.layout().data_bytes(),
            cache: self.cache_stats().map(CacheStatsInfo::from),
            header: self.header.clone(),
        }
    }

    /// Flush and release the backend; later calls are no-ops
    pub fn close(&mut self) -> Result<()> {
        if self.backend.is_closed() {
            return Ok(());
        }
        let header_result = self.write_pending_header();
        if let Err(e) = &header_result {
            warn!(error = %e, "failed to write header while closing");
        }
        self.backend.close()?;
        if let Some(scratch) = self.scratch.take() {
            if let Err(e) = std::fs::remove_file(&scratch) {
                warn!(path = %scratch.display(), error = %e, "failed to remove scratch file");
            }
        }
        header_result
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close dataset on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_in_memory_dataset() {
        let mut data =
            Dataset::create_in_memory(DatasetSpec::new(&[4, 4, 4]), &StoreConfig::default())
                .unwrap();
        assert_eq!(data.backend_kind(), BackendKind::Heap);
        assert!(!data.is_dirty());

        data.write_point(&[1, 2, 3], 1.5).unwrap();
        assert!(data.is_dirty());
        assert_eq!(data.sum_all().unwrap(), 1.5);

        data.clear_dirty();
        assert!(!data.is_dirty());
        assert!(data.path().is_none());
    }

    #[test]
    fn test_spec_metadata_reaches_header() {
        let spec = DatasetSpec::new(&[8, 4])
            .element_type(ElementType::Int32)
            .byte_order(ByteOrder::Big)
            .complex(0, true)
            .label(1, "13C");
        let data = Dataset::create_in_memory(spec, &StoreConfig::default()).unwrap();

        let header = data.header();
        assert_eq!(header.element_type, ElementType::Int32);
        assert_eq!(header.byte_order, ByteOrder::Big);
        assert!(header.dims[0].complex);
        assert_eq!(header.dims[1].label, "13C");
    }

    #[test]
    fn test_odd_complex_dimension_rejected() {
        let spec = DatasetSpec::new(&[7]).complex(0, true);
        assert!(Dataset::create_in_memory(spec, &StoreConfig::default()).is_err());
    }

    #[test]
    fn test_complex_vector_through_dataset() {
        let spec = DatasetSpec::new(&[8, 2]).complex(0, true);
        let mut data = Dataset::create_in_memory(spec, &StoreConfig::default()).unwrap();
        data.write_vector(0, 1, 2, &[0, 1], &[1.0, -1.0, 2.0, -2.0])
            .unwrap();

        assert_eq!(data.read_point(&[2, 1]).unwrap(), 1.0);
        assert_eq!(data.read_point(&[5, 1]).unwrap(), -2.0);
        assert_eq!(
            data.read_vector(0, 1, 2, &[0, 1]).unwrap(),
            vec![1.0, -1.0, 2.0, -2.0]
        );
    }

    #[test]
    fn test_metadata_persists_on_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.spst");
        let config = StoreConfig::default();

        let mut data = Dataset::create(&path, DatasetSpec::new(&[16]), &config).unwrap();
        data.set_label(0, "1H").unwrap();
        data.set_spectral_width(0, 600.13, 12000.0).unwrap();
        data.set_reference(0, 4.7, 8.0).unwrap();
        assert!(data.set_label(0, "a label that is far too long").is_err());
        data.close().unwrap();

        let reopened = Dataset::open(&path, OpenMode::ReadOnly, &config).unwrap();
        let info = reopened.dimension(0).unwrap();
        assert_eq!(info.label, "1H");
        assert_eq!(info.sf, 600.13);
        assert_eq!(info.sw, 12000.0);
        assert_eq!(info.ref_value, 4.7);
        assert_eq!(info.ref_point, 8.0);
    }

    #[test]
    fn test_read_only_dataset_refuses_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ro.spst");
        let config = StoreConfig::default();
        Dataset::create(&path, DatasetSpec::new(&[4, 4]), &config)
            .unwrap()
            .close()
            .unwrap();

        let mut data = Dataset::open(&path, OpenMode::ReadOnly, &config).unwrap();
        assert!(matches!(data.write_point(&[0, 0], 1.0), Err(StoreError::State(_))));
        assert!(matches!(data.resize(&[8, 8]), Err(StoreError::State(_))));
        assert!(matches!(data.set_label(0, "x"), Err(StoreError::State(_))));
        assert!(!data.is_dirty());
    }

    #[test]
    fn test_closed_dataset() {
        let mut data =
            Dataset::create_in_memory(DatasetSpec::new(&[4]), &StoreConfig::default()).unwrap();
        data.close().unwrap();
        data.close().unwrap();
        assert!(data.is_closed());
        assert!(matches!(data.resize(&[8]), Err(StoreError::State(_))));
        assert!(data.flush().is_err());
    }

    #[test]
    fn test_persist_in_memory_dataset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("persisted.spst");
        let config = StoreConfig::default();

        let mut data = Dataset::create_in_memory(DatasetSpec::new(&[6, 6]), &config).unwrap();
        data.write_point(&[5, 5], 3.0).unwrap();
        data.persist_to(&path).unwrap();
        assert_eq!(data.backend_kind(), BackendKind::SingleWindow);
        assert_eq!(data.path(), Some(path.as_path()));
        assert_eq!(data.read_point(&[5, 5]).unwrap(), 3.0);
        assert!(data.persist_to(dir.path().join("again.spst")).is_err());
        data.close().unwrap();

        let reopened = Dataset::open(&path, OpenMode::ReadOnly, &config).unwrap();
        assert_eq!(reopened.read_point(&[5, 5]).unwrap(), 3.0);
        assert_eq!(reopened.sizes(), vec![6, 6]);
    }

    #[test]
    fn test_info_serializes() {
        let data =
            Dataset::create_in_memory(DatasetSpec::new(&[2, 3]), &StoreConfig::default()).unwrap();
        let json = serde_json::to_value(data.info()).unwrap();
        assert_eq!(json["backend"], "Heap");
        assert_eq!(json["total_elements"], 6);
        assert!(json["cache"].is_null());
    }

    #[test]
    fn test_info_reports_mapped_windows() {
        let dir = TempDir::new().unwrap();
        let data = Dataset::create(
            dir.path().join("mapped.spst"),
            DatasetSpec::new(&[4, 4]),
            &StoreConfig::default(),
        )
        .unwrap();
        data.read_point(&[1, 1]).unwrap();

        let cache = data.info().cache.unwrap();
        assert_eq!(cache.mapped, 1);
        assert_eq!(cache.pinned, 0);
        let json = serde_json::to_value(data.info()).unwrap();
        assert_eq!(json["cache"]["mapped"], 1);
    }

    #[test]
    fn test_heap_resize_spills_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spill.spst");
        let config = StoreConfig::default().with_heap_max_bytes(64);
        let mut data = Dataset::create_in_memory(DatasetSpec::new(&[4]), &config).unwrap();
        data.write_point(&[2], 7.0).unwrap();
        data.set_spill_path(&path);

        let report = data.resize(&[100]).unwrap();
        assert_eq!(report.to_kind, BackendKind::SingleWindow);
        assert_eq!(data.path(), Some(path.as_path()));
        assert_eq!(data.read_point(&[2]).unwrap(), 7.0);
        data.close().unwrap();

        // caller-supplied spill files are kept
        let reopened = Dataset::open(&path, OpenMode::ReadOnly, &config).unwrap();
        assert_eq!(reopened.sizes(), vec![100]);
        assert_eq!(reopened.read_point(&[2]).unwrap(), 7.0);
    }

    #[test]
    fn test_scratch_spill_removed_on_close() {
        let config = StoreConfig::default().with_heap_max_bytes(64);
        let mut data = Dataset::create_in_memory(DatasetSpec::new(&[4]), &config).unwrap();
        data.resize(&[100]).unwrap();

        let scratch = data.path().unwrap().to_path_buf();
        assert!(scratch.exists());
        data.close().unwrap();
        assert!(!scratch.exists());
    }

    #[test]
    fn test_oversized_heap_dataset_shrinks_in_memory() {
        let config = StoreConfig::default().with_heap_max_bytes(64);
        let mut data = Dataset::create_in_memory(DatasetSpec::new(&[64]), &config).unwrap();
        data.write_point(&[10], 1.0).unwrap();

        data.resize(&[32]).unwrap();
        assert_eq!(data.backend_kind(), BackendKind::Heap);
        assert_eq!(data.read_point(&[10]).unwrap(), 1.0);
    }
}
