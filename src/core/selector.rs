//! Backend selection
//!
//! Strategy:
//! - No file: heap buffer, as long as the data fits `heap_max_bytes` (or heap
//!   storage was explicitly requested)
//! - Submatrix layouts: one mapping with sub-cube addressing
//! - Data up to `single_window_max_bytes`: one mapping
//! - Anything larger: fixed-size windows behind the LRU window cache

use crate::core::backend::{
    BackendKind, HeapBackend, MultiWindowBackend, SingleWindowBackend, StorageBackend,
    SubmatrixWindowBackend,
};
use crate::core::codec::ElementCodec;
use crate::core::config::StoreConfig;
use crate::core::error::{Result, StoreError};
use crate::core::header::Header;
use crate::core::io::ArrayFile;
use crate::core::layout::{BlockLayout, LayoutKind};
use std::path::Path;
use tracing::debug;

/// Caller preference for where data lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Heap when no file is involved and the data is small, mapped otherwise
    #[default]
    Auto,
    /// Always the heap, regardless of size
    Heap,
    /// Always a mapped file
    Mapped,
}

/// Choose a backend variant from data size, layout kind, and caller mode
pub fn choose_backend(
    data_bytes: u64,
    kind: LayoutKind,
    mode: StorageMode,
    has_file: bool,
    config: &StoreConfig,
) -> Result<BackendKind> {
    match (mode, has_file) {
        (StorageMode::Heap, false) => return Ok(BackendKind::Heap),
        (StorageMode::Heap, true) => {
            return Err(StoreError::Config(
                "heap storage cannot be backed by a file".to_string(),
            ))
        }
        (StorageMode::Mapped, false) => {
            return Err(StoreError::Config(
                "mapped storage needs a backing file".to_string(),
            ))
        }
        (StorageMode::Auto, false) => {
            if data_bytes <= config.heap_max_bytes {
                return Ok(BackendKind::Heap);
            }
            return Err(StoreError::Config(format!(
                "{} data bytes exceed the heap limit of {} and no file was given",
                data_bytes, config.heap_max_bytes
            )));
        }
        (StorageMode::Auto | StorageMode::Mapped, true) => {}
    }

    if kind == LayoutKind::Submatrix {
        Ok(BackendKind::Submatrix)
    } else if data_bytes <= config.single_window_max_bytes {
        Ok(BackendKind::SingleWindow)
    } else {
        Ok(BackendKind::MultiWindow)
    }
}

/// Builds backends according to a [`StoreConfig`]
#[derive(Debug, Clone)]
pub struct BackendSelector {
    config: StoreConfig,
}

impl BackendSelector {
    pub fn new(config: &StoreConfig) -> Self {
        BackendSelector {
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn choose(
        &self,
        data_bytes: u64,
        kind: LayoutKind,
        mode: StorageMode,
        has_file: bool,
    ) -> Result<BackendKind> {
        choose_backend(data_bytes, kind, mode, has_file, &self.config)
    }

    /// Build the backend for `layout`, over `file` when one is given
    pub fn build(
        &self,
        file: Option<ArrayFile>,
        layout: BlockLayout,
        codec: ElementCodec,
        mode: StorageMode,
    ) -> Result<StorageBackend> {
        let kind = self.choose(layout.data_bytes(), layout.kind(), mode, file.is_some())?;
        debug!(
            ?kind,
            data_bytes = layout.data_bytes(),
            sizes = ?layout.sizes(),
            "selected backend"
        );

        let backend = match (kind, file) {
            (BackendKind::Heap, _) => StorageBackend::Heap(HeapBackend::new(layout, codec)),
            (BackendKind::SingleWindow, Some(file)) => {
                StorageBackend::Single(SingleWindowBackend::open(file, layout, codec)?)
            }
            (BackendKind::Submatrix, Some(file)) => {
                StorageBackend::Submatrix(SubmatrixWindowBackend::open(file, layout, codec)?)
            }
            (BackendKind::MultiWindow, Some(file)) => StorageBackend::Multi(
                MultiWindowBackend::open(file, layout, codec, &self.config)?,
            ),
            (_, None) => {
                return Err(StoreError::state("mapped backend selected without a file"));
            }
        };
        Ok(backend)
    }

    /// Create a new zero-filled array file and its backend
    pub fn create<P: AsRef<Path>>(&self, path: P, header: &Header) -> Result<StorageBackend> {
        header.validate()?;
        let layout = header.layout()?;
        let file = ArrayFile::create(path, header, layout.data_bytes())?;
        self.build(Some(file), layout, header.codec(), StorageMode::Mapped)
    }

    /// Open an existing array file, returning its header and backend
    pub fn open<P: AsRef<Path>>(&self, path: P, writable: bool) -> Result<(Header, StorageBackend)> {
        let mut file = ArrayFile::open(path, writable)?;
        let header = file.read_header()?;
        header.validate()?;
        let layout = header.layout()?;
        let backend = self.build(Some(file), layout, header.codec(), StorageMode::Mapped)?;
        Ok((header, backend))
    }
}
