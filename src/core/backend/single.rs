//! Single-mapping backend
//!
//! The whole data region is covered by one window, mapped on first access
//! and held until close.

use super::mapped::{mapped_backend, MappedStore};
use crate::core::codec::ElementCodec;
use crate::core::error::{Result, StoreError};
use crate::core::io::ArrayFile;
use crate::core::layout::BlockLayout;
use crate::core::window_cache::CacheLimits;

#[derive(Debug)]
pub struct SingleWindowBackend {
    store: MappedStore,
}

impl SingleWindowBackend {
    pub fn open(file: ArrayFile, layout: BlockLayout, codec: ElementCodec) -> Result<Self> {
        if layout.is_submatrix() {
            return Err(StoreError::InvalidLayout(
                "submatrix layouts need the submatrix backend".to_string(),
            ));
        }
        let window_bytes = layout.data_bytes();
        let limits = CacheLimits {
            max_resident: 1,
            min_tracked_bytes: 0,
        };
        Ok(SingleWindowBackend {
            store: MappedStore::new(file, layout, codec, window_bytes, limits)?,
        })
    }

    /// Bytes covered by the mapping
    pub fn mapped_len(&self) -> u64 {
        self.store.window_bytes()
    }

    pub fn is_mapped(&self) -> bool {
        self.store.cache().is_mapped(0)
    }
}

mapped_backend!(SingleWindowBackend);
