//! Specstore storage engine
//!
//! Out-of-core storage for large N-dimensional arrays of 4-byte elements.
//!
//! ## Modules
//!
//! - [`error`] - Error types for storage operations
//! - [`codec`] - Element encoding (f32/i32, either byte order)
//! - [`header`] - Fixed 1 KiB array file header
//! - [`layout`] - Block layout geometry and addressing
//! - [`io`] - Array file handle
//! - [`window`] / [`window_cache`] - Memory-mapped windows and their LRU cache
//! - [`backend`] - Storage backends behind the [`ArrayStorage`] contract
//! - [`selector`] - Size-based backend dispatch
//! - [`migrate`] - Shape changes by scan-copy and atomic rename
//! - [`config`] - Tunable thresholds
//!
//! ## File format
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Header (1 KiB, little-endian)               │
//! │  - Magic: "SPST\x00\x01\x00\x00"            │
//! │  - Version, element type, byte order        │
//! │  - Layout kind, per-block header elements   │
//! │  - Per dimension: size, block size, complex │
//! │    flag, sf, sw, reference, label           │
//! │  - CRC32 of bytes 0..1020                   │
//! ├─────────────────────────────────────────────┤
//! │ Data region                                 │
//! │  - blocks in block-stride order             │
//! │  - points in point-stride order per block   │
//! │  - dimension 0 fastest                      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Backend selection
//!
//! ```text
//! no file, data ≤ heap_max_bytes        → HeapBackend
//! submatrix layout                      → SubmatrixWindowBackend
//! data ≤ single_window_max_bytes        → SingleWindowBackend
//! otherwise                             → MultiWindowBackend
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod error;
pub mod header;
pub mod io;
pub mod layout;
pub mod migrate;
pub mod selector;
pub mod window;
pub mod window_cache;

// Re-export commonly used types
pub use backend::{
    ArrayStorage, BackendKind, HeapBackend, MultiWindowBackend, SingleWindowBackend,
    StorageBackend, SubmatrixWindowBackend, VectorSelection,
};
pub use codec::{ByteOrder, ElementCodec, ElementType, ELEMENT_BYTES};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use header::{DimensionInfo, Header, HEADER_SIZE};
pub use io::ArrayFile;
pub use layout::{
    BlockLayout, BlockSizePolicy, FixedBlockSizes, IndexIter, LayoutKind, TargetElementsPolicy,
};
pub use migrate::{MigrationReport, StorageMigrator};
pub use selector::{BackendSelector, StorageMode};
pub use window::{MapMode, MappedWindow};
pub use window_cache::{CacheLimits, CacheStats, WindowCache};

/// Array file magic number
pub const MAGIC: &[u8; 8] = &header::MAGIC;
