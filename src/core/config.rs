//! Storage engine configuration
//!
//! Every threshold the backend selector and window cache use lives here so it
//! can be tuned per deployment, either from TOML or with the builder methods.
//!
//! ```toml
//! heap_max_bytes = 67108864
//! single_window_max_bytes = 1073741824
//! window_bytes = 1073741824
//! max_resident_windows = 8
//! min_tracked_window_bytes = 65536
//! block_target_elements = 8192
//! ```

use crate::core::codec::ELEMENT_BYTES;
use crate::core::error::{Result, StoreError};
use crate::core::layout::{TargetElementsPolicy, DEFAULT_BLOCK_TARGET_ELEMENTS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Largest array kept on the heap when no file is requested (64 MiB)
pub const DEFAULT_HEAP_MAX_BYTES: u64 = 64 * MIB;

/// Largest data region served by a single mapping (1 GiB)
pub const DEFAULT_SINGLE_WINDOW_MAX_BYTES: u64 = GIB;

/// Span of each window in a multi-window backend (1 GiB)
pub const DEFAULT_WINDOW_BYTES: u64 = GIB;

/// Windows kept mapped at once by a multi-window backend
pub const DEFAULT_MAX_RESIDENT_WINDOWS: usize = 8;

/// Windows smaller than this bypass the resident bound (64 KiB)
pub const DEFAULT_MIN_TRACKED_WINDOW_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StoreConfig {
    #[validate(range(min = 4))]
    pub heap_max_bytes: u64,

    #[validate(range(min = 4))]
    pub single_window_max_bytes: u64,

    #[validate(range(min = 4))]
    pub window_bytes: u64,

    #[validate(range(min = 1))]
    pub max_resident_windows: usize,

    pub min_tracked_window_bytes: u64,

    #[validate(range(min = 1))]
    pub block_target_elements: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            heap_max_bytes: DEFAULT_HEAP_MAX_BYTES,
            single_window_max_bytes: DEFAULT_SINGLE_WINDOW_MAX_BYTES,
            window_bytes: DEFAULT_WINDOW_BYTES,
            max_resident_windows: DEFAULT_MAX_RESIDENT_WINDOWS,
            min_tracked_window_bytes: DEFAULT_MIN_TRACKED_WINDOW_BYTES,
            block_target_elements: DEFAULT_BLOCK_TARGET_ELEMENTS,
        }
    }
}

impl StoreConfig {
    /// Parse and validate a TOML document; missing keys take defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            StoreError::io_at(format!("reading config {}", path.as_ref().display()), e)
        })?;
        Self::from_toml_str(&text)
    }

    /// Run field validation, mapping failures to `StoreError::Config`
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        // windows must split the data region on element boundaries
        if self.window_bytes % ELEMENT_BYTES as u64 != 0 {
            return Err(StoreError::Config(format!(
                "window_bytes {} is not a multiple of {}",
                self.window_bytes, ELEMENT_BYTES
            )));
        }
        Ok(())
    }

    pub fn block_policy(&self) -> TargetElementsPolicy {
        TargetElementsPolicy::new(self.block_target_elements)
    }

    pub fn with_heap_max_bytes(mut self, bytes: u64) -> Self {
        self.heap_max_bytes = bytes;
        self
    }

    pub fn with_single_window_max_bytes(mut self, bytes: u64) -> Self {
        self.single_window_max_bytes = bytes;
        self
    }

    pub fn with_window_bytes(mut self, bytes: u64) -> Self {
        self.window_bytes = bytes;
        self
    }

    pub fn with_max_resident_windows(mut self, count: usize) -> Self {
        self.max_resident_windows = count;
        self
    }

    pub fn with_min_tracked_window_bytes(mut self, bytes: u64) -> Self {
        self.min_tracked_window_bytes = bytes;
        self
    }

    pub fn with_block_target_elements(mut self, elements: usize) -> Self {
        self.block_target_elements = elements;
        self
    }
}
