//! Element encoding for the data region
//!
//! Every stored element is 4 bytes wide. Values cross the public API as `f64`
//! and are narrowed to the array's element type on write.

use crate::core::error::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// Width of one stored element in bytes
pub const ELEMENT_BYTES: usize = 4;

/// Element data type of an array
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    Float32 = 0,
    Int32 = 1,
}

impl ElementType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Float32),
            1 => Ok(Self::Int32),
            other => Err(StoreError::InvalidHeader(format!(
                "unknown element type tag {}",
                other
            ))),
        }
    }

    pub const fn size(self) -> usize {
        ELEMENT_BYTES
    }
}

/// Byte order of the data region
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    Little = 0,
    Big = 1,
}

impl ByteOrder {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Little),
            1 => Ok(Self::Big),
            other => Err(StoreError::InvalidHeader(format!(
                "unknown byte order tag {}",
                other
            ))),
        }
    }

    #[cfg(target_endian = "little")]
    pub const fn native() -> Self {
        Self::Little
    }

    #[cfg(target_endian = "big")]
    pub const fn native() -> Self {
        Self::Big
    }
}

/// Encodes and decodes single elements for one array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementCodec {
    pub element_type: ElementType,
    pub byte_order: ByteOrder,
}

impl ElementCodec {
    pub fn new(element_type: ElementType, byte_order: ByteOrder) -> Self {
        ElementCodec {
            element_type,
            byte_order,
        }
    }

    /// Decode the element stored in the first 4 bytes of `bytes`
    pub fn decode(&self, bytes: &[u8]) -> f64 {
        let mut raw = [0u8; ELEMENT_BYTES];
        raw.copy_from_slice(&bytes[..ELEMENT_BYTES]);

        match (self.element_type, self.byte_order) {
            (ElementType::Float32, ByteOrder::Little) => f32::from_le_bytes(raw) as f64,
            (ElementType::Float32, ByteOrder::Big) => f32::from_be_bytes(raw) as f64,
            (ElementType::Int32, ByteOrder::Little) => i32::from_le_bytes(raw) as f64,
            (ElementType::Int32, ByteOrder::Big) => i32::from_be_bytes(raw) as f64,
        }
    }

    /// Encode `value` into the first 4 bytes of `out`
    ///
    /// Integer arrays round to nearest; out-of-range values saturate and NaN
    /// stores as zero.
    pub fn encode(&self, value: f64, out: &mut [u8]) {
        let raw = match (self.element_type, self.byte_order) {
            (ElementType::Float32, ByteOrder::Little) => (value as f32).to_le_bytes(),
            (ElementType::Float32, ByteOrder::Big) => (value as f32).to_be_bytes(),
            (ElementType::Int32, ByteOrder::Little) => (value.round() as i32).to_le_bytes(),
            (ElementType::Int32, ByteOrder::Big) => (value.round() as i32).to_be_bytes(),
        };
        out[..ELEMENT_BYTES].copy_from_slice(&raw);
    }
}

impl Default for ElementCodec {
    fn default() -> Self {
        ElementCodec::new(ElementType::Float32, ByteOrder::native())
    }
}
