//! Array file header
//!
//! The header occupies the first [`HEADER_SIZE`] bytes of every array file and
//! is always little-endian, whatever byte order the data region uses.
//!
//! ```text
//! offset  size  field
//!      0     8  magic "SPST\0\x01\0\0"
//!      8     2  version major
//!     10     2  version minor
//!     12     1  dimension count
//!     13     1  element type (0 = f32, 1 = i32)
//!     14     1  data byte order (0 = little, 1 = big)
//!     15     1  layout kind (0 = full, 1 = block, 2 = submatrix)
//!     16     4  per-block header elements
//!     20    12  reserved
//!     32  72*n  dimension records
//!   1020     4  CRC32 of bytes 0..1020
//! ```

use crate::core::codec::{ByteOrder, ElementCodec, ElementType};
use crate::core::error::{Result, StoreError};
use crate::core::layout::{BlockLayout, LayoutKind, MAX_DIMENSIONS};
use serde::{Deserialize, Serialize};

pub const MAGIC: [u8; 8] = *b"SPST\x00\x01\x00\x00";
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 0;
pub const HEADER_SIZE: usize = 1024;

const DIMS_OFFSET: usize = 32;
const DIM_RECORD_SIZE: usize = 72;
const LABEL_BYTES: usize = 16;
const CHECKSUM_OFFSET: usize = HEADER_SIZE - 4;

/// Per-dimension description and reference metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionInfo {
    pub size: usize,
    pub block_size: usize,
    /// Values along this dimension are stored as real/imaginary pairs
    pub complex: bool,
    /// Spectrometer frequency (MHz)
    pub sf: f64,
    /// Sweep width (Hz)
    pub sw: f64,
    /// Reference value (ppm) at `ref_point`
    pub ref_value: f64,
    pub ref_point: f64,
    pub label: String,
}

impl DimensionInfo {
    pub fn new(dim: usize, size: usize, block_size: usize) -> Self {
        DimensionInfo {
            size,
            block_size,
            complex: false,
            sf: 1.0,
            sw: 1.0,
            ref_value: 0.0,
            ref_point: 0.0,
            label: format!("D{}", dim + 1),
        }
    }
}

/// Array file header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(skip, default = "default_magic")]
    pub magic: [u8; 8],
    pub version_major: u16,
    pub version_minor: u16,
    pub element_type: ElementType,
    pub byte_order: ByteOrder,
    pub layout_kind: LayoutKind,
    pub block_header_elements: u32,
    pub dims: Vec<DimensionInfo>,
}

fn default_magic() -> [u8; 8] {
    MAGIC
}

impl Header {
    /// Create a header describing `layout` with default dimension metadata
    pub fn for_layout(layout: &BlockLayout, codec: ElementCodec) -> Self {
        let dims = layout
            .sizes()
            .iter()
            .zip(layout.block_sizes())
            .enumerate()
            .map(|(dim, (&size, &block))| DimensionInfo::new(dim, size, block))
            .collect();

        Header {
            magic: MAGIC,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            element_type: codec.element_type,
            byte_order: codec.byte_order,
            layout_kind: layout.kind(),
            block_header_elements: layout.block_header_elements() as u32,
            dims,
        }
    }

    /// Copy of this header describing `layout`, keeping dimension metadata
    pub fn reshaped(&self, layout: &BlockLayout) -> Self {
        let mut header = self.clone();
        header.layout_kind = layout.kind();
        header.block_header_elements = layout.block_header_elements() as u32;
        for (dim, info) in header.dims.iter_mut().enumerate() {
            info.size = layout.sizes()[dim];
            info.block_size = layout.block_sizes()[dim];
        }
        header
    }

    pub fn codec(&self) -> ElementCodec {
        ElementCodec::new(self.element_type, self.byte_order)
    }

    pub fn n_dim(&self) -> usize {
        self.dims.len()
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.dims.iter().map(|d| d.size).collect()
    }

    /// Rebuild the layout this header describes
    pub fn layout(&self) -> Result<BlockLayout> {
        let sizes = self.sizes();
        let blocks: Vec<usize> = self.dims.iter().map(|d| d.block_size).collect();
        BlockLayout::from_parts(
            self.layout_kind,
            HEADER_SIZE as u64,
            &sizes,
            &blocks,
            self.block_header_elements as usize,
        )
    }

    /// Validate magic, version, and dimension records
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(StoreError::InvalidMagic);
        }

        if self.version_major != VERSION_MAJOR || self.version_minor != VERSION_MINOR {
            return Err(StoreError::UnsupportedVersion {
                major: self.version_major,
                minor: self.version_minor,
            });
        }

        if self.dims.is_empty() || self.dims.len() > MAX_DIMENSIONS {
            return Err(StoreError::InvalidHeader(format!(
                "dimension count {} outside 1..={}",
                self.dims.len(),
                MAX_DIMENSIONS
            )));
        }

        for (dim, info) in self.dims.iter().enumerate() {
            if info.label.len() > LABEL_BYTES {
                return Err(StoreError::InvalidHeader(format!(
                    "label for dimension {} longer than {} bytes",
                    dim, LABEL_BYTES
                )));
            }
            if info.complex && info.size % 2 != 0 {
                return Err(StoreError::InvalidHeader(format!(
                    "complex dimension {} has odd size {}",
                    dim, info.size
                )));
            }
        }

        self.layout().map(|_| ())
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);

        bytes.extend_from_slice(&self.magic);
        bytes.extend_from_slice(&self.version_major.to_le_bytes());
        bytes.extend_from_slice(&self.version_minor.to_le_bytes());
        bytes.push(self.dims.len() as u8);
        bytes.push(self.element_type as u8);
        bytes.push(self.byte_order as u8);
        bytes.push(self.layout_kind as u8);
        bytes.extend_from_slice(&self.block_header_elements.to_le_bytes());
        bytes.resize(DIMS_OFFSET, 0);

        for info in &self.dims {
            bytes.extend_from_slice(&(info.size as u64).to_le_bytes());
            bytes.extend_from_slice(&(info.block_size as u64).to_le_bytes());
            bytes.push(info.complex as u8);
            bytes.extend_from_slice(&[0u8; 7]);
            bytes.extend_from_slice(&info.sf.to_le_bytes());
            bytes.extend_from_slice(&info.sw.to_le_bytes());
            bytes.extend_from_slice(&info.ref_value.to_le_bytes());
            bytes.extend_from_slice(&info.ref_point.to_le_bytes());

            let mut label = [0u8; LABEL_BYTES];
            let raw = info.label.as_bytes();
            let len = raw.len().min(LABEL_BYTES);
            label[..len].copy_from_slice(&raw[..len]);
            bytes.extend_from_slice(&label);
        }

        bytes.resize(CHECKSUM_OFFSET, 0);
        let checksum = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());

        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Insufficient bytes for header",
            )));
        }

        let mut reader = FieldReader::new(bytes);

        let mut magic = [0u8; 8];
        magic.copy_from_slice(reader.take(8));
        if magic != MAGIC {
            return Err(StoreError::InvalidMagic);
        }

        let stored = u32::from_le_bytes(array_of(&bytes[CHECKSUM_OFFSET..HEADER_SIZE]));
        let computed = crc32fast::hash(&bytes[..CHECKSUM_OFFSET]);
        if stored != computed {
            return Err(StoreError::HeaderChecksum { stored, computed });
        }

        let version_major = reader.u16();
        let version_minor = reader.u16();
        let n_dim = reader.u8() as usize;
        let element_type = ElementType::from_u8(reader.u8())?;
        let byte_order = ByteOrder::from_u8(reader.u8())?;
        let layout_kind = LayoutKind::from_u8(reader.u8())?;
        let block_header_elements = reader.u32();

        if n_dim == 0 || n_dim > MAX_DIMENSIONS {
            return Err(StoreError::InvalidHeader(format!(
                "dimension count {} outside 1..={}",
                n_dim, MAX_DIMENSIONS
            )));
        }

        reader.seek(DIMS_OFFSET);
        let mut dims = Vec::with_capacity(n_dim);
        for _ in 0..n_dim {
            let size = reader.u64();
            let block_size = reader.u64();
            let complex = reader.u8() != 0;
            reader.take(7);
            let sf = reader.f64();
            let sw = reader.f64();
            let ref_value = reader.f64();
            let ref_point = reader.f64();
            let label_raw = reader.take(LABEL_BYTES);
            let end = label_raw.iter().position(|&b| b == 0).unwrap_or(LABEL_BYTES);
            let label = String::from_utf8_lossy(&label_raw[..end]).into_owned();

            dims.push(DimensionInfo {
                size: usize::try_from(size).map_err(|_| {
                    StoreError::InvalidHeader(format!("dimension size {} too large", size))
                })?,
                block_size: usize::try_from(block_size).map_err(|_| {
                    StoreError::InvalidHeader(format!("block size {} too large", block_size))
                })?,
                complex,
                sf,
                sw,
                ref_value,
                ref_point,
                label,
            });
        }

        let header = Header {
            magic,
            version_major,
            version_minor,
            element_type,
            byte_order,
            layout_kind,
            block_header_elements,
            dims,
        };

        header.validate()?;

        Ok(header)
    }
}

/// Sequential little-endian field reader over a length-checked header buffer
struct FieldReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        FieldReader { bytes, offset: 0 }
    }

    fn seek(&mut self, offset: usize) {
        self.offset = offset;
    }

    fn take(&mut self, len: usize) -> &'a [u8] {
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        slice
    }

    fn u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(array_of(self.take(2)))
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(array_of(self.take(4)))
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(array_of(self.take(8)))
    }

    fn f64(&mut self) -> f64 {
        f64::from_le_bytes(array_of(self.take(8)))
    }
}

fn array_of<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&slice[..N]);
    out
}
