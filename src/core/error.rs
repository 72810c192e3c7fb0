use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Index {index} out of range for dimension {dim} (size {size})")]
    AddressRange { dim: usize, index: usize, size: usize },

    #[error("Expected {expected} indices, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error("Failed to map window at byte {start} (len {len}): {source}")]
    Mapping {
        start: u64,
        len: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error while {context}: {source}")]
    IoAt {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration failed during {phase}: {source}")]
    Migration {
        phase: &'static str,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Invalid magic number in header")]
    InvalidMagic,

    #[error("Unsupported format version: {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("Header checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    HeaderChecksum { stored: u32, computed: u32 },

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl StoreError {
    /// Storage faults may succeed on a later attempt; contract violations never do.
    pub fn is_retriable(&self) -> bool {
        match self {
            StoreError::Mapping { .. } | StoreError::Io(_) | StoreError::IoAt { .. } => true,
            StoreError::Migration { source, .. } => source.is_retriable(),
            _ => false,
        }
    }

    pub(crate) fn io_at(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::IoAt {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn state(message: impl Into<String>) -> Self {
        StoreError::State(message.into())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
