//! Error types for memory sources and layout validation.

use std::io;

use thiserror::Error;

/// Errors reported by a [`MemorySource`](crate::MemorySource).
///
/// These never cross the broadcast boundary as errors: the monitor turns
/// them into the in-band `error` field of a snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// No running process matched the configured names
    #[error("target process not found (looked for: {names})")]
    ProcessNotFound { names: String },

    /// The process exists but its emulated RAM could not be located
    #[error("emulated memory not mapped in process {pid}")]
    MemoryNotMapped { pid: i32 },

    /// A read was attempted without a hook
    #[error("source is not hooked")]
    NotHooked,

    /// Address is outside every mapped region (or the read straddles an edge)
    #[error("address {address:#010x} (+{len} bytes) is outside emulated memory")]
    InvalidAddress { address: u32, len: usize },

    /// Underlying I/O failure (process exited, permission denied, ...)
    #[error("I/O error: {message}")]
    Io { kind: io::ErrorKind, message: String },
}

impl SourceError {
    /// I/O error with a message and no more specific kind.
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            kind: io::ErrorKind::Other,
            message: message.into(),
        }
    }

    /// True if the OS refused access to the target, as opposed to the
    /// target having gone away.
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            Self::Io {
                kind: io::ErrorKind::PermissionDenied,
                ..
            }
        )
    }
}

impl From<io::Error> for SourceError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type for memory source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors found while validating a [`MemoryLayout`](crate::MemoryLayout).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("entity table must have at least one slot")]
    NoSlots,

    #[error("entity stride {stride:#x} is smaller than the record extent {extent:#x}")]
    StrideTooSmall { stride: u32, extent: u32 },

    #[error("entity table starting at {base:#010x} overflows the 32-bit address space")]
    TableOverflow { base: u32 },
}
