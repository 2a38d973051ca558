//! Typed error surface shared by every storage component.
//!
//! Each variant maps onto exactly one of the status codes exposed at the
//! request boundary, so callers can translate an `Error` into a wire code
//! without inspecting message text.

use thiserror::Error;

/// Result type used across the storage core.
pub type Result<T> = std::result::Result<T, Error>;

/// Status codes surfaced to the request boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    NotFound,
    Duplicate,
    IoError,
    Corruption,
    OutOfRange,
    InvalidArgument,
    RangeClosing,
    Canceled,
}

/// Errors produced by the storage core.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested key or descriptor does not exist. Expected outcome,
    /// never logged as a failure.
    #[error("not found")]
    NotFound,

    /// An insert with duplicate checking hit an existing key.
    #[error("duplicate key")]
    Duplicate,

    /// Backend or filesystem failure.
    #[error("io error: {context}: {source}")]
    Io {
        context: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Stored bytes failed to decode. Carries a hex dump of the raw value
    /// for forensics; never retried.
    #[error("corruption: {context}: {hex}")]
    Corruption { context: String, hex: String },

    /// A key fell outside the owning range's span.
    #[error("key out of range")]
    OutOfRange,

    /// The request itself is malformed; no state was changed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The range is shutting down and no longer accepts requests.
    #[error("range is closing")]
    RangeClosing,

    /// The caller canceled the operation between iterator steps.
    #[error("canceled")]
    Canceled,
}

impl Error {
    pub fn io(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Io {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Build a corruption error carrying a hex dump of the offending bytes.
    pub fn corruption(context: impl Into<String>, raw: &[u8]) -> Self {
        Self::Corruption {
            context: context.into(),
            hex: to_hex(raw),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Status code this error maps to at the request boundary.
    pub fn code(&self) -> StatusCode {
        match self {
            Error::NotFound => StatusCode::NotFound,
            Error::Duplicate => StatusCode::Duplicate,
            Error::Io { .. } => StatusCode::IoError,
            Error::Corruption { .. } => StatusCode::Corruption,
            Error::OutOfRange => StatusCode::OutOfRange,
            Error::InvalidArgument(_) => StatusCode::InvalidArgument,
            Error::RangeClosing => StatusCode::RangeClosing,
            Error::Canceled => StatusCode::Canceled,
        }
    }
}

impl From<fjall::Error> for Error {
    fn from(err: fjall::Error) -> Self {
        Error::io("kv backend", err)
    }
}

/// Render bytes as lowercase hex for corruption context.
pub fn to_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
