//! Unified error types for lector
//!
//! Provides a top-level `LectorError` that covers archive decoding, package
//! resolution, the resource cache contract and the viewer protocol, plus the
//! container-level `ZipError` it wraps.

use core::fmt;

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, LectorError>;

/// Top-level error type for lector operations
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LectorError {
    /// The container could not be decoded as a ZIP archive
    ArchiveCorrupt(ZipError),
    /// A required entry (container.xml, package document, chapter, resource)
    /// or the source itself is missing
    NotFound(String),
    /// An API was used before its owning object finished initialization
    NotInitialized(&'static str),
    /// A resource was released with a key that never acquired it
    ResourceKey {
        /// Archive path of the resource.
        path: String,
        /// The offending holder key.
        key: u64,
    },
    /// A navigation target could not be resolved to a chapter
    ChapterNotFound(String),
    /// Malformed XML/XHTML in one of the book documents
    Parse(String),
    /// Malformed cross-context message
    Protocol(String),
    /// I/O error (description only, since `std::io::Error` is not `Clone`)
    Io(String),
}

impl fmt::Display for LectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LectorError::ArchiveCorrupt(kind) => write!(f, "Corrupt archive: {}", kind),
            LectorError::NotFound(what) => write!(f, "Not found: {}", what),
            LectorError::NotInitialized(what) => {
                write!(f, "{} is not initialized yet", what)
            }
            LectorError::ResourceKey { path, key } => write!(
                f,
                "Resource '{}' released with unregistered key {}",
                path, key
            ),
            LectorError::ChapterNotFound(target) => write!(f, "Chapter not found: {}", target),
            LectorError::Parse(msg) => write!(f, "Parse error: {}", msg),
            LectorError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            LectorError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

/// ZIP-specific error variants
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ZipError {
    /// No end-of-central-directory record, or inconsistent structure
    InvalidFormat,
    /// Unsupported compression method
    UnsupportedCompression(u16),
    /// Decompression failed
    DecompressError,
    /// CRC32 mismatch
    CrcMismatch,
    /// Truncated or unreadable data
    IoError,
    /// Central directory holds more entries than the configured limit
    CentralDirFull,
    /// Entry exceeds maximum allowed size
    FileTooLarge,
    /// Invalid or missing mimetype file
    InvalidMimetype(String),
    /// ZIP64 structures are present but unsupported
    UnsupportedZip64,
}

impl fmt::Display for ZipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZipError::InvalidFormat => write!(f, "invalid ZIP format"),
            ZipError::UnsupportedCompression(method) => {
                write!(f, "unsupported compression method {}", method)
            }
            ZipError::DecompressError => write!(f, "decompression failed"),
            ZipError::CrcMismatch => write!(f, "CRC32 checksum mismatch"),
            ZipError::IoError => write!(f, "I/O error"),
            ZipError::CentralDirFull => write!(f, "central directory full"),
            ZipError::FileTooLarge => write!(f, "file too large"),
            ZipError::InvalidMimetype(msg) => write!(f, "invalid mimetype: {}", msg),
            ZipError::UnsupportedZip64 => write!(f, "ZIP64 is not supported"),
        }
    }
}

impl std::error::Error for LectorError {}

impl std::error::Error for ZipError {}

impl From<ZipError> for LectorError {
    fn from(err: ZipError) -> Self {
        LectorError::ArchiveCorrupt(err)
    }
}

impl From<quick_xml::Error> for LectorError {
    fn from(err: quick_xml::Error) -> Self {
        LectorError::Parse(format!("XML parse error: {}", err))
    }
}

impl From<serde_json::Error> for LectorError {
    fn from(err: serde_json::Error) -> Self {
        LectorError::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for LectorError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            LectorError::NotFound(err.to_string())
        } else {
            LectorError::Io(err.to_string())
        }
    }
}
