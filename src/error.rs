//! Error types for the aircard library

use std::fmt;
use std::io;

use crate::mbr::FileSystemKind;

/// Result type for aircard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for aircard operations
#[derive(Debug)]
pub enum Error {
    /// I/O error from the underlying sockets or local filesystem
    Io(io::Error),

    /// A block read got no response within the deadline.
    /// Carries the request datagram that went unanswered.
    Timeout { request: Vec<u8> },

    /// A datagram failed header, direction or command validation
    MalformedPacket { reason: String },

    /// The volume's BPB is inconsistent or out of range
    InvalidVolume { message: String },

    /// The selected partition does not hold a FAT32 filesystem
    UnsupportedFileSystem { detected: FileSystemKind },

    /// Directory missing during path traversal or lookup
    DirectoryNotFound { path: String },

    /// File missing during lookup
    FileNotFound { path: String },

    /// Requested partition index is past the end of the table
    PartitionOutOfRange { index: usize, count: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {}", err),
            Self::Timeout { request } => {
                write!(
                    f,
                    "read timed out ({} request bytes unanswered)",
                    request.len()
                )
            }
            Self::MalformedPacket { reason } => write!(f, "malformed packet: {}", reason),
            Self::InvalidVolume { message } => write!(f, "invalid volume: {}", message),
            Self::UnsupportedFileSystem { detected } => {
                write!(f, "unsupported filesystem: {}", detected)
            }
            Self::DirectoryNotFound { path } => write!(f, "directory not found: {}", path),
            Self::FileNotFound { path } => write!(f, "file not found: {}", path),
            Self::PartitionOutOfRange { index, count } => {
                write!(f, "partition {} out of range ({} in table)", index, count)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

// Convenience constructors
impl Error {
    pub fn timeout(request: Vec<u8>) -> Self {
        Self::Timeout { request }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPacket {
            reason: reason.into(),
        }
    }

    pub fn invalid_volume(message: impl Into<String>) -> Self {
        Self::InvalidVolume {
            message: message.into(),
        }
    }

    pub fn directory_not_found(path: impl Into<String>) -> Self {
        Self::DirectoryNotFound { path: path.into() }
    }

    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }
}
