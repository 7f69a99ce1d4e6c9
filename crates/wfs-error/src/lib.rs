#![forbid(unsafe_code)]
//! Error types for WFS.
//!
//! Defines `WfsError` and a `Result<T>` alias used throughout the workspace.
//! Includes errno mappings for FUSE response codes.

use thiserror::Error;
use wfs_types::ParseError;

/// Unified error type for all WFS operations.
#[derive(Debug, Error)]
pub enum WfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt log at offset {offset}: {detail}")]
    Corruption { offset: usize, detail: String },

    #[error("invalid on-disk format: {0}")]
    Parse(#[from] ParseError),

    #[error("no space left on device")]
    NoSpace,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a directory")]
    NotDirectory,

    #[error("is a directory")]
    IsDirectory,

    #[error("directory not empty")]
    NotEmpty,

    #[error("name too long")]
    NameTooLong,

    #[error("file exists")]
    Exists,

    #[error("stale inode handle: {0}")]
    BadHandle(u64),
}

impl WfsError {
    /// Convert this error into a POSIX errno suitable for FUSE replies.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Corruption { .. } => libc::EIO,
            Self::Parse(_) => libc::EINVAL,
            Self::NoSpace => libc::ENOSPC,
            Self::NotFound(_) => libc::ENOENT,
            Self::NotDirectory => libc::ENOTDIR,
            Self::IsDirectory => libc::EISDIR,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::Exists => libc::EEXIST,
            Self::BadHandle(_) => libc::EBADF,
        }
    }
}

/// Result alias using `WfsError`.
pub type Result<T> = std::result::Result<T, WfsError>;
