#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifies a valid WFS image; first four bytes of the superblock.
pub const WFS_MAGIC: u32 = 0xDEAD_BEEF;

/// Total size of an image in bytes. Creator, mounter, and compactor must
/// agree on this value; it never changes after image creation.
pub const DISK_SIZE: usize = 1024 * 1024;

/// Superblock: magic (4 B) + head (4 B).
pub const SUPERBLOCK_SIZE: usize = 8;

/// Inode header: eleven packed little-endian u32 fields.
pub const INODE_HEADER_SIZE: usize = 44;

/// Directory entry: 32-byte name buffer + 8-byte inode number.
pub const DIRENT_SIZE: usize = 40;

/// Width of the dentry name buffer. Names must be NUL-terminated inside it,
/// so the longest legal name is 31 bytes.
pub const MAX_NAME_LEN: usize = 32;

/// Byte offset where the log region begins.
pub const LOG_START: usize = SUPERBLOCK_SIZE;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct InodeNumber(pub u32);

impl InodeNumber {
    pub const ROOT: Self = Self(0);

    /// Widen to the 8-byte representation a directory entry stores.
    #[must_use]
    pub fn to_dentry_width(self) -> u64 {
        u64::from(self.0)
    }

    /// Narrow a dentry's 8-byte inode field back to the canonical width.
    ///
    /// Inode numbers are allocated as u32 (the header field width), so a
    /// value above `u32::MAX` can only come from a corrupt entry.
    pub fn from_dentry_width(raw: u64) -> Result<Self, ParseError> {
        u32::try_from(raw)
            .map(Self)
            .map_err(|_| ParseError::IntegerConversion {
                field: "dentry_inode_number",
            })
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── POSIX file mode constants ───────────────────────────────────────────────
//
// The on-disk mode field is u32; only the directory and regular-file types
// are legal in a WFS image.

/// File type mask (upper 4 bits of mode).
pub const S_IFMT: u32 = 0o170_000;
/// Directory.
pub const S_IFDIR: u32 = 0o040_000;
/// Regular file.
pub const S_IFREG: u32 = 0o100_000;

#[must_use]
pub fn mode_is_dir(mode: u32) -> bool {
    mode & S_IFMT == S_IFDIR
}

#[must_use]
pub fn mode_is_reg(mode: u32) -> bool {
    mode & S_IFMT == S_IFREG
}

// ── Parse errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u32, actual: u32 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

// ── Byte-cursor helpers ─────────────────────────────────────────────────────

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Narrow a `u64` to `usize` with an explicit error path.
pub fn u64_to_usize(value: u64, field: &'static str) -> Result<usize, ParseError> {
    usize::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

/// The NUL-terminated prefix of a fixed-width name buffer.
///
/// A buffer with no NUL is returned whole; the codec rejects such names on
/// encode, so seeing one here means the image was written by something else.
#[must_use]
pub fn name_prefix(buf: &[u8]) -> &[u8] {
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    &buf[..end]
}
