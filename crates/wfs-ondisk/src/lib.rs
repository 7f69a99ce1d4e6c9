#![forbid(unsafe_code)]
//! On-disk format codec for WFS structures.
//!
//! Pure parsing/encoding crate — no I/O, no side effects. The image layout is
//! an 8-byte superblock followed by an append-only log of records, each a
//! 44-byte inode header plus a `size`-byte payload. Directory payloads are a
//! packed array of 40-byte entries. All integers little-endian.

use serde::{Deserialize, Serialize};
use wfs_types::{
    DIRENT_SIZE, DISK_SIZE, INODE_HEADER_SIZE, InodeNumber, MAX_NAME_LEN, ParseError,
    SUPERBLOCK_SIZE, WFS_MAGIC, ensure_slice, mode_is_dir, mode_is_reg, name_prefix, read_fixed,
    read_le_u32, read_le_u64,
};

// ── Superblock ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub magic: u32,
    /// Byte offset from the start of the image to the first unused log byte.
    pub head: u32,
}

impl Superblock {
    /// A fresh superblock whose log is empty.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            magic: WFS_MAGIC,
            head: SUPERBLOCK_SIZE as u32,
        }
    }

    /// Parse the superblock from the first 8 bytes of an image.
    pub fn parse(region: &[u8]) -> Result<Self, ParseError> {
        let magic = read_le_u32(region, 0)?;
        if magic != WFS_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: WFS_MAGIC,
                actual: magic,
            });
        }

        let head = read_le_u32(region, 4)?;
        let head_usize = head as usize;
        if head_usize < SUPERBLOCK_SIZE || head_usize > DISK_SIZE {
            return Err(ParseError::InvalidField {
                field: "head",
                reason: "outside [superblock end, disk size]",
            });
        }

        Ok(Self { magic, head })
    }

    #[must_use]
    pub fn encode(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut out = [0_u8; SUPERBLOCK_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.head.to_le_bytes());
        out
    }
}

// ── Inode header ────────────────────────────────────────────────────────────

/// The fixed 44-byte header at the start of every log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeHeader {
    pub inode_number: InodeNumber,
    pub deleted: bool,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub flags: u32,
    /// Length in bytes of the payload following this header.
    pub size: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub links: u32,
}

impl InodeHeader {
    /// Parse a header from the first 44 bytes of `region`.
    pub fn parse(region: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(region, 0, INODE_HEADER_SIZE)?;
        Ok(Self {
            inode_number: InodeNumber(read_le_u32(region, 0)?),
            deleted: read_le_u32(region, 4)? != 0,
            mode: read_le_u32(region, 8)?,
            uid: read_le_u32(region, 12)?,
            gid: read_le_u32(region, 16)?,
            flags: read_le_u32(region, 20)?,
            size: read_le_u32(region, 24)?,
            atime: read_le_u32(region, 28)?,
            mtime: read_le_u32(region, 32)?,
            ctime: read_le_u32(region, 36)?,
            links: read_le_u32(region, 40)?,
        })
    }

    #[must_use]
    pub fn encode(&self) -> [u8; INODE_HEADER_SIZE] {
        let mut out = [0_u8; INODE_HEADER_SIZE];
        let fields = [
            self.inode_number.0,
            u32::from(self.deleted),
            self.mode,
            self.uid,
            self.gid,
            self.flags,
            self.size,
            self.atime,
            self.mtime,
            self.ctime,
            self.links,
        ];
        for (i, field) in fields.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&field.to_le_bytes());
        }
        out
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        mode_is_dir(self.mode)
    }

    #[must_use]
    pub fn is_reg(&self) -> bool {
        mode_is_reg(self.mode)
    }

    /// Total on-disk length of the record this header starts: header + payload.
    #[must_use]
    pub fn total_len(&self) -> usize {
        INODE_HEADER_SIZE + self.size as usize
    }
}

// ── Directory entries ───────────────────────────────────────────────────────

/// One 40-byte directory entry: a NUL-terminated, NUL-padded name buffer and
/// the child's inode number (stored 8 bytes wide on disk).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub name: [u8; MAX_NAME_LEN],
    pub ino: InodeNumber,
}

impl DirEntry {
    /// Build an entry, zero-padding the name buffer so byte-equality on the
    /// full buffer is well-defined. Names must leave room for the NUL.
    pub fn new(name: &[u8], ino: InodeNumber) -> Result<Self, ParseError> {
        if name.is_empty() || name.contains(&0) {
            return Err(ParseError::InvalidField {
                field: "name",
                reason: "empty or contains NUL",
            });
        }
        if name.len() >= MAX_NAME_LEN {
            return Err(ParseError::InvalidField {
                field: "name",
                reason: "must be at most 31 bytes",
            });
        }
        let mut buf = [0_u8; MAX_NAME_LEN];
        buf[..name.len()].copy_from_slice(name);
        Ok(Self { name: buf, ino })
    }

    pub fn parse(region: &[u8]) -> Result<Self, ParseError> {
        let name = read_fixed::<MAX_NAME_LEN>(region, 0)?;
        let ino = InodeNumber::from_dentry_width(read_le_u64(region, MAX_NAME_LEN)?)?;
        Ok(Self { name, ino })
    }

    #[must_use]
    pub fn encode(&self) -> [u8; DIRENT_SIZE] {
        let mut out = [0_u8; DIRENT_SIZE];
        out[..MAX_NAME_LEN].copy_from_slice(&self.name);
        out[MAX_NAME_LEN..].copy_from_slice(&self.ino.to_dentry_width().to_le_bytes());
        out
    }

    /// The name as bytes, without the NUL padding.
    #[must_use]
    pub fn name_bytes(&self) -> &[u8] {
        name_prefix(&self.name)
    }

    /// The name for display; lossy if the image holds non-UTF-8 names.
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }
}

/// Decode a directory record's payload into its entry list.
///
/// The payload length must be a multiple of the 40-byte entry stride.
pub fn parse_dir_payload(payload: &[u8]) -> Result<Vec<DirEntry>, ParseError> {
    if payload.len() % DIRENT_SIZE != 0 {
        return Err(ParseError::InvalidField {
            field: "dir_size",
            reason: "not a multiple of the 40-byte entry stride",
        });
    }
    payload.chunks_exact(DIRENT_SIZE).map(DirEntry::parse).collect()
}

/// Encode an entry list back into a directory payload.
#[must_use]
pub fn encode_dir_payload(entries: &[DirEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * DIRENT_SIZE);
    for entry in entries {
        out.extend_from_slice(&entry.encode());
    }
    out
}

// ── Records ─────────────────────────────────────────────────────────────────

/// A log record: inode header plus its owned payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub header: InodeHeader,
    pub payload: Vec<u8>,
}

impl Record {
    /// Parse the record starting at the beginning of `region`.
    ///
    /// `region` may extend past the record; only `total_len()` bytes are read.
    pub fn parse(region: &[u8]) -> Result<Self, ParseError> {
        let header = InodeHeader::parse(region)?;
        let payload = ensure_slice(region, INODE_HEADER_SIZE, header.size as usize)?.to_vec();
        Ok(Self { header, payload })
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header.total_len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.payload);
        out
    }
}
