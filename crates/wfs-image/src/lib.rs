#![forbid(unsafe_code)]
//! Image container for WFS.
//!
//! An image is a fixed-size byte region: an 8-byte superblock followed by the
//! append-only log. `Image` owns a full in-memory copy plus the backing file
//! and persists mutations with positioned writes over the dirty byte span.
//! Writers mutate log bytes at or past `head`, then publish by storing the new
//! `head`; `flush()` carries both to the backing file.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use wfs_error::{Result, WfsError};
use wfs_ondisk::{InodeHeader, Superblock};
use wfs_types::{DISK_SIZE, InodeNumber, S_IFDIR, SUPERBLOCK_SIZE};

/// Seconds since the epoch, truncated to the on-disk timestamp width.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // u32 seconds last until 2106
pub fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// A mounted or offline WFS image.
pub struct Image {
    file: Option<File>,
    bytes: Vec<u8>,
    head: u32,
    /// Byte span not yet persisted to the backing file, as `[lo, hi)`.
    dirty: Option<(usize, usize)>,
}

impl Image {
    /// Create a fresh image file at `path`: superblock plus an empty root
    /// directory record, zero-filled to `DISK_SIZE`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let bytes = fresh_image_bytes(unix_now());
        file.write_all_at(&bytes, 0)?;
        file.sync_all()?;

        info!(path = %path.display(), disk_size = DISK_SIZE, "created image");
        Ok(Self {
            file: Some(file),
            head: root_head(),
            bytes,
            dirty: None,
        })
    }

    /// Open an existing image file read/write.
    ///
    /// Fails if the file is not exactly `DISK_SIZE` bytes or the superblock
    /// does not validate; a bad image is fatal at open, never at runtime.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let bytes = std::fs::read(path)?;
        if bytes.len() != DISK_SIZE {
            return Err(WfsError::Corruption {
                offset: 0,
                detail: format!("image is {} bytes, expected {DISK_SIZE}", bytes.len()),
            });
        }
        let sb = Superblock::parse(&bytes)?;
        info!(path = %path.display(), head = sb.head, "opened image");
        Ok(Self {
            file: Some(file),
            head: sb.head,
            bytes,
            dirty: None,
        })
    }

    /// A fresh in-memory image equivalent to `create` without a file.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            file: None,
            bytes: fresh_image_bytes(unix_now()),
            head: root_head(),
            dirty: None,
        }
    }

    /// Current log head: offset of the first unused byte.
    #[must_use]
    pub fn head(&self) -> u32 {
        self.head
    }

    #[must_use]
    pub fn superblock(&self) -> Superblock {
        Superblock {
            magic: wfs_types::WFS_MAGIC,
            head: self.head,
        }
    }

    /// Bytes remaining in the log region.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        DISK_SIZE - self.head as usize
    }

    /// Publish a new head. This is the commit point of an append: all record
    /// bytes must already be in place below `new_head`.
    pub fn set_head(&mut self, new_head: u32) -> Result<()> {
        let head = new_head as usize;
        if !(SUPERBLOCK_SIZE..=DISK_SIZE).contains(&head) {
            return Err(WfsError::Corruption {
                offset: 4,
                detail: format!("head {new_head} outside [{SUPERBLOCK_SIZE}, {DISK_SIZE}]"),
            });
        }
        self.head = new_head;
        let sb = self.superblock().encode();
        self.bytes[..SUPERBLOCK_SIZE].copy_from_slice(&sb);
        self.mark_dirty(0, SUPERBLOCK_SIZE);
        Ok(())
    }

    /// The full image region.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bounds-checked view of `[offset, offset + len)`.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset.checked_add(len).ok_or(WfsError::Corruption {
            offset,
            detail: "slice range overflows".to_owned(),
        })?;
        if end > DISK_SIZE {
            return Err(WfsError::Corruption {
                offset,
                detail: format!("slice [{offset}, {end}) runs past the image"),
            });
        }
        Ok(&self.bytes[offset..end])
    }

    /// Write `data` at `offset`, bounds-checked against the image size.
    ///
    /// Does not touch `head`; callers append record bytes first and publish
    /// with `set_head` once every byte of the mutation is in place.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset.checked_add(data.len()).ok_or(WfsError::NoSpace)?;
        if end > DISK_SIZE {
            return Err(WfsError::NoSpace);
        }
        self.bytes[offset..end].copy_from_slice(data);
        self.mark_dirty(offset, end);
        Ok(())
    }

    /// Replace the entire image with `bytes` (the compactor's rewrite).
    pub fn overwrite(&mut self, bytes: Vec<u8>) -> Result<()> {
        let sb = {
            if bytes.len() != DISK_SIZE {
                return Err(WfsError::Corruption {
                    offset: 0,
                    detail: format!("replacement is {} bytes, expected {DISK_SIZE}", bytes.len()),
                });
            }
            Superblock::parse(&bytes)?
        };
        self.bytes = bytes;
        self.head = sb.head;
        self.mark_dirty(0, DISK_SIZE);
        Ok(())
    }

    /// Persist the dirty span to the backing file, if any.
    pub fn flush(&mut self) -> Result<()> {
        let Some((lo, hi)) = self.dirty.take() else {
            return Ok(());
        };
        if let Some(file) = &self.file {
            file.write_all_at(&self.bytes[lo..hi], lo as u64)?;
            file.sync_data()?;
            debug!(lo, hi, "flushed dirty span");
        }
        Ok(())
    }

    fn mark_dirty(&mut self, lo: usize, hi: usize) {
        self.dirty = Some(match self.dirty {
            Some((old_lo, old_hi)) => (old_lo.min(lo), old_hi.max(hi)),
            None => (lo, hi),
        });
    }
}

/// Head of a fresh image: superblock plus the empty root record.
fn root_head() -> u32 {
    (SUPERBLOCK_SIZE + wfs_types::INODE_HEADER_SIZE) as u32
}

fn fresh_image_bytes(now: u32) -> Vec<u8> {
    let mut bytes = vec![0_u8; DISK_SIZE];

    let sb = Superblock {
        magic: wfs_types::WFS_MAGIC,
        head: root_head(),
    };
    bytes[..SUPERBLOCK_SIZE].copy_from_slice(&sb.encode());

    let root = InodeHeader {
        inode_number: InodeNumber::ROOT,
        deleted: false,
        mode: S_IFDIR | 0o755,
        uid: 0,
        gid: 0,
        flags: 0,
        size: 0,
        atime: now,
        mtime: now,
        ctime: now,
        links: 1,
    };
    bytes[SUPERBLOCK_SIZE..SUPERBLOCK_SIZE + wfs_types::INODE_HEADER_SIZE]
        .copy_from_slice(&root.encode());

    bytes
}
