#![forbid(unsafe_code)]
//! WFS engine.
//!
//! A WFS image is an 8-byte superblock followed by an append-only log of
//! inode records; the latest record for an inode number is authoritative,
//! and a `deleted` record tombstones the inode. This crate layers the
//! pieces on top of [`wfs_image::Image`]:
//!
//! - [`scan`] — the forward record walker and latest-record queries;
//! - [`resolve`] — absolute-path resolution over directory records;
//! - [`mutate`] — the append-only mutation protocol;
//! - [`compact`] — the offline log rewrite;
//! - [`Volume`] — the operation surface the OS bridge calls into.

pub mod compact;
pub mod mutate;
pub mod resolve;
pub mod scan;

use scan::{largest_inode, latest_live};
use tracing::debug;
use wfs_error::{Result, WfsError};
use wfs_image::Image;
use wfs_ondisk::{InodeHeader, parse_dir_payload};
use wfs_types::{InodeNumber, ParseError, S_IFDIR, S_IFREG, u64_to_usize};

/// The two entity types a WFS image can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    RegularFile,
    Directory,
}

impl FileKind {
    #[must_use]
    pub fn type_bits(self) -> u32 {
        match self {
            Self::RegularFile => S_IFREG,
            Self::Directory => S_IFDIR,
        }
    }

    fn from_header(header: &InodeHeader) -> Result<Self> {
        if header.is_dir() {
            Ok(Self::Directory)
        } else if header.is_reg() {
            Ok(Self::RegularFile)
        } else {
            Err(ParseError::InvalidField {
                field: "mode",
                reason: "neither regular file nor directory",
            }
            .into())
        }
    }
}

/// Stat-shaped view of a live inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttr {
    pub ino: InodeNumber,
    pub kind: FileKind,
    pub perm: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub links: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

impl FileAttr {
    #[allow(clippy::cast_possible_truncation)] // permission bits fit in u16
    fn from_header(header: &InodeHeader) -> Result<Self> {
        Ok(Self {
            ino: header.inode_number,
            kind: FileKind::from_header(header)?,
            perm: (header.mode & 0o7777) as u16,
            uid: header.uid,
            gid: header.gid,
            size: u64::from(header.size),
            links: header.links,
            atime: header.atime,
            mtime: header.mtime,
            ctime: header.ctime,
        })
    }
}

/// One entry of a `readdir` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub ino: InodeNumber,
    pub name: String,
    pub kind: FileKind,
}

/// A mounted volume: the operation surface over one image.
///
/// The bridge serializes handler calls, so `Volume` is single-writer by
/// construction; each mutating method appends its records, publishes the new
/// head, and flushes before returning.
pub struct Volume {
    image: Image,
}

impl Volume {
    /// Open an existing image file.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self {
            image: Image::open(path)?,
        })
    }

    /// Wrap an already-opened image.
    #[must_use]
    pub fn from_image(image: Image) -> Self {
        Self { image }
    }

    /// A fresh volume with no backing file. Test and tooling convenience.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            image: Image::in_memory(),
        }
    }

    #[must_use]
    pub fn image(&self) -> &Image {
        &self.image
    }

    // ── Path-keyed operation surface ────────────────────────────────────

    pub fn getattr(&self, path: &str) -> Result<FileAttr> {
        let ino = resolve::resolve_path(&self.image, path)?;
        self.attr(ino)
    }

    /// Create a regular file. Returns the new inode number.
    pub fn mknod(&mut self, path: &str, perm: u32, uid: u32, gid: u32) -> Result<InodeNumber> {
        self.create_path(path, FileKind::RegularFile, perm, uid, gid)
    }

    /// Create an empty directory. Returns the new inode number.
    pub fn mkdir(&mut self, path: &str, perm: u32, uid: u32, gid: u32) -> Result<InodeNumber> {
        self.create_path(path, FileKind::Directory, perm, uid, gid)
    }

    pub fn read(&self, path: &str, offset: u64, size: u32) -> Result<Vec<u8>> {
        let ino = resolve::resolve_path(&self.image, path)?;
        self.read_inode(ino, offset, size)
    }

    /// Write `buf` at `offset`, growing the file as needed. Returns the
    /// number of bytes accepted, always `buf.len()` on success.
    pub fn write(&mut self, path: &str, offset: u64, buf: &[u8]) -> Result<usize> {
        let ino = resolve::resolve_path(&self.image, path)?;
        mutate::write(&mut self.image, ino, u64_to_usize(offset, "offset")?, buf)
    }

    pub fn readdir(&self, path: &str) -> Result<Vec<DirEntryInfo>> {
        let ino = resolve::resolve_path(&self.image, path)?;
        self.read_dir(ino)
    }

    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let (parent_path, name) = resolve::split_parent(path)?;
        let parent = resolve::resolve_path(&self.image, parent_path)?;
        mutate::unlink(&mut self.image, parent, name.as_bytes())
    }

    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let (parent_path, name) = resolve::split_parent(path)?;
        let parent = resolve::resolve_path(&self.image, parent_path)?;
        mutate::rmdir(&mut self.image, parent, name.as_bytes())
    }

    // ── Inode-keyed surface (backs the FUSE bridge) ─────────────────────

    pub fn getattr_ino(&self, ino: InodeNumber) -> Result<FileAttr> {
        self.check_handle(ino)?;
        self.attr(ino)
    }

    /// Find `name` under the directory `parent` and return its attributes.
    pub fn lookup(&self, parent: InodeNumber, name: &[u8]) -> Result<FileAttr> {
        self.check_handle(parent)?;
        let ino = resolve::lookup_entry(&self.image, parent, name)?
            .ok_or_else(|| WfsError::NotFound(String::from_utf8_lossy(name).into_owned()))?;
        self.attr(ino)
    }

    pub fn read_ino(&self, ino: InodeNumber, offset: u64, size: u32) -> Result<Vec<u8>> {
        self.check_handle(ino)?;
        self.read_inode(ino, offset, size)
    }

    pub fn write_ino(&mut self, ino: InodeNumber, offset: u64, buf: &[u8]) -> Result<usize> {
        self.check_handle(ino)?;
        mutate::write(&mut self.image, ino, u64_to_usize(offset, "offset")?, buf)
    }

    pub fn readdir_ino(&self, ino: InodeNumber) -> Result<Vec<DirEntryInfo>> {
        self.check_handle(ino)?;
        self.read_dir(ino)
    }

    /// Create a child under `parent` and return its attributes.
    pub fn create_at(
        &mut self,
        parent: InodeNumber,
        name: &[u8],
        kind: FileKind,
        perm: u32,
        uid: u32,
        gid: u32,
    ) -> Result<FileAttr> {
        self.check_handle(parent)?;
        let ino = mutate::create(&mut self.image, parent, name, kind, perm, uid, gid)?;
        self.attr(ino)
    }

    pub fn unlink_at(&mut self, parent: InodeNumber, name: &[u8]) -> Result<()> {
        self.check_handle(parent)?;
        mutate::unlink(&mut self.image, parent, name)
    }

    pub fn rmdir_at(&mut self, parent: InodeNumber, name: &[u8]) -> Result<()> {
        self.check_handle(parent)?;
        mutate::rmdir(&mut self.image, parent, name)
    }

    // ── Maintenance ─────────────────────────────────────────────────────

    /// Compact the log in place. The caller must guarantee no concurrent
    /// mutator; a mounted volume satisfies that by construction.
    pub fn compact(&mut self) -> Result<()> {
        compact::compact(&mut self.image)
    }

    /// Persist any unflushed bytes. Mutating methods flush on their own;
    /// this is for teardown paths.
    pub fn flush(&mut self) -> Result<()> {
        self.image.flush()
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn create_path(
        &mut self,
        path: &str,
        kind: FileKind,
        perm: u32,
        uid: u32,
        gid: u32,
    ) -> Result<InodeNumber> {
        match resolve::resolve_path(&self.image, path) {
            Ok(_) => return Err(WfsError::Exists),
            Err(WfsError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
        let (parent_path, name) = resolve::split_parent(path)?;
        let parent = resolve::resolve_path(&self.image, parent_path)?;
        mutate::create(&mut self.image, parent, name.as_bytes(), kind, perm, uid, gid)
    }

    /// An inode number above the allocation watermark can only come from a
    /// stale kernel-side cache, not from any record in this log.
    fn check_handle(&self, ino: InodeNumber) -> Result<()> {
        if ino > largest_inode(&self.image)? {
            debug!(ino = %ino, "stale inode handle");
            return Err(WfsError::BadHandle(u64::from(ino.0)));
        }
        Ok(())
    }

    fn attr(&self, ino: InodeNumber) -> Result<FileAttr> {
        let view = latest_live(&self.image, ino)?
            .ok_or_else(|| WfsError::NotFound(format!("inode {ino}")))?;
        FileAttr::from_header(&view.header)
    }

    fn read_inode(&self, ino: InodeNumber, offset: u64, size: u32) -> Result<Vec<u8>> {
        let view = latest_live(&self.image, ino)?
            .ok_or_else(|| WfsError::NotFound(format!("inode {ino}")))?;
        if !view.header.is_reg() {
            return Err(WfsError::IsDirectory);
        }

        let offset = u64_to_usize(offset, "offset")?;
        if offset >= view.payload.len() {
            return Ok(Vec::new());
        }
        let end = view.payload.len().min(offset.saturating_add(size as usize));
        Ok(view.payload[offset..end].to_vec())
    }

    fn read_dir(&self, ino: InodeNumber) -> Result<Vec<DirEntryInfo>> {
        let view = latest_live(&self.image, ino)?
            .ok_or_else(|| WfsError::NotFound(format!("inode {ino}")))?;
        if !view.header.is_dir() {
            return Err(WfsError::NotDirectory);
        }

        let entries = parse_dir_payload(view.payload)?;
        let mut listing = Vec::with_capacity(entries.len());
        for entry in entries {
            // Entries are weak references; skip any whose target is gone.
            let Some(child) = latest_live(&self.image, entry.ino)? else {
                debug!(ino = %entry.ino, "directory entry references a dead inode");
                continue;
            };
            listing.push(DirEntryInfo {
                ino: entry.ino,
                name: entry.name_str(),
                kind: FileKind::from_header(&child.header)?,
            });
        }
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getattr_on_fresh_root() {
        let vol = Volume::in_memory();
        let attr = vol.getattr("/").expect("getattr");
        assert_eq!(attr.ino, InodeNumber::ROOT);
        assert_eq!(attr.kind, FileKind::Directory);
        assert_eq!(attr.perm, 0o755);
        assert_eq!(attr.size, 0);
        assert_eq!(attr.links, 1);
    }

    #[test]
    fn read_clamps_to_eof() {
        let mut vol = Volume::in_memory();
        vol.mknod("/f", 0o644, 0, 0).expect("mknod");
        vol.write("/f", 0, b"hello").expect("write");

        assert_eq!(vol.read("/f", 0, 100).expect("read"), b"hello");
        assert_eq!(vol.read("/f", 3, 100).expect("read"), b"lo");
        assert!(vol.read("/f", 5, 100).expect("read at eof").is_empty());
        assert!(vol.read("/f", 99, 1).expect("read past eof").is_empty());
    }

    #[test]
    fn read_on_directory_is_rejected() {
        let vol = Volume::in_memory();
        assert!(matches!(vol.read("/", 0, 16), Err(WfsError::IsDirectory)));
    }

    #[test]
    fn readdir_lists_kinds() {
        let mut vol = Volume::in_memory();
        vol.mkdir("/d", 0o755, 0, 0).expect("mkdir");
        vol.mknod("/f", 0o644, 0, 0).expect("mknod");

        let mut names: Vec<(String, FileKind)> = vol
            .readdir("/")
            .expect("readdir")
            .into_iter()
            .map(|e| (e.name, e.kind))
            .collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            names,
            vec![
                ("d".to_owned(), FileKind::Directory),
                ("f".to_owned(), FileKind::RegularFile),
            ]
        );
    }

    #[test]
    fn readdir_on_file_is_not_directory() {
        let mut vol = Volume::in_memory();
        vol.mknod("/f", 0o644, 0, 0).expect("mknod");
        assert!(matches!(vol.readdir("/f"), Err(WfsError::NotDirectory)));
    }

    #[test]
    fn stale_handle_is_ebadf_shaped() {
        let vol = Volume::in_memory();
        assert!(matches!(
            vol.getattr_ino(InodeNumber(99)),
            Err(WfsError::BadHandle(99))
        ));
    }

    #[test]
    fn lookup_finds_and_misses() {
        let mut vol = Volume::in_memory();
        let ino = vol.mkdir("/d", 0o700, 42, 42).expect("mkdir");

        let attr = vol.lookup(InodeNumber::ROOT, b"d").expect("lookup");
        assert_eq!(attr.ino, ino);
        assert_eq!(attr.uid, 42);
        assert_eq!(attr.perm, 0o700);
        assert!(matches!(
            vol.lookup(InodeNumber::ROOT, b"nope"),
            Err(WfsError::NotFound(_))
        ));
    }

    #[test]
    fn mknod_into_missing_parent_is_not_found() {
        let mut vol = Volume::in_memory();
        assert!(matches!(
            vol.mknod("/no/such/dir/f", 0o644, 0, 0),
            Err(WfsError::NotFound(_))
        ));
    }

    #[test]
    fn mknod_existing_path_is_exists() {
        let mut vol = Volume::in_memory();
        vol.mknod("/f", 0o644, 0, 0).expect("mknod");
        assert!(matches!(
            vol.mknod("/f", 0o644, 0, 0),
            Err(WfsError::Exists)
        ));
        // The root itself already exists too.
        assert!(matches!(vol.mkdir("/", 0o755, 0, 0), Err(WfsError::Exists)));
    }
}
