#![forbid(unsafe_code)]
//! FUSE adapter for WFS.
//!
//! This crate is a thin translation layer: kernel FUSE requests arrive via
//! the `fuser` crate, get forwarded to a [`Volume`] (from `wfs-core`), and
//! errors are mapped through [`WfsError::to_errno()`]. The kernel serializes
//! requests through `&mut self`, which matches the single-writer discipline
//! of the log.

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, MountOption, ReplyAttr, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use std::ffi::OsStr;
use std::os::raw::c_int;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;
use wfs_core::{FileKind, Volume};
use wfs_error::WfsError;
use wfs_types::{InodeNumber, mode_is_dir, mode_is_reg};

/// TTL for cached attributes and entries. The volume mutates only through
/// this mount, so short-lived kernel caching is safe.
const ATTR_TTL: Duration = Duration::from_secs(1);

// ── Error type ──────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FuseError {
    #[error("invalid mountpoint: {0}")]
    InvalidMountpoint(String),
    #[error("mount I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Inode mapping ───────────────────────────────────────────────────────────

// The kernel reserves ino 1 for the root; WFS numbers the root 0. Shift the
// whole space by one across the boundary.

fn to_wfs_ino(fuser_ino: u64) -> Option<InodeNumber> {
    let shifted = fuser_ino.checked_sub(1)?;
    u32::try_from(shifted).ok().map(InodeNumber)
}

fn to_fuser_ino(ino: InodeNumber) -> u64 {
    u64::from(ino.0) + 1
}

// ── Type conversions ────────────────────────────────────────────────────────

fn to_fuser_file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::RegularFile => FileType::RegularFile,
        FileKind::Directory => FileType::Directory,
    }
}

fn secs_to_system_time(secs: u32) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(u64::from(secs))
}

fn to_file_attr(attr: &wfs_core::FileAttr) -> FileAttr {
    FileAttr {
        ino: to_fuser_ino(attr.ino),
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: secs_to_system_time(attr.atime),
        mtime: secs_to_system_time(attr.mtime),
        ctime: secs_to_system_time(attr.ctime),
        crtime: secs_to_system_time(attr.ctime),
        kind: to_fuser_file_type(attr.kind),
        perm: attr.perm,
        nlink: attr.links,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

// ── Mount options ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MountOptions {
    pub read_only: bool,
    pub allow_other: bool,
    pub auto_unmount: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            allow_other: false,
            auto_unmount: true,
        }
    }
}

// ── FUSE filesystem adapter ─────────────────────────────────────────────────

/// FUSE adapter that delegates all operations to a [`Volume`].
///
/// Unimplemented operations return `ENOSYS` via fuser's default method
/// implementations.
pub struct WfsFuse {
    vol: Volume,
}

impl WfsFuse {
    #[must_use]
    pub fn new(vol: Volume) -> Self {
        Self { vol }
    }

    fn attr_reply(result: Result<wfs_core::FileAttr, WfsError>, reply: ReplyAttr) {
        match result {
            Ok(attr) => reply.attr(&ATTR_TTL, &to_file_attr(&attr)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn entry_reply(result: Result<wfs_core::FileAttr, WfsError>, reply: ReplyEntry) {
        match result {
            Ok(attr) => reply.entry(&ATTR_TTL, &to_file_attr(&attr), 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn empty_reply(result: Result<(), WfsError>, reply: ReplyEmpty) {
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}

impl Filesystem for WfsFuse {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        Ok(())
    }

    fn destroy(&mut self) {
        if let Err(e) = self.vol.flush() {
            warn!(error = %e, "flush on unmount failed");
        }
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent) = to_wfs_ino(parent) else {
            reply.error(libc::EBADF);
            return;
        };
        let result = self.vol.lookup(parent, name.as_bytes());
        if let Err(e) = &result {
            // ENOENT is expected for missing entries — don't warn for that.
            if e.to_errno() != libc::ENOENT {
                warn!(parent = %parent, ?name, error = %e, "lookup failed");
            }
        }
        Self::entry_reply(result, reply);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(ino) = to_wfs_ino(ino) else {
            reply.error(libc::EBADF);
            return;
        };
        Self::attr_reply(self.vol.getattr_ino(ino), reply);
    }

    /// Timestamp and mode changes are not stored individually; the current
    /// attributes are returned so `touch`-style calls succeed.
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(ino) = to_wfs_ino(ino) else {
            reply.error(libc::EBADF);
            return;
        };
        Self::attr_reply(self.vol.getattr_ino(ino), reply);
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let Some(parent) = to_wfs_ino(parent) else {
            reply.error(libc::EBADF);
            return;
        };
        // Only regular files; devices, pipes, and sockets have no record form.
        if !mode_is_reg(mode) && mode & wfs_types::S_IFMT != 0 {
            reply.error(libc::EPERM);
            return;
        }
        let result = self.vol.create_at(
            parent,
            name.as_bytes(),
            FileKind::RegularFile,
            mode,
            req.uid(),
            req.gid(),
        );
        if let Err(e) = &result {
            warn!(parent = %parent, ?name, error = %e, "mknod failed");
        }
        Self::entry_reply(result, reply);
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(parent) = to_wfs_ino(parent) else {
            reply.error(libc::EBADF);
            return;
        };
        if mode & wfs_types::S_IFMT != 0 && !mode_is_dir(mode) {
            reply.error(libc::EPERM);
            return;
        }
        let result = self.vol.create_at(
            parent,
            name.as_bytes(),
            FileKind::Directory,
            mode,
            req.uid(),
            req.gid(),
        );
        if let Err(e) = &result {
            warn!(parent = %parent, ?name, error = %e, "mkdir failed");
        }
        Self::entry_reply(result, reply);
    }

    fn open(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        // Stateless open: we don't track file handles.
        reply.opened(0, 0);
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(ino) = to_wfs_ino(ino) else {
            reply.error(libc::EBADF);
            return;
        };
        let offset = u64::try_from(offset).unwrap_or(0);
        match self.vol.read_ino(ino, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => {
                warn!(ino = %ino, offset, size, error = %e, "read failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(ino) = to_wfs_ino(ino) else {
            reply.error(libc::EBADF);
            return;
        };
        let offset = u64::try_from(offset).unwrap_or(0);
        match self.vol.write_ino(ino, offset, data) {
            Ok(written) => reply.written(u32::try_from(written).unwrap_or(u32::MAX)),
            Err(e) => {
                warn!(ino = %ino, offset, len = data.len(), error = %e, "write failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(ino) = to_wfs_ino(ino) else {
            reply.error(libc::EBADF);
            return;
        };
        match self.vol.readdir_ino(ino) {
            Ok(entries) => {
                let skip = usize::try_from(offset).unwrap_or(usize::MAX);
                for (i, entry) in entries.iter().enumerate().skip(skip) {
                    let next = i64::try_from(i + 1).unwrap_or(i64::MAX);
                    let full = reply.add(
                        to_fuser_ino(entry.ino),
                        next,
                        to_fuser_file_type(entry.kind),
                        OsStr::new(&entry.name),
                    );
                    if full {
                        break;
                    }
                }
                reply.ok();
            }
            Err(e) => {
                warn!(ino = %ino, offset, error = %e, "readdir failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent) = to_wfs_ino(parent) else {
            reply.error(libc::EBADF);
            return;
        };
        Self::empty_reply(self.vol.unlink_at(parent, name.as_bytes()), reply);
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent) = to_wfs_ino(parent) else {
            reply.error(libc::EBADF);
            return;
        };
        Self::empty_reply(self.vol.rmdir_at(parent, name.as_bytes()), reply);
    }
}

// ── Mount entrypoint ────────────────────────────────────────────────────────

fn build_mount_options(options: &MountOptions) -> Vec<MountOption> {
    let mut opts = vec![
        MountOption::FSName("wfs".to_owned()),
        MountOption::Subtype("wfs".to_owned()),
        MountOption::DefaultPermissions,
        MountOption::NoAtime,
    ];

    if options.read_only {
        opts.push(MountOption::RO);
    }
    if options.allow_other {
        opts.push(MountOption::AllowOther);
    }
    if options.auto_unmount {
        opts.push(MountOption::AutoUnmount);
    }

    opts
}

fn validate_mountpoint(mountpoint: &Path) -> Result<(), FuseError> {
    if mountpoint.as_os_str().is_empty() {
        return Err(FuseError::InvalidMountpoint(
            "mountpoint cannot be empty".to_owned(),
        ));
    }
    Ok(())
}

/// Mount a WFS volume at the given mountpoint (blocking).
///
/// This function blocks until the filesystem is unmounted.
pub fn mount(
    vol: Volume,
    mountpoint: impl AsRef<Path>,
    options: &MountOptions,
) -> Result<(), FuseError> {
    let mountpoint = mountpoint.as_ref();
    validate_mountpoint(mountpoint)?;
    let fuse_opts = build_mount_options(options);
    fuser::mount2(WfsFuse::new(vol), mountpoint, &fuse_opts)?;
    Ok(())
}

/// Mount a WFS volume in the background, returning a session handle.
///
/// The filesystem is unmounted when the returned `BackgroundSession` is
/// dropped.
pub fn mount_background(
    vol: Volume,
    mountpoint: impl AsRef<Path>,
    options: &MountOptions,
) -> Result<fuser::BackgroundSession, FuseError> {
    let mountpoint = mountpoint.as_ref();
    validate_mountpoint(mountpoint)?;
    let fuse_opts = build_mount_options(options);
    let session = fuser::spawn_mount2(WfsFuse::new(vol), mountpoint, &fuse_opts)?;
    Ok(session)
}
