//! The mutation protocol.
//!
//! Every mutation is realized as an append sequence: new records are written
//! into `[head, head + total)`, then `head` is published and the image
//! flushed. Bytes below the old head are never modified. A mutation that
//! changes the namespace (create, unlink, rmdir) appends the re-written
//! parent directory record in the same sequence, so a scan at any published
//! head sees a coherent tree.
//!
//! Space is checked for the whole sequence before the first byte is written;
//! `NoSpace` leaves the image untouched.

use crate::FileKind;
use crate::resolve::lookup_entry;
use crate::scan::{largest_inode, latest_live};
use tracing::debug;
use wfs_error::{Result, WfsError};
use wfs_image::{Image, unix_now};
use wfs_ondisk::{DirEntry, InodeHeader, Record, encode_dir_payload, parse_dir_payload};
use wfs_types::{DISK_SIZE, InodeNumber, MAX_NAME_LEN};

/// Append `records` as one atomic sequence and publish the new head.
fn append(image: &mut Image, records: &[Record]) -> Result<()> {
    let total: usize = records.iter().map(|r| r.header.total_len()).sum();
    let head = image.head() as usize;
    let new_head = head.checked_add(total).ok_or(WfsError::NoSpace)?;
    if new_head > DISK_SIZE {
        return Err(WfsError::NoSpace);
    }

    let mut cursor = head;
    for record in records {
        image.write_at(cursor, &record.encode())?;
        cursor += record.header.total_len();
    }
    image.set_head(u32::try_from(new_head).map_err(|_| WfsError::NoSpace)?)?;
    image.flush()?;

    debug!(
        records = records.len(),
        bytes = total,
        head = new_head,
        "appended"
    );
    Ok(())
}

/// The latest live record for `ino`, owned.
pub(crate) fn load_live(image: &Image, ino: InodeNumber) -> Result<Record> {
    latest_live(image, ino)?
        .map(|view| view.to_record())
        .ok_or_else(|| WfsError::NotFound(format!("inode {ino}")))
}

/// Re-encode a directory from its entry list, stamping fresh timestamps.
fn rewrite_dir(old: &InodeHeader, entries: &[DirEntry], now: u32) -> Result<Record> {
    let payload = encode_dir_payload(entries);
    let mut header = *old;
    header.size = u32::try_from(payload.len()).map_err(|_| WfsError::NoSpace)?;
    header.atime = now;
    header.mtime = now;
    header.ctime = now;
    Ok(Record { header, payload })
}

/// Create a regular file or directory named `name` under `parent`.
///
/// The stored mode always carries the type bit for `kind`; only the
/// permission bits of `perm` are kept. Returns the new inode number.
pub fn create(
    image: &mut Image,
    parent: InodeNumber,
    name: &[u8],
    kind: FileKind,
    perm: u32,
    uid: u32,
    gid: u32,
) -> Result<InodeNumber> {
    if name.len() >= MAX_NAME_LEN {
        return Err(WfsError::NameTooLong);
    }

    let parent_rec = load_live(image, parent)?;
    if !parent_rec.header.is_dir() {
        return Err(WfsError::NotDirectory);
    }
    let mut entries = parse_dir_payload(&parent_rec.payload)?;
    if entries.iter().any(|e| e.name_bytes() == name) {
        return Err(WfsError::Exists);
    }

    let new_ino = InodeNumber(largest_inode(image)?.0 + 1);
    let now = unix_now();
    let child = Record {
        header: InodeHeader {
            inode_number: new_ino,
            deleted: false,
            mode: kind.type_bits() | (perm & 0o7777),
            uid,
            gid,
            flags: 0,
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
            links: 1,
        },
        payload: Vec::new(),
    };

    entries.push(DirEntry::new(name, new_ino)?);
    let parent_new = rewrite_dir(&parent_rec.header, &entries, now)?;

    append(image, &[child, parent_new])?;
    debug!(ino = %new_ino, parent = %parent, ?kind, "created");
    Ok(new_ino)
}

/// Write `buf` into the file `ino` at `offset`, growing it as needed.
///
/// A gap between the old end of file and `offset` reads back as zeros.
/// Returns the number of bytes accepted, which is always `buf.len()`.
pub fn write(image: &mut Image, ino: InodeNumber, offset: usize, buf: &[u8]) -> Result<usize> {
    let old = load_live(image, ino)?;
    if !old.header.is_reg() {
        return Err(WfsError::IsDirectory);
    }

    let end = offset.checked_add(buf.len()).ok_or(WfsError::NoSpace)?;
    let new_size = end.max(old.payload.len());
    let mut payload = vec![0_u8; new_size];
    payload[..old.payload.len()].copy_from_slice(&old.payload);
    payload[offset..end].copy_from_slice(buf);

    let now = unix_now();
    let mut header = old.header;
    header.size = u32::try_from(new_size).map_err(|_| WfsError::NoSpace)?;
    header.mtime = now;
    header.ctime = now;

    append(image, &[Record { header, payload }])?;
    debug!(ino = %ino, offset, len = buf.len(), new_size, "wrote");
    Ok(buf.len())
}

/// Remove the regular file named `name` from `parent`.
pub fn unlink(image: &mut Image, parent: InodeNumber, name: &[u8]) -> Result<()> {
    let target_ino = lookup_entry(image, parent, name)?
        .ok_or_else(|| WfsError::NotFound(String::from_utf8_lossy(name).into_owned()))?;
    let target = load_live(image, target_ino)?;
    if target.header.is_dir() {
        return Err(WfsError::IsDirectory);
    }
    remove_entry(image, parent, name, &target)
}

/// Remove the empty directory named `name` from `parent`.
pub fn rmdir(image: &mut Image, parent: InodeNumber, name: &[u8]) -> Result<()> {
    let target_ino = lookup_entry(image, parent, name)?
        .ok_or_else(|| WfsError::NotFound(String::from_utf8_lossy(name).into_owned()))?;
    let target = load_live(image, target_ino)?;
    if !target.header.is_dir() {
        return Err(WfsError::NotDirectory);
    }
    if target.header.size != 0 {
        return Err(WfsError::NotEmpty);
    }
    remove_entry(image, parent, name, &target)
}

/// Drop one link from `target` and rewrite `parent` without its entry, as a
/// single guarded append sequence. A link count reaching zero tombstones the
/// target.
fn remove_entry(
    image: &mut Image,
    parent: InodeNumber,
    name: &[u8],
    target: &Record,
) -> Result<()> {
    let parent_rec = load_live(image, parent)?;
    let mut entries = parse_dir_payload(&parent_rec.payload)?;
    entries.retain(|e| e.name_bytes() != name);

    let now = unix_now();
    let remaining = target.header.links.saturating_sub(1);
    let target_new = if remaining == 0 {
        let mut header = target.header;
        header.deleted = true;
        header.size = 0;
        header.links = 0;
        header.atime = now;
        header.mtime = now;
        header.ctime = now;
        Record {
            header,
            payload: Vec::new(),
        }
    } else {
        let mut header = target.header;
        header.links = remaining;
        header.ctime = now;
        Record {
            header,
            payload: target.payload.clone(),
        }
    };
    let parent_new = rewrite_dir(&parent_rec.header, &entries, now)?;

    append(image, &[target_new, parent_new])?;
    debug!(ino = %target.header.inode_number, parent = %parent, "unlinked");
    Ok(())
}
