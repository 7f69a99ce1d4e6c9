//! Path resolution over the record log.
//!
//! Paths are absolute, slash-separated byte strings. Empty tokens are
//! ignored, so `/`, `/a/`, and `//a` behave as expected. Each segment is a
//! byte-exact match against the NUL-terminated prefix of a directory entry's
//! name buffer; the latest live record of each directory is authoritative.

use crate::scan::latest_live;
use wfs_error::{Result, WfsError};
use wfs_image::Image;
use wfs_ondisk::parse_dir_payload;
use wfs_types::InodeNumber;

/// Look up `name` in the directory `parent`.
///
/// Returns `Ok(None)` when the directory has no such entry. Fails with
/// `NotFound` if `parent` has no live record and `NotDirectory` if it is a
/// regular file.
pub fn lookup_entry(
    image: &Image,
    parent: InodeNumber,
    name: &[u8],
) -> Result<Option<InodeNumber>> {
    let Some(view) = latest_live(image, parent)? else {
        return Err(WfsError::NotFound(format!("inode {parent}")));
    };
    if !view.header.is_dir() {
        return Err(WfsError::NotDirectory);
    }

    let entries = parse_dir_payload(view.payload)?;
    Ok(entries
        .iter()
        .find(|entry| entry.name_bytes() == name)
        .map(|entry| entry.ino))
}

/// Resolve an absolute path to its inode number.
///
/// The empty path and `/` resolve to the root. Any missing segment is
/// `NotFound`; a non-terminal segment that is a regular file is
/// `NotDirectory`.
pub fn resolve_path(image: &Image, path: &str) -> Result<InodeNumber> {
    let mut current = InodeNumber::ROOT;
    for token in path.split('/').filter(|t| !t.is_empty()) {
        current = lookup_entry(image, current, token.as_bytes())?
            .ok_or_else(|| WfsError::NotFound(path.to_owned()))?;
    }
    Ok(current)
}

/// Split a path into its parent directory path and final name.
///
/// `/a/b/c` becomes `("/a/b", "c")`; `/top` becomes `("/", "top")`. The root
/// itself has no final name and is rejected.
pub fn split_parent(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let Some((parent, name)) = trimmed.rsplit_once('/') else {
        return Err(WfsError::NotFound(path.to_owned()));
    };
    if name.is_empty() {
        return Err(WfsError::NotFound(path.to_owned()));
    }
    Ok(if parent.is_empty() { ("/", name) } else { (parent, name) })
}
