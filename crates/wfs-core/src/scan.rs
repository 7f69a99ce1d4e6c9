//! Forward walker over the record log.
//!
//! The log occupies `[LOG_START, head)`. Records are packed end to end; each
//! is a 44-byte header followed by `size` payload bytes. A record whose
//! declared size would run past `head` means the image is corrupt — the log
//! is append-only from a good initial state, so this can only happen to an
//! image damaged outside WFS.

use wfs_error::{Result, WfsError};
use wfs_image::Image;
use wfs_ondisk::{InodeHeader, Record};
use wfs_types::{INODE_HEADER_SIZE, InodeNumber, LOG_START};

/// A borrowed record in the log.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    /// Byte offset of the record's header from the start of the image.
    pub offset: usize,
    pub header: InodeHeader,
    pub payload: &'a [u8],
}

impl RecordView<'_> {
    /// Copy into an owned `Record`.
    #[must_use]
    pub fn to_record(&self) -> Record {
        Record {
            header: self.header,
            payload: self.payload.to_vec(),
        }
    }
}

/// Iterator over all records in log order, tombstones included.
pub struct RecordIter<'a> {
    bytes: &'a [u8],
    head: usize,
    pos: usize,
}

impl<'a> RecordIter<'a> {
    #[must_use]
    pub fn new(image: &'a Image) -> Self {
        Self {
            bytes: image.bytes(),
            head: image.head() as usize,
            pos: LOG_START,
        }
    }

    fn corrupt(&mut self, detail: String) -> WfsError {
        let offset = self.pos;
        // Poison the iterator; scanning past a bad record is meaningless.
        self.pos = self.head;
        WfsError::Corruption { offset, detail }
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<RecordView<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.head {
            return None;
        }

        if self.pos + INODE_HEADER_SIZE > self.head {
            return Some(Err(self.corrupt(format!(
                "truncated header: {} bytes before head",
                self.head - self.pos
            ))));
        }

        let header = match InodeHeader::parse(&self.bytes[self.pos..]) {
            Ok(header) => header,
            Err(err) => return Some(Err(self.corrupt(err.to_string()))),
        };

        let end = self.pos + header.total_len();
        if end > self.head {
            return Some(Err(self.corrupt(format!(
                "record for inode {} declares {} payload bytes, overshooting head {}",
                header.inode_number, header.size, self.head
            ))));
        }

        let view = RecordView {
            offset: self.pos,
            header,
            payload: &self.bytes[self.pos + INODE_HEADER_SIZE..end],
        };
        self.pos = end;
        Some(Ok(view))
    }
}

/// Largest inode number present in the log, deleted records included.
///
/// New inode numbers are allocated as `largest_inode() + 1`, so tombstoned
/// numbers are never reused.
pub fn largest_inode(image: &Image) -> Result<InodeNumber> {
    let mut largest = InodeNumber::ROOT;
    for view in RecordIter::new(image) {
        let view = view?;
        largest = largest.max(view.header.inode_number);
    }
    Ok(largest)
}

/// The last record for inode `n`, regardless of its deleted flag.
pub fn latest(image: &Image, n: InodeNumber) -> Result<Option<RecordView<'_>>> {
    let mut found = None;
    for view in RecordIter::new(image) {
        let view = view?;
        if view.header.inode_number == n {
            found = Some(view);
        }
    }
    Ok(found)
}

/// The last record for inode `n`, or `None` if there is none or the latest
/// one is a tombstone.
pub fn latest_live(image: &Image, n: InodeNumber) -> Result<Option<RecordView<'_>>> {
    Ok(latest(image, n)?.filter(|view| !view.header.deleted))
}
