//! Offline log compaction.
//!
//! Rewrites the log so that every live inode keeps exactly its latest record,
//! laid out in ascending inode-number order. Superseded records and
//! tombstoned inodes are dropped. Must not run while a mounter is mutating
//! the image; the caller serializes that.

use crate::scan::{largest_inode, latest};
use tracing::info;
use wfs_error::Result;
use wfs_image::Image;
use wfs_ondisk::Superblock;
use wfs_types::{DISK_SIZE, InodeNumber, SUPERBLOCK_SIZE, WFS_MAGIC};

/// Compact the image in place and flush it.
///
/// Running twice in a row yields a byte-identical image on the second run:
/// a compacted log already holds one record per live inode in ascending
/// order, so the rewrite reproduces it exactly.
pub fn compact(image: &mut Image) -> Result<()> {
    let old_head = image.head();
    let largest = largest_inode(image)?;

    let mut scratch = vec![0_u8; DISK_SIZE];
    let mut scratch_head = SUPERBLOCK_SIZE;

    for n in 0..=largest.0 {
        let Some(view) = latest(image, InodeNumber(n))? else {
            continue;
        };
        if view.header.deleted {
            continue;
        }
        let total = view.header.total_len();
        let source = image.slice(view.offset, total)?;
        scratch[scratch_head..scratch_head + total].copy_from_slice(source);
        scratch_head += total;
    }

    let sb = Superblock {
        magic: WFS_MAGIC,
        head: u32::try_from(scratch_head).unwrap_or(u32::MAX),
    };
    scratch[..SUPERBLOCK_SIZE].copy_from_slice(&sb.encode());

    image.overwrite(scratch)?;
    image.flush()?;

    info!(
        old_head,
        new_head = scratch_head,
        reclaimed = old_head as usize - scratch_head,
        "compacted log"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileKind;
    use crate::mutate::{create, unlink, write};
    use crate::scan::{RecordIter, latest_live};

    fn busy_image() -> Image {
        let mut image = Image::in_memory();
        let a = create(
            &mut image,
            InodeNumber::ROOT,
            b"a",
            FileKind::Directory,
            0o755,
            0,
            0,
        )
        .expect("mkdir /a");
        let f = create(
            &mut image,
            InodeNumber::ROOT,
            b"f",
            FileKind::RegularFile,
            0o644,
            0,
            0,
        )
        .expect("mknod /f");
        write(&mut image, f, 0, b"hello").expect("write");
        write(&mut image, f, 5, b"!").expect("append");
        let dead = create(&mut image, a, b"dead", FileKind::RegularFile, 0o644, 0, 0)
            .expect("mknod /a/dead");
        write(&mut image, dead, 0, b"gone soon").expect("write dead");
        unlink(&mut image, a, b"dead").expect("unlink dead");
        image
    }

    #[test]
    fn compaction_shrinks_head_and_keeps_content() {
        let mut image = busy_image();
        let head_before = image.head();
        let f = crate::resolve::resolve_path(&image, "/f").expect("resolve before");

        compact(&mut image).expect("compact");

        assert!(image.head() < head_before);
        assert_eq!(image.bytes().len(), DISK_SIZE);

        // Same name still resolves to the same inode with the same content.
        assert_eq!(
            crate::resolve::resolve_path(&image, "/f").expect("resolve after"),
            f
        );
        let rec = latest_live(&image, f).expect("scan").expect("live");
        assert_eq!(rec.payload, b"hello!");
    }

    #[test]
    fn compacted_log_is_one_record_per_live_inode_ascending() {
        let mut image = busy_image();
        compact(&mut image).expect("compact");

        let records: Vec<_> = RecordIter::new(&image)
            .collect::<wfs_error::Result<Vec<_>>>()
            .expect("scan");
        let inos: Vec<u32> = records.iter().map(|r| r.header.inode_number.0).collect();

        let mut sorted = inos.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(inos, sorted, "ascending, no duplicates");
        assert!(records.iter().all(|r| !r.header.deleted));
        // The tombstoned inode is gone entirely.
        assert!(latest(&image, InodeNumber(3)).expect("scan").is_none());
    }

    #[test]
    fn compaction_is_idempotent() {
        let mut image = busy_image();
        compact(&mut image).expect("first");
        let first = image.bytes().to_vec();
        compact(&mut image).expect("second");
        assert_eq!(image.bytes(), &first[..]);
    }

    #[test]
    fn compacting_a_fresh_image_keeps_the_root() {
        let mut image = Image::in_memory();
        let head_before = image.head();
        compact(&mut image).expect("compact");
        assert_eq!(image.head(), head_before);
        assert!(
            latest_live(&image, InodeNumber::ROOT)
                .expect("scan")
                .is_some()
        );
    }
}
