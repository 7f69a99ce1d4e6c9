#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use wfs_core::scan::RecordIter;
use wfs_core::{Volume, compact};
use wfs_fuse::MountOptions;
use wfs_image::Image;
use wfs_types::{DISK_SIZE, SUPERBLOCK_SIZE};

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "wfs", about = "WFS — log-structured filesystem toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a fresh image at the given path.
    Mkfs {
        /// Path for the new image file.
        disk: PathBuf,
    },
    /// Mount an image via FUSE until unmounted.
    Mount {
        /// Path to the image file.
        disk: PathBuf,
        /// Mountpoint directory.
        mountpoint: PathBuf,
        /// Allow other users to access the mount.
        #[arg(long)]
        allow_other: bool,
        /// Mount read-only.
        #[arg(long)]
        read_only: bool,
    },
    /// Compact an unmounted image, dropping superseded and deleted records.
    Fsck {
        /// Path to the image file.
        disk: PathBuf,
    },
    /// Inspect an image: superblock and per-record log summary.
    Inspect {
        /// Path to the image file.
        disk: PathBuf,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
}

// ── Serializable outputs ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct InspectOutput {
    head: u32,
    log_bytes: usize,
    free_bytes: usize,
    records: Vec<RecordSummary>,
}

#[derive(Debug, Serialize)]
struct RecordSummary {
    offset: usize,
    ino: u32,
    kind: &'static str,
    deleted: bool,
    size: u32,
    links: u32,
}

// ── Main ────────────────────────────────────────────────────────────────────

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Mkfs { disk } => mkfs(&disk),
        Command::Mount {
            disk,
            mountpoint,
            allow_other,
            read_only,
        } => mount_cmd(&disk, &mountpoint, allow_other, read_only),
        Command::Fsck { disk } => fsck(&disk),
        Command::Inspect { disk, json } => inspect(&disk, json),
    }
}

fn mkfs(disk: &PathBuf) -> Result<()> {
    Image::create(disk)
        .with_context(|| format!("failed to create image at {}", disk.display()))?;
    println!(
        "initialized {} ({DISK_SIZE} bytes, empty root directory)",
        disk.display()
    );
    Ok(())
}

fn mount_cmd(disk: &PathBuf, mountpoint: &PathBuf, allow_other: bool, read_only: bool) -> Result<()> {
    let vol = Volume::open(disk)
        .with_context(|| format!("failed to open image: {}", disk.display()))?;
    eprintln!(
        "mounting {} (head={}) at {}",
        disk.display(),
        vol.image().head(),
        mountpoint.display()
    );

    let opts = MountOptions {
        read_only,
        allow_other,
        auto_unmount: true,
    };
    wfs_fuse::mount(vol, mountpoint, &opts)
        .with_context(|| format!("FUSE mount failed at {}", mountpoint.display()))?;
    Ok(())
}

fn fsck(disk: &PathBuf) -> Result<()> {
    let mut image = Image::open(disk)
        .with_context(|| format!("failed to open image: {}", disk.display()))?;
    let head_before = image.head();
    compact::compact(&mut image).context("compaction failed")?;
    println!(
        "compacted {}: head {head_before} -> {} ({} bytes reclaimed)",
        disk.display(),
        image.head(),
        head_before - image.head()
    );
    Ok(())
}

fn inspect(disk: &PathBuf, json: bool) -> Result<()> {
    let image = Image::open(disk)
        .with_context(|| format!("failed to open image: {}", disk.display()))?;

    let mut records = Vec::new();
    for view in RecordIter::new(&image) {
        let view = view.context("log scan failed")?;
        records.push(RecordSummary {
            offset: view.offset,
            ino: view.header.inode_number.0,
            kind: if view.header.is_dir() {
                "dir"
            } else if view.header.is_reg() {
                "file"
            } else {
                "unknown"
            },
            deleted: view.header.deleted,
            size: view.header.size,
            links: view.header.links,
        });
    }

    let output = InspectOutput {
        head: image.head(),
        log_bytes: image.head() as usize - SUPERBLOCK_SIZE,
        free_bytes: image.free_bytes(),
        records,
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
    } else {
        println!("WFS image: {}", disk.display());
        println!("head: {}", output.head);
        println!("log_bytes: {}", output.log_bytes);
        println!("free_bytes: {}", output.free_bytes);
        println!("records: {}", output.records.len());
        for r in &output.records {
            let tomb = if r.deleted { " deleted" } else { "" };
            println!(
                "  {:>8}  ino={:<4} {:<7} size={}{tomb}",
                r.offset, r.ino, r.kind, r.size
            );
        }
    }

    Ok(())
}
