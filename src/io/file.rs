// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{BlockScanner, CompressionType};
use crate::{
    error::IoOp,
    record::{edge, Content},
    time::Period,
    Error, Result,
};
use std::{
    io::Write,
    os::unix::fs::FileExt,
    path::PathBuf,
    sync::Arc,
};

/// Monotone per-store file id
pub type FileId = u32;

/// Identifies one block: file id in the high half, physical block
/// offset in the low half
pub type PageId = u64;

/// Size of a writer's load/flush window
pub const MAP_SIZE: usize = 4 * 1024 * 1024;

/// Builds a page id from file id and physical offset.
#[must_use]
pub fn page_id(fid: FileId, offset: u64) -> PageId {
    (u64::from(fid) << 32) | (offset & 0xFFFF_FFFF)
}

/// Splits a page id into file id and physical offset.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn split_page_id(pid: PageId) -> (FileId, u64) {
    ((pid >> 32) as FileId, pid & 0xFFFF_FFFF)
}

/// File role and content bits
pub mod ctrl {
    /// Pre-created empty writer
    pub const SPARE: u8 = 1;
    /// The store's active writer
    pub const WRITER: u8 = 2;
    /// Readable file (pending or sorted)
    pub const READER: u8 = 4;
    /// Sorted reader
    pub const SORT: u8 = 8;
    /// Content is timestamped
    pub const TS: u8 = 16;
}

/// Writer window: a read-modify-writeback view of `MAP_SIZE` bytes
struct Window {
    base: u64,
    buf: Vec<u8>,
    dirty: bool,
}

/// A fixed-capacity block container
///
/// A file is a sequence of `blocksize` blocks holding fixed-size
/// record slots. Writers append through a mapped window; readers
/// scan blocks through [`BlockScanner`] on a private handle.
pub struct File {
    /// Monotone id within the owning store
    pub id: FileId,

    /// Position of the file in the store's reader order
    pub order: u32,

    /// On-disk location
    pub path: PathBuf,

    /// Preallocated capacity in bytes
    pub capacity: u32,

    /// Used bytes
    pub size: u32,

    /// Block size, 8 KiB
    pub blocksize: u32,

    /// Record slot size
    pub recordsize: u32,

    /// Record family stored here
    pub content: Content,

    /// Role bits, see [`ctrl`]
    pub ctrl: u8,

    /// Block compression
    pub compression: CompressionType,

    /// Reserved; no cipher is wired up
    pub encryption: u32,

    /// Timestamp granularity of the content
    pub grain: i64,

    /// Timestamp window `[oldest, newest]` over all records
    pub period: Period,

    dict: Option<Arc<Vec<u8>>>,
    handle: Option<std::fs::File>,
    window: Option<Window>,
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("size", &self.size)
            .field("capacity", &self.capacity)
            .field("ctrl", &self.ctrl)
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

impl File {
    /// Creates a file descriptor; nothing touches the disk yet.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: FileId,
        path: PathBuf,
        capacity: u32,
        size: u32,
        blocksize: u32,
        recordsize: u32,
        content: Content,
        ctrl: u8,
        compression: CompressionType,
        encryption: u32,
        grain: i64,
        period: Period,
    ) -> Self {
        Self {
            id,
            order: 0,
            path,
            capacity,
            size,
            blocksize,
            recordsize,
            content,
            ctrl,
            compression,
            encryption,
            grain,
            period,
            dict: None,
            handle: None,
            window: None,
        }
    }

    /// Whether this is a pre-created spare.
    #[must_use]
    pub fn is_spare(&self) -> bool {
        self.ctrl & ctrl::SPARE != 0
    }

    /// Whether this is the active writer.
    #[must_use]
    pub fn is_writer(&self) -> bool {
        self.ctrl & ctrl::WRITER != 0
    }

    /// Whether this file is readable.
    #[must_use]
    pub fn is_reader(&self) -> bool {
        self.ctrl & ctrl::READER != 0
    }

    /// Whether this reader has been sorted.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.ctrl & ctrl::SORT != 0
    }

    /// Whether the content carries timestamps.
    #[must_use]
    pub fn is_stamped(&self) -> bool {
        self.ctrl & ctrl::TS != 0
    }

    /// Unused bytes left for the writer.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.size)
    }

    /// Whether a scan over `[start, end]` can find anything here.
    #[must_use]
    pub fn worth(&self, period: &Period) -> bool {
        if !self.is_stamped() || period.is_unbounded() {
            return true;
        }
        period.overlaps(self.period.start, self.period.end)
    }

    /// Attaches a pre-shared compression dictionary.
    pub fn set_dict(&mut self, dict: Arc<Vec<u8>>) {
        self.dict = Some(dict);
    }

    /// Creates the file on disk and preallocates `capacity` bytes by
    /// writing zeroed buffers. The file stays open.
    pub fn create(&mut self) -> Result<()> {
        if self.is_writer() || self.is_spare() {
            if self.capacity == 0 {
                return Err(Error::Invalid("capacity is 0".into()));
            }
            if self.capacity % self.blocksize != 0 {
                return Err(Error::Invalid(
                    "capacity is not a multiple of the block size".into(),
                ));
            }
        }

        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(|e| Error::io(IoOp::Open, &self.path, e))?;

        let zeroes = vec![0u8; MAP_SIZE.min(self.capacity as usize).max(1)];
        let mut written = 0u64;
        while written < u64::from(self.capacity) {
            let n = (u64::from(self.capacity) - written).min(zeroes.len() as u64) as usize;
            #[allow(clippy::indexing_slicing)]
            file.write_all(&zeroes[..n])
                .map_err(|e| Error::io(IoOp::Write, &self.path, e))?;
            written += n as u64;
        }

        file.sync_all()
            .map_err(|e| Error::io(IoOp::Sync, &self.path, e))?;

        self.handle = Some(file);
        Ok(())
    }

    /// Opens the OS handle.
    pub fn open(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| Error::io(IoOp::Open, &self.path, e))?;
        self.handle = Some(file);
        Ok(())
    }

    /// Flushes any dirty window and closes the OS handle.
    pub fn close(&mut self) -> Result<()> {
        self.umap()?;
        self.handle = None;
        Ok(())
    }

    fn require_handle(&self) -> Result<&std::fs::File> {
        self.handle
            .as_ref()
            .ok_or_else(|| Error::Invalid("file is not open".into()))
    }

    /// Maps the window containing the writer's current position.
    pub fn map(&mut self) -> Result<()> {
        self.map_at(u64::from(self.size))
    }

    /// Maps the window containing byte position `pos`.
    pub fn map_at(&mut self, pos: u64) -> Result<()> {
        let base = (pos / MAP_SIZE as u64) * MAP_SIZE as u64;

        if let Some(w) = &self.window {
            if w.base == base {
                return Ok(());
            }
        }
        self.flush_window()?;

        let len = (u64::from(self.capacity) - base).min(MAP_SIZE as u64) as usize;
        if len == 0 {
            return Err(Error::Invalid("map position beyond capacity".into()));
        }

        let mut buf = vec![0u8; len];
        let handle = self.require_handle()?;
        handle
            .read_exact_at(&mut buf, base)
            .map_err(|e| Error::io(IoOp::Map, &self.path, e))?;

        self.window = Some(Window {
            base,
            buf,
            dirty: false,
        });
        Ok(())
    }

    /// Writes the window back and drops it.
    pub fn umap(&mut self) -> Result<()> {
        self.flush_window()?;
        self.window = None;
        Ok(())
    }

    fn flush_window(&mut self) -> Result<()> {
        let Some(w) = &mut self.window else {
            return Ok(());
        };
        if !w.dirty {
            return Ok(());
        }

        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| Error::Invalid("file is not open".into()))?;
        handle
            .write_all_at(&w.buf, w.base)
            .map_err(|e| Error::io(IoOp::Unmap, &self.path, e))?;
        w.dirty = false;
        Ok(())
    }

    /// Makes appended records visible to readers.
    pub fn sync(&mut self) -> Result<()> {
        self.flush_window()?;
        if let Some(handle) = &self.handle {
            handle
                .sync_data()
                .map_err(|e| Error::io(IoOp::Sync, &self.path, e))?;
        }
        Ok(())
    }

    /// Appends one record at the writer's position.
    ///
    /// The caller checks [`Self::remaining`] and swaps writers when
    /// the file is full.
    pub fn push(&mut self, record: &[u8]) -> Result<()> {
        if record.len() != self.recordsize as usize {
            return Err(Error::Invalid(format!(
                "record of {} bytes pushed into file with record size {}",
                record.len(),
                self.recordsize
            )));
        }
        if self.remaining() < self.recordsize {
            return Err(Error::Invalid("writer is full".into()));
        }

        let pos = u64::from(self.size);
        self.map_at(pos)?;

        #[allow(clippy::expect_used)]
        let w = self.window.as_mut().expect("window was just mapped");
        let off = (pos - w.base) as usize;
        #[allow(clippy::indexing_slicing)]
        w.buf[off..off + record.len()].copy_from_slice(record);
        w.dirty = true;

        self.size += self.recordsize;

        if self.is_stamped() {
            let ts = i64::from_le_bytes(
                record
                    .get(edge::TMSTMP as usize..edge::TMSTMP as usize + 8)
                    .map_or([0u8; 8], |s| {
                        let mut raw = [0u8; 8];
                        raw.copy_from_slice(s);
                        raw
                    }),
            );
            self.period.expand(ts);
        }
        Ok(())
    }

    /// Opens a private block scanner over the file's used bytes.
    pub fn scanner(&self) -> Result<BlockScanner> {
        BlockScanner::new(
            self.path.clone(),
            self.compression,
            self.blocksize,
            self.recordsize,
            u64::from(self.size),
            self.dict.clone(),
        )
    }

    /// Resets a file for reuse as a spare: drops the content, keeps
    /// the preallocation.
    pub fn erase(&mut self) -> Result<()> {
        self.umap()?;
        self.open()?;

        let handle = self.require_handle()?;
        handle
            .set_len(0)
            .map_err(|e| Error::io(IoOp::Write, &self.path, e))?;
        handle
            .set_len(u64::from(self.capacity))
            .map_err(|e| Error::io(IoOp::Write, &self.path, e))?;

        self.size = 0;
        self.period = Period::ALL;
        Ok(())
    }

    /// Unlinks the file from disk.
    pub fn remove(&mut self) -> Result<()> {
        self.window = None;
        self.handle = None;
        std::fs::remove_file(&self.path).map_err(|e| Error::io(IoOp::Remove, &self.path, e))
    }

    /// The page id of the block at physical offset `offset`.
    #[must_use]
    pub fn page_id_at(&self, offset: u64) -> PageId {
        page_id(self.id, offset)
    }
}
