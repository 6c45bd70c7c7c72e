// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The reader hierarchy: one uniform page iterator over a store's
//! files.
//!
//! All readers speak the same protocol: `move_next` advances to the
//! next page (or key), `page` exposes 8 KiB of record slots, `key`
//! and `mask` describe the current index position where one exists.
//! `Eof` is the normal end-of-stream signal. Composite readers
//! (vertical sequence, merge) are built from the same parts.

mod buffer;
mod fullscan;
mod range;
mod search;
mod seq;

pub use buffer::Buffer;
pub use fullscan::Fullscan;
pub use range::{Crange, Frange, Krange, Mrange};
pub use search::Search;
pub use seq::{Merge, Vseq};

use crate::{
    index::KeySpec,
    io::{split_page_id, BlockScanner, File, FileId, PageId},
    time::Period,
    Result,
};
use byteview::ByteView;
use enum_dispatch::enum_dispatch;
use quick_cache::sync::Cache as QuickCache;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Pages the per-reader LRU keeps decompressed
const PAGE_LRU: usize = 512;

/// The uniform reader protocol
#[enum_dispatch]
pub trait ReadOps {
    /// Prepares the reader; must be called before the first
    /// `move_next`.
    fn open(&mut self) -> Result<()>;

    /// Advances to the next page or key; [`crate::Error::Eof`]
    /// signals the end of the stream.
    fn move_next(&mut self) -> Result<()>;

    /// The current page of record slots, where the reader carries
    /// pages.
    fn page(&self) -> Option<&[u8]>;

    /// The current index key, where the reader follows one.
    fn key(&self) -> Option<&[u8]>;

    /// Per-key slot mask for the current page; `None` means every
    /// non-zero slot counts.
    fn mask(&self) -> Option<u128>;

    /// Records under the current key, for counting readers.
    fn count(&self) -> u64;

    /// The ordering of the emitted stream, where one is defined
    /// (grouping relies on it).
    fn ikeys(&self) -> Option<&KeySpec>;

    /// Restricts the scan to a time period.
    fn set_period(&mut self, period: Period);

    /// Restarts the stream.
    fn rewind(&mut self) -> Result<()>;
}

/// A reader of any strategy
#[enum_dispatch(ReadOps)]
#[allow(clippy::large_enum_variant)]
pub enum Reader {
    /// Block-at-a-time scan over all files
    Fullscan,

    /// Index point matches
    Search,

    /// Index range, page granularity
    Frange,

    /// Index range, keys only
    Krange,

    /// Index range, per-key record counts
    Crange,

    /// Index range with per-key slot masks
    Mrange,

    /// Concatenation of same-shaped readers
    Vseq,

    /// K-way key-ordered merge
    Merge,

    /// In-memory index over pending files
    Buffer,
}

/// Loads referenced pages through a per-reader LRU, reusing one
/// scanner per file.
pub(crate) struct PageLoader {
    files: FxHashMap<FileId, Arc<File>>,
    scanner: Option<(FileId, BlockScanner)>,
    plru: QuickCache<PageId, ByteView>,
    period: Period,
}

impl PageLoader {
    pub fn new(files: &[Arc<File>]) -> Self {
        Self {
            files: files.iter().map(|f| (f.id, f.clone())).collect(),
            scanner: None,
            plru: QuickCache::new(PAGE_LRU),
            period: Period::ALL,
        }
    }

    pub fn set_period(&mut self, period: Period) {
        self.period = period;
    }

    /// Loads the page behind `pid`; `None` when its file is missing
    /// from the snapshot or out of period.
    pub fn load(&mut self, pid: PageId) -> Result<Option<ByteView>> {
        if let Some(page) = self.plru.get(&pid) {
            return Ok(Some(page));
        }

        let (fid, offset) = split_page_id(pid);

        let Some(file) = self.files.get(&fid) else {
            return Ok(None);
        };
        if !file.worth(&self.period) {
            return Ok(None);
        }

        let reuse = matches!(&self.scanner, Some((cur, _)) if *cur == fid);
        if !reuse {
            self.scanner = Some((fid, file.scanner()?));
        }

        #[allow(clippy::expect_used)]
        let (_, scanner) = self.scanner.as_mut().expect("scanner was just set");
        scanner.load_at(offset)?;

        let page = ByteView::from(scanner.current().page);
        self.plru.insert(pid, page.clone());
        Ok(Some(page))
    }
}
