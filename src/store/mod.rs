// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A directory of record files in three roles: one writer, pending
//! (unsorted) readers, and sorted readers, plus pre-created spares.
//!
//! The catalog is persisted with backup on every role change;
//! background sorter workers promote pending files to sorted,
//! compressed readers.

pub mod catalog;
mod sorter;

pub use sorter::SorterHook;

use crate::{
    error::IoOp,
    io::{ctrl, CompressionType, File, FileId},
    record::{is_null_record, Content, PAGE_SIZE},
    time::{Period, Timestamp},
    Error, Result,
};
use catalog::CatalogEntry;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, RwLock,
    },
};

/// Number of spares the store keeps ready
const MIN_SPARES: usize = 3;

/// Store configuration
#[derive(Clone)]
pub struct StoreConfig {
    /// Store directory
    pub path: PathBuf,

    /// Record family
    pub content: Content,

    /// Record slot size
    pub recordsize: u32,

    /// Writer capacity in bytes; must be a multiple of the block size
    pub filesize: u32,

    /// Compression applied by the sorter
    pub compression: CompressionType,

    /// Timestamp granularity
    pub grain: i64,

    /// Record offsets defining the sort order of sorted files (ikeys)
    pub ordering: Vec<u32>,

    /// Whether records carry timestamps
    pub stamped: bool,

    /// Number of background sorter workers
    pub sorters: usize,
}

impl StoreConfig {
    /// Configuration for an edge context store.
    #[must_use]
    pub fn edge(path: PathBuf) -> Self {
        use crate::record::edge;

        Self {
            path,
            content: Content::Edge,
            recordsize: edge::RECORD_SIZE,
            filesize: 128 * PAGE_SIZE as u32,
            compression: CompressionType::Zstd,
            grain: 1,
            ordering: vec![edge::ORIGIN, edge::DESTIN, edge::TMSTMP],
            stamped: true,
            sorters: 1,
        }
    }

    /// Configuration for the vertex store.
    #[must_use]
    pub fn vertex(path: PathBuf) -> Self {
        use crate::record::vertex;

        Self {
            path,
            content: Content::Vertex,
            recordsize: vertex::RECORD_SIZE,
            filesize: 128 * PAGE_SIZE as u32,
            compression: CompressionType::Zstd,
            grain: 1,
            ordering: vec![vertex::ROLE, vertex::VERTEX, vertex::PROP],
            stamped: false,
            sorters: 1,
        }
    }

    /// Overrides the writer capacity.
    #[must_use]
    pub fn with_filesize(mut self, filesize: u32) -> Self {
        self.filesize = filesize;
        self
    }

    /// Overrides the sorter compression.
    #[must_use]
    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Overrides the sort order.
    #[must_use]
    pub fn with_ordering(mut self, ordering: Vec<u32>) -> Self {
        self.ordering = ordering;
        self
    }
}

pub(crate) struct StoreState {
    pub writer: Option<File>,
    pub spares: Vec<File>,

    /// Full writers awaiting the sorter, still readable
    pub pending: Vec<Arc<File>>,

    /// Sorted, compressed readers
    pub readers: Vec<Arc<File>>,

    /// Files replaced or dropped, unlinked once no reader holds them
    pub graveyard: Vec<Arc<File>>,

    /// Pending files a sorter is currently working on
    pub sorting: rustc_hash::FxHashSet<FileId>,

    pub next_id: FileId,
    pub next_order: u32,
}

pub(crate) struct StoreInner {
    pub cfg: StoreConfig,
    pub state: RwLock<StoreState>,
    pub signal: (Mutex<bool>, Condvar),
    pub stopped: AtomicBool,
    pub hook: RwLock<Option<SorterHook>>,
}

/// Role counts of a store, for monitoring and tests
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StoreStats {
    /// Bytes used in the active writer
    pub writer_size: u32,

    /// Files waiting for the sorter
    pub pending: usize,

    /// Sorted readers
    pub readers: usize,

    /// Pre-created spares
    pub spares: usize,
}

/// A set of record files of one schema
///
/// Exactly zero or one file is the writer; full writers queue as
/// pending readers until a background sorter compresses and sorts
/// them. Readers snapshot the file set under the read lock and then
/// iterate without holding it.
pub struct Store {
    inner: Arc<StoreInner>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl Store {
    /// Creates the store directory with an empty catalog.
    pub fn create(cfg: &StoreConfig) -> Result<()> {
        if cfg.filesize == 0 || cfg.filesize % (PAGE_SIZE as u32) != 0 {
            return Err(Error::Invalid(
                "file size must be a positive multiple of the block size".into(),
            ));
        }

        std::fs::create_dir_all(&cfg.path).map_err(|e| Error::io(IoOp::Open, &cfg.path, e))?;
        catalog::write_catalog(&cfg.path, &[])?;

        log::debug!("created store at {:?}", cfg.path);
        Ok(())
    }

    /// Opens the store: reads the catalog, rebuilds the roles,
    /// repositions the writer, tops up spares and starts the sorter
    /// workers.
    pub fn open(cfg: StoreConfig) -> Result<Self> {
        let entries = catalog::read_catalog(&cfg.path)?;

        let mut state = StoreState {
            writer: None,
            spares: Vec::new(),
            pending: Vec::new(),
            readers: Vec::new(),
            graveyard: Vec::new(),
            sorting: rustc_hash::FxHashSet::default(),
            next_id: 1,
            next_order: 1,
        };

        for entry in entries {
            let file = entry.into_file(&cfg.path, cfg.content);

            state.next_id = state.next_id.max(file.id + 1);
            state.next_order = state.next_order.max(file.order + 1);

            if file.is_writer() {
                if state.writer.is_some() {
                    return Err(Error::Catalog(format!(
                        "{:?}: more than one writer",
                        cfg.path
                    )));
                }
                state.writer = Some(file);
            } else if file.is_spare() {
                state.spares.push(file);
            } else if file.is_sorted() {
                state.readers.push(Arc::new(file));
            } else if file.is_reader() {
                state.pending.push(Arc::new(file));
            } else {
                return Err(Error::Catalog(format!(
                    "{:?}: file {} has no role",
                    cfg.path, file.id
                )));
            }
        }

        state.readers.sort_by_key(|f| f.order);

        if let Some(writer) = &mut state.writer {
            writer.open()?;
            writer.size = find_write_position(writer)?;
            writer.map()?;
        }

        let inner = Arc::new(StoreInner {
            cfg,
            state: RwLock::new(state),
            signal: (Mutex::new(false), Condvar::new()),
            stopped: AtomicBool::new(false),
            hook: RwLock::new(None),
        });

        let mut store = Self {
            inner,
            workers: Vec::new(),
        };

        {
            let mut state = store.write_state()?;
            store.ensure_writer(&mut state)?;
            store.ensure_spares(&mut state)?;
            store.persist_catalog(&state)?;
        }

        for n in 0..store.inner.cfg.sorters.max(1) {
            let inner = store.inner.clone();
            store.workers.push(
                std::thread::Builder::new()
                    .name(format!("nowdb-sort-{n}"))
                    .spawn(move || sorter::run(&inner))
                    .map_err(|e| Error::io(IoOp::Open, &store.inner.cfg.path, e))?,
            );
        }

        log::info!("opened store at {:?}", store.inner.cfg.path);
        Ok(store)
    }

    /// Registers the callback the sorter runs for every freshly
    /// sorted file (index registration).
    pub fn set_sorter_hook(&self, hook: SorterHook) -> Result<()> {
        *self.inner.hook.write().map_err(Error::poisoned)? = Some(hook);
        Ok(())
    }

    pub(crate) fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, StoreState>> {
        self.inner.state.write().map_err(Error::poisoned)
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, StoreState>> {
        self.inner.state.read().map_err(Error::poisoned)
    }

    /// The store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.cfg
    }

    /// Appends one record, swapping to a fresh writer when the
    /// current one fills up.
    pub fn insert(&self, record: &[u8]) -> Result<()> {
        let mut state = self.write_state()?;

        self.ensure_writer(&mut state)?;

        // a reopened store may come up with a writer that is already full
        let stale_full = state
            .writer
            .as_ref()
            .is_some_and(|w| w.remaining() < self.inner.cfg.recordsize);
        if stale_full {
            self.swap_writer(&mut state)?;
            self.kick_sorter();
        }

        #[allow(clippy::expect_used)]
        let writer = state.writer.as_mut().expect("writer was just ensured");
        writer.push(record)?;

        let full = writer.remaining() < self.inner.cfg.recordsize;
        if full {
            self.swap_writer(&mut state)?;
            self.persist_catalog(&state)?;
            self.kick_sorter();
        }

        Ok(())
    }

    /// Snapshots all files whose timestamp window intersects the
    /// period: sorted readers in order, then pending, then the
    /// writer's current content.
    pub fn get_files(&self, period: &Period) -> Result<Vec<Arc<File>>> {
        let (mut sorted, other) = self.get_files_split(period)?;
        sorted.extend(other);
        Ok(sorted)
    }

    /// Like [`Self::get_files`], but keeps sorted files apart from
    /// pending + writer content (for merge readers).
    pub fn get_files_split(
        &self,
        period: &Period,
    ) -> Result<(Vec<Arc<File>>, Vec<Arc<File>>)> {
        // the writer window must be on disk before readers scan it
        {
            let mut state = self.write_state()?;
            if let Some(writer) = &mut state.writer {
                writer.sync()?;
            }
        }

        let state = self.read_state()?;

        let sorted = state
            .readers
            .iter()
            .filter(|f| f.worth(period))
            .cloned()
            .collect();

        let mut unsorted: Vec<Arc<File>> = state
            .pending
            .iter()
            .filter(|f| f.worth(period))
            .cloned()
            .collect();

        if let Some(writer) = &state.writer {
            if writer.size > 0 && writer.worth(period) {
                unsorted.push(Arc::new(writer.reader_snapshot()));
            }
        }

        Ok((sorted, unsorted))
    }

    /// Approximate record count across all files.
    pub fn count_approx(&self) -> Result<u64> {
        let state = self.read_state()?;
        let rs = u64::from(self.inner.cfg.recordsize);

        let mut bytes: u64 = state
            .readers
            .iter()
            .chain(state.pending.iter())
            .map(|f| u64::from(f.size))
            .sum();
        if let Some(w) = &state.writer {
            bytes += u64::from(w.size);
        }

        Ok(bytes / rs)
    }

    /// Drops sorted readers whose every timestamp is strictly older
    /// than `bound`.
    pub fn drop_older_than(&self, bound: Timestamp) -> Result<usize> {
        let mut state = self.write_state()?;

        let (dead, live): (Vec<_>, Vec<_>) = state
            .readers
            .drain(..)
            .partition(|f| f.is_stamped() && f.period.end < bound);

        state.readers = live;
        let dropped = dead.len();
        state.graveyard.extend(dead);

        if dropped > 0 {
            log::info!(
                "dropping {dropped} expired files from {:?}",
                self.inner.cfg.path
            );
            self.persist_catalog(&state)?;
        }
        sweep_graveyard(&mut state);

        Ok(dropped)
    }

    /// Current role counts.
    pub fn stats(&self) -> Result<StoreStats> {
        let state = self.read_state()?;
        Ok(StoreStats {
            writer_size: state.writer.as_ref().map_or(0, |w| w.size),
            pending: state.pending.len(),
            readers: state.readers.len(),
            spares: state.spares.len(),
        })
    }

    /// Blocks until no file is pending or being sorted, or the
    /// timeout passes. Returns whether the store is fully sorted.
    pub fn wait_sorted(&self, timeout: std::time::Duration) -> Result<bool> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            {
                let state = self.read_state()?;
                if state.pending.is_empty() && state.sorting.is_empty() {
                    return Ok(true);
                }
            }
            if std::time::Instant::now() >= deadline {
                return Ok(false);
            }
            self.kick_sorter();
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
    }

    /// Persists the catalog and stops the sorter workers.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.kick_sorter();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }

        let mut state = self.write_state()?;
        if let Some(writer) = &mut state.writer {
            writer.close()?;
        }
        self.persist_catalog(&state)?;
        sweep_graveyard(&mut state);

        log::info!("closed store at {:?}", self.inner.cfg.path);
        Ok(())
    }

    fn kick_sorter(&self) {
        let (lock, cvar) = &self.inner.signal;
        if let Ok(mut pending) = lock.lock() {
            *pending = true;
            cvar.notify_all();
        }
    }

    /// Installs a writer if there is none, pulling a spare or
    /// creating a fresh file.
    fn ensure_writer(&self, state: &mut StoreState) -> Result<()> {
        if state.writer.is_some() {
            return Ok(());
        }

        let mut file = match state.spares.pop() {
            Some(mut spare) => {
                spare.ctrl = (spare.ctrl & !ctrl::SPARE) | ctrl::WRITER;
                spare
            }
            None => {
                let mut file = self.blank_file(state, ctrl::WRITER)?;
                file.create()?;
                file
            }
        };

        file.open()?;
        file.map()?;
        state.writer = Some(file);
        Ok(())
    }

    /// Tops the spare list up to the configured minimum.
    fn ensure_spares(&self, state: &mut StoreState) -> Result<()> {
        while state.spares.len() < MIN_SPARES {
            let mut file = self.blank_file(state, ctrl::SPARE)?;
            file.create()?;
            file.close()?;
            log::debug!("created spare {:?}", file.path);
            state.spares.push(file);
        }
        Ok(())
    }

    fn blank_file(&self, state: &mut StoreState, role: u8) -> Result<File> {
        let cfg = &self.inner.cfg;

        let id = state.next_id;
        state.next_id += 1;

        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos());
        let name = format!("{stamp:024x}_{id:08}.db");

        let mut ctrl_bits = role;
        if cfg.stamped {
            ctrl_bits |= ctrl::TS;
        }

        let mut file = File::new(
            id,
            cfg.path.join(name),
            cfg.filesize,
            0,
            PAGE_SIZE as u32,
            cfg.recordsize,
            cfg.content,
            ctrl_bits,
            CompressionType::Flat,
            0,
            cfg.grain,
            Period::ALL,
        );
        file.order = state.next_order;
        state.next_order += 1;

        Ok(file)
    }

    /// Moves the full writer to the pending list and maps a spare in
    /// its place.
    fn swap_writer(&self, state: &mut StoreState) -> Result<()> {
        let Some(mut old) = state.writer.take() else {
            return Ok(());
        };

        old.umap()?;
        old.close()?;
        old.ctrl = (old.ctrl & !ctrl::WRITER) | ctrl::READER;

        log::debug!(
            "writer {:?} is full ({} bytes), moving to pending",
            old.path,
            old.size
        );
        state.pending.push(Arc::new(old));

        self.ensure_writer(state)?;
        self.ensure_spares(state)?;
        sweep_graveyard(state);
        Ok(())
    }

    pub(crate) fn persist_catalog(&self, state: &StoreState) -> Result<()> {
        persist_catalog(&self.inner.cfg.path, state)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("store shutdown failed: {e}");
        }
    }
}

/// Writes the catalog for the current role lists.
pub(crate) fn persist_catalog(path: &std::path::Path, state: &StoreState) -> Result<()> {
    let mut entries = Vec::new();

    if let Some(writer) = &state.writer {
        entries.push(CatalogEntry::from_file(writer)?);
    }
    for file in &state.readers {
        entries.push(CatalogEntry::from_file(file)?);
    }
    for file in &state.pending {
        entries.push(CatalogEntry::from_file(file)?);
    }
    for file in &state.spares {
        entries.push(CatalogEntry::from_file(file)?);
    }

    catalog::write_catalog(path, &entries)
}

/// Unlinks replaced files nobody references anymore.
pub(crate) fn sweep_graveyard(state: &mut StoreState) {
    state.graveyard.retain(|file| {
        if Arc::strong_count(file) > 1 {
            return true;
        }
        if let Err(e) = std::fs::remove_file(&file.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("cannot remove {:?}: {e}", file.path);
            }
        }
        false
    });
}

/// Finds the writer's next empty slot by scanning from the catalog
/// position; the catalog may be stale after a crash.
fn find_write_position(writer: &File) -> Result<u32> {
    let rs = writer.recordsize as usize;
    let mut scanner = writer.scanner_to(u64::from(writer.capacity))?;
    let mut pos = writer.size;

    // start at the block containing the recorded size
    let block = (u64::from(writer.size) / PAGE_SIZE as u64) * PAGE_SIZE as u64;
    if scanner.load_at(block).is_err() {
        return Ok(writer.size);
    }

    loop {
        let page = scanner.current().page.to_vec();
        let mut off = (u64::from(pos) % PAGE_SIZE as u64) as usize;

        while off + rs <= PAGE_SIZE {
            #[allow(clippy::indexing_slicing)]
            if is_null_record(&page[off..off + rs]) {
                #[allow(clippy::cast_possible_truncation)]
                return Ok((u64::from(pos) / PAGE_SIZE as u64) as u32 * PAGE_SIZE as u32
                    + off as u32);
            }
            off += rs;
        }

        #[allow(clippy::cast_possible_truncation)]
        {
            pos = ((u64::from(pos) / PAGE_SIZE as u64 + 1) * PAGE_SIZE as u64) as u32;
        }
        if u64::from(pos) >= u64::from(writer.capacity) {
            return Ok(writer.capacity);
        }
        match scanner.move_next(&Period::ALL) {
            Ok(()) => {}
            Err(e) if e.is_eof() => return Ok(pos),
            Err(e) => return Err(e),
        }
    }
}

impl File {
    /// Descriptor copy for readers: same metadata, no handles.
    #[must_use]
    pub(crate) fn reader_snapshot(&self) -> File {
        let mut copy = File::new(
            self.id,
            self.path.clone(),
            self.capacity,
            self.size,
            self.blocksize,
            self.recordsize,
            self.content,
            (self.ctrl & !ctrl::WRITER) | ctrl::READER,
            self.compression,
            self.encryption,
            self.grain,
            self.period,
        );
        copy.order = self.order;
        copy
    }

    /// Scanner over an explicit byte range, for writer repositioning.
    pub(crate) fn scanner_to(&self, size: u64) -> Result<crate::io::BlockScanner> {
        crate::io::BlockScanner::new(
            self.path.clone(),
            self.compression,
            self.blocksize,
            self.recordsize,
            size,
            None,
        )
    }
}
