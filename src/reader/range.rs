// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The index range readers.
//!
//! One shared core walks a range iterator; the four public shapes
//! differ in what they surface per step: whole pages (frange), keys
//! only (krange), per-key record counts (crange), or pages with
//! per-key slot masks (mrange).

use super::{PageLoader, ReadOps};
use crate::{
    index::{Index, IndexEntry, IndexIter, KeySpec},
    io::File,
    time::Period,
    Error, Result,
};
use byteview::ByteView;
use std::sync::Arc;

enum Mode {
    /// Every referenced page, one entry at a time
    Pages,

    /// Distinct keys only, no page loads
    Keys,

    /// Distinct keys plus record counts from the bitmaps
    Counts,
}

struct RangeCore {
    index: Arc<Index>,
    from: Option<Vec<u8>>,
    to: Option<Vec<u8>>,
    desc: bool,
    loader: PageLoader,
    mode: Mode,

    iter: Option<IndexIter>,
    lookahead: Option<IndexEntry>,

    cur_key: Option<Vec<u8>>,
    cur_bitmap: u128,
    cur_count: u64,
    page: Option<ByteView>,
}

impl RangeCore {
    fn new(
        index: Arc<Index>,
        from: Option<Vec<u8>>,
        to: Option<Vec<u8>>,
        files: &[Arc<File>],
        mode: Mode,
    ) -> Self {
        Self {
            index,
            from,
            to,
            desc: false,
            loader: PageLoader::new(files),
            mode,
            iter: None,
            lookahead: None,
            cur_key: None,
            cur_bitmap: 0,
            cur_count: 0,
            page: None,
        }
    }

    fn open(&mut self) -> Result<()> {
        self.iter = Some(if self.desc {
            self.index.range_with(
                self.from.as_deref(),
                self.to.as_deref(),
                crate::index::Direction::Desc,
            )?
        } else {
            self.index
                .range(self.from.as_deref(), self.to.as_deref())?
        });
        self.lookahead = None;
        self.cur_key = None;
        self.page = None;
        Ok(())
    }

    fn pull(&mut self) -> Result<Option<IndexEntry>> {
        if let Some(entry) = self.lookahead.take() {
            return Ok(Some(entry));
        }
        let iter = self
            .iter
            .as_mut()
            .ok_or_else(|| Error::Invalid("reader is not open".into()))?;
        iter.next().transpose()
    }

    fn move_next(&mut self) -> Result<()> {
        match self.mode {
            Mode::Pages => loop {
                let Some(entry) = self.pull()? else {
                    self.page = None;
                    return Err(Error::Eof);
                };

                let Some(page) = self.loader.load(entry.pid)? else {
                    continue;
                };

                self.cur_bitmap = entry.bitmap;
                self.cur_key = Some(entry.key);
                self.page = Some(page);
                return Ok(());
            },

            Mode::Keys | Mode::Counts => {
                // gather the run of entries sharing the next key
                let Some(first) = self.pull()? else {
                    self.cur_key = None;
                    return Err(Error::Eof);
                };

                let mut count = u64::from(first.bitmap.count_ones()).max(1);
                let key = first.key;

                loop {
                    match self.pull()? {
                        Some(entry) if entry.key == key => {
                            count += u64::from(entry.bitmap.count_ones()).max(1);
                        }
                        Some(entry) => {
                            self.lookahead = Some(entry);
                            break;
                        }
                        None => break,
                    }
                }

                self.cur_count = count;
                self.cur_key = Some(key);
                Ok(())
            }
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.open()
    }
}

macro_rules! range_reader {
    ($(#[$doc:meta])* $name:ident, $mode:expr, page: $page:expr, mask: $mask:expr, count: $count:expr) => {
        $(#[$doc])*
        pub struct $name(RangeCore);

        impl $name {
            /// Creates the reader over a file snapshot.
            #[must_use]
            pub fn new(
                index: Arc<Index>,
                from: Option<Vec<u8>>,
                to: Option<Vec<u8>>,
                files: &[Arc<File>],
            ) -> Self {
                Self(RangeCore::new(index, from, to, files, $mode))
            }

            /// Walks the range backwards.
            #[must_use]
            pub fn descending(mut self) -> Self {
                self.0.desc = true;
                self
            }
        }

        impl ReadOps for $name {
            fn open(&mut self) -> Result<()> {
                self.0.open()
            }

            fn move_next(&mut self) -> Result<()> {
                self.0.move_next()
            }

            fn page(&self) -> Option<&[u8]> {
                if $page {
                    self.0.page.as_deref()
                } else {
                    None
                }
            }

            fn key(&self) -> Option<&[u8]> {
                self.0.cur_key.as_deref()
            }

            fn mask(&self) -> Option<u128> {
                if $mask && self.0.index.spec().has_bitmap() {
                    Some(self.0.cur_bitmap)
                } else {
                    None
                }
            }

            fn count(&self) -> u64 {
                if $count {
                    self.0.cur_count
                } else {
                    0
                }
            }

            fn ikeys(&self) -> Option<&KeySpec> {
                Some(self.0.index.spec())
            }

            fn set_period(&mut self, period: Period) {
                self.0.loader.set_period(period);
            }

            fn rewind(&mut self) -> Result<()> {
                self.0.rewind()
            }
        }
    };
}

range_reader!(
    /// Full range: every page referenced by the range, key order
    Frange,
    Mode::Pages,
    page: true,
    mask: true,
    count: false
);

range_reader!(
    /// Key range: distinct keys only, no payload pages
    Krange,
    Mode::Keys,
    page: false,
    mask: false,
    count: false
);

range_reader!(
    /// Count range: distinct keys plus per-key record counts
    Crange,
    Mode::Counts,
    page: false,
    mask: false,
    count: true
);

range_reader!(
    /// Merge range: pages with per-key slot masks
    Mrange,
    Mode::Pages,
    page: true,
    mask: true,
    count: false
);

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::{
        index::{IndexDesc, IndexTarget, KeySpec, DEFAULT_NODE_SIZE},
        io::{ctrl, page_id, CompressionType},
        record::{edge, Content, EdgeRecord, PAGE_SIZE},
    };
    use test_log::test;

    /// One flat file, one page, origins 1,1,2,2,2,3; index over
    /// origin, registered by hand.
    fn setup(dir: &std::path::Path) -> (Arc<Index>, Vec<Arc<File>>) {
        let mut file = File::new(
            1,
            dir.join("f001"),
            PAGE_SIZE as u32,
            0,
            PAGE_SIZE as u32,
            edge::RECORD_SIZE,
            Content::Edge,
            ctrl::WRITER | ctrl::TS,
            CompressionType::Flat,
            0,
            1,
            Period::ALL,
        );
        file.create().unwrap();
        file.map().unwrap();

        let origins = [1u64, 1, 2, 2, 2, 3];
        for (slot, origin) in origins.iter().enumerate() {
            let rec = EdgeRecord::new(edge::RECORD_SIZE)
                .origin(*origin)
                .destin(slot as u64)
                .timestamp(1)
                .build();
            file.push(&rec).unwrap();
        }
        file.sync().unwrap();
        let file = Arc::new(file.reader_snapshot());

        let spec = KeySpec::new(Content::Edge, vec![edge::ORIGIN]);
        let index = Arc::new(
            Index::create(
                dir,
                IndexDesc {
                    name: "xorig".into(),
                    target: IndexTarget::Context("ctx".into()),
                    spec: spec.clone(),
                    sizing: DEFAULT_NODE_SIZE,
                },
            )
            .unwrap(),
        );

        let pid = page_id(file.id, 0);
        for (slot, origin) in origins.iter().enumerate() {
            let rec = EdgeRecord::new(edge::RECORD_SIZE).origin(*origin).build();
            index.insert(&spec.pack(&rec), pid, slot).unwrap();
        }

        (index, vec![file])
    }

    #[test]
    fn krange_yields_distinct_keys() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let (index, files) = setup(dir.path());

        let mut reader = Krange::new(index, None, None, &files);
        reader.open()?;

        let mut keys = Vec::new();
        loop {
            match reader.move_next() {
                Ok(()) => {}
                Err(e) if e.is_eof() => break,
                Err(e) => return Err(e),
            }
            let key = reader.key().unwrap();
            keys.push(u64::from_le_bytes(key.try_into().unwrap()));
            assert!(reader.page().is_none());
        }

        assert_eq!(vec![1, 2, 3], keys);
        Ok(())
    }

    #[test]
    fn crange_counts_marked_records() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let (index, files) = setup(dir.path());

        let mut reader = Crange::new(index, None, None, &files);
        reader.open()?;

        let mut counts = Vec::new();
        loop {
            match reader.move_next() {
                Ok(()) => {}
                Err(e) if e.is_eof() => break,
                Err(e) => return Err(e),
            }
            counts.push(reader.count());
        }

        assert_eq!(vec![2, 3, 1], counts);
        Ok(())
    }

    #[test]
    fn mrange_masks_slots_per_key() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let (index, files) = setup(dir.path());

        let mut reader = Mrange::new(index, None, None, &files);
        reader.open()?;

        reader.move_next()?;
        // key 1 marks slots 0 and 1
        assert_eq!(Some(0b11), reader.mask());
        assert!(reader.page().is_some());

        reader.move_next()?;
        // key 2 marks slots 2, 3, 4
        assert_eq!(Some(0b11100), reader.mask());
        Ok(())
    }

    #[test]
    fn frange_bounds_clip_the_scan() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let (index, files) = setup(dir.path());

        let from = 2u64.to_le_bytes().to_vec();
        let to = 2u64.to_le_bytes().to_vec();
        let mut reader = Frange::new(index, Some(from), Some(to), &files);
        reader.open()?;

        reader.move_next()?;
        assert_eq!(
            2u64,
            u64::from_le_bytes(reader.key().unwrap().try_into().unwrap())
        );
        assert!(reader.move_next().is_err_and(|e| e.is_eof()));
        Ok(())
    }
}
