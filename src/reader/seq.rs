// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Composite readers: vertical sequence and k-way merge.

use super::{ReadOps, Reader};
use crate::{index::KeySpec, time::Period, Error, Result};
use interval_heap::IntervalHeap;

/// Concatenates sub-readers of the same shape, exhausting one before
/// starting the next.
pub struct Vseq {
    subs: Vec<Reader>,
    cur: usize,
}

impl Vseq {
    /// Creates a sequence over sub-readers.
    #[must_use]
    pub fn new(subs: Vec<Reader>) -> Self {
        Self { subs, cur: 0 }
    }
}

impl ReadOps for Vseq {
    fn open(&mut self) -> Result<()> {
        for sub in &mut self.subs {
            sub.open()?;
        }
        self.cur = 0;
        Ok(())
    }

    fn move_next(&mut self) -> Result<()> {
        loop {
            let Some(sub) = self.subs.get_mut(self.cur) else {
                return Err(Error::Eof);
            };
            match sub.move_next() {
                Ok(()) => return Ok(()),
                Err(e) if e.is_eof() => self.cur += 1,
                Err(e) => return Err(e),
            }
        }
    }

    fn page(&self) -> Option<&[u8]> {
        self.subs.get(self.cur).and_then(ReadOps::page)
    }

    fn key(&self) -> Option<&[u8]> {
        self.subs.get(self.cur).and_then(ReadOps::key)
    }

    fn mask(&self) -> Option<u128> {
        self.subs.get(self.cur).and_then(ReadOps::mask)
    }

    fn count(&self) -> u64 {
        self.subs.get(self.cur).map_or(0, ReadOps::count)
    }

    fn ikeys(&self) -> Option<&KeySpec> {
        self.subs.first().and_then(ReadOps::ikeys)
    }

    fn set_period(&mut self, period: Period) {
        for sub in &mut self.subs {
            sub.set_period(period);
        }
    }

    fn rewind(&mut self) -> Result<()> {
        for sub in &mut self.subs {
            sub.rewind()?;
        }
        self.cur = 0;
        Ok(())
    }
}

#[derive(Eq, PartialEq)]
struct HeapItem(Vec<u8>, usize);

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0).then(self.1.cmp(&other.1))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Merges key-ordered sub-readers into one sorted stream.
///
/// Sub-readers expose their current key; the heap picks the smallest
/// (by the shared key spec's memcomparable form) and the merge
/// surfaces that sub-reader's page, key and mask. Pairing range
/// readers over sorted files with a [`super::Buffer`] over pending
/// files makes unsorted data look sorted to the consumer.
pub struct Merge {
    subs: Vec<Reader>,
    spec: KeySpec,
    heap: IntervalHeap<HeapItem>,
    current: Option<usize>,
}

impl Merge {
    /// Creates a merge over key-ordered sub-readers.
    #[must_use]
    pub fn new(spec: KeySpec, subs: Vec<Reader>) -> Self {
        let heap = IntervalHeap::with_capacity(subs.len());
        Self {
            subs,
            spec,
            heap,
            current: None,
        }
    }

    fn advance(&mut self, idx: usize) -> Result<()> {
        #[allow(clippy::indexing_slicing)]
        let sub = &mut self.subs[idx];
        match sub.move_next() {
            Ok(()) => {
                let key = sub
                    .key()
                    .ok_or_else(|| Error::Panic("merge sub-reader without a key".into()))?;
                self.heap.push(HeapItem(self.spec.encode_comparable(key), idx));
                Ok(())
            }
            Err(e) if e.is_eof() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl ReadOps for Merge {
    fn open(&mut self) -> Result<()> {
        self.heap = IntervalHeap::with_capacity(self.subs.len());
        self.current = None;

        for sub in &mut self.subs {
            sub.open()?;
        }
        for idx in 0..self.subs.len() {
            self.advance(idx)?;
        }
        Ok(())
    }

    fn move_next(&mut self) -> Result<()> {
        if let Some(done) = self.current.take() {
            self.advance(done)?;
        }

        match self.heap.pop_min() {
            Some(HeapItem(_, idx)) => {
                self.current = Some(idx);
                Ok(())
            }
            None => Err(Error::Eof),
        }
    }

    fn page(&self) -> Option<&[u8]> {
        self.current.and_then(|i| self.subs.get(i)).and_then(ReadOps::page)
    }

    fn key(&self) -> Option<&[u8]> {
        self.current.and_then(|i| self.subs.get(i)).and_then(ReadOps::key)
    }

    fn mask(&self) -> Option<u128> {
        self.current.and_then(|i| self.subs.get(i)).and_then(ReadOps::mask)
    }

    fn count(&self) -> u64 {
        self.current
            .and_then(|i| self.subs.get(i))
            .map_or(0, ReadOps::count)
    }

    fn ikeys(&self) -> Option<&KeySpec> {
        Some(&self.spec)
    }

    fn set_period(&mut self, period: Period) {
        for sub in &mut self.subs {
            sub.set_period(period);
        }
    }

    fn rewind(&mut self) -> Result<()> {
        for sub in &mut self.subs {
            sub.rewind()?;
        }
        self.open()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::{
        index::{Index, IndexDesc, IndexTarget, DEFAULT_NODE_SIZE},
        io::{ctrl, page_id, CompressionType, File},
        record::{edge, Content, EdgeRecord, PAGE_SIZE},
        reader::{Buffer, Mrange},
    };
    use std::sync::Arc;
    use test_log::test;

    fn flat_file(dir: &std::path::Path, id: u32, name: &str, origins: &[u64]) -> Arc<File> {
        let mut file = File::new(
            id,
            dir.join(name),
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
        for origin in origins {
            let rec = EdgeRecord::new(edge::RECORD_SIZE)
                .origin(*origin)
                .timestamp(1)
                .build();
            file.push(&rec).unwrap();
        }
        file.sync().unwrap();
        Arc::new(file.reader_snapshot())
    }

    fn spec() -> KeySpec {
        KeySpec::new(Content::Edge, vec![edge::ORIGIN])
    }

    #[test]
    fn merge_interleaves_sorted_and_pending() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();

        // sorted side: origins 1, 3, 5 behind an index
        let sorted = flat_file(dir.path(), 1, "s001", &[1, 3, 5]);
        let index = Arc::new(
            Index::create(
                dir.path(),
                IndexDesc {
                    name: "xorig".into(),
                    target: IndexTarget::Context("ctx".into()),
                    spec: spec(),
                    sizing: DEFAULT_NODE_SIZE,
                },
            )
            .unwrap(),
        );
        for (slot, origin) in [1u64, 3, 5].iter().enumerate() {
            let rec = EdgeRecord::new(edge::RECORD_SIZE).origin(*origin).build();
            index
                .insert(&spec().pack(&rec), page_id(sorted.id, 0), slot)
                .unwrap();
        }

        // pending side: origins 2, 4
        let pending = flat_file(dir.path(), 2, "p001", &[4, 2]);

        let mut merge = Merge::new(
            spec(),
            vec![
                Mrange::new(index, None, None, &[sorted]).into(),
                Buffer::new(spec(), vec![pending]).into(),
            ],
        );
        merge.open()?;

        let mut keys = Vec::new();
        loop {
            match merge.move_next() {
                Ok(()) => {}
                Err(e) if e.is_eof() => break,
                Err(e) => return Err(e),
            }
            keys.push(u64::from_le_bytes(merge.key().unwrap().try_into().unwrap()));
            assert!(merge.page().is_some());
            assert!(merge.mask().is_some());
        }

        assert_eq!(vec![1, 2, 3, 4, 5], keys);
        Ok(())
    }

    #[test]
    fn vseq_concatenates() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let a = flat_file(dir.path(), 1, "a", &[1]);
        let b = flat_file(dir.path(), 2, "b", &[2]);

        let mut seq = Vseq::new(vec![
            crate::reader::Fullscan::new(vec![a]).into(),
            crate::reader::Fullscan::new(vec![b]).into(),
        ]);
        seq.open()?;

        let mut pages = 0;
        loop {
            match seq.move_next() {
                Ok(()) => pages += 1,
                Err(e) if e.is_eof() => break,
                Err(e) => return Err(e),
            }
        }
        assert_eq!(2, pages);
        Ok(())
    }
}
