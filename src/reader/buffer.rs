// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::ReadOps;
use crate::{
    index::KeySpec,
    io::File,
    record::{is_null_record, records_per_page, EdgeView, PAGE_SIZE},
    time::Period,
    Error, Result,
};
use crossbeam_skiplist::SkipMap;
use std::{ops::Bound, sync::Arc};

/// Serves pending (unsorted) files in index key order.
///
/// On open, every record of the pending files is indexed into an
/// in-memory ordered map under its memcomparable key. The reader
/// then speaks the same key-ordered protocol as the range readers:
/// each step exposes one key and a pseudo page holding that key's
/// records, so a merge reader cannot tell it from a real index scan.
pub struct Buffer {
    spec: KeySpec,
    files: Vec<Arc<File>>,
    period: Period,

    /// `(comparable key, arrival ordinal)` to record bytes
    map: SkipMap<(Vec<u8>, u64), Vec<u8>>,

    /// Comparable key last served
    last: Option<Vec<u8>>,

    /// Comparable key bounds, for merges clipped to a range
    lo: Option<Vec<u8>>,
    hi: Option<Vec<u8>>,

    cur_key: Option<Vec<u8>>,
    cur_mask: u128,
    page: Option<Vec<u8>>,
    opened: bool,
}

impl Buffer {
    /// Creates a buffer reader over pending file snapshots.
    #[must_use]
    pub fn new(spec: KeySpec, files: Vec<Arc<File>>) -> Self {
        Self {
            spec,
            files,
            period: Period::ALL,
            map: SkipMap::new(),
            last: None,
            lo: None,
            hi: None,
            cur_key: None,
            cur_mask: 0,
            page: None,
            opened: false,
        }
    }

    /// Clips the served keys to `[from, to]` (packed key form).
    #[must_use]
    pub fn with_bounds(mut self, from: Option<&[u8]>, to: Option<&[u8]>) -> Self {
        self.lo = from.map(|k| self.spec.encode_comparable(k));
        self.hi = to.map(|k| self.spec.encode_comparable(k));
        self
    }

    fn build(&mut self) -> Result<()> {
        self.map = SkipMap::new();
        let rs = {
            let Some(first) = self.files.first() else {
                return Ok(());
            };
            first.recordsize as usize
        };

        let mut seq = 0u64;
        for file in &self.files {
            if !file.worth(&self.period) {
                continue;
            }

            let mut scanner = file.scanner()?;
            loop {
                match scanner.move_next(&self.period) {
                    Ok(()) => {}
                    Err(e) if e.is_eof() => break,
                    Err(e) => return Err(e),
                }

                let page = scanner.current().page;
                for slot in page.chunks_exact(rs) {
                    if is_null_record(slot) {
                        continue;
                    }
                    if file.is_stamped() && !self.period.contains(EdgeView(slot).timestamp()) {
                        continue;
                    }

                    let key = self.spec.encode_comparable(&self.spec.pack(slot));
                    self.map.insert((key, seq), slot.to_vec());
                    seq += 1;
                }
            }
        }

        log::debug!("buffer reader indexed {} pending records", self.map.len());
        Ok(())
    }
}

impl ReadOps for Buffer {
    fn open(&mut self) -> Result<()> {
        self.build()?;
        self.last = None;
        self.page = None;
        self.opened = true;
        Ok(())
    }

    fn move_next(&mut self) -> Result<()> {
        if !self.opened {
            return Err(Error::Invalid("reader is not open".into()));
        }

        let lower = match (self.last.take(), &self.lo) {
            (Some(key), _) => Bound::Excluded((key, u64::MAX)),
            (None, Some(lo)) => Bound::Included((lo.clone(), 0)),
            (None, None) => Bound::Unbounded,
        };

        let rs = self.files.first().map_or(64, |f| f.recordsize as usize);
        let per_page = records_per_page(
            u32::try_from(rs).map_err(|_| Error::Panic("record size overflow".into()))?,
        );

        let mut page = vec![0u8; PAGE_SIZE];
        let mut mask = 0u128;
        let mut group_key: Option<(Vec<u8>, Vec<u8>)> = None;
        let mut slot = 0usize;

        for entry in self.map.range((lower, Bound::Unbounded)) {
            let (comparable, _) = entry.key();
            let record = entry.value();

            if let Some(hi) = &self.hi {
                if comparable > hi {
                    break;
                }
            }

            match &group_key {
                None => {
                    group_key = Some((comparable.clone(), self.spec.pack(record)));
                }
                Some((cur, _)) if cur != comparable => break,
                Some(_) => {}
            }

            if slot >= per_page {
                log::warn!("buffer key group exceeds one page, truncating");
                break;
            }

            #[allow(clippy::indexing_slicing)]
            page[slot * rs..(slot + 1) * rs].copy_from_slice(record);
            if slot < 128 {
                mask |= 1 << slot;
            }
            slot += 1;
        }

        let Some((comparable, key)) = group_key else {
            self.page = None;
            self.cur_key = None;
            return Err(Error::Eof);
        };

        self.last = Some(comparable);
        self.cur_key = Some(key);
        self.cur_mask = mask;
        self.page = Some(page);
        Ok(())
    }

    fn page(&self) -> Option<&[u8]> {
        self.page.as_deref()
    }

    fn key(&self) -> Option<&[u8]> {
        self.cur_key.as_deref()
    }

    fn mask(&self) -> Option<u128> {
        self.spec.has_bitmap().then_some(self.cur_mask)
    }

    fn count(&self) -> u64 {
        u64::from(self.cur_mask.count_ones())
    }

    fn ikeys(&self) -> Option<&KeySpec> {
        Some(&self.spec)
    }

    fn set_period(&mut self, period: Period) {
        self.period = period;
    }

    fn rewind(&mut self) -> Result<()> {
        self.last = None;
        self.page = None;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::{
        io::{ctrl, CompressionType},
        record::{edge, Content, EdgeRecord},
    };
    use test_log::test;

    fn pending_file(dir: &std::path::Path, rows: &[(u64, i64)]) -> Arc<File> {
        let mut file = File::new(
            1,
            dir.join("p001"),
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

        for (origin, ts) in rows {
            let rec = EdgeRecord::new(edge::RECORD_SIZE)
                .origin(*origin)
                .timestamp(*ts)
                .build();
            file.push(&rec).unwrap();
        }
        file.sync().unwrap();
        Arc::new(file.reader_snapshot())
    }

    #[test]
    fn serves_pending_records_in_key_order() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let file = pending_file(dir.path(), &[(3, 1), (1, 2), (2, 3), (1, 4)]);

        let spec = KeySpec::new(Content::Edge, vec![edge::ORIGIN]);
        let mut reader = Buffer::new(spec, vec![file]);
        reader.open()?;

        let mut seen = Vec::new();
        loop {
            match reader.move_next() {
                Ok(()) => {}
                Err(e) if e.is_eof() => break,
                Err(e) => return Err(e),
            }
            let key = u64::from_le_bytes(reader.key().unwrap().try_into().unwrap());
            let mask = reader.mask().unwrap();
            seen.push((key, mask.count_ones()));
        }

        // key 1 groups two records, the rest one each
        assert_eq!(vec![(1, 2), (2, 1), (3, 1)], seen);
        Ok(())
    }

    #[test]
    fn period_filters_records() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let file = pending_file(dir.path(), &[(1, 10), (2, 50)]);

        let spec = KeySpec::new(Content::Edge, vec![edge::ORIGIN]);
        let mut reader = Buffer::new(spec, vec![file]);
        reader.set_period(Period::new(0, 20));
        reader.open()?;

        reader.move_next()?;
        assert_eq!(
            1u64,
            u64::from_le_bytes(reader.key().unwrap().try_into().unwrap())
        );
        assert!(reader.move_next().is_err_and(|e| e.is_eof()));
        Ok(())
    }
}
