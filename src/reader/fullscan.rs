// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::ReadOps;
use crate::{
    index::KeySpec,
    io::{BlockScanner, File},
    time::Period,
    Error, Result,
};
use std::sync::Arc;

/// Walks the file list in order, one block at a time.
///
/// Files and blocks outside the period are skipped without loading;
/// within a page, the consumer sees every slot and applies its own
/// filter.
pub struct Fullscan {
    files: Vec<Arc<File>>,
    period: Period,

    cur: usize,
    scanner: Option<BlockScanner>,
    loaded: bool,
}

impl Fullscan {
    /// Creates a fullscan over a file snapshot.
    #[must_use]
    pub fn new(files: Vec<Arc<File>>) -> Self {
        Self {
            files,
            period: Period::ALL,
            cur: 0,
            scanner: None,
            loaded: false,
        }
    }

    fn next_file(&mut self) -> Result<bool> {
        loop {
            let Some(file) = self.files.get(self.cur) else {
                return Ok(false);
            };
            if !file.worth(&self.period) {
                self.cur += 1;
                continue;
            }
            self.scanner = Some(file.scanner()?);
            return Ok(true);
        }
    }
}

impl ReadOps for Fullscan {
    fn open(&mut self) -> Result<()> {
        self.rewind()
    }

    fn move_next(&mut self) -> Result<()> {
        loop {
            if self.scanner.is_none() && !self.next_file()? {
                self.loaded = false;
                return Err(Error::Eof);
            }

            #[allow(clippy::expect_used)]
            let scanner = self.scanner.as_mut().expect("scanner was just ensured");

            match scanner.move_next(&self.period) {
                Ok(()) => {
                    self.loaded = true;
                    return Ok(());
                }
                Err(e) if e.is_eof() => {
                    self.scanner = None;
                    self.cur += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn page(&self) -> Option<&[u8]> {
        if !self.loaded {
            return None;
        }
        self.scanner.as_ref().map(|s| s.current().page)
    }

    fn key(&self) -> Option<&[u8]> {
        None
    }

    fn mask(&self) -> Option<u128> {
        None
    }

    fn count(&self) -> u64 {
        0
    }

    fn ikeys(&self) -> Option<&KeySpec> {
        None
    }

    fn set_period(&mut self, period: Period) {
        self.period = period;
    }

    fn rewind(&mut self) -> Result<()> {
        self.cur = 0;
        self.scanner = None;
        self.loaded = false;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::{
        io::{ctrl, CompressionType},
        record::{edge, Content, EdgeRecord, EdgeView, PAGE_SIZE},
    };
    use test_log::test;

    fn file_with(dir: &std::path::Path, name: &str, id: u32, stamps: &[i64]) -> Arc<File> {
        let mut file = File::new(
            id,
            dir.join(name),
            4 * PAGE_SIZE as u32,
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

        for (i, ts) in stamps.iter().enumerate() {
            let rec = EdgeRecord::new(edge::RECORD_SIZE)
                .origin(i as u64 + 1)
                .timestamp(*ts)
                .build();
            file.push(&rec).unwrap();
        }
        file.sync().unwrap();
        Arc::new(file.reader_snapshot())
    }

    #[test]
    fn scans_all_files_in_order() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let a = file_with(dir.path(), "a", 1, &[10, 20]);
        let b = file_with(dir.path(), "b", 2, &[30]);

        let mut scan = Fullscan::new(vec![a, b]);
        scan.open()?;

        let mut origins = Vec::new();
        loop {
            match scan.move_next() {
                Ok(()) => {}
                Err(e) if e.is_eof() => break,
                Err(e) => return Err(e),
            }
            let page = scan.page().unwrap();
            for slot in page.chunks_exact(edge::RECORD_SIZE as usize) {
                if crate::record::is_null_record(slot) {
                    break;
                }
                origins.push(EdgeView(slot).origin());
            }
        }

        assert_eq!(vec![1, 2, 1], origins);

        // a rewound scan repeats itself
        scan.rewind()?;
        assert!(scan.move_next().is_ok());
        Ok(())
    }

    #[test]
    fn period_prunes_whole_files() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let a = file_with(dir.path(), "a", 1, &[10, 20]);

        let mut scan = Fullscan::new(vec![a]);
        scan.set_period(Period::new(100, 200));
        scan.open()?;
        assert!(scan.move_next().is_err_and(|e| e.is_eof()));
        Ok(())
    }
}
