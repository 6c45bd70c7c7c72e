// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{PageLoader, ReadOps};
use crate::{
    index::{Index, IndexIter, KeySpec},
    io::File,
    time::Period,
    Error, Result,
};
use byteview::ByteView;
use std::sync::Arc;

/// Iterates an index point query, loading each referenced page
/// through the page LRU.
pub struct Search {
    index: Arc<Index>,
    key: Vec<u8>,
    loader: PageLoader,

    iter: Option<IndexIter>,
    page: Option<ByteView>,
    cur_mask: Option<u128>,
}

impl Search {
    /// Creates a point search for `key` over a file snapshot.
    #[must_use]
    pub fn new(index: Arc<Index>, key: Vec<u8>, files: &[Arc<File>]) -> Self {
        Self {
            index,
            key,
            loader: PageLoader::new(files),
            iter: None,
            page: None,
            cur_mask: None,
        }
    }
}

impl ReadOps for Search {
    fn open(&mut self) -> Result<()> {
        self.iter = Some(self.index.get_iter(&self.key)?);
        self.page = None;
        Ok(())
    }

    fn move_next(&mut self) -> Result<()> {
        let iter = self
            .iter
            .as_mut()
            .ok_or_else(|| Error::Invalid("reader is not open".into()))?;

        loop {
            let Some(entry) = iter.next().transpose()? else {
                self.page = None;
                return Err(Error::Eof);
            };

            let Some(page) = self.loader.load(entry.pid)? else {
                continue;
            };

            self.cur_mask = self.index.spec().has_bitmap().then_some(entry.bitmap);
            self.page = Some(page);
            return Ok(());
        }
    }

    fn page(&self) -> Option<&[u8]> {
        self.page.as_deref()
    }

    fn key(&self) -> Option<&[u8]> {
        Some(&self.key)
    }

    fn mask(&self) -> Option<u128> {
        self.cur_mask
    }

    fn count(&self) -> u64 {
        0
    }

    fn ikeys(&self) -> Option<&KeySpec> {
        Some(self.index.spec())
    }

    fn set_period(&mut self, period: Period) {
        self.loader.set_period(period);
    }

    fn rewind(&mut self) -> Result<()> {
        self.open()
    }
}
