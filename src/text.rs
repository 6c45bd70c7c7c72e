// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Bidirectional string ↔ surrogate-key dictionary.
//!
//! Strings are interned once and addressed by a 64-bit surrogate key
//! that fits a record slot. The dictionary is an append-only log,
//! replayed into memory on open; every entry carries an xxh3 checksum
//! so a torn tail is detected and cut off. Evaluators put their own
//! LRU in front of this (see [`crate::expr`]), so lookups here take
//! the dictionary lock only on cache misses.

use crate::{error::IoOp, Error, Result};
use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use rustc_hash::FxHashMap;
use std::{
    io::{BufWriter, Read, Write},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};
use xxhash_rust::xxh3::xxh3_64;

/// Dictionary file name inside the text directory
const DICT: &str = "dict";

/// Key handed out for the first interned string
const FIRST_KEY: u64 = 1;

struct TextInner {
    s2k: FxHashMap<Arc<str>, u64>,
    k2s: FxHashMap<u64, Arc<str>>,
    next: u64,
    log: BufWriter<std::fs::File>,
}

/// Persistent string ↔ u64 surrogate mapping
pub struct Text {
    path: PathBuf,
    inner: RwLock<TextInner>,
}

impl Text {
    /// Opens (or creates) the dictionary below `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(IoOp::Open, dir, e))?;
        let path = dir.join(DICT);

        let mut s2k = FxHashMap::default();
        let mut k2s: FxHashMap<u64, Arc<str>> = FxHashMap::default();
        let mut next = FIRST_KEY;
        let mut good = 0u64;

        if path.exists() {
            let bytes = std::fs::read(&path).map_err(|e| Error::io(IoOp::Read, &path, e))?;
            let mut reader = &bytes[..];

            while let Some((key, text, consumed)) = read_entry(&mut reader)? {
                let text: Arc<str> = text.into();
                s2k.insert(text.clone(), key);
                k2s.insert(key, text);
                next = next.max(key + 1);
                good += consumed;
            }

            if good < bytes.len() as u64 {
                log::warn!(
                    "text dictionary {path:?}: cutting {} torn bytes",
                    bytes.len() as u64 - good
                );
            }
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::io(IoOp::Open, &path, e))?;
        file.set_len(good)
            .map_err(|e| Error::io(IoOp::Write, &path, e))?;

        use std::io::Seek;
        let mut file = file;
        file.seek(std::io::SeekFrom::End(0))
            .map_err(|e| Error::io(IoOp::Seek, &path, e))?;

        log::debug!("text dictionary {path:?}: {} entries", k2s.len());

        Ok(Self {
            path,
            inner: RwLock::new(TextInner {
                s2k,
                k2s,
                next,
                log: BufWriter::new(file),
            }),
        })
    }

    /// Interns a string; returns its surrogate key. Idempotent.
    pub fn insert(&self, s: &str) -> Result<u64> {
        {
            let inner = self.inner.read().map_err(Error::poisoned)?;
            if let Some(key) = inner.s2k.get(s) {
                return Ok(*key);
            }
        }

        let mut inner = self.inner.write().map_err(Error::poisoned)?;

        // somebody else may have raced us here
        if let Some(key) = inner.s2k.get(s) {
            return Ok(*key);
        }

        let key = inner.next;
        inner.next += 1;

        write_entry(&mut inner.log, key, s).map_err(|e| Error::io(IoOp::Write, &self.path, e))?;
        inner
            .log
            .flush()
            .map_err(|e| Error::io(IoOp::Write, &self.path, e))?;

        let text: Arc<str> = s.into();
        inner.s2k.insert(text.clone(), key);
        inner.k2s.insert(key, text);

        Ok(key)
    }

    /// The surrogate key of `s`, if interned.
    pub fn get_key(&self, s: &str) -> Result<u64> {
        let inner = self.inner.read().map_err(Error::poisoned)?;
        inner
            .s2k
            .get(s)
            .copied()
            .ok_or_else(|| Error::KeyNotFound(s.into()))
    }

    /// The string behind `key`.
    pub fn get_text(&self, key: u64) -> Result<Arc<str>> {
        let inner = self.inner.read().map_err(Error::poisoned)?;
        inner
            .k2s
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(format!("surrogate {key}")))
    }

    /// Number of interned strings.
    pub fn len(&self) -> Result<usize> {
        Ok(self.inner.read().map_err(Error::poisoned)?.k2s.len())
    }

    /// Whether the dictionary is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Flushes the log to disk.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.write().map_err(Error::poisoned)?;
        inner
            .log
            .flush()
            .map_err(|e| Error::io(IoOp::Write, &self.path, e))?;
        inner
            .log
            .get_ref()
            .sync_data()
            .map_err(|e| Error::io(IoOp::Sync, &self.path, e))?;
        Ok(())
    }
}

fn write_entry<W: Write>(writer: &mut W, key: u64, s: &str) -> std::io::Result<()> {
    #[allow(clippy::cast_possible_truncation)]
    writer.write_u32::<LE>(s.len() as u32)?;
    writer.write_u64::<LE>(key)?;
    writer.write_u64::<LE>(xxh3_64(s.as_bytes()))?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

/// Reads one log entry; `None` at a clean end or a torn tail.
fn read_entry(reader: &mut &[u8]) -> Result<Option<(u64, String, u64)>> {
    if reader.len() < 20 {
        return Ok(None);
    }

    let len = reader.read_u32::<LE>().map_err(|_| torn())? as usize;
    let key = reader.read_u64::<LE>().map_err(|_| torn())?;
    let hash = reader.read_u64::<LE>().map_err(|_| torn())?;

    if reader.len() < len {
        return Ok(None);
    }

    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).map_err(|_| torn())?;

    if xxh3_64(&bytes) != hash {
        return Ok(None);
    }

    let text = String::from_utf8(bytes).map_err(|_| torn())?;
    Ok(Some((key, text, 20 + len as u64)))
}

fn torn() -> Error {
    Error::Catalog("torn text dictionary entry".into())
}
