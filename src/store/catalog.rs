// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The store catalog: one fixed-width line per file, replaced
//! atomically through a backup copy.

use crate::{
    coding::{read_cstr, write_cstr, Decode, DecodeError, Encode, EncodeError},
    io::{CompressionType, File},
    record::Content,
    time::Period,
    Error, Result,
};
use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use std::{
    io::{Read, Write},
    path::{Path, PathBuf},
};

/// Magic bytes of store catalogs
pub const MAGIC_BYTES: [u8; 4] = [b'N', b'D', b'B', 1];

/// Catalog format version
pub const VERSION: u32 = 1;

/// Catalog file name inside a store directory
pub const CATALOG: &str = "cat";

/// Backup name used during catalog replacement
pub const CATALOG_BKP: &str = "cat.bkp";

/// One catalog line describing a file of the store
///
/// The filename is stored relative to the store directory.
#[derive(Clone, Debug, Eq, PartialEq)]
#[allow(missing_docs)]
pub struct CatalogEntry {
    pub id: u32,
    pub order: u32,
    pub capacity: u32,
    pub size: u32,
    pub recordsize: u32,
    pub blocksize: u32,
    pub ctrl: u8,
    pub compression: CompressionType,
    pub encryption: u32,
    pub grain: i64,
    pub oldest: i64,
    pub newest: i64,
    pub filename: String,
}

impl CatalogEntry {
    /// Captures a file's descriptor state into a catalog line.
    pub fn from_file(file: &File) -> Result<Self> {
        let filename = file
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Invalid("file has no encodable name".into()))?
            .to_string();

        Ok(Self {
            id: file.id,
            order: file.order,
            capacity: file.capacity,
            size: file.size,
            recordsize: file.recordsize,
            blocksize: file.blocksize,
            ctrl: file.ctrl,
            compression: file.compression,
            encryption: file.encryption,
            grain: file.grain,
            oldest: file.period.start,
            newest: file.period.end,
            filename,
        })
    }

    /// Rebuilds a file descriptor below `dir`.
    #[must_use]
    pub fn into_file(self, dir: &Path, content: Content) -> File {
        let mut file = File::new(
            self.id,
            dir.join(&self.filename),
            self.capacity,
            self.size,
            self.blocksize,
            self.recordsize,
            content,
            self.ctrl,
            self.compression,
            self.encryption,
            self.grain,
            Period {
                start: self.oldest,
                end: self.newest,
            },
        );
        file.order = self.order;
        file
    }
}

impl Encode for CatalogEntry {
    fn encode_into<W: Write>(&self, writer: &mut W) -> std::result::Result<(), EncodeError> {
        writer.write_u32::<LE>(self.id)?;
        writer.write_u32::<LE>(self.order)?;
        writer.write_u32::<LE>(self.capacity)?;
        writer.write_u32::<LE>(self.size)?;
        writer.write_u32::<LE>(self.recordsize)?;
        writer.write_u32::<LE>(self.blocksize)?;
        writer.write_u8(self.ctrl)?;
        self.compression.encode_into(writer)?;
        writer.write_u32::<LE>(self.encryption)?;
        writer.write_i64::<LE>(self.grain)?;
        writer.write_i64::<LE>(self.oldest)?;
        writer.write_i64::<LE>(self.newest)?;
        write_cstr(writer, &self.filename)?;
        Ok(())
    }
}

impl Decode for CatalogEntry {
    fn decode_from<R: Read>(reader: &mut R) -> std::result::Result<Self, DecodeError> {
        Ok(Self {
            id: reader.read_u32::<LE>()?,
            order: reader.read_u32::<LE>()?,
            capacity: reader.read_u32::<LE>()?,
            size: reader.read_u32::<LE>()?,
            recordsize: reader.read_u32::<LE>()?,
            blocksize: reader.read_u32::<LE>()?,
            ctrl: reader.read_u8()?,
            compression: CompressionType::decode_from(reader)?,
            encryption: reader.read_u32::<LE>()?,
            grain: reader.read_i64::<LE>()?,
            oldest: reader.read_i64::<LE>()?,
            newest: reader.read_i64::<LE>()?,
            filename: read_cstr(reader)?,
        })
    }
}

fn catalog_path(dir: &Path) -> PathBuf {
    dir.join(CATALOG)
}

/// Writes the catalog with backup: the current catalog moves to
/// `cat.bkp`, the new content lands under the real name, then the
/// backup is dropped.
pub fn write_catalog(dir: &Path, entries: &[CatalogEntry]) -> Result<()> {
    let path = catalog_path(dir);

    let mut buf = Vec::with_capacity(64 * entries.len() + 8);
    #[allow(clippy::expect_used)]
    {
        buf.write_all(&MAGIC_BYTES).expect("vec write cannot fail");
        buf.write_u32::<LE>(VERSION).expect("vec write cannot fail");
    }
    for entry in entries {
        entry.encode_into(&mut buf)?;
    }

    crate::io::write_with_backup(&path, &buf)
}

/// Reads the catalog, recovering from an interrupted replacement.
///
/// If only `cat.bkp` exists, the previous write died between the
/// rename and the new content landing; the backup is moved back into
/// place and used.
pub fn read_catalog(dir: &Path) -> Result<Vec<CatalogEntry>> {
    let path = catalog_path(dir);

    let Some(bytes) = crate::io::read_with_recovery(&path)? else {
        return Ok(Vec::new());
    };
    let mut reader = &bytes[..];

    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|_| Error::Catalog(format!("{path:?}: truncated header")))?;
    if magic != MAGIC_BYTES {
        return Err(Error::Catalog(format!("{path:?}: bad magic")));
    }

    let version = reader
        .read_u32::<LE>()
        .map_err(|_| Error::Catalog(format!("{path:?}: truncated header")))?;
    if version != VERSION {
        return Err(Error::Catalog(format!("{path:?}: unknown version {version}")));
    }

    let mut entries = Vec::new();
    while !reader.is_empty() {
        let entry = CatalogEntry::decode_from(&mut reader)
            .map_err(|e| Error::Catalog(format!("{path:?}: {e}")))?;
        entries.push(entry);
    }

    Ok(entries)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::io::ctrl;
    use crate::record::{edge, PAGE_SIZE};
    use test_log::test;

    fn entry(id: u32, ctrl: u8) -> CatalogEntry {
        CatalogEntry {
            id,
            order: id,
            capacity: 8 * PAGE_SIZE as u32,
            size: 128,
            recordsize: edge::RECORD_SIZE,
            blocksize: PAGE_SIZE as u32,
            ctrl,
            compression: CompressionType::Flat,
            encryption: 0,
            grain: 1,
            oldest: 10,
            newest: 99,
            filename: format!("f{id:03}.db"),
        }
    }

    #[test]
    fn entry_roundtrip() {
        let e = entry(3, ctrl::WRITER | ctrl::TS);
        let bytes = e.encode_into_vec();
        let d = CatalogEntry::decode_from(&mut &bytes[..]).unwrap();
        assert_eq!(e, d);
    }

    #[test]
    fn catalog_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![entry(1, ctrl::WRITER), entry(2, ctrl::READER)];

        write_catalog(dir.path(), &entries)?;
        assert_eq!(entries, read_catalog(dir.path())?);

        // a second write replaces, leaving no backup behind
        write_catalog(dir.path(), &entries[..1])?;
        assert_eq!(entries[..1], read_catalog(dir.path())?[..]);
        assert!(!dir.path().join(CATALOG_BKP).exists());
        Ok(())
    }

    #[test]
    fn interrupted_replacement_recovers_from_backup() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![entry(1, ctrl::WRITER)];
        write_catalog(dir.path(), &entries)?;

        // simulate dying between the rename and the new write
        std::fs::rename(
            dir.path().join(CATALOG),
            dir.path().join(CATALOG_BKP),
        )
        .unwrap();

        assert_eq!(entries, read_catalog(dir.path())?);
        assert!(dir.path().join(CATALOG).exists());
        Ok(())
    }

    #[test]
    fn missing_catalog_is_empty() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_catalog(dir.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn bad_magic_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CATALOG), b"XXXX\x01\x00\x00\x00").unwrap();
        assert!(matches!(
            read_catalog(dir.path()),
            Err(Error::Catalog(_))
        ));
    }
}
