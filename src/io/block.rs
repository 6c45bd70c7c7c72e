// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{compression, CompressionType};
use crate::{
    coding::{Encode, EncodeError},
    error::IoOp,
    record::{page_ctrl_size, PAGE_SIZE},
    Error, Period, Result, Timestamp,
};
use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use std::{
    io::{BufReader, Read, Seek, SeekFrom, Write},
    path::PathBuf,
};

/// Fixed part of a compressed block header, before the presence bitmap
const HDR_BASE_SIZE: usize = 24;

/// Header written in front of every compressed block
///
/// The timestamp window lets a scan skip the block without
/// decompressing it; the bitmap marks which record slots of the
/// decompressed page are present.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockHeader {
    /// Compressed payload size in bytes
    pub compressed_size: u32,

    /// Smallest timestamp in the block
    pub from: Timestamp,

    /// Largest timestamp in the block
    pub to: Timestamp,

    /// Per-record presence bitmap, `page_ctrl_size(recordsize)` bytes
    pub bitmap: Vec<u8>,
}

impl BlockHeader {
    /// On-disk size of a header for records of `recordsize`.
    #[must_use]
    pub fn serialized_len(recordsize: u32) -> usize {
        HDR_BASE_SIZE + page_ctrl_size(recordsize)
    }

    fn read_from<R: Read>(reader: &mut R, recordsize: u32) -> std::io::Result<Self> {
        let _reserved = reader.read_u32::<LE>()?;
        let compressed_size = reader.read_u32::<LE>()?;
        let from = reader.read_i64::<LE>()?;
        let to = reader.read_i64::<LE>()?;

        let mut bitmap = vec![0u8; page_ctrl_size(recordsize)];
        reader.read_exact(&mut bitmap)?;

        Ok(Self {
            compressed_size,
            from,
            to,
            bitmap,
        })
    }

    /// Whether bit `slot` is set in the presence bitmap.
    #[must_use]
    pub fn is_marked(&self, slot: usize) -> bool {
        bitmap_get(&self.bitmap, slot)
    }
}

impl Encode for BlockHeader {
    fn encode_into<W: Write>(&self, writer: &mut W) -> std::result::Result<(), EncodeError> {
        writer.write_u32::<LE>(0)?;
        writer.write_u32::<LE>(self.compressed_size)?;
        writer.write_i64::<LE>(self.from)?;
        writer.write_i64::<LE>(self.to)?;
        writer.write_all(&self.bitmap)?;
        Ok(())
    }
}

/// Reads bit `slot` of a presence bitmap.
#[must_use]
pub(crate) fn bitmap_get(bitmap: &[u8], slot: usize) -> bool {
    bitmap
        .get(slot / 8)
        .is_some_and(|byte| byte & (1 << (slot % 8)) != 0)
}

/// Sets bit `slot` of a presence bitmap.
pub(crate) fn bitmap_set(bitmap: &mut [u8], slot: usize) {
    if let Some(byte) = bitmap.get_mut(slot / 8) {
        *byte |= 1 << (slot % 8);
    }
}

/// View over the block a scanner currently exposes
pub struct LoadedBlock<'a> {
    /// Decompressed 8 KiB page of record slots
    pub page: &'a [u8],

    /// Presence bitmap; `None` for flat blocks (all slots up to the
    /// zero terminator are present)
    pub bitmap: Option<&'a [u8]>,

    /// Physical offset of the block in its file
    pub offset: u64,
}

/// Sequential block iterator over one file, with random access for
/// index-driven page loads
///
/// Every scanner owns a private OS handle, so parallel readers do not
/// serialize on one descriptor. Compressed scans skip blocks whose
/// timestamp window misses the query period, without decompressing.
pub struct BlockScanner {
    path: PathBuf,
    reader: BufReader<std::fs::File>,
    compression: CompressionType,
    blocksize: u32,
    recordsize: u32,
    size: u64,
    dict: Option<std::sync::Arc<Vec<u8>>>,

    /// Physical offset of the next unread block
    pos: u64,

    /// Physical offset of the current block, once loaded
    cur: u64,

    page: Vec<u8>,
    bitmap: Option<Vec<u8>>,
    loaded: bool,
}

impl BlockScanner {
    pub(crate) fn new(
        path: PathBuf,
        compression: CompressionType,
        blocksize: u32,
        recordsize: u32,
        size: u64,
        dict: Option<std::sync::Arc<Vec<u8>>>,
    ) -> Result<Self> {
        let file =
            std::fs::File::open(&path).map_err(|e| Error::io(IoOp::Open, &path, e))?;

        Ok(Self {
            path,
            reader: BufReader::with_capacity(super::MAP_SIZE, file),
            compression,
            blocksize,
            recordsize,
            size,
            dict,
            pos: 0,
            cur: 0,
            page: vec![0u8; PAGE_SIZE],
            bitmap: None,
            loaded: false,
        })
    }

    /// The block currently loaded.
    #[must_use]
    pub fn current(&self) -> LoadedBlock<'_> {
        LoadedBlock {
            page: &self.page,
            bitmap: self.bitmap.as_deref(),
            offset: self.cur,
        }
    }

    /// Restarts the scan at the first block.
    pub fn rewind(&mut self) -> Result<()> {
        self.reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| Error::io(IoOp::Seek, &self.path, e))?;
        self.pos = 0;
        self.cur = 0;
        self.loaded = false;
        Ok(())
    }

    /// Advances to the next usable block.
    ///
    /// Returns [`Error::Eof`] past the last block; that is the normal
    /// scan boundary, not a failure.
    pub fn move_next(&mut self, period: &Period) -> Result<()> {
        match self.compression {
            CompressionType::Flat => self.move_flat(),
            CompressionType::Zstd => self.move_compressed(period),
        }
    }

    fn move_flat(&mut self) -> Result<()> {
        if self.pos >= self.size {
            self.loaded = false;
            return Err(Error::Eof);
        }

        self.reader
            .read_exact(&mut self.page)
            .map_err(|e| Error::io(IoOp::Read, &self.path, e))?;

        self.cur = self.pos;
        self.pos += u64::from(self.blocksize);
        self.bitmap = None;
        self.loaded = true;
        Ok(())
    }

    fn move_compressed(&mut self, period: &Period) -> Result<()> {
        let hdrsize = BlockHeader::serialized_len(self.recordsize) as u64;

        loop {
            if self.pos >= self.size {
                self.loaded = false;
                return Err(Error::Eof);
            }
            if self.size - self.pos < hdrsize {
                return Err(Error::BadBlock {
                    path: self.path.clone(),
                    offset: self.pos,
                });
            }

            let header = BlockHeader::read_from(&mut self.reader, self.recordsize)
                .map_err(|e| Error::io(IoOp::Read, &self.path, e))?;

            let payload = u64::from(header.compressed_size);
            if payload == 0 || self.pos + hdrsize + payload > self.size {
                return Err(Error::BadBlock {
                    path: self.path.clone(),
                    offset: self.pos,
                });
            }

            // worth decompressing?
            if !period.is_unbounded() && !period.overlaps(header.from, header.to) {
                #[allow(clippy::cast_possible_wrap)]
                self.reader
                    .seek_relative(payload as i64)
                    .map_err(|e| Error::io(IoOp::Seek, &self.path, e))?;
                self.pos += hdrsize + payload;
                continue;
            }

            self.decompress_current(&header)?;
            self.cur = self.pos;
            self.pos += hdrsize + payload;
            self.loaded = true;
            return Ok(());
        }
    }

    fn decompress_current(&mut self, header: &BlockHeader) -> Result<()> {
        let mut packed = vec![0u8; header.compressed_size as usize];
        self.reader
            .read_exact(&mut packed)
            .map_err(|e| Error::io(IoOp::Read, &self.path, e))?;

        let n = compression::decompress_into(&packed, &mut self.page, self.dict.as_deref().map(Vec::as_slice))?;
        if n != PAGE_SIZE {
            return Err(Error::BadBlock {
                path: self.path.clone(),
                offset: self.pos,
            });
        }

        self.bitmap = Some(header.bitmap.clone());
        Ok(())
    }

    /// Loads the single block at physical offset `pos`.
    ///
    /// This is the random-access path for index-driven readers; the
    /// scan position moves to the block after `pos`.
    pub fn load_at(&mut self, pos: u64) -> Result<()> {
        if pos >= self.size {
            return Err(Error::BadBlock {
                path: self.path.clone(),
                offset: pos,
            });
        }

        self.reader
            .seek(SeekFrom::Start(pos))
            .map_err(|e| Error::io(IoOp::Seek, &self.path, e))?;
        self.pos = pos;

        match self.compression {
            CompressionType::Flat => self.move_flat(),
            // NOTE: random loads must not skip, so the period is unbounded here
            CompressionType::Zstd => self.move_compressed(&Period::ALL),
        }
    }

    /// Whether a block is currently loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_bits() {
        let mut bm = vec![0u8; 16];
        bitmap_set(&mut bm, 0);
        bitmap_set(&mut bm, 9);
        bitmap_set(&mut bm, 127);

        assert!(bitmap_get(&bm, 0));
        assert!(bitmap_get(&bm, 9));
        assert!(bitmap_get(&bm, 127));
        assert!(!bitmap_get(&bm, 1));
        assert!(!bitmap_get(&bm, 128));
    }

    #[test]
    fn header_roundtrip() {
        let header = BlockHeader {
            compressed_size: 512,
            from: 10,
            to: 99,
            bitmap: vec![0xFF; page_ctrl_size(64)],
        };

        let bytes = header.encode_into_vec();
        assert_eq!(BlockHeader::serialized_len(64), bytes.len());

        let decoded = BlockHeader::read_from(&mut &bytes[..], 64).unwrap();
        assert_eq!(header, decoded);
    }
}
