// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    Error, Result,
};
use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Compression level used for block payloads
pub const ZSTD_LEVEL: i32 = 3;

/// Compression algorithm of a file's blocks
///
/// Writer files are always flat; the sorter compresses blocks when it
/// promotes a pending file to a sorted reader.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum CompressionType {
    /// No compression; one block is one raw page
    #[default]
    Flat,

    /// ZSTD-per-block with a frame header in front of each payload
    Zstd,
}

impl Encode for CompressionType {
    fn encode_into<W: Write>(&self, writer: &mut W) -> std::result::Result<(), EncodeError> {
        match self {
            Self::Flat => writer.write_u32::<LE>(0)?,
            Self::Zstd => writer.write_u32::<LE>(1)?,
        }
        Ok(())
    }
}

impl Decode for CompressionType {
    fn decode_from<R: Read>(reader: &mut R) -> std::result::Result<Self, DecodeError> {
        let tag = reader.read_u32::<LE>()?;

        match tag {
            0 => Ok(Self::Flat),
            1 => Ok(Self::Zstd),
            #[allow(clippy::cast_possible_truncation)]
            tag => Err(DecodeError::InvalidTag(("CompressionType", tag as u8))),
        }
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Flat => "flat",
                Self::Zstd => "zstd",
            }
        )
    }
}

/// Compresses one page payload, optionally with a pre-shared dictionary.
pub fn compress(data: &[u8], dict: Option<&[u8]>) -> Result<Vec<u8>> {
    let result = match dict {
        Some(dict) => zstd::bulk::Compressor::with_dictionary(ZSTD_LEVEL, dict)
            .and_then(|mut c| c.compress(data)),
        None => zstd::bulk::compress(data, ZSTD_LEVEL),
    };

    result.map_err(|_| Error::Compress(CompressionType::Zstd))
}

/// Decompresses one block payload into the caller's page buffer.
///
/// Returns the decompressed size, which must equal the page size for a
/// well-formed block.
pub fn decompress_into(src: &[u8], dst: &mut [u8], dict: Option<&[u8]>) -> Result<usize> {
    let mut decompressor = match dict {
        Some(dict) => zstd::bulk::Decompressor::with_dictionary(dict),
        None => zstd::bulk::Decompressor::new(),
    }
    .map_err(|_| Error::Decompress(CompressionType::Zstd))?;

    decompressor
        .decompress_to_buffer(src, dst)
        .map_err(|_| Error::Decompress(CompressionType::Zstd))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::record::PAGE_SIZE;

    #[test]
    fn compression_tag_roundtrip() {
        for c in [CompressionType::Flat, CompressionType::Zstd] {
            let v = c.encode_into_vec();
            assert_eq!(4, v.len());
            assert_eq!(c, CompressionType::decode_from(&mut &v[..]).unwrap());
        }
    }

    #[test]
    fn page_roundtrip() {
        let mut page = vec![0u8; PAGE_SIZE];
        for (i, b) in page.iter_mut().enumerate().take(4096) {
            #[allow(clippy::cast_possible_truncation)]
            {
                *b = (i % 251) as u8;
            }
        }

        let packed = compress(&page, None).unwrap();
        assert!(packed.len() < PAGE_SIZE);

        let mut out = vec![0u8; PAGE_SIZE];
        let n = decompress_into(&packed, &mut out, None).unwrap();
        assert_eq!(PAGE_SIZE, n);
        assert_eq!(page, out);
    }

    #[test]
    fn garbage_does_not_decompress() {
        let mut out = vec![0u8; PAGE_SIZE];
        assert!(decompress_into(&[1, 2, 3, 4], &mut out, None).is_err());
    }
}
