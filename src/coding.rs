// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Serialization of on-disk entities.

use std::io::{Read, Write};

/// Error during serialization
#[derive(Debug)]
pub enum EncodeError {
    /// I/O error
    Io(std::io::Error),

    /// A string field exceeds its on-disk limit
    StringTooLong(usize),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EncodeError({})",
            match self {
                Self::Io(e) => e.to_string(),
                Self::StringTooLong(n) => format!("string of {n} bytes too long"),
            }
        )
    }
}

impl From<std::io::Error> for EncodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::StringTooLong(_) => None,
        }
    }
}

/// Error during deserialization
#[derive(Debug)]
pub enum DecodeError {
    /// I/O error
    Io(std::io::Error),

    /// Invalid magic bytes of a catalog or model file
    InvalidHeader(&'static str),

    /// Unknown catalog format version
    InvalidVersion(u32),

    /// Invalid enum tag (type name, tag)
    InvalidTag((&'static str, u8)),

    /// A string field is not valid UTF-8
    InvalidString,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DecodeError({self:?})")
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Trait to serialize on-disk entities
///
/// All NowDB formats are little-endian with fixed field widths;
/// strings are NUL-terminated.
pub trait Encode {
    /// Serializes into writer.
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError>;

    /// Serializes into vector.
    #[allow(clippy::expect_used)]
    fn encode_into_vec(&self) -> Vec<u8> {
        let mut v = vec![];
        self.encode_into(&mut v).expect("cannot fail");
        v
    }
}

/// Trait to deserialize on-disk entities
pub trait Decode {
    /// Deserializes from reader.
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError>
    where
        Self: Sized;
}

/// Writes a NUL-terminated string, at most 255 bytes of payload.
pub fn write_cstr<W: Write>(writer: &mut W, s: &str) -> Result<(), EncodeError> {
    if s.len() > 255 || s.as_bytes().contains(&0) {
        return Err(EncodeError::StringTooLong(s.len()));
    }
    writer.write_all(s.as_bytes())?;
    writer.write_all(&[0])?;
    Ok(())
}

/// Reads a NUL-terminated string of at most 255 payload bytes.
pub fn read_cstr<R: Read>(reader: &mut R) -> Result<String, DecodeError> {
    let mut buf = Vec::with_capacity(32);
    let mut byte = [0u8; 1];

    loop {
        reader.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        if buf.len() == 255 {
            return Err(DecodeError::InvalidString);
        }
        buf.push(byte[0]);
    }

    String::from_utf8(buf).map_err(|_| DecodeError::InvalidString)
}
