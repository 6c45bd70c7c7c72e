// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{DecodeError, EncodeError},
    io::CompressionType,
};
use std::path::{Path, PathBuf};

/// The I/O operation during which an [`Error::Io`] occurred.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum IoOp {
    Open,
    Read,
    Write,
    Close,
    Stat,
    Remove,
    Seek,
    Sync,
    Map,
    Unmap,
}

impl std::fmt::Display for IoOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Read => "read",
            Self::Write => "write",
            Self::Close => "close",
            Self::Stat => "stat",
            Self::Remove => "remove",
            Self::Seek => "seek",
            Self::Sync => "sync",
            Self::Map => "map",
            Self::Unmap => "umap",
        };
        write!(f, "{s}")
    }
}

/// Represents errors that can occur in the storage and query core
#[derive(Debug)]
pub enum Error {
    /// Bad input or state
    Invalid(String),

    /// I/O error, tagged with the failing operation and path
    Io {
        /// Operation that failed
        op: IoOp,

        /// Path of the file the operation ran against
        path: PathBuf,

        /// Underlying OS error
        source: std::io::Error,
    },

    /// Serialization failed
    Encode(EncodeError),

    /// Deserialization failed
    Decode(DecodeError),

    /// Compression failed
    Compress(CompressionType),

    /// Decompression failed (corrupt data or dictionary mismatch)
    Decompress(CompressionType),

    /// Corrupt on-disk catalog; fatal for the containing scope
    Catalog(String),

    /// Corrupt block header
    BadBlock {
        /// File containing the block
        path: PathBuf,

        /// Byte offset of the block
        offset: u64,
    },

    /// End of stream; a signal, not a failure
    Eof,

    /// A looked-up key does not exist
    KeyNotFound(String),

    /// A key exists that must not
    DupKey(String),

    /// An index name does not resolve
    NoSuchIndex(String),

    /// Operation or opcode is not implemented
    NotSupported(&'static str),

    /// Internal invariant broken; fatal for the request
    Panic(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(msg) => write!(f, "invalid: {msg}"),
            Self::Io { op, path, source } => {
                write!(f, "io error on {op} of {path:?}: {source}")
            }
            Self::Encode(e) => write!(f, "{e}"),
            Self::Decode(e) => write!(f, "{e}"),
            Self::Compress(c) => write!(f, "cannot compress ({c})"),
            Self::Decompress(c) => write!(f, "cannot decompress ({c})"),
            Self::Catalog(msg) => write!(f, "corrupt catalog: {msg}"),
            Self::BadBlock { path, offset } => {
                write!(f, "bad block in {path:?} at {offset}")
            }
            Self::Eof => write!(f, "end of file"),
            Self::KeyNotFound(k) => write!(f, "key not found: {k}"),
            Self::DupKey(k) => write!(f, "duplicate key: {k}"),
            Self::NoSuchIndex(name) => write!(f, "no such index: {name}"),
            Self::NotSupported(what) => write!(f, "not supported: {what}"),
            Self::Panic(msg) => write!(f, "panic: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl Error {
    /// Tags an I/O error with its operation and path.
    pub fn io(op: IoOp, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.as_ref().into(),
            source,
        }
    }

    /// Returns `true` if this is the EOF signal.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }

    /// Maps a poisoned lock into a panic error.
    ///
    /// A poisoned lock means a writer died mid-update, so the guarded
    /// state can no longer be trusted.
    pub(crate) fn poisoned<T>(_: T) -> Self {
        Self::Panic("lock poisoned".into())
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Core result
pub type Result<T> = std::result::Result<T, Error>;
