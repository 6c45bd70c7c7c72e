// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Fixed-capacity block containers and their compression.

mod backup;
mod block;
mod compression;
mod file;

pub use backup::{read_with_recovery, write_with_backup};
pub use block::{BlockHeader, BlockScanner, LoadedBlock};
pub(crate) use block::{bitmap_get, bitmap_set};
pub use compression::{compress, decompress_into, CompressionType, ZSTD_LEVEL};
pub use file::{ctrl, page_id, split_page_id, File, FileId, PageId, MAP_SIZE};
