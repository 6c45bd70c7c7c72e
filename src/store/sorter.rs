// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Background promotion of pending files to sorted, compressed
//! readers.

use super::{persist_catalog, sweep_graveyard, StoreInner};
use crate::{
    coding::Encode,
    error::IoOp,
    io::{compress, ctrl, BlockHeader, CompressionType, File},
    record::{edge, is_null_record, page_ctrl_size, read_field, records_per_page, Content, PAGE_SIZE},
    time::{Period, DAWN, DUSK},
    Error, Result,
};
use std::{
    cmp::Ordering as CmpOrdering,
    io::Write,
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

/// Callback the sorter runs for every freshly sorted file, before
/// queries can see it through the index (page registration).
pub type SorterHook = Arc<dyn Fn(&Arc<File>) -> Result<()> + Send + Sync>;

const POLL: Duration = Duration::from_millis(100);

/// Worker loop; one OS thread per configured sorter.
pub(crate) fn run(inner: &Arc<StoreInner>) {
    log::debug!("sorter worker for {:?} up", inner.cfg.path);

    loop {
        if inner.stopped.load(Ordering::SeqCst) {
            break;
        }

        {
            let (lock, cvar) = &inner.signal;
            let Ok(guard) = lock.lock() else { break };
            let Ok((mut kicked, _)) = cvar.wait_timeout_while(guard, POLL, |k| {
                !*k && !inner.stopped.load(Ordering::SeqCst)
            }) else {
                break;
            };
            *kicked = false;
        }

        while let Some(file) = claim(inner) {
            if inner.stopped.load(Ordering::SeqCst) {
                unclaim(inner, file.id);
                break;
            }
            if let Err(e) = sort_one(inner, &file) {
                log::error!("sorting {:?} failed: {e}", file.path);
                unclaim(inner, file.id);
                break;
            }
        }
    }

    log::debug!("sorter worker for {:?} down", inner.cfg.path);
}

/// Picks one pending file nobody is sorting yet.
fn claim(inner: &Arc<StoreInner>) -> Option<Arc<File>> {
    let mut state = inner.state.write().ok()?;

    let file = state
        .pending
        .iter()
        .find(|f| !state.sorting.contains(&f.id))
        .cloned()?;

    state.sorting.insert(file.id);
    Some(file)
}

fn unclaim(inner: &Arc<StoreInner>, id: crate::io::FileId) {
    if let Ok(mut state) = inner.state.write() {
        state.sorting.remove(&id);
    }
}

/// Compares two records by the store ordering, field-wise.
pub(crate) fn compare_records(
    content: Content,
    ordering: &[u32],
    stamped: bool,
    a: &[u8],
    b: &[u8],
) -> CmpOrdering {
    for &off in ordering {
        let (fa, fb) = (read_field(content, a, off), read_field(content, b, off));

        // the stamp field is signed
        let ord = if stamped && content == Content::Edge && off == edge::TMSTMP {
            #[allow(clippy::cast_possible_wrap)]
            let (sa, sb) = (fa as i64, fb as i64);
            sa.cmp(&sb)
        } else {
            fa.cmp(&fb)
        };

        if ord != CmpOrdering::Equal {
            return ord;
        }
    }
    CmpOrdering::Equal
}

/// Sorts one pending file into a fresh compressed reader and swaps
/// it into the reader list.
fn sort_one(inner: &Arc<StoreInner>, src: &Arc<File>) -> Result<()> {
    let cfg = &inner.cfg;
    log::debug!("sorting {:?}", src.path);

    // collect the records
    let rs = cfg.recordsize as usize;
    let mut records: Vec<Vec<u8>> = Vec::with_capacity(src.size as usize / rs);

    let mut scanner = src.scanner()?;
    loop {
        match scanner.move_next(&Period::ALL) {
            Ok(()) => {}
            Err(e) if e.is_eof() => break,
            Err(e) => return Err(e),
        }
        let page = scanner.current().page;
        for slot in page.chunks_exact(rs) {
            if !is_null_record(slot) {
                records.push(slot.to_vec());
            }
        }
    }

    records.sort_by(|a, b| compare_records(cfg.content, &cfg.ordering, cfg.stamped, a, b));

    // re-block, compress, frame
    let per_page = records_per_page(cfg.recordsize);
    let mut out: Vec<u8> = Vec::new();
    let mut whole = Period::ALL;

    for chunk in records.chunks(per_page) {
        let mut page = vec![0u8; PAGE_SIZE];
        let mut bitmap = vec![0u8; page_ctrl_size(cfg.recordsize)];
        let mut window = Period::ALL;

        for (slot, record) in chunk.iter().enumerate() {
            #[allow(clippy::indexing_slicing)]
            page[slot * rs..(slot + 1) * rs].copy_from_slice(record);
            crate::io::bitmap_set(&mut bitmap, slot);

            if cfg.stamped {
                let ts = crate::record::EdgeView(record).timestamp();
                window.expand(ts);
                whole.expand(ts);
            }
        }

        let (from, to) = if cfg.stamped && !window.is_unbounded() {
            (window.start, window.end)
        } else {
            (DAWN, DUSK)
        };

        match cfg.compression {
            CompressionType::Zstd => {
                let payload = compress(&page, None)?;
                #[allow(clippy::cast_possible_truncation)]
                let header = BlockHeader {
                    compressed_size: payload.len() as u32,
                    from,
                    to,
                    bitmap,
                };
                out.extend_from_slice(&header.encode_into_vec());
                out.extend_from_slice(&payload);
            }
            CompressionType::Flat => out.extend_from_slice(&page),
        }
    }

    // write through a temp file, then persist under a fresh name
    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    let target = cfg.path.join(format!("{stamp:024x}_{:08}.sdb", src.id));

    let mut tmp = tempfile::NamedTempFile::new_in(&cfg.path)
        .map_err(|e| Error::io(IoOp::Open, &cfg.path, e))?;
    tmp.write_all(&out)
        .map_err(|e| Error::io(IoOp::Write, tmp.path(), e))?;
    tmp.as_file_mut()
        .sync_all()
        .map_err(|e| Error::io(IoOp::Sync, tmp.path(), e))?;
    tmp.persist(&target)
        .map_err(|e| Error::io(IoOp::Write, &target, e.error))?;

    #[allow(clippy::cast_possible_truncation)]
    let mut sorted = File::new(
        src.id,
        target,
        out.len() as u32,
        out.len() as u32,
        PAGE_SIZE as u32,
        cfg.recordsize,
        cfg.content,
        (src.ctrl & ctrl::TS) | ctrl::READER | ctrl::SORT,
        cfg.compression,
        0,
        cfg.grain,
        whole,
    );
    sorted.order = src.order;
    let sorted = Arc::new(sorted);

    // make it visible
    {
        let mut state = inner.state.write().map_err(Error::poisoned)?;

        state.pending.retain(|f| f.id != src.id);
        state.sorting.remove(&src.id);
        state.graveyard.push(src.clone());

        state.readers.push(sorted.clone());
        state.readers.sort_by_key(|f| f.order);

        persist_catalog(&cfg.path, &state)?;
        sweep_graveyard(&mut state);
    }

    // register pages with the indexes
    let hook = inner.hook.read().map_err(Error::poisoned)?.clone();
    if let Some(hook) = hook {
        hook(&sorted)?;
    }

    log::info!(
        "sorted {:?}: {} records, {} bytes",
        sorted.path,
        records.len(),
        out.len()
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::record::EdgeRecord;

    fn rec(origin: u64, destin: u64, ts: i64) -> Vec<u8> {
        EdgeRecord::new(edge::RECORD_SIZE)
            .origin(origin)
            .destin(destin)
            .timestamp(ts)
            .build()
    }

    #[test]
    fn record_compare_is_field_wise() {
        let ordering = vec![edge::ORIGIN, edge::DESTIN, edge::TMSTMP];

        let a = rec(1, 5, 100);
        let b = rec(2, 1, 1);
        let c = rec(1, 5, -7);

        assert_eq!(
            CmpOrdering::Less,
            compare_records(Content::Edge, &ordering, true, &a, &b)
        );
        // negative stamps sort before positive ones
        assert_eq!(
            CmpOrdering::Greater,
            compare_records(Content::Edge, &ordering, true, &a, &c)
        );
        assert_eq!(
            CmpOrdering::Equal,
            compare_records(Content::Edge, &ordering, true, &a, &a)
        );
    }
}
