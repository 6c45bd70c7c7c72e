// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! On-disk indexes over record projections.
//!
//! An index binds a name and a target (the vertex store or one edge
//! context) to an ordered list of record offsets. The physical tree
//! keys records by the packed projection; the payload locates the
//! records: a page id, plus a 128-bit presence bitmap for edge
//! content.

mod tree;

pub use tree::Entry as IndexEntry;
use tree::{Node, Tree};

use crate::{
    coding::{read_cstr, write_cstr},
    error::IoOp,
    io::{page_id, File, PageId},
    record::{read_field, write_field, Content},
    time::Period,
    Error, Result,
};
use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use rustc_hash::FxHashMap;
use std::{
    cmp::Ordering,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

/// Default node size of a freshly created index
pub const DEFAULT_NODE_SIZE: u32 = 4096;

/// Index catalog file name at the scope root
const ICAT: &str = "icat";

const ICAT_MAGIC: [u8; 4] = [b'N', b'D', b'B', b'I'];
const ICAT_VERSION: u32 = 1;

/// An ordered list of record offsets an index projects
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeySpec {
    content: Content,
    offsets: Vec<u32>,
}

impl KeySpec {
    /// Builds a key spec over record offsets.
    #[must_use]
    pub fn new(content: Content, offsets: Vec<u32>) -> Self {
        Self { content, offsets }
    }

    /// The record family the spec projects.
    #[must_use]
    pub fn content(&self) -> Content {
        self.content
    }

    /// The projected offsets, key order.
    #[must_use]
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    /// Packed key size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.offsets
            .iter()
            .map(|off| self.content.field_width(*off))
            .sum()
    }

    /// Packs the projected fields of `record` into a key.
    #[must_use]
    pub fn pack(&self, record: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.size());
        for &off in &self.offsets {
            let value = read_field(self.content, record, off);
            match self.content.field_width(off) {
                #[allow(clippy::cast_possible_truncation)]
                4 => key.extend_from_slice(&(value as u32).to_le_bytes()),
                _ => key.extend_from_slice(&value.to_le_bytes()),
            }
        }
        key
    }

    /// Scatters the key fields back into a record-shaped stub.
    pub fn unpack_into(&self, key: &[u8], record: &mut [u8]) {
        let mut at = 0usize;
        for &off in &self.offsets {
            let width = self.content.field_width(off);
            let value = match width {
                4 => {
                    let mut raw = [0u8; 4];
                    if let Some(src) = key.get(at..at + 4) {
                        raw.copy_from_slice(src);
                    }
                    u64::from(u32::from_le_bytes(raw))
                }
                _ => {
                    let mut raw = [0u8; 8];
                    if let Some(src) = key.get(at..at + 8) {
                        raw.copy_from_slice(src);
                    }
                    u64::from_le_bytes(raw)
                }
            };
            write_field(self.content, record, off, value);
            at += width;
        }
    }

    /// Field-wise key comparison; the edge stamp field is signed.
    #[must_use]
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let mut at = 0usize;
        for &off in &self.offsets {
            let width = self.content.field_width(off);

            let read = |buf: &[u8]| -> u64 {
                match width {
                    4 => {
                        let mut raw = [0u8; 4];
                        if let Some(src) = buf.get(at..at + 4) {
                            raw.copy_from_slice(src);
                        }
                        u64::from(u32::from_le_bytes(raw))
                    }
                    _ => {
                        let mut raw = [0u8; 8];
                        if let Some(src) = buf.get(at..at + 8) {
                            raw.copy_from_slice(src);
                        }
                        u64::from_le_bytes(raw)
                    }
                }
            };

            let (fa, fb) = (read(a), read(b));
            let ord = if self.content == Content::Edge && off == crate::record::edge::TMSTMP {
                #[allow(clippy::cast_possible_wrap)]
                let (sa, sb) = (fa as i64, fb as i64);
                sa.cmp(&sb)
            } else {
                fa.cmp(&fb)
            };

            if ord != Ordering::Equal {
                return ord;
            }
            at += width;
        }
        Ordering::Equal
    }

    /// Whether entries carry a per-record bitmap (edge content) or
    /// locate whole pages (vertex content).
    #[must_use]
    pub fn has_bitmap(&self) -> bool {
        self.content == Content::Edge
    }

    /// Re-encodes a packed key so that plain byte order equals
    /// [`Self::compare`] order: fields become big-endian, the signed
    /// stamp field gets its sign bit flipped.
    ///
    /// In-memory buffer indexes sort by this form.
    #[must_use]
    pub fn encode_comparable(&self, key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(key.len());
        let mut at = 0usize;

        for &off in &self.offsets {
            let width = self.content.field_width(off);
            match width {
                4 => {
                    let mut raw = [0u8; 4];
                    if let Some(src) = key.get(at..at + 4) {
                        raw.copy_from_slice(src);
                    }
                    out.extend_from_slice(&u32::from_le_bytes(raw).to_be_bytes());
                }
                _ => {
                    let mut raw = [0u8; 8];
                    if let Some(src) = key.get(at..at + 8) {
                        raw.copy_from_slice(src);
                    }
                    let mut v = u64::from_le_bytes(raw);
                    if self.content == Content::Edge && off == crate::record::edge::TMSTMP {
                        v ^= 1 << 63;
                    }
                    out.extend_from_slice(&v.to_be_bytes());
                }
            }
            at += width;
        }
        out
    }
}

/// What an index is built over
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IndexTarget {
    /// The scope's vertex store
    Vertex,

    /// A named edge context
    Context(String),
}

/// Binds a name and target to a key spec
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexDesc {
    /// Index name, unique per scope
    pub name: String,

    /// Target store
    pub target: IndexTarget,

    /// Projected offsets
    pub spec: KeySpec,

    /// Node size of the physical tree
    pub sizing: u32,
}

/// One index: a descriptor plus its physical tree
pub struct Index {
    desc: IndexDesc,
    tree: Tree,
}

/// Iteration direction of a range scan
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Ascending key order
    Asc,

    /// Descending key order
    Desc,
}

impl Index {
    fn tree_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(name)
    }

    /// Creates the physical tree below `dir`.
    pub fn create(dir: &Path, desc: IndexDesc) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(IoOp::Open, dir, e))?;
        let tree = Tree::create(
            &Self::tree_path(dir, &desc.name),
            desc.spec.clone(),
            desc.sizing as usize,
        )?;
        log::info!("created index {} below {dir:?}", desc.name);
        Ok(Self { desc, tree })
    }

    /// Opens an existing tree below `dir`.
    pub fn open(dir: &Path, desc: IndexDesc) -> Result<Self> {
        let tree = Tree::open(
            &Self::tree_path(dir, &desc.name),
            desc.spec.clone(),
            desc.sizing as usize,
        )?;
        Ok(Self { desc, tree })
    }

    /// The descriptor.
    #[must_use]
    pub fn desc(&self) -> &IndexDesc {
        &self.desc
    }

    /// The key spec, for decoding keys back into record stubs.
    #[must_use]
    pub fn spec(&self) -> &KeySpec {
        self.tree.spec()
    }

    /// Inserts one record occurrence.
    pub fn insert(&self, key: &[u8], pid: PageId, slot: usize) -> Result<()> {
        let slot = self.desc.spec.has_bitmap().then_some(slot);
        self.tree.insert(key, pid, slot)
    }

    /// Point iterator over all values with exactly `key`.
    pub fn get_iter(self: &Arc<Self>, key: &[u8]) -> Result<IndexIter> {
        IndexIter::new(
            self.clone(),
            Some((key.to_vec(), 0)),
            Some((key.to_vec(), PageId::MAX)),
            Direction::Asc,
        )
    }

    /// Range iterator; descending when `from > to`.
    pub fn range(self: &Arc<Self>, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<IndexIter> {
        let dir = match (from, to) {
            (Some(f), Some(t)) if self.spec().compare(f, t) == Ordering::Greater => Direction::Desc,
            _ => Direction::Asc,
        };

        let (lo, hi) = match dir {
            Direction::Asc => (from, to),
            Direction::Desc => (to, from),
        };

        IndexIter::new(
            self.clone(),
            lo.map(|k| (k.to_vec(), 0)),
            hi.map(|k| (k.to_vec(), PageId::MAX)),
            dir,
        )
    }

    /// Range iterator with an explicit direction, for descending
    /// scans with open bounds.
    pub fn range_with(
        self: &Arc<Self>,
        lo: Option<&[u8]>,
        hi: Option<&[u8]>,
        dir: Direction,
    ) -> Result<IndexIter> {
        IndexIter::new(
            self.clone(),
            lo.map(|k| (k.to_vec(), 0)),
            hi.map(|k| (k.to_vec(), PageId::MAX)),
            dir,
        )
    }

    /// Whether any entry carries `key`, without loading values.
    pub fn does_exist(self: &Arc<Self>, key: &[u8]) -> Result<bool> {
        Ok(self.get_iter(key)?.next().transpose()?.is_some())
    }

    /// Registers every record of a sorted file.
    pub fn register_file(&self, file: &File) -> Result<()> {
        let rs = file.recordsize as usize;
        let mut scanner = file.scanner()?;

        loop {
            match scanner.move_next(&Period::ALL) {
                Ok(()) => {}
                Err(e) if e.is_eof() => break,
                Err(e) => return Err(e),
            }

            let block = scanner.current();
            let pid = page_id(file.id, block.offset);
            let page = block.page.to_vec();
            let bitmap = block.bitmap.map(<[u8]>::to_vec);

            for (slot, record) in page.chunks_exact(rs).enumerate() {
                let present = match &bitmap {
                    Some(bm) => crate::io::bitmap_get(bm, slot),
                    None => !crate::record::is_null_record(record),
                };
                if !present {
                    continue;
                }
                self.insert(&self.desc.spec.pack(record), pid, slot)?;
            }
        }

        self.tree.sync()
    }

    /// Flushes the tree.
    pub fn sync(&self) -> Result<()> {
        self.tree.sync()
    }
}

/// Iterator over index entries in key order
pub struct IndexIter {
    index: Arc<Index>,
    pos: Option<(u64, usize)>,
    lo: Option<(Vec<u8>, PageId)>,
    hi: Option<(Vec<u8>, PageId)>,
    dir: Direction,
    done: bool,
}

impl IndexIter {
    fn new(
        index: Arc<Index>,
        lo: Option<(Vec<u8>, PageId)>,
        hi: Option<(Vec<u8>, PageId)>,
        dir: Direction,
    ) -> Result<Self> {
        let pos = match dir {
            Direction::Asc => match &lo {
                Some((key, pid)) => Some(index.tree.seek(key, *pid)?),
                None => Some((index.tree.first_leaf()?, 0)),
            },
            Direction::Desc => match &hi {
                Some((key, pid)) => index.tree.seek_back(key, *pid)?,
                None => index.tree.last_position()?,
            },
        };

        Ok(Self {
            index,
            pos,
            lo,
            hi,
            dir,
            done: false,
        })
    }

    fn in_bounds(&self, entry: &IndexEntry) -> bool {
        let spec = self.index.spec();

        if let Some((lo, lo_pid)) = &self.lo {
            let ord = spec.compare(&entry.key, lo).then(entry.pid.cmp(lo_pid));
            if ord == Ordering::Less {
                return false;
            }
        }
        if let Some((hi, hi_pid)) = &self.hi {
            let ord = spec.compare(&entry.key, hi).then(entry.pid.cmp(hi_pid));
            if ord == Ordering::Greater {
                return false;
            }
        }
        true
    }

    fn step(&mut self) -> Result<Option<IndexEntry>> {
        loop {
            let Some((leaf_id, idx)) = self.pos else {
                return Ok(None);
            };

            let node = self.index.tree.read_node(leaf_id)?;
            let Node::Leaf(leaf) = &*node else {
                return Err(Error::Panic("iterator left the leaf level".into()));
            };

            match self.dir {
                Direction::Asc => {
                    if let Some(entry) = leaf.entries.get(idx) {
                        self.pos = Some((leaf_id, idx + 1));
                        return Ok(Some(entry.clone()));
                    }
                    if leaf.next == 0 {
                        return Ok(None);
                    }
                    self.pos = Some((leaf.next, 0));
                }
                Direction::Desc => {
                    if let Some(entry) = leaf.entries.get(idx) {
                        self.pos = if idx > 0 {
                            Some((leaf_id, idx - 1))
                        } else {
                            self.index.tree.predecessor_leaf(leaf_id)?
                        };
                        return Ok(Some(entry.clone()));
                    }
                    self.pos = self.index.tree.predecessor_leaf(leaf_id)?;
                }
            }
        }
    }
}

impl Iterator for IndexIter {
    type Item = Result<IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let entry = match self.step() {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        if !self.in_bounds(&entry) {
            self.done = true;
            return None;
        }
        Some(Ok(entry))
    }
}

/// The per-scope index catalog
pub struct IndexManager {
    root: PathBuf,
    inner: RwLock<FxHashMap<String, Arc<Index>>>,
}

impl IndexManager {
    fn index_dir(root: &Path, target: &IndexTarget) -> PathBuf {
        match target {
            IndexTarget::Vertex => root.join("vertex").join("index"),
            IndexTarget::Context(name) => root.join("context").join(name).join("index"),
        }
    }

    /// Opens the catalog at the scope root, opening every registered
    /// index.
    pub fn open(root: &Path) -> Result<Self> {
        let mut indexes = FxHashMap::default();

        for desc in read_icat(&root.join(ICAT))? {
            let dir = Self::index_dir(root, &desc.target);
            let index = Index::open(&dir, desc.clone())?;
            indexes.insert(desc.name.clone(), Arc::new(index));
        }

        log::debug!("index catalog at {root:?}: {} indexes", indexes.len());

        Ok(Self {
            root: root.into(),
            inner: RwLock::new(indexes),
        })
    }

    /// Creates and registers a new index.
    pub fn create_index(&self, desc: IndexDesc) -> Result<Arc<Index>> {
        let mut inner = self.inner.write().map_err(Error::poisoned)?;

        if inner.contains_key(&desc.name) {
            return Err(Error::DupKey(desc.name));
        }

        let dir = Self::index_dir(&self.root, &desc.target);
        let index = Arc::new(Index::create(&dir, desc.clone())?);
        inner.insert(desc.name.clone(), index.clone());

        self.persist(&inner)?;
        Ok(index)
    }

    /// Drops an index and its tree file.
    pub fn drop_index(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().map_err(Error::poisoned)?;

        let index = inner
            .remove(name)
            .ok_or_else(|| Error::NoSuchIndex(name.into()))?;

        let path = Self::index_dir(&self.root, &index.desc.target).join(name);
        if let Err(e) = std::fs::remove_file(&path) {
            log::warn!("cannot remove index file {path:?}: {e}");
        }

        self.persist(&inner)
    }

    /// Looks an index up by name.
    pub fn get_index(&self, name: &str) -> Result<Arc<Index>> {
        let inner = self.inner.read().map_err(Error::poisoned)?;
        inner
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NoSuchIndex(name.into()))
    }

    /// All indexes over a target, for the planner's selection.
    pub fn indexes_for(&self, target: &IndexTarget) -> Result<Vec<Arc<Index>>> {
        let inner = self.inner.read().map_err(Error::poisoned)?;
        let mut found: Vec<_> = inner
            .values()
            .filter(|i| &i.desc.target == target)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.desc.name.cmp(&b.desc.name));
        Ok(found)
    }

    fn persist(&self, inner: &FxHashMap<String, Arc<Index>>) -> Result<()> {
        let mut descs: Vec<_> = inner.values().map(|i| i.desc.clone()).collect();
        descs.sort_by(|a, b| a.name.cmp(&b.name));
        write_icat(&self.root.join(ICAT), &descs)
    }
}

fn write_icat(path: &Path, descs: &[IndexDesc]) -> Result<()> {
    let mut buf = Vec::new();
    #[allow(clippy::expect_used)]
    {
        buf.write_all(&ICAT_MAGIC).expect("vec write cannot fail");
        buf.write_u32::<LE>(ICAT_VERSION)
            .expect("vec write cannot fail");
    }

    for desc in descs {
        write_cstr(&mut buf, &desc.name)?;
        match &desc.target {
            IndexTarget::Vertex => buf.push(0),
            IndexTarget::Context(name) => {
                buf.push(1);
                write_cstr(&mut buf, name)?;
            }
        }
        buf.push(u8::from(desc.spec.content));
        #[allow(clippy::expect_used)]
        {
            buf.write_u32::<LE>(desc.sizing).expect("vec write cannot fail");
            #[allow(clippy::cast_possible_truncation)]
            buf.write_u16::<LE>(desc.spec.offsets.len() as u16)
                .expect("vec write cannot fail");
            for off in &desc.spec.offsets {
                buf.write_u32::<LE>(*off).expect("vec write cannot fail");
            }
        }
    }

    crate::io::write_with_backup(path, &buf)
}

fn read_icat(path: &Path) -> Result<Vec<IndexDesc>> {
    let Some(bytes) = crate::io::read_with_recovery(path)? else {
        return Ok(Vec::new());
    };
    let mut reader = &bytes[..];

    let mut magic = [0u8; 4];
    std::io::Read::read_exact(&mut reader, &mut magic)
        .map_err(|_| Error::Catalog(format!("{path:?}: truncated header")))?;
    if magic != ICAT_MAGIC {
        return Err(Error::Catalog(format!("{path:?}: bad magic")));
    }
    let version = reader
        .read_u32::<LE>()
        .map_err(|_| Error::Catalog(format!("{path:?}: truncated header")))?;
    if version != ICAT_VERSION {
        return Err(Error::Catalog(format!("{path:?}: unknown version {version}")));
    }

    let bad = |what: &str| Error::Catalog(format!("{path:?}: {what}"));

    let mut descs = Vec::new();
    while !reader.is_empty() {
        let name = read_cstr(&mut reader).map_err(|_| bad("torn name"))?;
        let target = match reader.read_u8().map_err(|_| bad("torn target"))? {
            0 => IndexTarget::Vertex,
            1 => IndexTarget::Context(read_cstr(&mut reader).map_err(|_| bad("torn context"))?),
            _ => return Err(bad("unknown target")),
        };
        let content = Content::try_from(reader.read_u8().map_err(|_| bad("torn content"))?)
            .map_err(|()| bad("unknown content"))?;
        let sizing = reader.read_u32::<LE>().map_err(|_| bad("torn sizing"))?;
        let nfields = reader.read_u16::<LE>().map_err(|_| bad("torn fields"))?;

        let mut offsets = Vec::with_capacity(nfields as usize);
        for _ in 0..nfields {
            offsets.push(reader.read_u32::<LE>().map_err(|_| bad("torn offset"))?);
        }

        descs.push(IndexDesc {
            name,
            target,
            spec: KeySpec::new(content, offsets),
            sizing,
        });
    }

    Ok(descs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::record::{edge, vertex, EdgeRecord};
    use test_log::test;

    fn edge_spec() -> KeySpec {
        KeySpec::new(Content::Edge, vec![edge::ORIGIN, edge::DESTIN])
    }

    fn desc(name: &str) -> IndexDesc {
        IndexDesc {
            name: name.into(),
            target: IndexTarget::Context("sales".into()),
            spec: edge_spec(),
            sizing: DEFAULT_NODE_SIZE,
        }
    }

    fn pack2(origin: u64, destin: u64) -> Vec<u8> {
        let rec = EdgeRecord::new(edge::RECORD_SIZE)
            .origin(origin)
            .destin(destin)
            .build();
        edge_spec().pack(&rec)
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let spec = KeySpec::new(Content::Vertex, vec![vertex::ROLE, vertex::VERTEX]);
        assert_eq!(12, spec.size());

        let rec = crate::record::make_vertex(9, 77, 1, [0; 8], crate::value::ValueType::Uint);
        let key = spec.pack(&rec);

        let mut stub = vec![0u8; vertex::RECORD_SIZE as usize];
        spec.unpack_into(&key, &mut stub);
        let view = crate::record::VertexView(&stub);
        assert_eq!(9, view.role());
        assert_eq!(77, view.vid());
    }

    #[test]
    fn point_iter_yields_all_pages_of_a_key() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(Index::create(dir.path(), desc("xorig"))?);

        index.insert(&pack2(1, 2), 100, 0)?;
        index.insert(&pack2(1, 2), 200, 5)?;
        index.insert(&pack2(1, 3), 100, 1)?;

        let hits: Vec<_> = index
            .get_iter(&pack2(1, 2))?
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(2, hits.len());
        assert_eq!(100, hits[0].pid);
        assert_eq!(1u128, hits[0].bitmap);
        assert_eq!(200, hits[1].pid);
        Ok(())
    }

    #[test]
    fn range_direction_follows_bounds() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(Index::create(dir.path(), desc("xorig"))?);

        for origin in 1..=5u64 {
            index.insert(&pack2(origin, 0), origin * 10, 0)?;
        }

        let asc: Vec<u64> = index
            .range(Some(&pack2(2, 0)), Some(&pack2(4, u64::MAX)))?
            .map(|e| e.map(|e| e.pid))
            .collect::<Result<_>>()?;
        assert_eq!(vec![20, 30, 40], asc);

        // reversed bounds scan descending
        let desc: Vec<u64> = index
            .range(Some(&pack2(4, u64::MAX)), Some(&pack2(2, 0)))?
            .map(|e| e.map(|e| e.pid))
            .collect::<Result<_>>()?;
        assert_eq!(vec![40, 30, 20], desc);
        Ok(())
    }

    #[test]
    fn does_exist_without_values() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(Index::create(dir.path(), desc("xorig"))?);

        index.insert(&pack2(1, 2), 100, 0)?;
        assert!(index.does_exist(&pack2(1, 2))?);
        assert!(!index.does_exist(&pack2(9, 9))?);
        Ok(())
    }

    #[test]
    fn manager_persists_catalog() -> Result<()> {
        let root = tempfile::tempdir().unwrap();

        {
            let mgr = IndexManager::open(root.path())?;
            mgr.create_index(desc("xorig"))?;
            assert!(matches!(
                mgr.create_index(desc("xorig")),
                Err(Error::DupKey(_))
            ));
        }

        let mgr = IndexManager::open(root.path())?;
        let index = mgr.get_index("xorig")?;
        assert_eq!(edge_spec(), *index.spec());

        assert_eq!(
            1,
            mgr.indexes_for(&IndexTarget::Context("sales".into()))?.len()
        );
        assert!(mgr.indexes_for(&IndexTarget::Vertex)?.is_empty());

        mgr.drop_index("xorig")?;
        assert!(matches!(
            mgr.get_index("xorig"),
            Err(Error::NoSuchIndex(_))
        ));
        Ok(())
    }
}
