// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The physical B+ tree behind an index.
//!
//! Keys are packed projections of record fields; every entry is the
//! composite `(key, page id)` with a 128-bit presence bitmap as its
//! payload. Nodes are fixed-size disk pages updated in place; splits
//! append fresh nodes at the end of the file. Nothing is ever
//! deleted; dropping an index removes the whole file.

use super::KeySpec;
use crate::{error::IoOp, io::PageId, Error, Result};
use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use quick_cache::sync::Cache as QuickCache;
use std::{
    cmp::Ordering,
    io::Write,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

const MAGIC_BYTES: [u8; 4] = [b'N', b'D', b'B', b'X'];
const VERSION: u32 = 1;

/// Node header: kind, entry count, next-leaf link
const LEAF_HDR: usize = 1 + 2 + 8;
const INTERNAL_HDR: usize = 1 + 2;

const KIND_LEAF: u8 = 1;
const KIND_INTERNAL: u8 = 2;

/// Decoded nodes kept hot, keyed by node id
const NODE_CACHE: usize = 256;

/// One leaf entry: composite key and presence bitmap
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    /// Packed projection of the record fields
    pub key: Vec<u8>,

    /// Block the record lives in
    pub pid: PageId,

    /// Which slots of the block carry the key; zero for page-granular
    /// (vertex) indexes
    pub bitmap: u128,
}

#[derive(Clone)]
pub(crate) struct Leaf {
    pub entries: Vec<Entry>,
    pub next: u64,
}

#[derive(Clone)]
pub(crate) struct Internal {
    /// Separators: first composite of the respective right child
    pub keys: Vec<(Vec<u8>, PageId)>,

    /// `keys.len() + 1` children
    pub children: Vec<u64>,
}

#[derive(Clone)]
pub(crate) enum Node {
    Leaf(Leaf),
    Internal(Internal),
}

struct Meta {
    root: u64,
    next_node: u64,
}

/// Disk-backed B+ tree with an in-node LRU cache
pub(crate) struct Tree {
    path: PathBuf,
    spec: KeySpec,
    node_size: usize,
    file: std::fs::File,
    meta: RwLock<Meta>,
    cache: QuickCache<u64, Arc<Node>>,

    /// One writer at a time; reads go lock-free through the cache
    write_lock: std::sync::Mutex<()>,
}

impl Tree {
    fn leaf_capacity(&self) -> usize {
        (self.node_size - LEAF_HDR) / (self.spec.size() + 8 + 16)
    }

    fn internal_capacity(&self) -> usize {
        (self.node_size - INTERNAL_HDR - 8) / (self.spec.size() + 8 + 8)
    }

    /// Creates a fresh tree with one empty leaf as the root.
    pub fn create(path: &Path, spec: KeySpec, node_size: usize) -> Result<Self> {
        if node_size < LEAF_HDR + 2 * (spec.size() + 24) {
            return Err(Error::Invalid("index node size too small".into()));
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| Error::io(IoOp::Open, path, e))?;

        let tree = Self {
            path: path.into(),
            spec,
            node_size,
            file,
            meta: RwLock::new(Meta {
                root: 1,
                next_node: 2,
            }),
            cache: QuickCache::new(NODE_CACHE),
            write_lock: std::sync::Mutex::new(()),
        };

        tree.write_header(1, 2)?;
        tree.write_node(
            1,
            &Node::Leaf(Leaf {
                entries: Vec::new(),
                next: 0,
            }),
        )?;

        Ok(tree)
    }

    /// Opens an existing tree.
    pub fn open(path: &Path, spec: KeySpec, node_size: usize) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::io(IoOp::Open, path, e))?;

        let mut header = vec![0u8; 32];
        file.read_exact_at(&mut header, 0)
            .map_err(|e| Error::io(IoOp::Read, path, e))?;

        let mut reader = &header[..];
        let mut magic = [0u8; 4];
        std::io::Read::read_exact(&mut reader, &mut magic)
            .map_err(|e| Error::io(IoOp::Read, path, e))?;
        if magic != MAGIC_BYTES {
            return Err(Error::Catalog(format!("{path:?}: bad index magic")));
        }

        let version = reader.read_u32::<LE>().map_err(|_| torn(path))?;
        if version != VERSION {
            return Err(Error::Catalog(format!(
                "{path:?}: unknown index version {version}"
            )));
        }

        let keysz = reader.read_u32::<LE>().map_err(|_| torn(path))?;
        if keysz as usize != spec.size() {
            return Err(Error::Catalog(format!(
                "{path:?}: key size mismatch ({keysz} on disk)"
            )));
        }

        let stored_node_size = reader.read_u32::<LE>().map_err(|_| torn(path))?;
        let root = reader.read_u64::<LE>().map_err(|_| torn(path))?;
        let next_node = reader.read_u64::<LE>().map_err(|_| torn(path))?;

        Ok(Self {
            path: path.into(),
            spec,
            node_size: stored_node_size as usize,
            file,
            meta: RwLock::new(Meta { root, next_node }),
            cache: QuickCache::new(NODE_CACHE),
            write_lock: std::sync::Mutex::new(()),
        })
    }

    fn write_header(&self, root: u64, next_node: u64) -> Result<()> {
        let mut buf = Vec::with_capacity(32);
        #[allow(clippy::expect_used)]
        {
            buf.write_all(&MAGIC_BYTES).expect("vec write cannot fail");
            buf.write_u32::<LE>(VERSION).expect("vec write cannot fail");
            #[allow(clippy::cast_possible_truncation)]
            buf.write_u32::<LE>(self.spec.size() as u32)
                .expect("vec write cannot fail");
            #[allow(clippy::cast_possible_truncation)]
            buf.write_u32::<LE>(self.node_size as u32)
                .expect("vec write cannot fail");
            buf.write_u64::<LE>(root).expect("vec write cannot fail");
            buf.write_u64::<LE>(next_node).expect("vec write cannot fail");
        }
        buf.resize(32, 0);

        self.file
            .write_all_at(&buf, 0)
            .map_err(|e| Error::io(IoOp::Write, &self.path, e))
    }

    pub(crate) fn read_node(&self, id: u64) -> Result<Arc<Node>> {
        if let Some(node) = self.cache.get(&id) {
            return Ok(node);
        }

        let mut buf = vec![0u8; self.node_size];
        self.file
            .read_exact_at(&mut buf, id * self.node_size as u64)
            .map_err(|e| Error::io(IoOp::Read, &self.path, e))?;

        let node = Arc::new(self.decode_node(&buf)?);
        self.cache.insert(id, node.clone());
        Ok(node)
    }

    fn write_node(&self, id: u64, node: &Node) -> Result<()> {
        let buf = self.encode_node(node)?;
        self.file
            .write_all_at(&buf, id * self.node_size as u64)
            .map_err(|e| Error::io(IoOp::Write, &self.path, e))?;
        self.cache.insert(id, Arc::new(node.clone()));
        Ok(())
    }

    fn encode_node(&self, node: &Node) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.node_size);

        match node {
            Node::Leaf(leaf) => {
                buf.push(KIND_LEAF);
                #[allow(clippy::cast_possible_truncation, clippy::expect_used)]
                {
                    buf.write_u16::<LE>(leaf.entries.len() as u16)
                        .expect("vec write cannot fail");
                    buf.write_u64::<LE>(leaf.next).expect("vec write cannot fail");
                }
                for entry in &leaf.entries {
                    buf.extend_from_slice(&entry.key);
                    #[allow(clippy::expect_used, clippy::cast_possible_truncation)]
                    {
                        buf.write_u64::<LE>(entry.pid).expect("vec write cannot fail");
                        buf.write_u64::<LE>(entry.bitmap as u64)
                            .expect("vec write cannot fail");
                        buf.write_u64::<LE>((entry.bitmap >> 64) as u64)
                            .expect("vec write cannot fail");
                    }
                }
            }
            Node::Internal(node) => {
                buf.push(KIND_INTERNAL);
                #[allow(clippy::cast_possible_truncation, clippy::expect_used)]
                buf.write_u16::<LE>(node.keys.len() as u16)
                    .expect("vec write cannot fail");
                for (key, pid) in &node.keys {
                    buf.extend_from_slice(key);
                    #[allow(clippy::expect_used)]
                    buf.write_u64::<LE>(*pid).expect("vec write cannot fail");
                }
                for child in &node.children {
                    #[allow(clippy::expect_used)]
                    buf.write_u64::<LE>(*child).expect("vec write cannot fail");
                }
            }
        }

        if buf.len() > self.node_size {
            return Err(Error::Panic(format!(
                "index node overflows its page ({} > {})",
                buf.len(),
                self.node_size
            )));
        }
        buf.resize(self.node_size, 0);
        Ok(buf)
    }

    fn decode_node(&self, buf: &[u8]) -> Result<Node> {
        let keysz = self.spec.size();
        let mut reader = buf;

        let kind = reader.read_u8().map_err(|_| torn(&self.path))?;
        let nkeys = reader.read_u16::<LE>().map_err(|_| torn(&self.path))? as usize;

        match kind {
            KIND_LEAF => {
                let next = reader.read_u64::<LE>().map_err(|_| torn(&self.path))?;
                let mut entries = Vec::with_capacity(nkeys);
                for _ in 0..nkeys {
                    let mut key = vec![0u8; keysz];
                    std::io::Read::read_exact(&mut reader, &mut key)
                        .map_err(|_| torn(&self.path))?;
                    let pid = reader.read_u64::<LE>().map_err(|_| torn(&self.path))?;
                    let lo = reader.read_u64::<LE>().map_err(|_| torn(&self.path))?;
                    let hi = reader.read_u64::<LE>().map_err(|_| torn(&self.path))?;
                    let bitmap = u128::from(lo) | (u128::from(hi) << 64);
                    entries.push(Entry { key, pid, bitmap });
                }
                Ok(Node::Leaf(Leaf { entries, next }))
            }
            KIND_INTERNAL => {
                let mut keys = Vec::with_capacity(nkeys);
                for _ in 0..nkeys {
                    let mut key = vec![0u8; keysz];
                    std::io::Read::read_exact(&mut reader, &mut key)
                        .map_err(|_| torn(&self.path))?;
                    let pid = reader.read_u64::<LE>().map_err(|_| torn(&self.path))?;
                    keys.push((key, pid));
                }
                let mut children = Vec::with_capacity(nkeys + 1);
                for _ in 0..=nkeys {
                    children.push(reader.read_u64::<LE>().map_err(|_| torn(&self.path))?);
                }
                Ok(Node::Internal(Internal { keys, children }))
            }
            _ => Err(Error::Catalog(format!(
                "{:?}: unknown index node kind {kind}",
                self.path
            ))),
        }
    }

    fn compare_composite(&self, a: (&[u8], PageId), b: (&[u8], PageId)) -> Ordering {
        self.spec.compare(a.0, b.0).then(a.1.cmp(&b.1))
    }

    /// Child index for a composite within an internal node.
    fn child_index(&self, node: &Internal, key: &[u8], pid: PageId) -> usize {
        node.keys
            .partition_point(|(k, p)| self.compare_composite((k, *p), (key, pid)) != Ordering::Greater)
    }

    /// Descends to the leaf that must hold `(key, pid)`, recording
    /// the path of internal nodes.
    fn descend(&self, key: &[u8], pid: PageId) -> Result<(u64, Vec<(u64, usize)>)> {
        let mut path = Vec::new();
        let mut id = self.meta.read().map_err(Error::poisoned)?.root;

        loop {
            match &*self.read_node(id)? {
                Node::Leaf(_) => return Ok((id, path)),
                Node::Internal(node) => {
                    let idx = self.child_index(node, key, pid);
                    path.push((id, idx));
                    id = *node.children.get(idx).ok_or_else(|| {
                        Error::Panic("index child pointer out of range".into())
                    })?;
                }
            }
        }
    }

    /// Inserts or extends one entry.
    ///
    /// An existing `(key, pid)` entry gets `slot`'s bit added to its
    /// bitmap; a new entry is created otherwise. `slot` is ignored
    /// for page-granular specs.
    pub fn insert(&self, key: &[u8], pid: PageId, slot: Option<usize>) -> Result<()> {
        if key.len() != self.spec.size() {
            return Err(Error::Invalid(format!(
                "index key of {} bytes, expected {}",
                key.len(),
                self.spec.size()
            )));
        }

        let bit = match slot {
            Some(slot) if slot < 128 => 1u128 << slot,
            Some(_) => {
                return Err(Error::Invalid(
                    "record slot beyond the presence bitmap".into(),
                ))
            }
            None => 0,
        };

        let _guard = self.write_lock.lock().map_err(Error::poisoned)?;

        let (leaf_id, path) = self.descend(key, pid)?;
        let Node::Leaf(leaf) = &*self.read_node(leaf_id)? else {
            return Err(Error::Panic("descend ended on an internal node".into()));
        };
        let mut leaf = leaf.clone();

        match leaf.entries.binary_search_by(|e| {
            self.compare_composite((&e.key, e.pid), (key, pid))
        }) {
            Ok(pos) => {
                #[allow(clippy::indexing_slicing)]
                {
                    leaf.entries[pos].bitmap |= bit;
                }
                self.write_node(leaf_id, &Node::Leaf(leaf))?;
            }
            Err(pos) => {
                leaf.entries.insert(
                    pos,
                    Entry {
                        key: key.to_vec(),
                        pid,
                        bitmap: bit,
                    },
                );

                if leaf.entries.len() <= self.leaf_capacity() {
                    self.write_node(leaf_id, &Node::Leaf(leaf))?;
                } else {
                    self.split_leaf(leaf_id, leaf, path)?;
                }
            }
        }

        Ok(())
    }

    fn allocate(&self) -> Result<u64> {
        let mut meta = self.meta.write().map_err(Error::poisoned)?;
        let id = meta.next_node;
        meta.next_node += 1;
        self.write_header(meta.root, meta.next_node)?;
        Ok(id)
    }

    fn split_leaf(&self, leaf_id: u64, mut leaf: Leaf, path: Vec<(u64, usize)>) -> Result<()> {
        let mid = leaf.entries.len() / 2;
        let right_entries = leaf.entries.split_off(mid);

        #[allow(clippy::expect_used)]
        let sep = {
            let first = right_entries.first().expect("right half is never empty");
            (first.key.clone(), first.pid)
        };

        let right_id = self.allocate()?;
        let right = Leaf {
            entries: right_entries,
            next: leaf.next,
        };
        leaf.next = right_id;

        self.write_node(right_id, &Node::Leaf(right))?;
        self.write_node(leaf_id, &Node::Leaf(leaf))?;

        self.insert_separator(path, sep, right_id)
    }

    fn insert_separator(
        &self,
        mut path: Vec<(u64, usize)>,
        sep: (Vec<u8>, PageId),
        right_id: u64,
    ) -> Result<()> {
        let Some((parent_id, child_idx)) = path.pop() else {
            // the root split: grow the tree by one level
            let new_root = self.allocate()?;
            let mut meta = self.meta.write().map_err(Error::poisoned)?;
            let old_root = meta.root;

            self.write_node(
                new_root,
                &Node::Internal(Internal {
                    keys: vec![sep],
                    children: vec![old_root, right_id],
                }),
            )?;

            meta.root = new_root;
            self.write_header(meta.root, meta.next_node)?;
            return Ok(());
        };

        let Node::Internal(parent) = &*self.read_node(parent_id)? else {
            return Err(Error::Panic("leaf on the internal path".into()));
        };
        let mut parent = parent.clone();

        parent.keys.insert(child_idx, sep);
        parent.children.insert(child_idx + 1, right_id);

        if parent.keys.len() <= self.internal_capacity() {
            return self.write_node(parent_id, &Node::Internal(parent));
        }

        // split the internal node; the middle key moves up
        let mid = parent.keys.len() / 2;
        let up = parent
            .keys
            .get(mid)
            .cloned()
            .ok_or_else(|| Error::Panic("internal split out of range".into()))?;

        let right_keys = parent.keys.split_off(mid + 1);
        parent.keys.pop();
        let right_children = parent.children.split_off(mid + 1);

        let new_right = self.allocate()?;
        self.write_node(
            new_right,
            &Node::Internal(Internal {
                keys: right_keys,
                children: right_children,
            }),
        )?;
        self.write_node(parent_id, &Node::Internal(parent))?;

        self.insert_separator(path, up, new_right)
    }

    /// First leaf position at or after the composite `(key, pid)`.
    pub(crate) fn seek(&self, key: &[u8], pid: PageId) -> Result<(u64, usize)> {
        let (leaf_id, _) = self.descend(key, pid)?;
        let Node::Leaf(leaf) = &*self.read_node(leaf_id)? else {
            return Err(Error::Panic("descend ended on an internal node".into()));
        };

        let idx = leaf
            .entries
            .partition_point(|e| self.compare_composite((&e.key, e.pid), (key, pid)) == Ordering::Less);
        Ok((leaf_id, idx))
    }

    /// Leftmost leaf of the tree.
    pub(crate) fn first_leaf(&self) -> Result<u64> {
        let mut id = self.meta.read().map_err(Error::poisoned)?.root;
        loop {
            match &*self.read_node(id)? {
                Node::Leaf(_) => return Ok(id),
                Node::Internal(node) => {
                    id = *node.children.first().ok_or_else(|| {
                        Error::Panic("internal node without children".into())
                    })?;
                }
            }
        }
    }

    /// Last leaf position at or before the composite `(key, pid)`;
    /// `None` when everything is greater.
    pub(crate) fn seek_back(&self, key: &[u8], pid: PageId) -> Result<Option<(u64, usize)>> {
        let (leaf_id, _) = self.descend(key, pid)?;
        let Node::Leaf(leaf) = &*self.read_node(leaf_id)? else {
            return Err(Error::Panic("descend ended on an internal node".into()));
        };

        let upto = leaf
            .entries
            .partition_point(|e| self.compare_composite((&e.key, e.pid), (key, pid)) != Ordering::Greater);
        if upto > 0 {
            return Ok(Some((leaf_id, upto - 1)));
        }

        // everything in this leaf is greater; the predecessor leaf
        // ends right before this leaf's lower bound
        self.predecessor_leaf(leaf_id)
    }

    /// Rightmost position of the leaf preceding `leaf_id`.
    pub(crate) fn predecessor_leaf(&self, leaf_id: u64) -> Result<Option<(u64, usize)>> {
        let mut id = self.meta.read().map_err(Error::poisoned)?.root;
        let mut candidate: Option<u64> = None;

        // walk down, remembering the nearest left sibling subtree
        loop {
            if id == leaf_id {
                break;
            }
            match &*self.read_node(id)? {
                Node::Leaf(_) => break,
                Node::Internal(node) => {
                    let pos = node.children.iter().position(|c| {
                        self.subtree_contains(*c, leaf_id).unwrap_or(false)
                    });
                    let Some(pos) = pos else {
                        return Ok(None);
                    };
                    if pos > 0 {
                        candidate = node.children.get(pos - 1).copied();
                    }
                    id = *node.children.get(pos).ok_or_else(|| {
                        Error::Panic("index child pointer out of range".into())
                    })?;
                }
            }
        }

        let Some(mut id) = candidate else {
            return Ok(None);
        };

        // rightmost leaf of the left subtree
        loop {
            match &*self.read_node(id)? {
                Node::Leaf(leaf) => {
                    if leaf.entries.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some((id, leaf.entries.len() - 1)));
                }
                Node::Internal(node) => {
                    id = *node.children.last().ok_or_else(|| {
                        Error::Panic("internal node without children".into())
                    })?;
                }
            }
        }
    }

    fn subtree_contains(&self, id: u64, leaf_id: u64) -> Result<bool> {
        if id == leaf_id {
            return Ok(true);
        }
        match &*self.read_node(id)? {
            Node::Leaf(_) => Ok(false),
            Node::Internal(node) => {
                for child in &node.children {
                    if self.subtree_contains(*child, leaf_id)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// Rightmost position of the whole tree.
    pub(crate) fn last_position(&self) -> Result<Option<(u64, usize)>> {
        let mut id = self.meta.read().map_err(Error::poisoned)?.root;
        loop {
            match &*self.read_node(id)? {
                Node::Leaf(leaf) => {
                    if leaf.entries.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some((id, leaf.entries.len() - 1)));
                }
                Node::Internal(node) => {
                    id = *node.children.last().ok_or_else(|| {
                        Error::Panic("internal node without children".into())
                    })?;
                }
            }
        }
    }

    /// The key spec the tree is built over.
    pub(crate) fn spec(&self) -> &KeySpec {
        &self.spec
    }

    /// Flushes the OS handle.
    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_data()
            .map_err(|e| Error::io(IoOp::Sync, &self.path, e))
    }
}

fn torn(path: &Path) -> Error {
    Error::Catalog(format!("{path:?}: torn index node"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::record::{edge, Content};
    use test_log::test;

    fn spec() -> KeySpec {
        KeySpec::new(Content::Edge, vec![edge::ORIGIN])
    }

    fn key(origin: u64) -> Vec<u8> {
        origin.to_le_bytes().to_vec()
    }

    #[test]
    fn insert_and_seek() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let tree = Tree::create(&dir.path().join("idx"), spec(), 512)?;

        for origin in (0..200u64).rev() {
            tree.insert(&key(origin), origin * 10, Some(3))?;
        }

        // every key is found at its composite position
        for origin in 0..200u64 {
            let (leaf_id, idx) = tree.seek(&key(origin), 0)?;
            let Node::Leaf(leaf) = &*tree.read_node(leaf_id)? else {
                panic!("expected leaf");
            };
            let entry = &leaf.entries[idx];
            assert_eq!(key(origin), entry.key);
            assert_eq!(origin * 10, entry.pid);
            assert_eq!(1u128 << 3, entry.bitmap);
        }
        Ok(())
    }

    #[test]
    fn duplicate_inserts_merge_bitmaps() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let tree = Tree::create(&dir.path().join("idx"), spec(), 512)?;

        tree.insert(&key(7), 40, Some(0))?;
        tree.insert(&key(7), 40, Some(5))?;

        let (leaf_id, idx) = tree.seek(&key(7), 0)?;
        let Node::Leaf(leaf) = &*tree.read_node(leaf_id)? else {
            panic!("expected leaf");
        };
        assert_eq!((1u128 << 0) | (1u128 << 5), leaf.entries[idx].bitmap);
        Ok(())
    }

    #[test]
    fn survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx");

        {
            let tree = Tree::create(&path, spec(), 512)?;
            for origin in 0..500u64 {
                tree.insert(&key(origin), origin, None)?;
            }
            tree.sync()?;
        }

        let tree = Tree::open(&path, spec(), 512)?;
        let (leaf_id, idx) = tree.seek(&key(499), 0)?;
        let Node::Leaf(leaf) = &*tree.read_node(leaf_id)? else {
            panic!("expected leaf");
        };
        assert_eq!(key(499), leaf.entries[idx].key);
        Ok(())
    }

    #[test]
    fn leaf_chain_is_ordered() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let tree = Tree::create(&dir.path().join("idx"), spec(), 512)?;

        let mut origins: Vec<u64> = (0..300).collect();
        // insert in a scrambled order
        origins.reverse();
        origins.rotate_left(57);
        for origin in origins {
            tree.insert(&key(origin), 1, None)?;
        }

        let mut seen = Vec::new();
        let mut leaf_id = tree.first_leaf()?;
        loop {
            let Node::Leaf(leaf) = &*tree.read_node(leaf_id)? else {
                panic!("expected leaf");
            };
            for e in &leaf.entries {
                seen.push(u64::from_le_bytes(e.key.clone().try_into().unwrap()));
            }
            if leaf.next == 0 {
                break;
            }
            leaf_id = leaf.next;
        }

        assert_eq!((0..300u64).collect::<Vec<_>>(), seen);
        Ok(())
    }
}
