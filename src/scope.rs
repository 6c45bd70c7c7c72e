// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The scope: one database namespace on disk.
//!
//! A scope owns the model, the text dictionary, the index catalog,
//! the vertex store and one edge store per context. Queries enter
//! here: a statement is planned against the catalogs and executed by
//! a cursor over the right store.
//!
//! Lock order is scope, then store, then model, then text; no path
//! through this module acquires them in any other order.

use crate::{
    cursor::Cursor,
    index::{IndexDesc, IndexManager, IndexTarget, KeySpec, DEFAULT_NODE_SIZE},
    model::{Model, PropertyDecl, VidKind},
    plan::{PlanNode, Planner, SelectStmt, Target},
    record::{edge, make_vertex, vertex, Content, EdgeRecord},
    store::{SorterHook, Store, StoreConfig},
    text::Text,
    value::{Value, ValueType},
    Error, Result,
};
use quick_cache::sync::Cache as QuickCache;
use rustc_hash::FxHashMap;
use std::{
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

/// The built-in vertex index over `(role, vid)`
pub const VID_INDEX: &str = "_vid";

/// Entries of the vertex registration caches
const VCACHE: usize = 65_536;

/// One edge to insert
#[derive(Clone, Debug)]
pub struct EdgeInsert {
    /// Origin vertex id
    pub origin: u64,

    /// Destination vertex id
    pub destin: u64,

    /// Timestamp
    pub timestamp: i64,

    /// Label value; text is interned
    pub label: Option<Value>,

    /// First weight
    pub weight: Option<Value>,

    /// Second weight
    pub weight2: Option<Value>,
}

struct ScopeState {
    open: bool,
    vertex: Option<Arc<Store>>,
    contexts: FxHashMap<String, Arc<Store>>,
}

/// A database namespace
pub struct Scope {
    path: PathBuf,
    model: Arc<Model>,
    text: Arc<Text>,
    indexes: Arc<IndexManager>,
    state: RwLock<ScopeState>,

    /// Recently registered primary keys, by `(role, key bits)`
    evache: QuickCache<(u32, u64), ()>,

    /// Recently registered vids, by `(role, vid)`
    ivache: QuickCache<(u32, u64), ()>,

    /// Store tuning applied to new and reopened stores
    filesize: u32,
}

impl Scope {
    fn vertex_dir(path: &Path) -> PathBuf {
        path.join("vertex")
    }

    fn context_dir(path: &Path, name: &str) -> PathBuf {
        path.join("context").join(name)
    }

    /// Creates a scope directory tree and its catalogs.
    pub fn create(path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)
            .map_err(|e| Error::io(crate::error::IoOp::Open, path, e))?;

        Model::open(&path.join("model"))?;
        Text::open(&path.join("text"))?;

        Store::create(&StoreConfig::vertex(Self::vertex_dir(path)))?;

        let indexes = IndexManager::open(path)?;
        indexes.create_index(IndexDesc {
            name: VID_INDEX.into(),
            target: IndexTarget::Vertex,
            spec: KeySpec::new(Content::Vertex, vec![vertex::ROLE, vertex::VERTEX]),
            sizing: DEFAULT_NODE_SIZE,
        })?;

        log::info!("created scope at {path:?}");
        Ok(())
    }

    /// Opens a scope: catalogs, the vertex store and every context
    /// found on disk.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_filesize(path, StoreConfig::vertex(PathBuf::new()).filesize)
    }

    /// Opens a scope with an explicit writer capacity for its
    /// stores (small capacities force frequent sorts, which tests
    /// rely on).
    pub fn open_with_filesize(path: &Path, filesize: u32) -> Result<Self> {
        let model = Arc::new(Model::open(&path.join("model"))?);
        let text = Arc::new(Text::open(&path.join("text"))?);
        let indexes = Arc::new(IndexManager::open(path)?);

        let scope = Self {
            path: path.into(),
            model,
            text,
            indexes,
            state: RwLock::new(ScopeState {
                open: false,
                vertex: None,
                contexts: FxHashMap::default(),
            }),
            evache: QuickCache::new(VCACHE),
            ivache: QuickCache::new(VCACHE),
            filesize,
        };

        {
            let mut state = scope.state.write().map_err(Error::poisoned)?;

            let vstore = Arc::new(Store::open(
                StoreConfig::vertex(Self::vertex_dir(path)).with_filesize(filesize),
            )?);
            vstore.set_sorter_hook(scope.index_hook(IndexTarget::Vertex))?;
            state.vertex = Some(vstore);

            let context_root = path.join("context");
            if context_root.is_dir() {
                let entries = std::fs::read_dir(&context_root)
                    .map_err(|e| Error::io(crate::error::IoOp::Open, &context_root, e))?;
                for entry in entries {
                    let entry =
                        entry.map_err(|e| Error::io(crate::error::IoOp::Read, &context_root, e))?;
                    let Some(name) = entry.file_name().to_str().map(String::from) else {
                        continue;
                    };
                    let store = Arc::new(Store::open(
                        StoreConfig::edge(Self::context_dir(path, &name))
                            .with_filesize(filesize),
                    )?);
                    store
                        .set_sorter_hook(scope.index_hook(IndexTarget::Context(name.clone())))?;
                    state.contexts.insert(name, store);
                }
            }

            state.open = true;
        }

        log::info!("opened scope at {path:?}");
        Ok(scope)
    }

    /// The sorter hook registering freshly sorted files with every
    /// index of the target.
    fn index_hook(&self, target: IndexTarget) -> SorterHook {
        let indexes = self.indexes.clone();
        Arc::new(move |file| {
            for index in indexes.indexes_for(&target)? {
                index.register_file(file)?;
            }
            Ok(())
        })
    }

    /// The schema catalog.
    #[must_use]
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// The text dictionary.
    #[must_use]
    pub fn text(&self) -> &Arc<Text> {
        &self.text
    }

    /// The index catalog.
    #[must_use]
    pub fn indexes(&self) -> &Arc<IndexManager> {
        &self.indexes
    }

    fn vertex_store(&self) -> Result<Arc<Store>> {
        let state = self.state.read().map_err(Error::poisoned)?;
        if !state.open {
            return Err(Error::Invalid("scope is closed".into()));
        }
        state
            .vertex
            .clone()
            .ok_or_else(|| Error::Invalid("scope has no vertex store".into()))
    }

    fn context_store(&self, name: &str) -> Result<Arc<Store>> {
        let state = self.state.read().map_err(Error::poisoned)?;
        if !state.open {
            return Err(Error::Invalid("scope is closed".into()));
        }
        state
            .contexts
            .get(name)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(format!("context {name}")))
    }

    /// Creates a named edge store.
    pub fn create_context(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.contains(['/', '\\', '.']) {
            return Err(Error::Invalid(format!("bad context name: {name}")));
        }

        let mut state = self.state.write().map_err(Error::poisoned)?;
        if state.contexts.contains_key(name) {
            return Err(Error::DupKey(name.into()));
        }

        let cfg = StoreConfig::edge(Self::context_dir(&self.path, name))
            .with_filesize(self.filesize);
        Store::create(&cfg)?;
        let store = Arc::new(Store::open(cfg)?);
        store.set_sorter_hook(self.index_hook(IndexTarget::Context(name.into())))?;

        state.contexts.insert(name.into(), store);
        log::info!("created context {name}");
        Ok(())
    }

    /// Drops a context and its files.
    pub fn drop_context(&self, name: &str) -> Result<()> {
        let store = {
            let mut state = self.state.write().map_err(Error::poisoned)?;
            state
                .contexts
                .remove(name)
                .ok_or_else(|| Error::KeyNotFound(format!("context {name}")))?
        };

        // the store persists its catalog on close; remove afterwards
        drop(store);
        let dir = Self::context_dir(&self.path, name);
        std::fs::remove_dir_all(&dir).map_err(|e| Error::io(crate::error::IoOp::Remove, &dir, e))?;

        log::info!("dropped context {name}");
        Ok(())
    }

    /// Creates a vertex type.
    pub fn create_type(&self, name: &str, props: &[PropertyDecl]) -> Result<()> {
        self.model.add_type(name, props)?;
        Ok(())
    }

    /// Creates an edge type and its context store.
    pub fn create_edge(
        &self,
        name: &str,
        origin: &str,
        destin: &str,
        label: ValueType,
        weight: ValueType,
        weight2: ValueType,
    ) -> Result<()> {
        self.model
            .add_edge(name, origin, destin, label, weight, weight2)?;
        self.create_context(name)
    }

    /// Creates an index over an edge context.
    ///
    /// Fields are the builtin edge field names; existing sorted
    /// files are registered right away.
    pub fn create_index(&self, name: &str, context: &str, fields: &[&str]) -> Result<()> {
        let offsets = fields
            .iter()
            .map(|f| match *f {
                "origin" => Ok(edge::ORIGIN),
                "destin" => Ok(edge::DESTIN),
                "edge" => Ok(edge::EDGE),
                "label" => Ok(edge::LABEL),
                "timestamp" | "stamp" => Ok(edge::TMSTMP),
                "weight" => Ok(edge::WEIGHT),
                "weight2" => Ok(edge::WEIGHT2),
                other => Err(Error::KeyNotFound(other.into())),
            })
            .collect::<Result<Vec<_>>>()?;

        let store = self.context_store(context)?;

        let index = self.indexes.create_index(IndexDesc {
            name: name.into(),
            target: IndexTarget::Context(context.into()),
            spec: KeySpec::new(Content::Edge, offsets),
            sizing: DEFAULT_NODE_SIZE,
        })?;

        // catch up on files sorted before the index existed
        let (sorted, _) = store.get_files_split(&crate::time::Period::ALL)?;
        for file in &sorted {
            index.register_file(file)?;
        }
        Ok(())
    }

    /// Drops an index.
    pub fn drop_index(&self, name: &str) -> Result<()> {
        if name == VID_INDEX {
            return Err(Error::Invalid("the vid index is built in".into()));
        }
        self.indexes.drop_index(name)
    }

    /// Registers a vertex id, failing on duplicates.
    ///
    /// The caches keep recently registered pairs so bulk loads do
    /// not hit the on-disk index on every insert.
    pub fn register_vertex(&self, type_name: &str, vid: u64) -> Result<()> {
        let vertex_type = self.model.get_vertex_by_name(type_name)?;
        let role = vertex_type.roleid;

        if self.evache.get(&(role, vid)).is_some() || self.ivache.get(&(role, vid)).is_some() {
            return Err(Error::DupKey(format!("{type_name}:{vid}")));
        }

        let stub = make_vertex(role, vid, 0, [0; 8], ValueType::Nothing);
        let index = self.indexes.get_index(VID_INDEX)?;
        if index.does_exist(&index.spec().pack(&stub))? {
            return Err(Error::DupKey(format!("{type_name}:{vid}")));
        }

        self.evache.insert((role, vid), ());
        self.ivache.insert((role, vid), ());
        Ok(())
    }

    /// Inserts a vertex: registers its id and appends one record per
    /// property (the primary key included).
    pub fn insert_vertex(
        &self,
        type_name: &str,
        values: &[(&str, Value)],
    ) -> Result<u64> {
        let vertex_type = self.model.get_vertex_by_name(type_name)?;
        let role = vertex_type.roleid;
        let pk = self.model.get_pk(role)?;

        let (_, pk_value) = values
            .iter()
            .find(|(name, _)| *name == pk.name)
            .ok_or_else(|| Error::Invalid(format!("missing primary key {}", pk.name)))?;

        let vid = match (vertex_type.vid, pk_value) {
            (VidKind::Text, Value::Text(s)) => self.text.insert(s)?,
            (VidKind::Text, other) => other
                .as_u64()
                .ok_or_else(|| Error::Invalid("bad primary key value".into()))?,
            (VidKind::Numeric, other) => other
                .as_u64()
                .ok_or_else(|| Error::Invalid("bad primary key value".into()))?,
        };

        self.register_vertex(type_name, vid)?;

        let store = self.vertex_store()?;
        for (name, value) in values {
            let prop = self.model.get_prop_by_name(role, name)?;

            let raw = match value {
                Value::Text(s) => self.text.insert(s)?.to_le_bytes(),
                other => other.to_raw()?,
            };

            let record = make_vertex(role, vid, prop.propid, raw, prop.value);
            store.insert(&record)?;
        }

        Ok(vid)
    }

    /// Inserts one edge record into a context.
    pub fn insert_edge(&self, context: &str, e: &EdgeInsert) -> Result<()> {
        let edge_model = self.model.get_edge_by_name(context).ok();
        let store = self.context_store(context)?;

        let mut rec = EdgeRecord::new(store.config().recordsize)
            .origin(e.origin)
            .destin(e.destin)
            .timestamp(e.timestamp);

        if let Some(edge_model) = &edge_model {
            rec = rec.edge_id(edge_model.edgeid);
        }

        let mut slot = |value: &Option<Value>| -> Result<[u8; 8]> {
            Ok(match value {
                None => [0; 8],
                Some(Value::Text(s)) => self.text.insert(s)?.to_le_bytes(),
                Some(other) => other.to_raw()?,
            })
        };

        let label = slot(&e.label)?;
        let weight = slot(&e.weight)?;
        let weight2 = slot(&e.weight2)?;

        let record = rec.label(u64::from_le_bytes(label)).weight(weight).weight2(weight2).build();
        store.insert(&record)
    }

    /// Plans and opens a cursor for a SELECT statement.
    pub fn execute(&self, stmt: &SelectStmt) -> Result<Cursor> {
        let planner = Planner::new(&self.model, &self.indexes, &self.text);
        let plan = planner.plan(stmt)?;

        let store = match plan
            .iter()
            .find_map(|n| match n {
                PlanNode::Summary { target, .. } => Some(target),
                _ => None,
            })
            .ok_or_else(|| Error::Panic("plan without a summary".into()))?
        {
            Target::Vertex { .. } => self.vertex_store()?,
            Target::Edge { name, .. } => self.context_store(name)?,
        };

        let mut cursor = Cursor::build(
            self.model.clone(),
            self.text.clone(),
            &self.indexes,
            &store,
            plan,
        )?;
        cursor.open()?;
        Ok(cursor)
    }

    /// Drops files whose every timestamp is older than `bound`, in
    /// every context.
    pub fn drop_older_than(&self, bound: i64) -> Result<usize> {
        let stores: Vec<_> = {
            let state = self.state.read().map_err(Error::poisoned)?;
            state.contexts.values().cloned().collect()
        };

        let mut dropped = 0;
        for store in stores {
            dropped += store.drop_older_than(bound)?;
        }
        Ok(dropped)
    }

    /// Flushes all stores and catalogs.
    pub fn sync(&self) -> Result<()> {
        self.text.sync()?;

        let state = self.state.read().map_err(Error::poisoned)?;
        if let Some(vstore) = &state.vertex {
            let _ = vstore.get_files_split(&crate::time::Period::ALL)?;
        }
        for store in state.contexts.values() {
            let _ = store.get_files_split(&crate::time::Period::ALL)?;
        }
        Ok(())
    }

    /// Blocks until every store's pending files are sorted, or the
    /// timeout passes.
    pub fn wait_sorted(&self, timeout: std::time::Duration) -> Result<bool> {
        let stores: Vec<_> = {
            let state = self.state.read().map_err(Error::poisoned)?;
            state
                .vertex
                .iter()
                .chain(state.contexts.values())
                .cloned()
                .collect()
        };

        let mut done = true;
        for store in stores {
            done &= store.wait_sorted(timeout)?;
        }
        Ok(done)
    }

    /// Closes the scope, persisting every catalog.
    pub fn close(self) -> Result<()> {
        let mut state = self.state.write().map_err(Error::poisoned)?;
        state.open = false;
        state.vertex = None;
        state.contexts.clear();

        log::info!("closed scope at {:?}", self.path);
        Ok(())
    }

    /// Removes a scope from disk entirely.
    pub fn remove(path: &Path) -> Result<()> {
        std::fs::remove_dir_all(path)
            .map_err(|e| Error::io(crate::error::IoOp::Remove, path, e))
    }
}
