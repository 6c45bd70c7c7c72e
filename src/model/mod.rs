// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The schema catalog: vertex types, their properties, edge types
//! and edge properties, with stable ids and persistent storage.

mod types;

pub use types::{Edge, Pedge, Property, Vertex, VidKind};

use crate::{
    coding::{Decode, Encode},
    record::{attr_ctrl_size, edge as edge_offsets},
    value::ValueType,
    Error, Result,
};
use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use rustc_hash::FxHashMap;
use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

const VERTEX_FILE: &str = "vertex.model";
const PROPERTY_FILE: &str = "property.model";
const EDGE_FILE: &str = "edge.model";
const PEDGE_FILE: &str = "pedge.model";

const MAGIC_BYTES: [u8; 4] = [b'N', b'D', b'B', b'M'];
const VERSION: u32 = 1;

/// What a name refers to
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ElementKind {
    /// A vertex type
    Vertex,

    /// An edge type
    Edge,
}

/// A property as declared in `CREATE TYPE`
#[derive(Clone, Debug)]
pub struct PropertyDecl {
    /// Property name
    pub name: String,

    /// Value type
    pub value: ValueType,

    /// Primary key flag
    pub pk: bool,

    /// Stamp flag
    pub stamp: bool,

    /// Auto-increment flag
    pub inc: bool,
}

impl PropertyDecl {
    /// Plain property.
    #[must_use]
    pub fn plain(name: &str, value: ValueType) -> Self {
        Self {
            name: name.into(),
            value,
            pk: false,
            stamp: false,
            inc: false,
        }
    }

    /// Primary-key property.
    #[must_use]
    pub fn pk(name: &str, value: ValueType) -> Self {
        Self {
            name: name.into(),
            value,
            pk: true,
            stamp: false,
            inc: false,
        }
    }

    /// Stamp property.
    #[must_use]
    pub fn stamp(name: &str) -> Self {
        Self {
            name: name.into(),
            value: ValueType::Time,
            pk: false,
            stamp: true,
            inc: false,
        }
    }
}

/// An edge property as declared in `CREATE EDGE`
#[derive(Clone, Debug)]
pub struct PedgeDecl {
    /// Property name
    pub name: String,

    /// Value type
    pub value: ValueType,

    /// This property references the origin
    pub origin: bool,

    /// This property references the destination
    pub destin: bool,

    /// This property is the stamp
    pub stamp: bool,
}

#[derive(Default)]
struct ModelInner {
    vertices_by_id: FxHashMap<u32, Arc<Vertex>>,
    vertices_by_name: FxHashMap<String, Arc<Vertex>>,

    props_by_id: FxHashMap<(u32, u64), Arc<Property>>,
    props_by_name: FxHashMap<(u32, String), Arc<Property>>,
    props_by_role: FxHashMap<u32, Vec<Arc<Property>>>,
    pk_by_role: FxHashMap<u32, Arc<Property>>,

    edges_by_id: FxHashMap<u64, Arc<Edge>>,
    edges_by_name: FxHashMap<String, Arc<Edge>>,

    pedges_by_id: FxHashMap<(u64, u64), Arc<Pedge>>,
    pedges_by_name: FxHashMap<(u64, String), Arc<Pedge>>,

    next_propid: u64,
    next_edgeid: u64,
}

/// The model catalog
///
/// All four entity trees hang off one lock; additions assign ids,
/// derive sizes and slot offsets, and persist the touched catalog
/// file with backup.
pub struct Model {
    dir: PathBuf,
    inner: RwLock<ModelInner>,
}

impl Model {
    /// Opens (or creates) the model below `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::io(crate::error::IoOp::Open, dir, e))?;

        let mut inner = ModelInner {
            next_propid: 1,
            next_edgeid: 1,
            ..ModelInner::default()
        };

        for vertex in load_entries::<Vertex>(&dir.join(VERTEX_FILE))? {
            let vertex = Arc::new(vertex);
            inner.vertices_by_id.insert(vertex.roleid, vertex.clone());
            inner
                .vertices_by_name
                .insert(vertex.name.clone(), vertex.clone());
        }

        for prop in load_entries::<Property>(&dir.join(PROPERTY_FILE))? {
            inner.next_propid = inner.next_propid.max(prop.propid + 1);
            index_property(&mut inner, Arc::new(prop));
        }

        for edge in load_entries::<Edge>(&dir.join(EDGE_FILE))? {
            inner.next_edgeid = inner.next_edgeid.max(edge.edgeid + 1);
            let edge = Arc::new(edge);
            inner.edges_by_id.insert(edge.edgeid, edge.clone());
            inner.edges_by_name.insert(edge.name.clone(), edge.clone());
        }

        for pedge in load_entries::<Pedge>(&dir.join(PEDGE_FILE))? {
            inner.next_propid = inner.next_propid.max(pedge.propid + 1);
            let pedge = Arc::new(pedge);
            inner
                .pedges_by_id
                .insert((pedge.edgeid, pedge.propid), pedge.clone());
            inner
                .pedges_by_name
                .insert((pedge.edgeid, pedge.name.clone()), pedge.clone());
        }

        log::debug!(
            "model at {dir:?}: {} types, {} edges",
            inner.vertices_by_id.len(),
            inner.edges_by_id.len()
        );

        Ok(Self {
            dir: dir.into(),
            inner: RwLock::new(inner),
        })
    }

    /// Adds a vertex type with its properties.
    ///
    /// Exactly one property must be the primary key; it gets slot 0.
    /// A stamp property, if declared, gets slot 1. All other slots
    /// follow declared order.
    pub fn add_type(&self, name: &str, props: &[PropertyDecl]) -> Result<Arc<Vertex>> {
        let mut inner = self.inner.write().map_err(Error::poisoned)?;

        if inner.vertices_by_name.contains_key(name) || inner.edges_by_name.contains_key(name) {
            return Err(Error::DupKey(name.into()));
        }

        let pks = props.iter().filter(|p| p.pk).count();
        if pks != 1 {
            return Err(Error::Invalid(format!(
                "type {name} declares {pks} primary keys"
            )));
        }
        if props.iter().filter(|p| p.stamp).count() > 1 {
            return Err(Error::Invalid(format!(
                "type {name} declares more than one stamp"
            )));
        }

        let roleid = inner
            .vertices_by_id
            .keys()
            .max()
            .map_or(1, |max| max + 1);

        #[allow(clippy::cast_possible_truncation)]
        let num = props.len() as u16;
        let ctrl = attr_ctrl_size(u32::from(num));

        #[allow(clippy::expect_used)]
        let pk_decl = props.iter().find(|p| p.pk).expect("checked above");

        let vertex = Arc::new(Vertex {
            roleid,
            name: name.into(),
            vid: if pk_decl.value == ValueType::Text {
                VidKind::Text
            } else {
                VidKind::Numeric
            },
            stamped: props.iter().any(|p| p.stamp),
            num,
            ctrl,
            size: 8 * u32::from(num) + ctrl,
        });

        // pk to slot 0, stamp to slot 1, the rest in declared order
        let mut next_off = 1 + u32::from(vertex.stamped);
        let mut new_props = Vec::with_capacity(props.len());

        for (pos, decl) in props.iter().enumerate() {
            if new_props.iter().any(|p: &Property| p.name == decl.name) {
                return Err(Error::DupKey(format!("{name}.{}", decl.name)));
            }

            let off = if decl.pk {
                0
            } else if decl.stamp {
                1
            } else {
                let off = next_off;
                next_off += 1;
                off
            };

            let propid = inner.next_propid;
            inner.next_propid += 1;

            #[allow(clippy::cast_possible_truncation)]
            new_props.push(Property {
                propid,
                roleid,
                pos: pos as u32,
                value: decl.value,
                pk: decl.pk,
                stamp: decl.stamp,
                inc: decl.inc,
                off,
                name: decl.name.clone(),
            });
        }

        inner.vertices_by_id.insert(roleid, vertex.clone());
        inner
            .vertices_by_name
            .insert(vertex.name.clone(), vertex.clone());
        for prop in new_props {
            index_property(&mut inner, Arc::new(prop));
        }

        self.persist_vertices(&inner)?;
        self.persist_properties(&inner)?;

        log::info!("added type {name} as role {roleid}");
        Ok(vertex)
    }

    /// Adds a property to an existing type; it gets the next free
    /// slot. A second primary key is rejected.
    pub fn add_property(&self, type_name: &str, decl: &PropertyDecl) -> Result<Arc<Property>> {
        let mut inner = self.inner.write().map_err(Error::poisoned)?;

        let vertex = inner
            .vertices_by_name
            .get(type_name)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(type_name.into()))?;

        if decl.pk && inner.pk_by_role.contains_key(&vertex.roleid) {
            return Err(Error::Invalid(format!(
                "type {type_name} already has a primary key"
            )));
        }
        if inner
            .props_by_name
            .contains_key(&(vertex.roleid, decl.name.clone()))
        {
            return Err(Error::DupKey(format!("{type_name}.{}", decl.name)));
        }

        let propid = inner.next_propid;
        inner.next_propid += 1;

        let off = u32::from(vertex.num);
        let prop = Arc::new(Property {
            propid,
            roleid: vertex.roleid,
            pos: off,
            value: decl.value,
            pk: decl.pk,
            stamp: decl.stamp,
            inc: decl.inc,
            off,
            name: decl.name.clone(),
        });

        let mut updated = (*vertex).clone();
        updated.num += 1;
        updated.ctrl = attr_ctrl_size(u32::from(updated.num));
        updated.size = 8 * u32::from(updated.num) + updated.ctrl;
        let updated = Arc::new(updated);

        inner.vertices_by_id.insert(updated.roleid, updated.clone());
        inner
            .vertices_by_name
            .insert(updated.name.clone(), updated);
        index_property(&mut inner, prop.clone());

        self.persist_vertices(&inner)?;
        self.persist_properties(&inner)?;
        Ok(prop)
    }

    /// Adds an edge type between two vertex types.
    pub fn add_edge(
        &self,
        name: &str,
        origin: &str,
        destin: &str,
        label: ValueType,
        weight: ValueType,
        weight2: ValueType,
    ) -> Result<Arc<Edge>> {
        let mut inner = self.inner.write().map_err(Error::poisoned)?;

        if inner.edges_by_name.contains_key(name) || inner.vertices_by_name.contains_key(name) {
            return Err(Error::DupKey(name.into()));
        }

        let origin = inner
            .vertices_by_name
            .get(origin)
            .ok_or_else(|| Error::KeyNotFound(origin.into()))?
            .roleid;
        let destin = inner
            .vertices_by_name
            .get(destin)
            .ok_or_else(|| Error::KeyNotFound(destin.into()))?
            .roleid;

        let edgeid = inner.next_edgeid;
        inner.next_edgeid += 1;

        let num = u16::from(weight != ValueType::Nothing) + u16::from(weight2 != ValueType::Nothing);
        let ctrl = attr_ctrl_size(u32::from(num).max(1));

        let edge = Arc::new(Edge {
            edgeid,
            name: name.into(),
            origin,
            destin,
            label,
            weight,
            weight2,
            stamped: true,
            num,
            ctrl,
            size: edge_offsets::BASE_SIZE + ctrl,
        });

        inner.edges_by_id.insert(edgeid, edge.clone());
        inner.edges_by_name.insert(edge.name.clone(), edge.clone());

        self.persist_edges(&inner)?;

        log::info!("added edge {name} as {edgeid}");
        Ok(edge)
    }

    /// Declares the properties of an edge type.
    ///
    /// Exactly one must be the origin, exactly one the destination
    /// and at most one the stamp; they get the fixed slots 0, 1 and
    /// 2. Declared positions of the remaining properties stay
    /// untouched; only the slot index moves.
    pub fn add_edge_props(&self, edge_name: &str, decls: &[PedgeDecl]) -> Result<()> {
        let mut inner = self.inner.write().map_err(Error::poisoned)?;

        let edge = inner
            .edges_by_name
            .get(edge_name)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(edge_name.into()))?;

        if decls.iter().filter(|d| d.origin).count() != 1
            || decls.iter().filter(|d| d.destin).count() != 1
        {
            return Err(Error::Invalid(format!(
                "edge {edge_name} needs exactly one origin and one destin"
            )));
        }
        if decls.iter().filter(|d| d.stamp).count() > 1 {
            return Err(Error::Invalid(format!(
                "edge {edge_name} declares more than one stamp"
            )));
        }

        let has_stamp = decls.iter().any(|d| d.stamp);
        let mut next_off = 2 + u32::from(has_stamp);

        for (pos, decl) in decls.iter().enumerate() {
            if inner
                .pedges_by_name
                .contains_key(&(edge.edgeid, decl.name.clone()))
            {
                return Err(Error::DupKey(format!("{edge_name}.{}", decl.name)));
            }

            let off = if decl.origin {
                0
            } else if decl.destin {
                1
            } else if decl.stamp {
                2
            } else {
                let off = next_off;
                next_off += 1;
                off
            };

            let propid = inner.next_propid;
            inner.next_propid += 1;

            #[allow(clippy::cast_possible_truncation)]
            let pedge = Arc::new(Pedge {
                propid,
                edgeid: edge.edgeid,
                pos: pos as u32,
                value: decl.value,
                off,
                origin: decl.origin,
                destin: decl.destin,
                stamp: decl.stamp,
                name: decl.name.clone(),
            });

            inner
                .pedges_by_id
                .insert((edge.edgeid, pedge.propid), pedge.clone());
            inner
                .pedges_by_name
                .insert((edge.edgeid, pedge.name.clone()), pedge);
        }

        self.persist_pedges(&inner)?;
        Ok(())
    }

    /// Looks a vertex type up by name.
    pub fn get_vertex_by_name(&self, name: &str) -> Result<Arc<Vertex>> {
        let inner = self.inner.read().map_err(Error::poisoned)?;
        inner
            .vertices_by_name
            .get(name)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(name.into()))
    }

    /// Looks a vertex type up by role id.
    pub fn get_vertex_by_id(&self, roleid: u32) -> Result<Arc<Vertex>> {
        let inner = self.inner.read().map_err(Error::poisoned)?;
        inner
            .vertices_by_id
            .get(&roleid)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(format!("role {roleid}")))
    }

    /// Looks an edge type up by name.
    pub fn get_edge_by_name(&self, name: &str) -> Result<Arc<Edge>> {
        let inner = self.inner.read().map_err(Error::poisoned)?;
        inner
            .edges_by_name
            .get(name)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(name.into()))
    }

    /// Looks an edge type up by id.
    pub fn get_edge_by_id(&self, edgeid: u64) -> Result<Arc<Edge>> {
        let inner = self.inner.read().map_err(Error::poisoned)?;
        inner
            .edges_by_id
            .get(&edgeid)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(format!("edge {edgeid}")))
    }

    /// Looks a property up by role and name.
    pub fn get_prop_by_name(&self, roleid: u32, name: &str) -> Result<Arc<Property>> {
        let inner = self.inner.read().map_err(Error::poisoned)?;
        inner
            .props_by_name
            .get(&(roleid, name.into()))
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(name.into()))
    }

    /// Looks a property up by role and property id.
    pub fn get_prop_by_id(&self, roleid: u32, propid: u64) -> Result<Arc<Property>> {
        let inner = self.inner.read().map_err(Error::poisoned)?;
        inner
            .props_by_id
            .get(&(roleid, propid))
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(format!("property {propid}")))
    }

    /// All properties of a role, slot order.
    pub fn props_of(&self, roleid: u32) -> Result<Vec<Arc<Property>>> {
        let inner = self.inner.read().map_err(Error::poisoned)?;
        let mut props = inner.props_by_role.get(&roleid).cloned().unwrap_or_default();
        props.sort_by_key(|p| p.off);
        Ok(props)
    }

    /// Looks an edge property up by edge and name.
    pub fn get_pedge_by_name(&self, edgeid: u64, name: &str) -> Result<Arc<Pedge>> {
        let inner = self.inner.read().map_err(Error::poisoned)?;
        inner
            .pedges_by_name
            .get(&(edgeid, name.into()))
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(name.into()))
    }

    /// Looks an edge property up by edge and property id.
    pub fn get_pedge_by_id(&self, edgeid: u64, propid: u64) -> Result<Arc<Pedge>> {
        let inner = self.inner.read().map_err(Error::poisoned)?;
        inner
            .pedges_by_id
            .get(&(edgeid, propid))
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(format!("pedge {propid}")))
    }

    /// The primary-key property of a role.
    pub fn get_pk(&self, roleid: u32) -> Result<Arc<Property>> {
        let inner = self.inner.read().map_err(Error::poisoned)?;
        inner
            .pk_by_role
            .get(&roleid)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(format!("pk of role {roleid}")))
    }

    /// Whether `name` is a vertex type or an edge type.
    pub fn what_is(&self, name: &str) -> Result<ElementKind> {
        let inner = self.inner.read().map_err(Error::poisoned)?;
        if inner.vertices_by_name.contains_key(name) {
            Ok(ElementKind::Vertex)
        } else if inner.edges_by_name.contains_key(name) {
            Ok(ElementKind::Edge)
        } else {
            Err(Error::KeyNotFound(name.into()))
        }
    }

    /// The value type of an edge record field at `offset`.
    #[must_use]
    pub fn edge_field_type(edge: &Edge, offset: u32) -> ValueType {
        match offset {
            edge_offsets::ORIGIN | edge_offsets::DESTIN | edge_offsets::EDGE => ValueType::Uint,
            edge_offsets::LABEL => edge.label,
            edge_offsets::TMSTMP => ValueType::Time,
            edge_offsets::WEIGHT => edge.weight,
            edge_offsets::WEIGHT2 => edge.weight2,
            _ => ValueType::Nothing,
        }
    }

    fn persist_vertices(&self, inner: &ModelInner) -> Result<()> {
        let mut entries: Vec<_> = inner.vertices_by_id.values().map(Arc::as_ref).collect();
        entries.sort_by_key(|v| v.roleid);
        store_entries(&self.dir.join(VERTEX_FILE), &entries)
    }

    fn persist_properties(&self, inner: &ModelInner) -> Result<()> {
        let mut entries: Vec<_> = inner.props_by_id.values().map(Arc::as_ref).collect();
        entries.sort_by_key(|p| (p.roleid, p.off));
        store_entries(&self.dir.join(PROPERTY_FILE), &entries)
    }

    fn persist_edges(&self, inner: &ModelInner) -> Result<()> {
        let mut entries: Vec<_> = inner.edges_by_id.values().map(Arc::as_ref).collect();
        entries.sort_by_key(|e| e.edgeid);
        store_entries(&self.dir.join(EDGE_FILE), &entries)
    }

    fn persist_pedges(&self, inner: &ModelInner) -> Result<()> {
        let mut entries: Vec<_> = inner.pedges_by_id.values().map(Arc::as_ref).collect();
        entries.sort_by_key(|p| (p.edgeid, p.off));
        store_entries(&self.dir.join(PEDGE_FILE), &entries)
    }
}

fn index_property(inner: &mut ModelInner, prop: Arc<Property>) {
    inner
        .props_by_id
        .insert((prop.roleid, prop.propid), prop.clone());
    inner
        .props_by_name
        .insert((prop.roleid, prop.name.clone()), prop.clone());
    inner
        .props_by_role
        .entry(prop.roleid)
        .or_default()
        .push(prop.clone());
    if prop.pk {
        inner.pk_by_role.insert(prop.roleid, prop);
    }
}

fn load_entries<T: Decode>(path: &Path) -> Result<Vec<T>> {
    let Some(bytes) = crate::io::read_with_recovery(path)? else {
        return Ok(Vec::new());
    };
    let mut reader = &bytes[..];

    let mut magic = [0u8; 4];
    std::io::Read::read_exact(&mut reader, &mut magic)
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
        entries.push(
            T::decode_from(&mut reader).map_err(|e| Error::Catalog(format!("{path:?}: {e}")))?,
        );
    }
    Ok(entries)
}

fn store_entries<T: Encode>(path: &Path, entries: &[&T]) -> Result<()> {
    let mut buf = Vec::new();
    #[allow(clippy::expect_used)]
    {
        buf.write_all(&MAGIC_BYTES).expect("vec write cannot fail");
        buf.write_u32::<LE>(VERSION).expect("vec write cannot fail");
    }
    for entry in entries {
        entry.encode_into(&mut buf)?;
    }
    crate::io::write_with_backup(path, &buf)
}
