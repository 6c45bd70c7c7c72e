// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Re-assembly of logical vertex rows.
//!
//! A logical vertex is scattered over one record per property, all
//! sharing `(role, vid)`. Sorted vertex files cluster these records,
//! so an assembler only ever holds one bucket: records are folded in
//! until every declared slot is present or the vid switches, then
//! the assembled row is emitted (with zeroed slots for properties
//! the source never delivered).

use crate::{
    expr::{EvalCtx, Expr, FieldRef},
    model::Model,
    record::VertexView,
    Result,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

/// An assembled row ready for the consumer
pub struct Ready {
    /// The vertex id
    pub vid: u64,

    /// Assembled row: one 8-byte slot per property, then the
    /// presence bitmap
    pub row: Vec<u8>,

    /// Filter verdict; `true` when no filter is bound
    pub ok: bool,
}

/// Assembles vertex rows of one role
pub struct VRow {
    role: u32,
    num: u16,
    size: usize,

    /// Declared property slots the consumer will read
    interesting: FxHashSet<u64>,

    /// Slot index per property id, over all properties of the role
    offs: FxHashMap<u64, u32>,

    filter: Option<Expr>,

    cur_vid: Option<u64>,
    row: Vec<u8>,
    have: usize,

    /// Bucket already emitted; further records of this vid are noise
    done_vid: Option<u64>,

    ready: VecDeque<Ready>,
}

impl VRow {
    /// Creates an assembler for `role` with no declared slots yet.
    pub fn new(role: u32, model: &Model) -> Result<Self> {
        let vertex = model.get_vertex_by_id(role)?;
        let size = vertex.size as usize;

        let mut offs = FxHashMap::default();
        for prop in model.props_of(role)? {
            offs.insert(prop.propid, prop.off);
        }

        Ok(Self {
            role,
            num: vertex.num,
            size,
            interesting: FxHashSet::default(),
            offs,
            filter: None,
            cur_vid: None,
            row: vec![0u8; size],
            have: 0,
            done_vid: None,
            ready: VecDeque::new(),
        })
    }

    /// Creates an assembler gated by `filter`; the interesting
    /// property set is derived from the filter's field references.
    pub fn from_filter(role: u32, filter: Expr, model: &Model) -> Result<Self> {
        let mut vrow = Self::new(role, model)?;
        vrow.add_expr(&filter);
        vrow.filter = Some(filter);
        Ok(vrow)
    }

    /// Declares the property slots `expr` reads.
    pub fn add_expr(&mut self, expr: &Expr) {
        let mut fields = Vec::new();
        expr.fields(&mut fields);

        for field in fields {
            if let FieldRef::Vertex { role, propid } = field {
                if *role == self.role {
                    self.interesting.insert(*propid);
                }
            }
        }
    }

    /// Number of declared property slots.
    #[must_use]
    pub fn declared(&self) -> usize {
        self.interesting.len()
    }

    /// Folds one vertex record in.
    ///
    /// Returns whether the record matched an interesting role and
    /// property. A vid switch finalizes the previous bucket first.
    pub fn add(&mut self, ctx: &EvalCtx, record: &[u8]) -> Result<bool> {
        let view = VertexView(record);

        if view.role() != self.role {
            return Ok(false);
        }

        let vid = view.vid();
        if self.done_vid == Some(vid) {
            return Ok(false);
        }

        if self.cur_vid.is_some_and(|cur| cur != vid) {
            self.finalize(ctx)?;
        }

        let propid = view.propid();
        if !self.interesting.contains(&propid) {
            // an uninteresting record still opens the bucket, so a
            // vertex with no interesting properties finalizes too
            if self.cur_vid.is_none() {
                self.cur_vid = Some(vid);
            }
            return Ok(false);
        }

        let Some(&slot) = self.offs.get(&propid) else {
            return Ok(false);
        };

        self.cur_vid = Some(vid);

        let slot = slot as usize;
        let base = 8 * slot;
        #[allow(clippy::indexing_slicing)]
        self.row[base..base + 8].copy_from_slice(&view.value());

        let ctrl = 8 * usize::from(self.num) + slot / 8;
        let already = self
            .row
            .get(ctrl)
            .is_some_and(|byte| byte & (1 << (slot % 8)) != 0);
        if !already {
            if let Some(byte) = self.row.get_mut(ctrl) {
                *byte |= 1 << (slot % 8);
            }
            self.have += 1;
        }

        if self.have == self.interesting.len() {
            self.finalize(ctx)?;
        }

        Ok(true)
    }

    /// Flushes the open bucket at end of stream.
    pub fn force(&mut self, ctx: &EvalCtx) -> Result<()> {
        self.finalize(ctx)
    }

    /// Pops the next assembled row.
    pub fn next_ready(&mut self) -> Option<Ready> {
        self.ready.pop_front()
    }

    fn finalize(&mut self, ctx: &EvalCtx) -> Result<()> {
        let Some(vid) = self.cur_vid.take() else {
            return Ok(());
        };

        let row = std::mem::replace(&mut self.row, vec![0u8; self.size]);
        self.have = 0;
        self.done_vid = Some(vid);

        let ok = match &self.filter {
            Some(filter) => filter.eval_bool(ctx, &row)?,
            None => true,
        };

        self.ready.push_back(Ready { vid, row, ok });
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::{
        expr::Fun,
        model::PropertyDecl,
        record::make_vertex,
        value::{Value, ValueType},
    };
    use test_log::test;

    fn model_with_person() -> (std::sync::Arc<Model>, u32, u64, u64) {
        let dir = tempfile::tempdir().unwrap();
        let model = std::sync::Arc::new(Model::open(dir.path()).unwrap());
        std::mem::forget(dir);

        let vertex = model
            .add_type(
                "Person",
                &[
                    PropertyDecl::pk("id", ValueType::Uint),
                    PropertyDecl::plain("name", ValueType::Text),
                    PropertyDecl::plain("age", ValueType::Uint),
                ],
            )
            .unwrap();

        let id = model.get_prop_by_name(vertex.roleid, "id").unwrap().propid;
        let age = model.get_prop_by_name(vertex.roleid, "age").unwrap().propid;
        (model, vertex.roleid, id, age)
    }

    fn prop_rec(role: u32, vid: u64, propid: u64, value: u64) -> Vec<u8> {
        make_vertex(role, vid, propid, value.to_le_bytes(), ValueType::Uint)
    }

    #[test]
    fn assembles_when_all_slots_arrive() -> Result<()> {
        let (model, role, id_prop, age_prop) = model_with_person();
        let ctx = EvalCtx::new(model.clone());

        let mut vrow = VRow::new(role, &model)?;
        vrow.add_expr(&Expr::vertex_field(role, id_prop));
        vrow.add_expr(&Expr::vertex_field(role, age_prop));
        assert_eq!(2, vrow.declared());

        assert!(vrow.add(&ctx, &prop_rec(role, 7, id_prop, 7))?);
        assert!(vrow.next_ready().is_none());
        assert!(vrow.add(&ctx, &prop_rec(role, 7, age_prop, 33))?);

        let ready = vrow.next_ready().unwrap();
        assert_eq!(7, ready.vid);
        assert!(ready.ok);

        // the assembled row evaluates like a record
        let age = Expr::vertex_field(role, age_prop);
        assert_eq!(Value::Uint(33), age.eval(&ctx, &ready.row)?);
        Ok(())
    }

    #[test]
    fn vid_switch_flushes_incomplete_bucket() -> Result<()> {
        let (model, role, id_prop, age_prop) = model_with_person();
        let ctx = EvalCtx::new(model.clone());

        let mut vrow = VRow::new(role, &model)?;
        vrow.add_expr(&Expr::vertex_field(role, id_prop));
        vrow.add_expr(&Expr::vertex_field(role, age_prop));

        vrow.add(&ctx, &prop_rec(role, 1, id_prop, 1))?;
        vrow.add(&ctx, &prop_rec(role, 2, id_prop, 2))?;

        let ready = vrow.next_ready().unwrap();
        assert_eq!(1, ready.vid);
        // missing slot reads as nothing
        let age = Expr::vertex_field(role, age_prop);
        assert_eq!(Value::Nothing, age.eval(&ctx, &ready.row)?);
        Ok(())
    }

    #[test]
    fn filter_gates_buckets() -> Result<()> {
        let (model, role, _, age_prop) = model_with_person();
        let ctx = EvalCtx::new(model.clone());

        let filter = Expr::op2(
            Fun::Gt,
            Expr::vertex_field(role, age_prop),
            Expr::uint(30),
        );
        let mut vrow = VRow::from_filter(role, filter, &model)?;

        vrow.add(&ctx, &prop_rec(role, 1, age_prop, 25))?;
        vrow.add(&ctx, &prop_rec(role, 2, age_prop, 40))?;
        vrow.force(&ctx)?;

        let first = vrow.next_ready().unwrap();
        assert_eq!(1, first.vid);
        assert!(!first.ok);

        let second = vrow.next_ready().unwrap();
        assert_eq!(2, second.vid);
        assert!(second.ok);
        Ok(())
    }

    #[test]
    fn foreign_roles_are_rejected() -> Result<()> {
        let (model, role, id_prop, _) = model_with_person();
        let ctx = EvalCtx::new(model.clone());

        let mut vrow = VRow::new(role, &model)?;
        vrow.add_expr(&Expr::vertex_field(role, id_prop));

        assert!(!vrow.add(&ctx, &prop_rec(role + 1, 1, id_prop, 1))?);
        Ok(())
    }
}
