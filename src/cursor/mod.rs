// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The cursor: executes a plan into a framed byte stream.
//!
//! A cursor drives its reader page by page, gates records through
//! the filter (or, for vertices, a vid prefilter pass plus row
//! assembly), groups adjacent records by the reader's key order,
//! runs aggregates and projects rows into the caller's buffer. Rows
//! that do not fit a fetch are carried over to the next one; the end
//! of the stream is the `Eof` signal, repeated on every further
//! fetch.

mod group;
mod row;

pub use group::GroupEngine;
pub use row::RowProjector;

use crate::{
    expr::{extract_period, EvalCtx, Expr},
    index::{IndexManager, KeySpec},
    model::Model,
    plan::{PlanNode, ReaderSpec, Stype, Target},
    reader::{Buffer, Crange, Frange, Fullscan, Krange, Mrange, ReadOps, Reader, Search},
    record::{is_null_record, Content, VertexView},
    store::Store,
    text::Text,
    time::Period,
    vrow::VRow,
    Error, Result,
};
use rustc_hash::FxHashSet;
use std::{collections::VecDeque, sync::Arc};

/// Vid sets beyond this size skip the prefilter rewrite
const VID_LIMIT: usize = 100_000;

/// Executes one plan
pub struct Cursor {
    ctx_flt: EvalCtx,
    ctx_proj: EvalCtx,

    reader: Reader,
    keys_only: bool,
    counting: bool,
    ikeys: Option<KeySpec>,

    content: Content,
    recordsize: usize,
    rep_len: usize,

    filter: Option<Expr>,
    projector: RowProjector,

    grouped: bool,
    group_spec: Option<KeySpec>,
    engine: Option<GroupEngine>,
    nogroup: Option<GroupEngine>,

    prow: Option<VRow>,
    vid_set: Option<FxHashSet<u64>>,

    page: Option<Vec<u8>>,
    slot: usize,
    mask: Option<u128>,

    group_cur: Option<Vec<u8>>,
    group_rep: Option<Vec<u8>>,

    pending: VecDeque<Vec<u8>>,
    leftover: Option<Vec<u8>>,

    reader_done: bool,
    finalized: bool,
    opened: bool,
}

impl Cursor {
    /// Builds a cursor from a plan against one store.
    ///
    /// For vertex targets with a filter, the vid prefilter pass runs
    /// here: a throwaway scan assembles just the filtered properties
    /// and collects the vids that pass, so the main pass can gate on
    /// vid membership instead of re-assembling rows for the WHERE.
    pub(crate) fn build(
        model: Arc<Model>,
        text: Arc<Text>,
        indexes: &IndexManager,
        store: &Store,
        plan: Vec<PlanNode>,
    ) -> Result<Self> {
        let mut target: Option<Target> = None;
        let mut rspec: Option<ReaderSpec> = None;
        let mut filter: Option<Expr> = None;
        let mut group: Vec<Expr> = Vec::new();
        let mut projection: Vec<Expr> = Vec::new();
        let mut aggs: Vec<crate::plan::AggSpec> = Vec::new();

        for node in plan {
            match node {
                PlanNode::Summary { target: t, .. } => target = Some(t),
                PlanNode::Reader(r) => rspec = Some(r),
                PlanNode::Filter(f) => filter = Some(f),
                PlanNode::Ordering(_) => {}
                PlanNode::Grouping(g) => group = g,
                PlanNode::Projection(p) => projection = p,
                PlanNode::Aggregates(a) => aggs = a,
            }
        }

        let target = target.ok_or_else(|| Error::Invalid("plan has no summary".into()))?;
        let rspec = rspec.ok_or_else(|| Error::Invalid("plan has no reader".into()))?;

        let content = target.content();
        let recordsize = store.config().recordsize as usize;

        // time window for block pruning
        let period = match (&content, &filter) {
            (Content::Edge, Some(filter)) => extract_period(filter),
            _ => Period::ALL,
        };

        let (sorted, unsorted) = store.get_files_split(&period)?;

        let mut ctx_flt = EvalCtx::new(model.clone());
        let mut ctx_proj = EvalCtx::new(model.clone()).with_text(text);
        if let Target::Edge {
            edge: Some(edge), ..
        } = &target
        {
            ctx_flt = ctx_flt.for_edge(edge.clone());
            ctx_proj = ctx_proj.for_edge(edge.clone());
        }

        // vertex: prefilter pass and projection row assembly
        let mut prow = None;
        let mut vid_set = None;
        let mut rep_len = recordsize;

        if let Target::Vertex { role, .. } = &target {
            rep_len = model.get_vertex_by_id(*role)?.size as usize;

            if let Some(filter) = &filter {
                let all: Vec<_> = sorted.iter().chain(unsorted.iter()).cloned().collect();
                vid_set = Some(prefilter_vids(
                    &model, &ctx_flt, *role, filter, all, recordsize,
                )?);
            }

            let mut assembler = VRow::new(*role, &model)?;
            for expr in &projection {
                assembler.add_expr(expr);
            }
            prow = Some(assembler);
        }

        let mut reader = make_reader(indexes, &rspec, &sorted, &unsorted)?;
        reader.set_period(period);

        let grouped = !group.is_empty();
        let group_spec = grouped.then(|| {
            KeySpec::new(
                content,
                group
                    .iter()
                    .filter_map(|g| match g {
                        Expr::Field(crate::expr::FieldRef::Edge { offset, .. }) => Some(*offset),
                        _ => None,
                    })
                    .collect(),
            )
        });

        let engine = (grouped && !aggs.is_empty()).then(|| GroupEngine::new(&aggs));
        let nogroup = (!grouped && !aggs.is_empty()).then(|| GroupEngine::new(&aggs));

        let keys_only = matches!(rspec.stype, Stype::Krange | Stype::Crange);
        let counting = rspec.stype == Stype::Crange;
        let ikeys = match &rspec.index {
            Some(name) => Some(indexes.get_index(name)?.spec().clone()),
            None => None,
        };

        Ok(Self {
            ctx_flt,
            ctx_proj,
            reader,
            keys_only,
            counting,
            ikeys,
            content,
            recordsize,
            rep_len,
            filter,
            projector: RowProjector::new(projection),
            grouped,
            group_spec,
            engine,
            nogroup,
            prow,
            vid_set,
            page: None,
            slot: 0,
            mask: None,
            group_cur: None,
            group_rep: None,
            pending: VecDeque::new(),
            leftover: None,
            reader_done: false,
            finalized: false,
            opened: false,
        })
    }

    /// Opens the reader; must precede the first fetch.
    pub fn open(&mut self) -> Result<()> {
        self.reader.open()?;
        self.opened = true;
        Ok(())
    }

    /// Fills `buf` with framed rows.
    ///
    /// Returns `(bytes written, row count)`. A row that does not fit
    /// the remaining space is remembered and served first on the
    /// next fetch; a drained stream returns [`Error::Eof`], again on
    /// every retry.
    pub fn fetch(&mut self, buf: &mut [u8]) -> Result<(usize, usize)> {
        if !self.opened {
            return Err(Error::Invalid("cursor is not open".into()));
        }

        let mut written = 0usize;
        let mut rows = 0usize;

        loop {
            let row = match self.leftover.take() {
                Some(row) => row,
                None => match self.next_row()? {
                    Some(row) => row,
                    None => break,
                },
            };

            if row.len() > buf.len() {
                return Err(Error::Invalid(format!(
                    "row of {} bytes exceeds the fetch buffer",
                    row.len()
                )));
            }
            if written + row.len() > buf.len() {
                self.leftover = Some(row);
                break;
            }

            #[allow(clippy::indexing_slicing)]
            buf[written..written + row.len()].copy_from_slice(&row);
            written += row.len();
            rows += 1;
        }

        if written == 0 && self.leftover.is_none() {
            return Err(Error::Eof);
        }
        Ok((written, rows))
    }

    /// Releases the cursor.
    pub fn close(self) -> Result<()> {
        Ok(())
    }

    /// Produces the next framed row, or `None` at end of stream.
    fn next_row(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            if let Some(row) = self.pop_assembled()? {
                return Ok(Some(row));
            }

            if self.reader_done {
                if self.finalized {
                    return Ok(None);
                }
                self.final_emit()?;
                self.finalized = true;
                continue;
            }

            self.step()?;
        }
    }

    /// Drains assembled vertex rows: aggregate them or project them.
    fn pop_assembled(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(prow) = &mut self.prow else {
            return Ok(None);
        };

        while let Some(ready) = prow.next_ready() {
            if !ready.ok {
                continue;
            }

            if let Some(engine) = &mut self.nogroup {
                engine.map(&self.ctx_flt, &ready.row)?;
                self.group_rep = Some(ready.row);
                continue;
            }

            let row = self.projector.project(&self.ctx_proj, &ready.row)?;
            return Ok(Some(row));
        }
        Ok(None)
    }

    /// Advances the record stream by one record (or key run).
    fn step(&mut self) -> Result<()> {
        if self.keys_only {
            return match self.reader.move_next() {
                Ok(()) => {
                    let key = self
                        .reader
                        .key()
                        .ok_or_else(|| Error::Panic("key reader without a key".into()))?
                        .to_vec();
                    let n = if self.counting {
                        self.reader.count().max(1)
                    } else {
                        1
                    };

                    let mut stub = vec![0u8; self.recordsize];
                    self.ikeys
                        .as_ref()
                        .ok_or_else(|| Error::Panic("key reader without a key spec".into()))?
                        .unpack_into(&key, &mut stub);

                    self.consume_record(&stub, n)
                }
                Err(e) if e.is_eof() => self.on_reader_done(),
                Err(e) => Err(e),
            };
        }

        loop {
            if self.page.is_none() {
                match self.reader.move_next() {
                    Ok(()) => {
                        self.page = Some(
                            self.reader
                                .page()
                                .ok_or_else(|| {
                                    Error::Panic("page reader without a page".into())
                                })?
                                .to_vec(),
                        );
                        self.mask = self.reader.mask();
                        self.slot = 0;
                    }
                    Err(e) if e.is_eof() => return self.on_reader_done(),
                    Err(e) => return Err(e),
                }
            }

            let rs = self.recordsize;
            #[allow(clippy::expect_used)]
            let page = self.page.as_ref().expect("page was just loaded");

            if self.slot >= page.len() / rs {
                self.page = None;
                continue;
            }

            let slot = self.slot;
            self.slot += 1;

            if let Some(mask) = self.mask {
                if slot >= 128 || mask & (1 << slot) == 0 {
                    continue;
                }
            }

            #[allow(clippy::indexing_slicing)]
            let rec = page[slot * rs..(slot + 1) * rs].to_vec();

            if is_null_record(&rec) {
                if self.mask.is_none() {
                    // the zero slot ends the page logically
                    self.page = None;
                }
                continue;
            }

            return self.consume_record(&rec, 1);
        }
    }

    /// Routes one record through filter, grouping, aggregation or
    /// direct projection.
    fn consume_record(&mut self, rec: &[u8], n: u64) -> Result<()> {
        if self.content == Content::Vertex {
            if let Some(set) = &self.vid_set {
                if !set.contains(&VertexView(rec).vid()) {
                    return Ok(());
                }
            }
            if let Some(prow) = &mut self.prow {
                prow.add(&self.ctx_proj, rec)?;
            }
            return Ok(());
        }

        if let Some(filter) = &self.filter {
            if !filter.eval_bool(&self.ctx_flt, rec)? {
                return Ok(());
            }
        }

        if self.grouped {
            let key = self
                .group_spec
                .as_ref()
                .ok_or_else(|| Error::Panic("grouping without a key spec".into()))?
                .pack(rec);

            let switch = match &self.group_cur {
                Some(cur) => cur != &key,
                None => false,
            };
            if switch {
                self.reduce_group()?;
            }
            if switch || self.group_cur.is_none() {
                self.group_cur = Some(key);
                self.group_rep = Some(rec.to_vec());
            }

            if let Some(engine) = &mut self.engine {
                if self.counting {
                    engine.map_count(n)?;
                } else {
                    engine.map(&self.ctx_flt, rec)?;
                }
            }
            return Ok(());
        }

        if let Some(engine) = &mut self.nogroup {
            if self.counting {
                engine.map_count(n)?;
            } else {
                engine.map(&self.ctx_flt, rec)?;
            }
            self.group_rep = Some(rec.to_vec());
            return Ok(());
        }

        let row = self.projector.project(&self.ctx_proj, rec)?;
        self.pending.push_back(row);
        Ok(())
    }

    /// Emits the finished group's row.
    fn reduce_group(&mut self) -> Result<()> {
        let values = self.engine.as_mut().map(GroupEngine::reduce).unwrap_or_default();
        self.ctx_proj.agg_values = values;

        let rep = self
            .group_rep
            .clone()
            .ok_or_else(|| Error::Panic("group reduced without a representative".into()))?;
        let row = self.projector.project(&self.ctx_proj, &rep)?;
        self.pending.push_back(row);
        Ok(())
    }

    fn on_reader_done(&mut self) -> Result<()> {
        if let Some(prow) = &mut self.prow {
            prow.force(&self.ctx_proj)?;
        }
        self.reader_done = true;
        Ok(())
    }

    /// End-of-stream finalizers: the open group, then the implicit
    /// no-group row.
    fn final_emit(&mut self) -> Result<()> {
        if self.grouped && self.group_cur.take().is_some() {
            self.reduce_group()?;
        }

        if let Some(engine) = &mut self.nogroup {
            self.ctx_proj.agg_values = engine.reduce();
            let rep = self
                .group_rep
                .clone()
                .unwrap_or_else(|| vec![0u8; self.rep_len]);
            let row = self.projector.project(&self.ctx_proj, &rep)?;
            self.pending.push_back(row);
        }
        Ok(())
    }
}

/// The vid prefilter: assemble only the filtered properties and
/// collect the vids whose rows pass.
fn prefilter_vids(
    model: &Arc<Model>,
    ctx: &EvalCtx,
    role: u32,
    filter: &Expr,
    files: Vec<Arc<crate::io::File>>,
    recordsize: usize,
) -> Result<FxHashSet<u64>> {
    let mut wrow = VRow::from_filter(role, filter.clone(), model)?;
    let mut vids = FxHashSet::default();

    let mut scan = Fullscan::new(files);
    scan.open()?;

    loop {
        match scan.move_next() {
            Ok(()) => {}
            Err(e) if e.is_eof() => break,
            Err(e) => return Err(e),
        }

        let page = scan
            .page()
            .ok_or_else(|| Error::Panic("fullscan without a page".into()))?
            .to_vec();

        for rec in page.chunks_exact(recordsize) {
            if is_null_record(rec) {
                break;
            }
            wrow.add(ctx, rec)?;
            while let Some(ready) = wrow.next_ready() {
                if ready.ok {
                    vids.insert(ready.vid);
                }
            }
        }
    }

    wrow.force(ctx)?;
    while let Some(ready) = wrow.next_ready() {
        if ready.ok {
            vids.insert(ready.vid);
        }
    }

    if vids.len() > VID_LIMIT {
        log::debug!("vid prefilter found {} vids, keeping full filter", vids.len());
    }
    Ok(vids)
}

/// Builds the reader a plan asked for, merging in pending files
/// where the strategy follows an index.
fn make_reader(
    indexes: &IndexManager,
    spec: &ReaderSpec,
    sorted: &[Arc<crate::io::File>],
    unsorted: &[Arc<crate::io::File>],
) -> Result<Reader> {
    if spec.stype == Stype::Fs {
        let mut all = sorted.to_vec();
        all.extend(unsorted.iter().cloned());
        return Ok(Fullscan::new(all).into());
    }

    let name = spec
        .index
        .as_ref()
        .ok_or_else(|| Error::Invalid("index strategy without an index".into()))?;
    let index = indexes.get_index(name)?;
    let kspec = index.spec().clone();

    let base: Reader = match spec.stype {
        Stype::Search => {
            let key = spec
                .key
                .clone()
                .ok_or_else(|| Error::Invalid("search without a key".into()))?;
            if unsorted.is_empty() {
                return Ok(Search::new(index, key, sorted).into());
            }
            Mrange::new(index, Some(key.clone()), Some(key), sorted).into()
        }
        Stype::Frange => {
            let reader = Frange::new(index, spec.from.clone(), spec.to.clone(), sorted);
            if spec.desc {
                if !unsorted.is_empty() {
                    return Err(Error::NotSupported(
                        "descending scans over pending files",
                    ));
                }
                return Ok(reader.descending().into());
            }
            reader.into()
        }
        Stype::Mrange => Mrange::new(index, spec.from.clone(), spec.to.clone(), sorted).into(),
        Stype::Krange => Krange::new(index, spec.from.clone(), spec.to.clone(), sorted).into(),
        Stype::Crange => Crange::new(index, spec.from.clone(), spec.to.clone(), sorted).into(),
        Stype::Fs => unreachable!("handled above"),
    };

    if unsorted.is_empty() {
        return Ok(base);
    }

    let buffer = Buffer::new(kspec.clone(), unsorted.to_vec())
        .with_bounds(spec.from.as_deref().or(spec.key.as_deref()), spec.to.as_deref().or(spec.key.as_deref()));

    Ok(crate::reader::Merge::new(kspec, vec![base, buffer.into()]).into())
}
