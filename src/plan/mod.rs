// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The planner: a typed AST in, an ordered list of plan nodes out.
//!
//! Name resolution goes through the model, text literals in filters
//! collapse to dictionary surrogates, and index selection follows
//! the precedence grouping > ordering > filter (sorting without an
//! index is not implemented, so GROUP BY and ORDER BY stand or fall
//! with a covering index).

mod ast;

pub use ast::{AstExpr, AstValue, SelectStmt};

use crate::{
    expr::{extract_range, AggFun, Expr, Fun},
    index::{IndexManager, IndexTarget, KeySpec},
    model::{ElementKind, Model},
    record::{edge, Content},
    text::Text,
    value::{Value, ValueType},
    Error, Result,
};
use std::sync::Arc;

/// Reader strategy of a plan
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stype {
    /// Fullscan over all files
    Fs,

    /// Index point search
    Search,

    /// Index full-range scan
    Frange,

    /// Index range with per-key masks
    Mrange,

    /// Index range, keys only
    Krange,

    /// Index range, keys and counts
    Crange,
}

/// What the query runs against
#[derive(Clone, Debug)]
pub enum Target {
    /// A vertex type
    Vertex {
        /// Role id
        role: u32,

        /// Type name
        name: String,
    },

    /// An edge context; unknown names land here as well
    Edge {
        /// Context name
        name: String,

        /// The edge model, when the name resolves
        edge: Option<Arc<crate::model::Edge>>,
    },
}

impl Target {
    /// The record family of the target.
    #[must_use]
    pub fn content(&self) -> Content {
        match self {
            Self::Vertex { .. } => Content::Vertex,
            Self::Edge { .. } => Content::Edge,
        }
    }

    /// The store name the cursor opens.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Vertex { name, .. } | Self::Edge { name, .. } => name,
        }
    }
}

/// Reader selection of a plan
#[derive(Clone, Debug)]
pub struct ReaderSpec {
    /// Strategy
    pub stype: Stype,

    /// Index name, for every strategy but fullscan
    pub index: Option<String>,

    /// Point key for searches
    pub key: Option<Vec<u8>>,

    /// Range bounds for range strategies
    pub from: Option<Vec<u8>>,

    /// Range bounds for range strategies
    pub to: Option<Vec<u8>>,

    /// Walk the range backwards
    pub desc: bool,
}

impl ReaderSpec {
    fn fullscan() -> Self {
        Self {
            stype: Stype::Fs,
            index: None,
            key: None,
            from: None,
            to: None,
            desc: false,
        }
    }
}

/// One aggregate of a plan
#[derive(Clone, Debug)]
pub struct AggSpec {
    /// The function
    pub fun: AggFun,

    /// Argument; `None` for `count(*)`
    pub expr: Option<Expr>,
}

/// A node of the ordered plan list
#[derive(Clone, Debug)]
pub enum PlanNode {
    /// Node count and target
    Summary {
        /// Number of nodes in the plan
        nodes: usize,

        /// The resolved target
        target: Target,
    },

    /// Reader selection
    Reader(ReaderSpec),

    /// The root filter expression
    Filter(Expr),

    /// Ordering field list
    Ordering(Vec<Expr>),

    /// Grouping field list
    Grouping(Vec<Expr>),

    /// Projected expressions, aggregate slots already wired
    Projection(Vec<Expr>),

    /// Aggregate list, slot order
    Aggregates(Vec<AggSpec>),
}

fn fun_by_name(name: &str) -> Option<Fun> {
    Some(match name {
        "+" => Fun::Add,
        "-" => Fun::Sub,
        "*" => Fun::Mul,
        "/" => Fun::Div,
        "%" => Fun::Rem,
        "^" => Fun::Pow,
        "root" => Fun::Root,
        "log" => Fun::Log,
        "ceil" => Fun::Ceil,
        "floor" => Fun::Floor,
        "round" => Fun::Round,
        "abs" => Fun::Abs,
        "tofloat" => Fun::ToFloat,
        "toint" => Fun::ToInt,
        "touint" => Fun::ToUint,
        "totime" => Fun::ToTime,
        "totext" => Fun::ToText,
        "=" | "==" => Fun::Eq,
        "!=" | "<>" => Fun::Ne,
        "<" => Fun::Lt,
        ">" => Fun::Gt,
        "<=" => Fun::Le,
        ">=" => Fun::Ge,
        "in" => Fun::In,
        "and" => Fun::And,
        "or" => Fun::Or,
        "xor" => Fun::Xor,
        "not" => Fun::Not,
        "just" => Fun::Just,
        "century" => Fun::Century,
        "year" => Fun::Year,
        "month" => Fun::Month,
        "day" | "mday" => Fun::Mday,
        "wday" => Fun::Wday,
        "week" => Fun::Week,
        "hour" => Fun::Hour,
        "minute" => Fun::Min,
        "second" => Fun::Sec,
        "milli" => Fun::Milli,
        "micro" => Fun::Micro,
        "nano" => Fun::Nano,
        "bin" => Fun::Bin,
        "format" => Fun::Format,
        "substr" => Fun::Substr,
        "length" => Fun::Length,
        "concat" => Fun::Strcat,
        "pos" => Fun::Pos,
        _ => return None,
    })
}

/// Builds plans against one scope's catalogs
pub struct Planner<'a> {
    model: &'a Model,
    indexes: &'a IndexManager,
    text: &'a Text,
}

impl<'a> Planner<'a> {
    /// Creates a planner over the scope's catalogs.
    #[must_use]
    pub fn new(model: &'a Model, indexes: &'a IndexManager, text: &'a Text) -> Self {
        Self {
            model,
            indexes,
            text,
        }
    }

    /// Plans a SELECT statement.
    pub fn plan(&self, stmt: &SelectStmt) -> Result<Vec<PlanNode>> {
        let target = self.resolve_target(&stmt.from)?;

        let mut aggs: Vec<AggSpec> = Vec::new();

        let filter = stmt
            .where_
            .as_ref()
            .map(|w| self.compile(&target, w, None, true))
            .transpose()?;

        let group = stmt
            .group
            .iter()
            .map(|g| self.compile(&target, g, None, false))
            .collect::<Result<Vec<_>>>()?;

        let (order, desc) = self.compile_order(&target, &stmt.order)?;

        let projection = stmt
            .select
            .iter()
            .map(|s| self.compile(&target, s, Some(&mut aggs), false))
            .collect::<Result<Vec<_>>>()?;

        self.validate_grouping(&group, &projection)?;

        let reader = self.choose_reader(&target, &group, &order, desc, filter.as_ref(), &aggs)?;

        let mut nodes = Vec::with_capacity(7);
        nodes.push(PlanNode::Summary {
            nodes: 0,
            target: target.clone(),
        });
        nodes.push(PlanNode::Reader(reader));
        if let Some(filter) = filter {
            nodes.push(PlanNode::Filter(filter));
        }
        if !order.is_empty() {
            nodes.push(PlanNode::Ordering(order));
        }
        if !group.is_empty() {
            nodes.push(PlanNode::Grouping(group));
        }
        nodes.push(PlanNode::Projection(projection));
        if !aggs.is_empty() {
            nodes.push(PlanNode::Aggregates(aggs));
        }

        let count = nodes.len();
        if let Some(PlanNode::Summary { nodes: n, .. }) = nodes.first_mut() {
            *n = count;
        }

        Ok(nodes)
    }

    /// `from X`: vertex type, edge type, or (unknown) edge context.
    fn resolve_target(&self, from: &str) -> Result<Target> {
        match self.model.what_is(from) {
            Ok(ElementKind::Vertex) => {
                let vertex = self.model.get_vertex_by_name(from)?;
                Ok(Target::Vertex {
                    role: vertex.roleid,
                    name: from.into(),
                })
            }
            Ok(ElementKind::Edge) => Ok(Target::Edge {
                name: from.into(),
                edge: self.model.get_edge_by_name(from).ok(),
            }),
            Err(Error::KeyNotFound(_)) => Ok(Target::Edge {
                name: from.into(),
                edge: None,
            }),
            Err(e) => Err(e),
        }
    }

    fn edge_field(&self, target: &Target, name: &str) -> Result<Expr> {
        let Target::Edge { edge, .. } = target else {
            return Err(Error::Panic("edge field on a vertex target".into()));
        };

        let offset = match name {
            "origin" => edge::ORIGIN,
            "destin" => edge::DESTIN,
            "edge" => edge::EDGE,
            "label" => edge::LABEL,
            "timestamp" | "stamp" => edge::TMSTMP,
            "weight" => edge::WEIGHT,
            "weight2" => edge::WEIGHT2,
            other => {
                // a declared edge property; fixed slots map to the
                // record fields
                let Some(edge_model) = edge else {
                    return Err(Error::KeyNotFound(other.into()));
                };
                let pedge = self.model.get_pedge_by_name(edge_model.edgeid, other)?;
                match pedge.off {
                    0 => edge::ORIGIN,
                    1 => edge::DESTIN,
                    2 => edge::TMSTMP,
                    3 => edge::WEIGHT,
                    4 => edge::WEIGHT2,
                    _ => {
                        return Err(Error::NotSupported(
                            "edge properties beyond the second weight",
                        ))
                    }
                }
            }
        };

        let vtype = match edge {
            Some(edge_model) => Model::edge_field_type(edge_model, offset),
            None if offset == edge::TMSTMP => ValueType::Time,
            None => ValueType::Uint,
        };

        Ok(Expr::edge_field(offset, vtype))
    }

    /// Compiles an AST expression.
    ///
    /// `aggs` collects aggregate slots (projection only); `in_filter`
    /// folds text literals to dictionary surrogates so filters
    /// compare keys instead of resolving every record.
    fn compile(
        &self,
        target: &Target,
        ast: &AstExpr,
        mut aggs: Option<&mut Vec<AggSpec>>,
        in_filter: bool,
    ) -> Result<Expr> {
        match ast {
            AstExpr::Field(name) => match target {
                Target::Edge { .. } => self.edge_field(target, name),
                Target::Vertex { role, .. } => {
                    let prop = self.model.get_prop_by_name(*role, name)?;
                    Ok(Expr::vertex_field(*role, prop.propid))
                }
            },

            AstExpr::Const(value) => Ok(Expr::Const(self.compile_const(value, in_filter)?)),

            AstExpr::Fun { name, args } => {
                // aggregates shadow operators of the same name
                if let Some(fun) = AggFun::by_name(name) {
                    let Some(aggs) = aggs.as_deref_mut() else {
                        return Err(Error::Invalid(format!(
                            "aggregate {name} outside the projection"
                        )));
                    };

                    let expr = match args.first() {
                        None => None,
                        Some(AstExpr::Field(star)) if star == "*" => None,
                        Some(arg) => Some(self.compile(target, arg, None, in_filter)?),
                    };

                    let slot = aggs.len();
                    aggs.push(AggSpec { fun, expr });
                    return Ok(Expr::Agg(slot));
                }

                let Some(fun) = fun_by_name(name) else {
                    return Err(Error::KeyNotFound(format!("function {name}")));
                };

                if let Some(arity) = fun.arity() {
                    if args.len() != arity {
                        return Err(Error::Invalid(format!(
                            "{name} expects {arity} arguments, got {}",
                            args.len()
                        )));
                    }
                }

                let args = args
                    .iter()
                    .map(|arg| self.compile(target, arg, aggs.as_deref_mut(), in_filter))
                    .collect::<Result<Vec<_>>>()?;

                Ok(Expr::Op { fun, args })
            }
        }
    }

    fn compile_const(&self, value: &AstValue, in_filter: bool) -> Result<Value> {
        Ok(match value {
            AstValue::Uint(v) => Value::Uint(*v),
            AstValue::Int(v) => Value::Int(*v),
            AstValue::Float(v) => Value::Float(*v),
            AstValue::Bool(v) => Value::Bool(*v),
            AstValue::Time(v) => Value::Time(*v),
            AstValue::Text(s) => {
                if in_filter {
                    // filters compare surrogates; a string the
                    // dictionary never saw matches nothing
                    match self.text.get_key(s) {
                        Ok(key) => Value::Surrogate(key),
                        Err(Error::KeyNotFound(_)) => Value::Surrogate(u64::MAX),
                        Err(e) => return Err(e),
                    }
                } else {
                    Value::Text(s.clone())
                }
            }
        })
    }

    fn compile_order(
        &self,
        target: &Target,
        order: &[AstExpr],
    ) -> Result<(Vec<Expr>, bool)> {
        let mut desc = false;
        let mut out = Vec::with_capacity(order.len());

        for item in order {
            let item = match item {
                #[allow(clippy::indexing_slicing)]
                AstExpr::Fun { name, args } if name == "desc" && args.len() == 1 => {
                    desc = true;
                    &args[0]
                }
                other => other,
            };
            out.push(self.compile(target, item, None, false)?);
        }

        Ok((out, desc))
    }

    /// Grouped projections must be key-equal to the grouping;
    /// everything beyond the group keys must aggregate.
    fn validate_grouping(&self, group: &[Expr], projection: &[Expr]) -> Result<()> {
        if group.is_empty() {
            return Ok(());
        }

        if projection.len() < group.len() {
            return Err(Error::Invalid(
                "projection misses grouping expressions".into(),
            ));
        }

        for (i, g) in group.iter().enumerate() {
            #[allow(clippy::indexing_slicing)]
            let p = &projection[i];
            if p != g {
                return Err(Error::Invalid(format!(
                    "projected expression {i} differs from the grouping"
                )));
            }
        }

        for extra in projection.iter().skip(group.len()) {
            if !extra.has_agg() {
                return Err(Error::Invalid(
                    "non-aggregate projection beyond the grouping".into(),
                ));
            }
        }

        Ok(())
    }

    /// Plain edge field offsets of an expression list; `None` when
    /// any entry is computed.
    fn field_offsets(exprs: &[Expr]) -> Option<Vec<u32>> {
        exprs
            .iter()
            .map(|e| match e {
                Expr::Field(crate::expr::FieldRef::Edge { offset, .. }) => Some(*offset),
                _ => None,
            })
            .collect()
    }

    /// Picks the index covering `offsets` as a key prefix; prefers
    /// the exact, then the smallest key.
    fn covering_index(&self, target: &Target, offsets: &[u32]) -> Result<Option<String>> {
        let itarget = match target {
            Target::Vertex { .. } => IndexTarget::Vertex,
            Target::Edge { name, .. } => IndexTarget::Context(name.clone()),
        };

        let mut best: Option<(usize, String)> = None;
        for index in self.indexes.indexes_for(&itarget)? {
            let spec = index.spec();
            if !spec.offsets().starts_with(offsets) {
                continue;
            }

            let len = spec.offsets().len();
            if best.as_ref().map_or(true, |(blen, _)| len < *blen) {
                best = Some((len, index.desc().name.clone()));
            }
        }

        Ok(best.map(|(_, name)| name))
    }

    /// Index selection precedence: grouping, then ordering, then the
    /// filter's key range.
    fn choose_reader(
        &self,
        target: &Target,
        group: &[Expr],
        order: &[Expr],
        desc: bool,
        filter: Option<&Expr>,
        aggs: &[AggSpec],
    ) -> Result<ReaderSpec> {
        if matches!(target, Target::Vertex { .. }) {
            if !group.is_empty() || !order.is_empty() {
                return Err(Error::NotSupported(
                    "grouping and ordering on vertex types",
                ));
            }
            return Ok(ReaderSpec::fullscan());
        }

        if !group.is_empty() {
            let offsets = Self::field_offsets(group).ok_or(Error::NotSupported(
                "grouping by computed expressions",
            ))?;
            let index = self
                .covering_index(target, &offsets)?
                .ok_or(Error::NotSupported(
                    "grouping without a covering index",
                ))?;

            // a residual filter needs the records; key stubs only
            // carry the group fields
            let stype = if filter.is_some() {
                Stype::Mrange
            } else if aggs.is_empty() {
                Stype::Krange
            } else if aggs.iter().all(|a| a.fun == AggFun::Count && a.expr.is_none()) {
                Stype::Crange
            } else {
                Stype::Mrange
            };

            let (from, to) = self.filter_bounds(&index, filter)?;
            return Ok(ReaderSpec {
                stype,
                index: Some(index),
                key: None,
                from,
                to,
                desc: false,
            });
        }

        if !order.is_empty() {
            let offsets = Self::field_offsets(order).ok_or(Error::NotSupported(
                "ordering by computed expressions",
            ))?;
            let index = self
                .covering_index(target, &offsets)?
                .ok_or(Error::NotSupported("ordering without a covering index"))?;

            let (from, to) = self.filter_bounds(&index, filter)?;
            return Ok(ReaderSpec {
                stype: Stype::Frange,
                index: Some(index),
                key: None,
                from,
                to,
                desc,
            });
        }

        if let Some(filter) = filter {
            let itarget = IndexTarget::Context(target.name().into());
            let mut best: Option<(usize, ReaderSpec)> = None;

            for index in self.indexes.indexes_for(&itarget)? {
                let spec = index.spec();
                let Some((from, to)) = extract_range(filter, spec) else {
                    continue;
                };

                let point = from == to;
                let candidate = ReaderSpec {
                    stype: if point { Stype::Search } else { Stype::Frange },
                    index: Some(index.desc().name.clone()),
                    key: point.then(|| from.clone()),
                    from: Some(from),
                    to: Some(to),
                    desc: false,
                };

                let len = spec.offsets().len();
                let better = match &best {
                    None => true,
                    Some((blen, bspec)) => {
                        // a point search beats a range; smaller keys
                        // beat larger ones
                        (candidate.stype == Stype::Search && bspec.stype != Stype::Search)
                            || (candidate.stype == bspec.stype && len < *blen)
                    }
                };
                if better {
                    best = Some((len, candidate));
                }
            }

            if let Some((_, spec)) = best {
                return Ok(spec);
            }
        }

        Ok(ReaderSpec::fullscan())
    }

    /// Range bounds for a chosen index, from the filter if it
    /// extracts cleanly.
    fn filter_bounds(
        &self,
        index: &str,
        filter: Option<&Expr>,
    ) -> Result<(Option<Vec<u8>>, Option<Vec<u8>>)> {
        let Some(filter) = filter else {
            return Ok((None, None));
        };
        let index = self.indexes.get_index(index)?;
        Ok(match extract_range(filter, index.spec()) {
            Some((from, to)) => (Some(from), Some(to)),
            None => (None, None),
        })
    }

    /// Builds a key spec from a reader spec's index, for the cursor.
    pub fn key_spec_of(&self, spec: &ReaderSpec) -> Result<Option<KeySpec>> {
        match &spec.index {
            Some(name) => Ok(Some(self.indexes.get_index(name)?.spec().clone())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::{
        index::{IndexDesc, DEFAULT_NODE_SIZE},
        model::PropertyDecl,
    };
    use test_log::test;

    struct Fixture {
        _dir: tempfile::TempDir,
        model: Model,
        indexes: IndexManager,
        text: Text,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let model = Model::open(&dir.path().join("model")).unwrap();
        let indexes = IndexManager::open(dir.path()).unwrap();
        let text = Text::open(&dir.path().join("text")).unwrap();

        model
            .add_type(
                "Person",
                &[
                    PropertyDecl::pk("id", ValueType::Uint),
                    PropertyDecl::plain("name", ValueType::Text),
                ],
            )
            .unwrap();

        indexes
            .create_index(IndexDesc {
                name: "xorig".into(),
                target: IndexTarget::Context("sales".into()),
                spec: KeySpec::new(Content::Edge, vec![edge::ORIGIN]),
                sizing: DEFAULT_NODE_SIZE,
            })
            .unwrap();

        Fixture {
            _dir: dir,
            model,
            indexes,
            text,
        }
    }

    fn planner(f: &Fixture) -> Planner<'_> {
        Planner::new(&f.model, &f.indexes, &f.text)
    }

    fn reader_of(nodes: &[PlanNode]) -> &ReaderSpec {
        nodes
            .iter()
            .find_map(|n| match n {
                PlanNode::Reader(r) => Some(r),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn unknown_target_is_an_edge_context() {
        let f = fixture();
        let stmt = SelectStmt::new("sales", vec![AstExpr::field("origin")]);
        let nodes = planner(&f).plan(&stmt).unwrap();

        let Some(PlanNode::Summary { target, .. }) = nodes.first() else {
            panic!("no summary");
        };
        assert!(matches!(target, Target::Edge { .. }));
        assert_eq!(Stype::Fs, reader_of(&nodes).stype);
    }

    #[test]
    fn equality_filter_selects_a_search() {
        let f = fixture();
        let stmt = SelectStmt::new("sales", vec![AstExpr::field("destin")])
            .filter(AstExpr::binop("=", AstExpr::field("origin"), AstExpr::uint(7)));

        let nodes = planner(&f).plan(&stmt).unwrap();
        let reader = reader_of(&nodes);
        assert_eq!(Stype::Search, reader.stype);
        assert_eq!(Some("xorig".into()), reader.index);
        assert_eq!(Some(7u64.to_le_bytes().to_vec()), reader.key);
    }

    #[test]
    fn grouping_selects_key_ranges() {
        let f = fixture();

        // group only: keys suffice
        let stmt = SelectStmt::new("sales", vec![AstExpr::field("origin")])
            .group_by(vec![AstExpr::field("origin")]);
        let nodes = planner(&f).plan(&stmt).unwrap();
        assert_eq!(Stype::Krange, reader_of(&nodes).stype);

        // count(*) only: counting reader
        let stmt = SelectStmt::new(
            "sales",
            vec![AstExpr::field("origin"), AstExpr::fun("count", vec![])],
        )
        .group_by(vec![AstExpr::field("origin")]);
        let nodes = planner(&f).plan(&stmt).unwrap();
        assert_eq!(Stype::Crange, reader_of(&nodes).stype);

        // a real aggregate needs the records
        let stmt = SelectStmt::new(
            "sales",
            vec![
                AstExpr::field("origin"),
                AstExpr::fun("sum", vec![AstExpr::field("weight")]),
            ],
        )
        .group_by(vec![AstExpr::field("origin")]);
        let nodes = planner(&f).plan(&stmt).unwrap();
        assert_eq!(Stype::Mrange, reader_of(&nodes).stype);
    }

    #[test]
    fn grouping_without_index_fails() {
        let f = fixture();
        let stmt = SelectStmt::new("sales", vec![AstExpr::field("destin")])
            .group_by(vec![AstExpr::field("destin")]);
        assert!(matches!(
            planner(&f).plan(&stmt),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn grouped_projection_must_match_group() {
        let f = fixture();
        let stmt = SelectStmt::new("sales", vec![AstExpr::field("destin")])
            .group_by(vec![AstExpr::field("origin")]);
        assert!(matches!(planner(&f).plan(&stmt), Err(Error::Invalid(_))));
    }

    #[test]
    fn vertex_fields_resolve_against_the_model() {
        let f = fixture();
        let stmt = SelectStmt::new(
            "Person",
            vec![AstExpr::field("id"), AstExpr::field("name")],
        );
        let nodes = planner(&f).plan(&stmt).unwrap();

        assert_eq!(Stype::Fs, reader_of(&nodes).stype);
        let Some(PlanNode::Projection(projection)) =
            nodes.iter().find(|n| matches!(n, PlanNode::Projection(_)))
        else {
            panic!("no projection");
        };
        assert_eq!(2, projection.len());

        // unknown property
        let stmt = SelectStmt::new("Person", vec![AstExpr::field("salary")]);
        assert!(matches!(
            planner(&f).plan(&stmt),
            Err(Error::KeyNotFound(_))
        ));
    }

    #[test]
    fn filter_text_literals_become_surrogates() {
        let f = fixture();
        f.text.insert("alice").unwrap();

        let stmt = SelectStmt::new("Person", vec![AstExpr::field("id")]).filter(
            AstExpr::binop("=", AstExpr::field("name"), AstExpr::text("alice")),
        );
        let nodes = planner(&f).plan(&stmt).unwrap();

        let Some(PlanNode::Filter(filter)) =
            nodes.iter().find(|n| matches!(n, PlanNode::Filter(_)))
        else {
            panic!("no filter");
        };

        let mut found = false;
        if let Expr::Op { args, .. } = filter {
            for arg in args {
                if let Expr::Const(Value::Surrogate(_)) = arg {
                    found = true;
                }
            }
        }
        assert!(found);
    }
}
