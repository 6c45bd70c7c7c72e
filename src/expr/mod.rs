// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Algebraic expression trees and their per-record evaluation.
//!
//! Expressions are built by the planner from the AST and evaluated
//! against raw record slots (edges) or assembled vertex rows. Text
//! fields evaluate to raw surrogates unless the context runs in
//! `needtxt` mode, in which case they resolve through a per-context
//! LRU in front of the dictionary.

mod agg;
mod op;
mod range;

pub use agg::{AggFun, Aggregate};
pub use op::{apply, compare_values, Fun};
pub use range::{extract_period, extract_range};

use crate::{
    model::Model,
    text::Text,
    value::{Value, ValueType, UNKNOWN_TEXT},
    Error, Result,
};
use quick_cache::sync::Cache as QuickCache;
use std::sync::Arc;

/// Capacity of the per-evaluator text LRU
const TEXT_LRU: usize = 32_768;

/// A field reference inside an expression
#[derive(Clone, Debug, PartialEq)]
pub enum FieldRef {
    /// An edge record field by offset
    Edge {
        /// Byte offset in the record
        offset: u32,

        /// Declared type, used when no edge model is bound
        vtype: ValueType,
    },

    /// A vertex property, resolved through the model against an
    /// assembled row
    Vertex {
        /// Role id of the vertex type
        role: u32,

        /// Property id
        propid: u64,
    },
}

/// An expression tree node
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// A record field
    Field(FieldRef),

    /// A literal
    Const(Value),

    /// An operator application
    Op {
        /// Operator code
        fun: Fun,

        /// Child expressions, operator arity many
        args: Vec<Expr>,
    },

    /// A shared subtree
    Ref(Arc<Expr>),

    /// An aggregate slot; evaluation reads the current accumulator
    Agg(usize),
}

impl Expr {
    /// Unsigned literal.
    #[must_use]
    pub fn uint(v: u64) -> Self {
        Self::Const(Value::Uint(v))
    }

    /// Signed literal.
    #[must_use]
    pub fn int(v: i64) -> Self {
        Self::Const(Value::Int(v))
    }

    /// Time literal.
    #[must_use]
    pub fn time(v: i64) -> Self {
        Self::Const(Value::Time(v))
    }

    /// Edge field.
    #[must_use]
    pub fn edge_field(offset: u32, vtype: ValueType) -> Self {
        Self::Field(FieldRef::Edge { offset, vtype })
    }

    /// Vertex property field.
    #[must_use]
    pub fn vertex_field(role: u32, propid: u64) -> Self {
        Self::Field(FieldRef::Vertex { role, propid })
    }

    /// Binary operator.
    #[must_use]
    pub fn op2(fun: Fun, left: Self, right: Self) -> Self {
        Self::Op {
            fun,
            args: vec![left, right],
        }
    }

    /// Conjunction.
    #[must_use]
    pub fn and(left: Self, right: Self) -> Self {
        Self::op2(Fun::And, left, right)
    }

    /// Equality against a literal.
    #[must_use]
    pub fn eq(left: Self, right: Self) -> Self {
        Self::op2(Fun::Eq, left, right)
    }

    /// Membership in a literal list.
    #[must_use]
    pub fn in_list(needle: Self, candidates: Vec<Value>) -> Self {
        let mut args = Vec::with_capacity(candidates.len() + 1);
        args.push(needle);
        args.extend(candidates.into_iter().map(Expr::Const));
        Self::Op { fun: Fun::In, args }
    }

    /// Evaluates the expression against one record.
    pub fn eval(&self, ctx: &EvalCtx, record: &[u8]) -> Result<Value> {
        match self {
            Self::Field(field) => ctx.field_value(field, record),
            Self::Const(value) => Ok(value.clone()),
            Self::Op { fun, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(arg.eval(ctx, record)?);
                }
                apply(*fun, &values)
            }
            Self::Ref(inner) => inner.eval(ctx, record),
            Self::Agg(slot) => Ok(ctx.agg_values.get(*slot).cloned().unwrap_or(Value::Nothing)),
        }
    }

    /// Evaluates as a predicate.
    pub fn eval_bool(&self, ctx: &EvalCtx, record: &[u8]) -> Result<bool> {
        Ok(self.eval(ctx, record)?.is_true())
    }

    /// Collects every field reference in the tree.
    pub fn fields<'a>(&'a self, out: &mut Vec<&'a FieldRef>) {
        match self {
            Self::Field(field) => out.push(field),
            Self::Const(_) | Self::Agg(_) => {}
            Self::Op { args, .. } => {
                for arg in args {
                    arg.fields(out);
                }
            }
            Self::Ref(inner) => inner.fields(out),
        }
    }

    /// Whether the tree contains an aggregate node.
    #[must_use]
    pub fn has_agg(&self) -> bool {
        match self {
            Self::Agg(_) => true,
            Self::Field(_) | Self::Const(_) => false,
            Self::Op { args, .. } => args.iter().any(Expr::has_agg),
            Self::Ref(inner) => inner.has_agg(),
        }
    }
}

/// Evaluation context: model, optional dictionary, optional edge
/// model, text mode and the aggregate accumulators
pub struct EvalCtx {
    /// The schema catalog
    pub model: Arc<Model>,

    /// The text dictionary, when surrogates may need resolving
    pub text: Option<Arc<Text>>,

    /// The edge model of the records under evaluation
    pub edge: Option<Arc<crate::model::Edge>>,

    /// Resolve text surrogates into strings
    pub needtxt: bool,

    /// Current aggregate outputs, indexed by [`Expr::Agg`] slots
    pub agg_values: Vec<Value>,

    tlru: QuickCache<u64, Arc<str>>,
}

impl EvalCtx {
    /// A context over the model only.
    #[must_use]
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            model,
            text: None,
            edge: None,
            needtxt: false,
            agg_values: Vec::new(),
            tlru: QuickCache::new(TEXT_LRU),
        }
    }

    /// Attaches the text dictionary and enables resolution.
    #[must_use]
    pub fn with_text(mut self, text: Arc<Text>) -> Self {
        self.text = Some(text);
        self.needtxt = true;
        self
    }

    /// Binds the edge model for field typing.
    #[must_use]
    pub fn for_edge(mut self, edge: Arc<crate::model::Edge>) -> Self {
        self.edge = Some(edge);
        self
    }

    /// Resolves a text surrogate, through the LRU.
    ///
    /// Unknown surrogates resolve to the `UNKNOWN` sentinel rather
    /// than failing: a reader may see records whose labels were
    /// interned after its dictionary snapshot.
    pub fn resolve_text(&self, key: u64) -> Result<Value> {
        if !self.needtxt {
            return Ok(Value::Surrogate(key));
        }
        let Some(text) = &self.text else {
            return Ok(Value::Surrogate(key));
        };

        if let Some(s) = self.tlru.get(&key) {
            return Ok(Value::Text(s.to_string()));
        }

        match text.get_text(key) {
            Ok(s) => {
                self.tlru.insert(key, s.clone());
                Ok(Value::Text(s.to_string()))
            }
            Err(Error::KeyNotFound(_)) => Ok(Value::Text(UNKNOWN_TEXT.into())),
            Err(e) => Err(e),
        }
    }

    fn field_value(&self, field: &FieldRef, record: &[u8]) -> Result<Value> {
        match field {
            FieldRef::Edge { offset, vtype } => {
                let vtype = match &self.edge {
                    Some(edge) => Model::edge_field_type(edge, *offset),
                    None => *vtype,
                };

                let mut raw = [0u8; 8];
                if let Some(src) = record.get(*offset as usize..*offset as usize + 8) {
                    raw.copy_from_slice(src);
                }

                let value = Value::from_raw(vtype, raw);
                match value {
                    Value::Surrogate(key) => self.resolve_text(key),
                    other => Ok(other),
                }
            }
            FieldRef::Vertex { role, propid } => {
                let prop = self.model.get_prop_by_id(*role, *propid)?;
                let vertex = self.model.get_vertex_by_id(*role)?;

                // assembled row: one 8-byte slot per property, then
                // the presence bitmap
                let slot = prop.off as usize;
                let ctrl_base = 8 * usize::from(vertex.num);

                let present = record
                    .get(ctrl_base + slot / 8)
                    .is_some_and(|byte| byte & (1 << (slot % 8)) != 0);
                if !present {
                    return Ok(Value::Nothing);
                }

                let mut raw = [0u8; 8];
                if let Some(src) = record.get(8 * slot..8 * slot + 8) {
                    raw.copy_from_slice(src);
                }

                let value = Value::from_raw(prop.value, raw);
                match value {
                    Value::Surrogate(key) => self.resolve_text(key),
                    other => Ok(other),
                }
            }
        }
    }
}
