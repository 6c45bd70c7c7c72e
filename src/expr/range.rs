// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Extraction of index key ranges from filter trees.
//!
//! `WHERE k = c` pins a key field, `WHERE k >= a AND k <= b`
//! brackets it. When every field of an index key spec is pinned or
//! bracketed by AND-joined comparisons, the filter collapses to a
//! contiguous key range and the planner can replace a fullscan with
//! an index range scan.

use super::{Expr, FieldRef, Fun};
use crate::{index::KeySpec, record::Content, value::Value};
use rustc_hash::FxHashMap;

#[derive(Default, Clone)]
struct Constraint {
    eq: Option<u64>,
    lo: Option<u64>,
    hi: Option<u64>,
}

/// Raw field image of a literal, as it sits in a record slot.
fn literal_bits(value: &Value) -> Option<u64> {
    match value {
        Value::Uint(v) | Value::Surrogate(v) => Some(*v),
        #[allow(clippy::cast_sign_loss)]
        Value::Int(v) | Value::Time(v) | Value::Date(v) => Some(*v as u64),
        Value::Bool(v) => Some(u64::from(u8::from(*v))),
        Value::Float(_) | Value::Text(_) | Value::Nothing => None,
    }
}

fn edge_offset(expr: &Expr) -> Option<u32> {
    match expr {
        Expr::Field(FieldRef::Edge { offset, .. }) => Some(*offset),
        Expr::Ref(inner) => edge_offset(inner),
        _ => None,
    }
}

fn literal(expr: &Expr) -> Option<u64> {
    match expr {
        Expr::Const(value) => literal_bits(value),
        Expr::Ref(inner) => literal(inner),
        _ => None,
    }
}

/// Collects `field op literal` constraints from an AND tree.
fn collect(expr: &Expr, out: &mut FxHashMap<u32, Constraint>) {
    match expr {
        Expr::Op { fun: Fun::And, args } => {
            for arg in args {
                collect(arg, out);
            }
        }
        Expr::Op { fun: Fun::Just, args } => {
            if let Some(arg) = args.first() {
                collect(arg, out);
            }
        }
        Expr::Ref(inner) => collect(inner, out),
        Expr::Op { fun, args } if args.len() == 2 => {
            #[allow(clippy::indexing_slicing)]
            let (left, right) = (&args[0], &args[1]);

            // normalize to field-on-the-left
            let (offset, value, fun) = match (edge_offset(left), literal(right)) {
                (Some(offset), Some(value)) => (offset, value, *fun),
                _ => match (edge_offset(right), literal(left)) {
                    (Some(offset), Some(value)) => {
                        let flipped = match fun {
                            Fun::Ge => Fun::Le,
                            Fun::Le => Fun::Ge,
                            Fun::Gt => Fun::Lt,
                            Fun::Lt => Fun::Gt,
                            other => *other,
                        };
                        (offset, value, flipped)
                    }
                    _ => return,
                },
            };

            let entry = out.entry(offset).or_default();
            match fun {
                Fun::Eq => entry.eq = Some(value),
                Fun::Ge => entry.lo = Some(value),
                Fun::Le => entry.hi = Some(value),
                _ => {}
            }
        }
        _ => {}
    }
}

/// Extracts a `(from, to)` key pair for `spec` from `filter`.
///
/// Returns `None` unless every key field is pinned by an equality or
/// bracketed by both a `>=` and a `<=` literal.
#[must_use]
pub fn extract_range(filter: &Expr, spec: &KeySpec) -> Option<(Vec<u8>, Vec<u8>)> {
    if spec.content() != Content::Edge {
        return None;
    }

    let mut constraints = FxHashMap::default();
    collect(filter, &mut constraints);

    let mut from = Vec::with_capacity(spec.size());
    let mut to = Vec::with_capacity(spec.size());

    for &offset in spec.offsets() {
        let c = constraints.get(&offset)?;

        let (lo, hi) = match (c.eq, c.lo, c.hi) {
            (Some(eq), _, _) => (eq, eq),
            (None, Some(lo), Some(hi)) => (lo, hi),
            _ => return None,
        };

        from.extend_from_slice(&lo.to_le_bytes());
        to.extend_from_slice(&hi.to_le_bytes());
    }

    Some((from, to))
}

/// Extracts the time window a filter pins on the edge stamp field,
/// for block-level pruning. Partial bounds keep the opposite end
/// open.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn extract_period(filter: &Expr) -> crate::time::Period {
    use crate::time::{Period, DAWN, DUSK};

    let mut constraints = FxHashMap::default();
    collect(filter, &mut constraints);

    let Some(c) = constraints.get(&crate::record::edge::TMSTMP) else {
        return Period::ALL;
    };

    match (c.eq, c.lo, c.hi) {
        (Some(eq), _, _) => Period::new(eq as i64, eq as i64),
        (None, lo, hi) => Period::new(
            lo.map_or(DAWN, |v| v as i64),
            hi.map_or(DUSK, |v| v as i64),
        ),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::record::edge;
    use crate::value::ValueType;

    fn orig() -> Expr {
        Expr::edge_field(edge::ORIGIN, ValueType::Uint)
    }

    fn stamp() -> Expr {
        Expr::edge_field(edge::TMSTMP, ValueType::Time)
    }

    fn spec(offsets: Vec<u32>) -> KeySpec {
        KeySpec::new(Content::Edge, offsets)
    }

    #[test]
    fn equality_pins_a_field() {
        let filter = Expr::eq(orig(), Expr::uint(7));
        let (from, to) = extract_range(&filter, &spec(vec![edge::ORIGIN])).unwrap();
        assert_eq!(7u64.to_le_bytes().to_vec(), from);
        assert_eq!(from, to);
    }

    #[test]
    fn between_brackets_a_field() {
        let filter = Expr::and(
            Expr::eq(orig(), Expr::uint(1)),
            Expr::and(
                Expr::op2(Fun::Ge, stamp(), Expr::time(10)),
                Expr::op2(Fun::Le, stamp(), Expr::time(25)),
            ),
        );

        let (from, to) =
            extract_range(&filter, &spec(vec![edge::ORIGIN, edge::TMSTMP])).unwrap();

        let mut want_from = 1u64.to_le_bytes().to_vec();
        want_from.extend_from_slice(&10i64.to_le_bytes());
        let mut want_to = 1u64.to_le_bytes().to_vec();
        want_to.extend_from_slice(&25i64.to_le_bytes());

        assert_eq!(want_from, from);
        assert_eq!(want_to, to);
    }

    #[test]
    fn reversed_literal_comparisons_normalize() {
        // 10 <= timestamp is timestamp >= 10
        let filter = Expr::and(
            Expr::eq(orig(), Expr::uint(1)),
            Expr::and(
                Expr::op2(Fun::Le, Expr::time(10), stamp()),
                Expr::op2(Fun::Ge, Expr::time(25), stamp()),
            ),
        );
        assert!(extract_range(&filter, &spec(vec![edge::ORIGIN, edge::TMSTMP])).is_some());
    }

    #[test]
    fn uncovered_field_yields_nothing() {
        let filter = Expr::eq(orig(), Expr::uint(7));
        assert!(extract_range(&filter, &spec(vec![edge::ORIGIN, edge::DESTIN])).is_none());
    }

    #[test]
    fn half_open_bracket_yields_nothing() {
        let filter = Expr::op2(Fun::Ge, stamp(), Expr::time(10));
        assert!(extract_range(&filter, &spec(vec![edge::TMSTMP])).is_none());
    }

    #[test]
    fn or_does_not_constrain() {
        let filter = Expr::op2(
            Fun::Or,
            Expr::eq(orig(), Expr::uint(1)),
            Expr::eq(orig(), Expr::uint(2)),
        );
        assert!(extract_range(&filter, &spec(vec![edge::ORIGIN])).is_none());
    }
}
