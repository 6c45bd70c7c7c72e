// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Aggregate functions with map/reduce state.

use super::{op::compare_values, EvalCtx, Expr};
use crate::{value::Value, Error, Result};

/// Aggregate function kinds
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AggFun {
    /// Row count
    Count,

    /// Numeric sum
    Sum,

    /// Numeric average
    Avg,

    /// Smallest value
    Min,

    /// Largest value
    Max,
}

impl AggFun {
    /// Resolves an aggregate by its SQL name.
    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "count" => Some(Self::Count),
            "sum" => Some(Self::Sum),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Acc {
    Empty,
    U(u64),
    I(i64),
    F(f64),
}

impl Acc {
    fn add(self, v: &Value) -> Result<Self> {
        let next = match (self, v) {
            (Self::Empty, Value::Uint(x)) => Self::U(*x),
            (Self::Empty, Value::Int(x) | Value::Time(x) | Value::Date(x)) => Self::I(*x),
            (Self::Empty, Value::Float(x)) => Self::F(*x),

            (Self::U(acc), Value::Uint(x)) => Self::U(acc.wrapping_add(*x)),
            #[allow(clippy::cast_possible_wrap)]
            (Self::U(acc), Value::Int(x) | Value::Time(x) | Value::Date(x)) => {
                Self::I((acc as i64).wrapping_add(*x))
            }
            #[allow(clippy::cast_precision_loss)]
            (Self::U(acc), Value::Float(x)) => Self::F(acc as f64 + x),

            #[allow(clippy::cast_possible_wrap)]
            (Self::I(acc), Value::Uint(x)) => Self::I(acc.wrapping_add(*x as i64)),
            (Self::I(acc), Value::Int(x) | Value::Time(x) | Value::Date(x)) => {
                Self::I(acc.wrapping_add(*x))
            }
            #[allow(clippy::cast_precision_loss)]
            (Self::I(acc), Value::Float(x)) => Self::F(acc as f64 + x),

            #[allow(clippy::cast_precision_loss)]
            (Self::F(acc), _) => Self::F(
                acc + v
                    .as_f64()
                    .ok_or_else(|| Error::Invalid("sum over a non-numeric value".into()))?,
            ),

            (acc, Value::Nothing) => acc,
            _ => return Err(Error::Invalid("sum over a non-numeric value".into())),
        };
        Ok(next)
    }

    fn value(self) -> Value {
        match self {
            Self::Empty => Value::Nothing,
            Self::U(x) => Value::Uint(x),
            Self::I(x) => Value::Int(x),
            Self::F(x) => Value::Float(x),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn as_f64(self) -> f64 {
        match self {
            Self::Empty => 0.0,
            Self::U(x) => x as f64,
            Self::I(x) => x as f64,
            Self::F(x) => x,
        }
    }
}

/// One aggregate slot of a query
///
/// `map` folds a record into the accumulator; `reduce` yields the
/// aggregate for the finished group and resets the state for the
/// next one.
pub struct Aggregate {
    fun: AggFun,

    /// Argument expression; `None` for `count(*)`
    expr: Option<Expr>,

    count: u64,
    sum: Acc,
    min: Option<Value>,
    max: Option<Value>,
}

impl Aggregate {
    /// Creates an aggregate slot.
    #[must_use]
    pub fn new(fun: AggFun, expr: Option<Expr>) -> Self {
        Self {
            fun,
            expr,
            count: 0,
            sum: Acc::Empty,
            min: None,
            max: None,
        }
    }

    /// The function of this slot.
    #[must_use]
    pub fn fun(&self) -> AggFun {
        self.fun
    }

    /// Folds one record into the group's state.
    pub fn map(&mut self, ctx: &EvalCtx, record: &[u8]) -> Result<()> {
        let value = match &self.expr {
            Some(expr) => expr.eval(ctx, record)?,
            None => Value::Uint(1),
        };

        if matches!(value, Value::Nothing) && self.expr.is_some() {
            return Ok(());
        }

        self.count += 1;

        match self.fun {
            AggFun::Count => {}
            AggFun::Sum | AggFun::Avg => {
                self.sum = self.sum.add(&value)?;
            }
            AggFun::Min => {
                let replace = match &self.min {
                    Some(cur) => {
                        compare_values(&value, cur) == Some(std::cmp::Ordering::Less)
                    }
                    None => true,
                };
                if replace {
                    self.min = Some(value);
                }
            }
            AggFun::Max => {
                let replace = match &self.max {
                    Some(cur) => {
                        compare_values(&value, cur) == Some(std::cmp::Ordering::Greater)
                    }
                    None => true,
                };
                if replace {
                    self.max = Some(value);
                }
            }
        }
        Ok(())
    }

    /// Folds a pre-counted run of records in, for counting readers
    /// that never touch the records themselves.
    pub fn map_count(&mut self, n: u64) -> Result<()> {
        if self.fun != AggFun::Count || self.expr.is_some() {
            return Err(Error::Invalid(
                "pre-counted input reaches a non-count aggregate".into(),
            ));
        }
        self.count += n;
        Ok(())
    }

    /// Finalizes the group and resets for the next one.
    pub fn reduce(&mut self) -> Value {
        let out = match self.fun {
            AggFun::Count => Value::Uint(self.count),
            AggFun::Sum => self.sum.value(),
            AggFun::Avg => {
                if self.count == 0 {
                    Value::Nothing
                } else {
                    #[allow(clippy::cast_precision_loss)]
                    let n = self.count as f64;
                    Value::Float(self.sum.as_f64() / n)
                }
            }
            AggFun::Min => self.min.take().unwrap_or(Value::Nothing),
            AggFun::Max => self.max.take().unwrap_or(Value::Nothing),
        };

        self.count = 0;
        self.sum = Acc::Empty;
        self.min = None;
        self.max = None;
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::record::{edge, EdgeRecord};

    fn ctx_model() -> std::sync::Arc<crate::model::Model> {
        let dir = tempfile::tempdir().unwrap();
        let model = crate::model::Model::open(dir.path()).unwrap();
        std::mem::forget(dir);
        std::sync::Arc::new(model)
    }

    fn weight_rec(w: u64) -> Vec<u8> {
        EdgeRecord::new(edge::RECORD_SIZE)
            .origin(1)
            .weight(w.to_le_bytes())
            .build()
    }

    #[test]
    fn sum_and_reset() {
        let model = ctx_model();
        let ctx = EvalCtx::new(model.clone());
        let expr = Expr::edge_field(edge::WEIGHT, crate::value::ValueType::Uint);

        let mut agg = Aggregate::new(AggFun::Sum, Some(expr));
        for w in [10, 20, 30] {
            agg.map(&ctx, &weight_rec(w)).unwrap();
        }
        assert_eq!(Value::Uint(60), agg.reduce());

        // state is clean for the next group
        agg.map(&ctx, &weight_rec(5)).unwrap();
        assert_eq!(Value::Uint(5), agg.reduce());
    }

    #[test]
    fn count_star_counts_rows() {
        let model = ctx_model();
        let ctx = EvalCtx::new(model.clone());

        let mut agg = Aggregate::new(AggFun::Count, None);
        for w in [1, 2, 3, 4] {
            agg.map(&ctx, &weight_rec(w)).unwrap();
        }
        assert_eq!(Value::Uint(4), agg.reduce());
    }

    #[test]
    fn min_max_avg() {
        let model = ctx_model();
        let ctx = EvalCtx::new(model.clone());
        let field = || Expr::edge_field(edge::WEIGHT, crate::value::ValueType::Uint);

        let mut min = Aggregate::new(AggFun::Min, Some(field()));
        let mut max = Aggregate::new(AggFun::Max, Some(field()));
        let mut avg = Aggregate::new(AggFun::Avg, Some(field()));

        for w in [30, 10, 20] {
            min.map(&ctx, &weight_rec(w)).unwrap();
            max.map(&ctx, &weight_rec(w)).unwrap();
            avg.map(&ctx, &weight_rec(w)).unwrap();
        }

        assert_eq!(Value::Uint(10), min.reduce());
        assert_eq!(Value::Uint(30), max.reduce());
        assert_eq!(Value::Float(20.0), avg.reduce());
    }
}
