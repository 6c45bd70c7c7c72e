// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    expr::{Aggregate, EvalCtx},
    plan::AggSpec,
    value::Value,
    Result,
};

/// Runs a query's aggregate slots over one group at a time.
///
/// The cursor drives `map` for every record of the current group and
/// `reduce` when the group key switches; with no GROUP BY there is
/// one implicit group reduced at end of stream.
pub struct GroupEngine {
    aggs: Vec<Aggregate>,
}

impl GroupEngine {
    /// Builds the engine from the plan's aggregate list.
    #[must_use]
    pub fn new(specs: &[AggSpec]) -> Self {
        Self {
            aggs: specs
                .iter()
                .map(|s| Aggregate::new(s.fun, s.expr.clone()))
                .collect(),
        }
    }

    /// Folds one record into every slot.
    pub fn map(&mut self, ctx: &EvalCtx, record: &[u8]) -> Result<()> {
        for agg in &mut self.aggs {
            agg.map(ctx, record)?;
        }
        Ok(())
    }

    /// Folds a pre-counted key run in (counting readers).
    pub fn map_count(&mut self, n: u64) -> Result<()> {
        for agg in &mut self.aggs {
            agg.map_count(n)?;
        }
        Ok(())
    }

    /// Finalizes the current group; slot order matches the plan.
    pub fn reduce(&mut self) -> Vec<Value> {
        self.aggs.iter_mut().map(Aggregate::reduce).collect()
    }
}
