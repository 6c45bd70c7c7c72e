// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    expr::{EvalCtx, Expr},
    value::{Value, EOROW},
    Result,
};

/// Projects records into the framed wire form.
///
/// Each field is one type tag byte followed by its payload: eight
/// bytes for scalars, the bytes plus a NUL for text, a single byte
/// for booleans. `EOROW` closes the row.
pub struct RowProjector {
    exprs: Vec<Expr>,
}

impl RowProjector {
    /// Creates a projector over the plan's projection list.
    #[must_use]
    pub fn new(exprs: Vec<Expr>) -> Self {
        Self { exprs }
    }

    /// Number of projected fields.
    #[must_use]
    pub fn width(&self) -> usize {
        self.exprs.len()
    }

    /// The projected expressions.
    #[must_use]
    pub fn exprs(&self) -> &[Expr] {
        &self.exprs
    }

    /// Evaluates all fields against `record` and frames one row.
    pub fn project(&self, ctx: &EvalCtx, record: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(16 * self.exprs.len() + 1);

        for expr in &self.exprs {
            let value = expr.eval(ctx, record)?;
            out.push(value.value_type() as u8);

            match value {
                Value::Text(s) => {
                    out.extend_from_slice(s.as_bytes());
                    out.push(0);
                }
                Value::Bool(b) => out.push(u8::from(b)),
                Value::Nothing => out.extend_from_slice(&[0u8; 8]),
                other => out.extend_from_slice(&other.to_raw()?),
            }
        }

        out.push(EOROW);
        Ok(out)
    }
}
