// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The well-typed DQL AST the planner consumes.
//!
//! The SQL lexer and parser live outside the core; they hand over
//! statements in this shape. Field and function references are still
//! names here; the planner resolves them against the model.

/// A literal in the AST
#[derive(Clone, Debug, PartialEq)]
pub enum AstValue {
    /// Unsigned integer
    Uint(u64),

    /// Signed integer
    Int(i64),

    /// Float
    Float(f64),

    /// Boolean
    Bool(bool),

    /// String literal
    Text(String),

    /// Timestamp literal, nanoseconds since epoch
    Time(i64),
}

/// An expression in the AST
#[derive(Clone, Debug, PartialEq)]
pub enum AstExpr {
    /// A field or property reference by name
    Field(String),

    /// A literal
    Const(AstValue),

    /// A function or operator application by name (operators,
    /// conversions and aggregates alike)
    Fun {
        /// Function name, lower case
        name: String,

        /// Arguments
        args: Vec<AstExpr>,
    },
}

impl AstExpr {
    /// Field reference.
    #[must_use]
    pub fn field(name: &str) -> Self {
        Self::Field(name.into())
    }

    /// Unsigned literal.
    #[must_use]
    pub fn uint(v: u64) -> Self {
        Self::Const(AstValue::Uint(v))
    }

    /// Time literal.
    #[must_use]
    pub fn time(v: i64) -> Self {
        Self::Const(AstValue::Time(v))
    }

    /// Text literal.
    #[must_use]
    pub fn text(s: &str) -> Self {
        Self::Const(AstValue::Text(s.into()))
    }

    /// Function application.
    #[must_use]
    pub fn fun(name: &str, args: Vec<Self>) -> Self {
        Self::Fun {
            name: name.into(),
            args,
        }
    }

    /// Binary operator shorthand.
    #[must_use]
    pub fn binop(name: &str, left: Self, right: Self) -> Self {
        Self::fun(name, vec![left, right])
    }
}

/// A SELECT statement
#[derive(Clone, Debug, PartialEq)]
pub struct SelectStmt {
    /// Target type or context name
    pub from: String,

    /// Projected expressions
    pub select: Vec<AstExpr>,

    /// Filter
    pub where_: Option<AstExpr>,

    /// Grouping expressions
    pub group: Vec<AstExpr>,

    /// Ordering expressions
    pub order: Vec<AstExpr>,
}

impl SelectStmt {
    /// A bare `SELECT ... FROM target`.
    #[must_use]
    pub fn new(from: &str, select: Vec<AstExpr>) -> Self {
        Self {
            from: from.into(),
            select,
            where_: None,
            group: Vec::new(),
            order: Vec::new(),
        }
    }

    /// Adds a WHERE clause.
    #[must_use]
    pub fn filter(mut self, where_: AstExpr) -> Self {
        self.where_ = Some(where_);
        self
    }

    /// Adds a GROUP BY clause.
    #[must_use]
    pub fn group_by(mut self, group: Vec<AstExpr>) -> Self {
        self.group = group;
        self
    }

    /// Adds an ORDER BY clause.
    #[must_use]
    pub fn order_by(mut self, order: Vec<AstExpr>) -> Self {
        self.order = order;
        self
    }
}
