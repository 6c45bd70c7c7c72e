// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! An analytical graph/time-series storage and query core.
//!
//! Vertices (typed objects with properties) and edges (timestamped,
//! typed relationships) live in append-only, block-compressed page
//! files. Queries run through a planner and a cursor: filters,
//! grouping, aggregation and ordering, driven by index-aware readers
//! over the store's files.
//!
//! The crate is the storage and execution core only: SQL parsing,
//! the network session layer, bulk loading and procedure hosting are
//! external consumers of this API.
//!
//! # Example
//!
//! ```
//! use nowdb::{AstExpr, PropertyDecl, Scope, SelectStmt, Value, ValueType};
//! #
//! # let folder = tempfile::tempdir()?;
//! # let path = folder.path().join("db");
//!
//! nowdb::Scope::create(&path)?;
//! let scope = Scope::open(&path)?;
//!
//! scope.create_type(
//!     "Person",
//!     &[
//!         PropertyDecl::pk("id", ValueType::Uint),
//!         PropertyDecl::plain("name", ValueType::Text),
//!     ],
//! )?;
//!
//! scope.insert_vertex(
//!     "Person",
//!     &[("id", Value::Uint(1)), ("name", Value::Text("ada".into()))],
//! )?;
//!
//! let stmt = SelectStmt::new("Person", vec![AstExpr::field("id"), AstExpr::field("name")]);
//! let mut cursor = scope.execute(&stmt)?;
//!
//! let mut buf = vec![0u8; 8192];
//! let (n, rows) = cursor.fetch(&mut buf)?;
//! assert_eq!(1, rows);
//! # let _ = n;
//! #
//! # Ok::<(), nowdb::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod coding;
mod cursor;
mod error;
pub mod expr;
pub mod index;
pub mod io;
pub mod model;
pub mod plan;
pub mod reader;
pub mod record;
mod scope;
pub mod store;
mod text;
pub mod time;
mod value;
mod vrow;

pub use cursor::{Cursor, GroupEngine, RowProjector};
pub use error::{Error, IoOp, Result};
pub use expr::{AggFun, EvalCtx, Expr, Fun};
pub use index::{IndexDesc, IndexManager, IndexTarget, KeySpec};
pub use io::{CompressionType, File, PageId};
pub use model::{Model, PropertyDecl, VidKind};
pub use plan::{AstExpr, AstValue, PlanNode, Planner, SelectStmt, Stype};
pub use record::Content;
pub use scope::{EdgeInsert, Scope, VID_INDEX};
pub use store::{Store, StoreConfig, StoreStats};
pub use text::Text;
pub use time::{Period, Timestamp, DAWN, DUSK};
pub use value::{Value, ValueType, EOROW};
pub use vrow::VRow;
