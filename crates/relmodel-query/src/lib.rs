//! Structured SELECT builder and row-source abstraction for RelModel.
//!
//! `relmodel-query` is the **query construction layer**. Relation
//! descriptors build [`Select`] values against it, and a [`Connection`]
//! turns them into rows.
//!
//! # Role In The Architecture
//!
//! - **Expression DSL**: [`Expr`] builds WHERE, ON and SELECT-list terms.
//! - **Dialect support**: renders SQL for Postgres, MySQL and SQLite.
//! - **Row sources**: [`Connection`] is the only seam to a database;
//!   [`MemoryConnection`] evaluates queries in process and logs them.
//! - **Aliasing**: [`AliasCounter`] hands out unique self-join aliases.

pub mod alias;
pub mod clause;
pub mod connection;
pub mod expr;
pub mod join;
pub mod memory;
pub mod select;

pub use alias::{ALIAS_PREFIX, AliasCounter};
pub use clause::{Limit, Offset, OrderBy, OrderDirection, Where};
pub use connection::Connection;
pub use expr::{BinaryOp, Dialect, Expr};
pub use join::{Join, JoinType};
pub use memory::MemoryConnection;
pub use select::{Select, SelectItem};
