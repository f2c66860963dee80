//! Core types for RelModel.
//!
//! This crate provides the foundational pieces shared by the query and
//! hydration layers:
//!
//! - `Value` and `Row` for dynamically-typed result data
//! - `Cast` and the cast functions for attribute conversion
//! - `AttributeStore` for raw values, original snapshots and change tracking
//! - `EntityDef` (entity-type metadata and factory) and `Entity`
//! - `Error` and `Result`

pub mod attributes;
pub mod cast;
pub mod entity;
pub mod error;
pub mod model;
pub mod row;
pub mod value;

pub use attributes::{AttributeCasts, AttributeStore, DEFAULT_DATE_FORMAT};
pub use cast::{Cast, compare_for_dirty};
pub use entity::{Entity, Loaded, filter_visible};
pub use error::{
    ConfigError, EncodingError, Error, InvalidRelationError, MalformedPlanError, NotFoundError,
    QueryError, QueryErrorKind, Result, TypeError,
};
pub use model::{Accessor, CREATED_AT, EntityDef, EntityDefBuilder, KeyType, UPDATED_AT};
pub use row::{ColumnInfo, Row};
pub use value::Value;
