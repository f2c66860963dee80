//! RelModel - entity-relationship hydration for SQL record types.
//!
//! RelModel declares typed associations between record types, turns them
//! into constrained queries, and converts flat result rows back into an
//! in-memory object graph, providing:
//!
//! - Attribute casting and cast-aware dirty tracking
//! - Direct, inverse, through, many-to-many and polymorphic relations
//! - Batched eager loading: one query per relation per nesting level
//! - Pivot records for many-to-many results
//! - Relation existence and count filters
//!
//! # Quick Start
//!
//! ```ignore
//! use relmodel::prelude::*;
//!
//! let conn = MemoryConnection::new();
//! conn.create_table("users", &["id", "name"]);
//! conn.create_table("posts", &["id", "user_id", "title"]);
//!
//! let mut registry = Registry::for_connection(&conn);
//! registry.register(EntityDef::builder("User", "users").timestamps(false).build()?);
//! registry.register(EntityDef::builder("Post", "posts").timestamps(false).build()?);
//! registry.define("User", "posts", |r: &Relate<'_>| r.has_many("Post"));
//! registry.define("Post", "user", |r: &Relate<'_>| r.belongs_to("User"));
//!
//! let session = Session::new(conn, registry);
//!
//! // Two queries, however many users there are.
//! let users = session.query("User")?.with("posts").get()?;
//! for user in &users {
//!     println!("{} has {} posts", user.get_raw("name"), user.related_many("posts").len());
//! }
//! ```
//!
//! # Crates
//!
//! - [`relmodel_core`]: values, rows, errors, casts, the attribute store and entities
//! - [`relmodel_query`]: the `Select` builder, SQL rendering and row sources
//! - [`relmodel_session`]: relations, the registry, eager loading and sessions

pub use relmodel_core::{
    Accessor, AttributeCasts, AttributeStore, CREATED_AT, Cast, ColumnInfo, ConfigError,
    DEFAULT_DATE_FORMAT, EncodingError, Entity, EntityDef, EntityDefBuilder, Error,
    InvalidRelationError, KeyType, Loaded, MalformedPlanError, NotFoundError, QueryError,
    QueryErrorKind, Result, Row, TypeError, UPDATED_AT, Value, compare_for_dirty, filter_visible,
};

pub use relmodel_query::{
    ALIAS_PREFIX, AliasCounter, BinaryOp, Connection, Dialect, Expr, Join, JoinType, Limit,
    MemoryConnection, Offset, OrderBy, OrderDirection, Select, SelectItem, Where,
};

pub use relmodel_session::{
    BatchLoad, BelongsTo, BelongsToMany, CallSite, Constraint, Context, DEFAULT_N1_THRESHOLD,
    DEFAULT_PIVOT_ACCESSOR, DefaultModel, Dictionary, EagerPlan, EntityQuery, HasOneOrMany,
    HasThrough, IncludePath, MorphTo, MorphType, N1DetectionScope, N1QueryTracker, N1Stats,
    PIVOT_PREFIX, Registry, Relate, Relation, RelationKind, RelationOutcome, Session,
    SessionConfig, THROUGH_KEY, pivot_of,
};

pub use relmodel_core as core;
pub use relmodel_query as query;
pub use relmodel_session as session;

/// Commonly used types, for glob import.
pub mod prelude {
    pub use crate::{
        BinaryOp, Cast, Connection, DefaultModel, EagerPlan, Entity, EntityDef, Error, Expr,
        KeyType, Loaded, MemoryConnection, OrderBy, Registry, Relate, Relation, Result, Row,
        Select, Session, SessionConfig, Value,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn prelude_builds_a_working_session() {
        let conn = MemoryConnection::new();
        conn.create_table("users", &["id", "name"]);
        conn.insert("users", [("id", Value::Int(1)), ("name", Value::from("Ada"))]);

        let mut registry = Registry::for_connection(&conn);
        registry.register(
            EntityDef::builder("User", "users")
                .timestamps(false)
                .build()
                .unwrap(),
        );
        let session = Session::new(conn, registry);
        let user = session.find_or_fail("User", 1).unwrap();
        assert_eq!(user.get_raw("name"), &Value::from("Ada"));
        assert!(session.find("User", 2).unwrap().is_none());
    }
}
