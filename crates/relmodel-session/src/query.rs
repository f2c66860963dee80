//! Entity queries with eager loading and relation filters.

use std::sync::Arc;

use relmodel_core::{Entity, EntityDef, Error, Result, Value};
use relmodel_query::{BinaryOp, Connection, Expr, OrderBy, Select, SelectItem};

/// Column the row count is read from; aliased so every dialect agrees.
const AGGREGATE: &str = "aggregate";

use crate::Session;
use crate::eager::EagerPlan;
use crate::existence;
use crate::relation::Constraint;

/// A query over one entity type, bound to a [`Session`].
///
/// ```ignore
/// let users = session
///     .query("User")?
///     .where_eq("active", true)
///     .where_has("posts", |q| q.where_eq("posts.published", true))?
///     .with_count("posts")?
///     .with("posts.comments")
///     .get()?;
/// ```
pub struct EntityQuery<'s, C: Connection> {
    session: &'s Session<C>,
    def: Arc<EntityDef>,
    select: Select,
    plan: EagerPlan,
}

impl<C: Connection> std::fmt::Debug for EntityQuery<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityQuery")
            .field("entity", &self.def.name())
            .field("select", &self.select)
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

impl<'s, C: Connection> EntityQuery<'s, C> {
    pub fn new(session: &'s Session<C>, def: Arc<EntityDef>) -> Self {
        Self {
            select: Select::from(def.table()),
            session,
            def,
            plan: EagerPlan::new(),
        }
    }

    pub fn def(&self) -> &Arc<EntityDef> {
        &self.def
    }

    /// The query as built so far.
    pub fn as_select(&self) -> &Select {
        &self.select
    }

    pub fn into_select(self) -> Select {
        self.select
    }

    /// Unqualified columns refer to this entity's table.
    fn column(&self, column: impl Into<String>) -> String {
        let column = column.into();
        if column.contains('.') {
            column
        } else {
            self.def.qualify_column(&column)
        }
    }

    // ========================================================================
    // Filters
    // ========================================================================

    #[must_use]
    pub fn filter(mut self, expr: Expr) -> Self {
        self.select = self.select.filter(expr);
        self
    }

    #[must_use]
    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = self.column(column);
        self.select = self.select.where_eq(column, value);
        self
    }

    #[must_use]
    pub fn where_op(mut self, column: impl Into<String>, op: BinaryOp, value: impl Into<Value>) -> Self {
        let column = self.column(column);
        self.select = self.select.where_op(column, op, value);
        self
    }

    #[must_use]
    pub fn where_in(mut self, column: impl Into<String>, values: Vec<Value>) -> Self {
        let column = self.column(column);
        self.select = self.select.where_in(column, values);
        self
    }

    #[must_use]
    pub fn where_null(mut self, column: impl Into<String>) -> Self {
        let column = self.column(column);
        self.select = self.select.where_null(column);
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        let column = self.column(column);
        self.select = self.select.order_by(OrderBy::asc(column));
        self
    }

    #[must_use]
    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        let column = self.column(column);
        self.select = self.select.order_by(OrderBy::desc(column));
        self
    }

    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.select = self.select.limit(n);
        self
    }

    #[must_use]
    pub fn offset(mut self, n: u64) -> Self {
        self.select = self.select.offset(n);
        self
    }

    // ========================================================================
    // Eager Loading
    // ========================================================================

    /// Eager load `path` (dotted for nested relations) on the results.
    #[must_use]
    pub fn with(mut self, path: impl Into<String>) -> Self {
        self.plan = self.plan.with(path);
        self
    }

    /// Eager load `path`, refining the query for its last segment.
    #[must_use]
    pub fn with_constrained<F>(mut self, path: impl Into<String>, constraint: F) -> Self
    where
        F: Fn(Select) -> Select + Send + Sync + 'static,
    {
        self.plan = self.plan.with_constraint(path, constraint);
        self
    }

    /// Replace the eager-load plan.
    #[must_use]
    pub fn with_plan(mut self, plan: impl Into<EagerPlan>) -> Self {
        self.plan = plan.into();
        self
    }

    // ========================================================================
    // Relation Existence
    // ========================================================================

    #[allow(clippy::result_large_err)]
    fn add_has(
        mut self,
        path: &str,
        op: BinaryOp,
        count: i64,
        constraint: Option<Constraint>,
    ) -> Result<Self> {
        let ctx = self.session.context();
        let expr = existence::has_expr(
            &ctx,
            &self.def,
            self.select.reference(),
            path,
            op,
            count,
            constraint.as_ref(),
        )?;
        self.select = self.select.filter(expr);
        Ok(self)
    }

    /// Keep rows with at least one related row.
    #[allow(clippy::result_large_err)]
    pub fn has(self, path: &str) -> Result<Self> {
        self.add_has(path, BinaryOp::Ge, 1, None)
    }

    /// Keep rows whose related row count satisfies `op count`.
    #[allow(clippy::result_large_err)]
    pub fn has_count(self, path: &str, op: BinaryOp, count: i64) -> Result<Self> {
        self.add_has(path, op, count, None)
    }

    /// Keep rows with at least one related row matching `constraint`.
    #[allow(clippy::result_large_err)]
    pub fn where_has<F>(self, path: &str, constraint: F) -> Result<Self>
    where
        F: Fn(Select) -> Select + Send + Sync + 'static,
    {
        self.add_has(path, BinaryOp::Ge, 1, Some(Arc::new(constraint)))
    }

    #[allow(clippy::result_large_err)]
    pub fn where_has_count<F>(self, path: &str, constraint: F, op: BinaryOp, count: i64) -> Result<Self>
    where
        F: Fn(Select) -> Select + Send + Sync + 'static,
    {
        self.add_has(path, op, count, Some(Arc::new(constraint)))
    }

    /// Keep rows with no related row.
    #[allow(clippy::result_large_err)]
    pub fn doesnt_have(self, path: &str) -> Result<Self> {
        self.add_has(path, BinaryOp::Lt, 1, None)
    }

    #[allow(clippy::result_large_err)]
    pub fn where_doesnt_have<F>(self, path: &str, constraint: F) -> Result<Self>
    where
        F: Fn(Select) -> Select + Send + Sync + 'static,
    {
        self.add_has(path, BinaryOp::Lt, 1, Some(Arc::new(constraint)))
    }

    /// Select the related row count as `{relation}_count`.
    #[allow(clippy::result_large_err)]
    pub fn with_count(self, relation: &str) -> Result<Self> {
        self.add_count(relation, None)
    }

    #[allow(clippy::result_large_err)]
    pub fn with_count_constrained<F>(self, relation: &str, constraint: F) -> Result<Self>
    where
        F: Fn(Select) -> Select + Send + Sync + 'static,
    {
        self.add_count(relation, Some(Arc::new(constraint)))
    }

    #[allow(clippy::result_large_err)]
    fn add_count(mut self, relation: &str, constraint: Option<Constraint>) -> Result<Self> {
        let ctx = self.session.context();
        let item = existence::count_select(
            &ctx,
            &self.def,
            self.select.reference(),
            relation,
            constraint.as_ref(),
        )?;
        self.select = self.select.add_select(item);
        Ok(self)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Run the query, hydrate every row and eager load the plan.
    #[tracing::instrument(level = "debug", skip(self), fields(entity = self.def.name()))]
    #[allow(clippy::result_large_err)]
    pub fn get(self) -> Result<Vec<Entity>> {
        let mut entities = self.session.hydrate(&self.def, &self.select)?;
        self.session.load(&mut entities, &self.plan)?;
        Ok(entities)
    }

    #[allow(clippy::result_large_err)]
    pub fn first(self) -> Result<Option<Entity>> {
        let query = self.limit(1);
        Ok(query.get()?.into_iter().next())
    }

    /// Like [`first`](Self::first), but no row is a `NotFound` error.
    #[allow(clippy::result_large_err)]
    pub fn first_or_fail(self) -> Result<Entity> {
        let entity = self.def.name().to_string();
        self.first()?
            .ok_or_else(|| Error::not_found(entity, Vec::new()))
    }

    #[allow(clippy::result_large_err)]
    pub fn find(self, id: impl Into<Value>) -> Result<Option<Entity>> {
        let key = self.def.qualified_key_name();
        self.where_eq(key, id).first()
    }

    #[allow(clippy::result_large_err)]
    pub fn find_or_fail(self, id: impl Into<Value>) -> Result<Entity> {
        let id = id.into();
        let entity = self.def.name().to_string();
        let ids = id.to_loose_string().into_iter().collect();
        self.find(id)?
            .ok_or_else(|| Error::not_found(entity, ids))
    }

    /// Number of matching rows.
    #[allow(clippy::result_large_err)]
    pub fn count(self) -> Result<i64> {
        let row = self
            .select
            .select(vec![SelectItem::expr_as(Expr::CountStar, AGGREGATE)])
            .first(self.session.connection())?;
        match row {
            Some(row) => row.get_named(AGGREGATE),
            None => Ok(0),
        }
    }

    #[allow(clippy::result_large_err)]
    pub fn exists(self) -> Result<bool> {
        Ok(self.count()? > 0)
    }
}
