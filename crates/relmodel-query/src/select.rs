//! SELECT query builder.
//!
//! `Select` is the query interface relation descriptors build against:
//! `from`, `select`, `filter`/`where_in`/`where_column`, `join`, `get` and
//! `first`. It stays structured until rendered, so the same query can be
//! executed by a SQL backend or evaluated by an in-process row source.

use crate::clause::{Limit, Offset, OrderBy, Where};
use crate::connection::Connection;
use crate::expr::{BinaryOp, Dialect, Expr};
use crate::join::Join;
use relmodel_core::{Result, Row, Value};

/// One item of the SELECT list.
#[derive(Debug, Clone)]
pub enum SelectItem {
    /// `*`
    All,
    /// `table.*`
    AllFrom(String),
    /// An expression with an optional `AS` alias
    Expr { expr: Expr, alias: Option<String> },
}

impl SelectItem {
    /// Column reference, e.g. `"posts.title"`.
    pub fn column(name: impl Into<String>) -> Self {
        SelectItem::Expr {
            expr: Expr::col(name),
            alias: None,
        }
    }

    /// Column reference under an alias, e.g. `role_user.user_id AS pivot_user_id`.
    pub fn column_as(name: impl Into<String>, alias: impl Into<String>) -> Self {
        SelectItem::Expr {
            expr: Expr::col(name),
            alias: Some(alias.into()),
        }
    }

    /// Arbitrary expression under an alias.
    pub fn expr_as(expr: Expr, alias: impl Into<String>) -> Self {
        SelectItem::Expr {
            expr,
            alias: Some(alias.into()),
        }
    }

    fn build_with_dialect(&self, dialect: Dialect, params: &mut Vec<Value>, offset: usize) -> String {
        match self {
            SelectItem::All => "*".to_string(),
            SelectItem::AllFrom(table) => format!("{}.*", dialect.quote_identifier(table)),
            SelectItem::Expr { expr, alias } => {
                let sql = expr.build_with_dialect(dialect, params, offset);
                match alias {
                    Some(alias) => format!("{} AS {}", sql, dialect.quote_identifier(alias)),
                    None => sql,
                }
            }
        }
    }
}

/// A SELECT query builder.
#[derive(Debug, Clone)]
pub struct Select {
    /// Base table
    table: String,
    /// Optional alias for the base table
    alias: Option<String>,
    /// Columns to select (empty = all)
    columns: Vec<SelectItem>,
    /// JOIN clauses
    joins: Vec<Join>,
    /// WHERE clause conditions
    where_clause: Option<Where>,
    /// ORDER BY clauses
    order_by: Vec<OrderBy>,
    /// LIMIT clause
    limit: Option<Limit>,
    /// OFFSET clause
    offset: Option<Offset>,
    /// DISTINCT flag
    distinct: bool,
}

impl Select {
    /// Create a new SELECT query for `table`.
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: None,
            columns: Vec::new(),
            joins: Vec::new(),
            where_clause: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
        }
    }

    /// Create a SELECT over `table AS alias`.
    pub fn from_as(table: impl Into<String>, alias: impl Into<String>) -> Self {
        let mut select = Self::from(table);
        select.alias = Some(alias.into());
        select
    }

    /// Base table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Name other clauses use to reference the base table.
    pub fn reference(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    /// Replace the SELECT list.
    pub fn select(mut self, items: Vec<SelectItem>) -> Self {
        self.columns = items;
        self
    }

    /// Select specific columns.
    pub fn columns(mut self, cols: &[&str]) -> Self {
        self.columns = cols.iter().map(|c| SelectItem::column(*c)).collect();
        self
    }

    /// Append to the SELECT list. An empty list is treated as `*` first.
    pub fn add_select(mut self, item: SelectItem) -> Self {
        if self.columns.is_empty() {
            self.columns.push(SelectItem::AllFrom(self.reference().to_string()));
        }
        self.columns.push(item);
        self
    }

    pub fn select_items(&self) -> &[SelectItem] {
        &self.columns
    }

    /// Add a WHERE condition (combined with AND).
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.and(expr),
            None => Where::new(expr),
        });
        self
    }

    /// Add an OR WHERE condition.
    pub fn or_filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.or(expr),
            None => Where::new(expr),
        });
        self
    }

    /// `column = value`
    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Expr::col(column).eq(Expr::Literal(value.into())))
    }

    /// `column <op> value`
    pub fn where_op(self, column: impl Into<String>, op: BinaryOp, value: impl Into<Value>) -> Self {
        self.filter(Expr::col(column).binary(op, Expr::Literal(value.into())))
    }

    /// `column IN (...)` with bound values.
    pub fn where_in(self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(Expr::col(column).in_list(values))
    }

    /// `column IN (1, 2, ...)` with integers inlined into the SQL.
    pub fn where_integer_in_raw(self, column: impl Into<String>, values: Vec<i64>) -> Self {
        self.filter(Expr::col(column).in_raw(values))
    }

    /// `left <op> right` between two columns.
    pub fn where_column(
        self,
        left: impl Into<String>,
        op: BinaryOp,
        right: impl Into<String>,
    ) -> Self {
        self.filter(Expr::col(left).binary(op, Expr::col(right)))
    }

    pub fn where_null(self, column: impl Into<String>) -> Self {
        self.filter(Expr::col(column).is_null())
    }

    pub fn where_not_null(self, column: impl Into<String>) -> Self {
        self.filter(Expr::col(column).is_not_null())
    }

    pub fn where_clause(&self) -> Option<&Where> {
        self.where_clause.as_ref()
    }

    /// `INNER JOIN table ON left <op> right`
    pub fn join(
        self,
        table: impl Into<String>,
        left: impl Into<String>,
        op: BinaryOp,
        right: impl Into<String>,
    ) -> Self {
        let on = Expr::col(left).binary(op, Expr::col(right));
        self.add_join(Join::inner(table, on))
    }

    /// Add a pre-built JOIN.
    pub fn add_join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    /// Add ORDER BY clause.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn order_clauses(&self) -> &[OrderBy] {
        &self.order_by
    }

    /// Set LIMIT.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(Limit(n));
        self
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit.map(|Limit(n)| n)
    }

    /// Set OFFSET.
    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(Offset(n));
        self
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset.map(|Offset(n)| n)
    }

    /// Make this a DISTINCT query.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// Is the SELECT list exactly `COUNT(*)`?
    pub fn is_count(&self) -> bool {
        matches!(
            self.columns.as_slice(),
            [SelectItem::Expr { expr, .. }] if expr.is_count()
        )
    }

    /// Turn this query into `SELECT COUNT(*) ...`.
    pub fn count_query(self) -> Self {
        self.select(vec![SelectItem::Expr {
            expr: Expr::CountStar,
            alias: None,
        }])
    }

    /// Wrap this query as `EXISTS (...)`.
    pub fn into_exists(self) -> Expr {
        Expr::Exists {
            query: Box::new(self),
            negated: false,
        }
    }

    /// Wrap this query as `NOT EXISTS (...)`.
    pub fn into_not_exists(self) -> Expr {
        Expr::Exists {
            query: Box::new(self),
            negated: true,
        }
    }

    /// Build the SQL query and parameters (default PostgreSQL dialect).
    pub fn build(&self) -> (String, Vec<Value>) {
        self.build_with_dialect(Dialect::default())
    }

    /// Build the SQL query and parameters for a specific dialect.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.build_into(dialect, &mut params, 0);
        (sql, params)
    }

    /// Render into an existing parameter list, used for nested subqueries.
    pub fn build_into(&self, dialect: Dialect, params: &mut Vec<Value>, offset: usize) -> String {
        let mut sql = String::new();

        // SELECT
        sql.push_str("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }

        if self.columns.is_empty() {
            sql.push('*');
        } else {
            let items: Vec<_> = self
                .columns
                .iter()
                .map(|c| c.build_with_dialect(dialect, params, offset))
                .collect();
            sql.push_str(&items.join(", "));
        }

        // FROM
        sql.push_str(" FROM ");
        sql.push_str(&dialect.quote_identifier(&self.table));
        if let Some(alias) = &self.alias {
            sql.push_str(" AS ");
            sql.push_str(&dialect.quote_identifier(alias));
        }

        // JOINs
        for join in &self.joins {
            sql.push_str(&join.build_with_dialect(dialect, params, offset));
        }

        // WHERE
        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.build_with_dialect(dialect, params, offset));
        }

        // ORDER BY
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let order_strs: Vec<_> = self.order_by.iter().map(|o| o.to_sql(dialect)).collect();
            sql.push_str(&order_strs.join(", "));
        }

        // LIMIT
        if let Some(Limit(n)) = self.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        // OFFSET
        if let Some(Offset(n)) = self.offset {
            sql.push_str(&format!(" OFFSET {}", n));
        }

        sql
    }

    /// Execute against `conn` and return all rows.
    #[allow(clippy::result_large_err)]
    pub fn get<C: Connection + ?Sized>(&self, conn: &C) -> Result<Vec<Row>> {
        conn.query(self)
    }

    /// Execute with `LIMIT 1` and return the first row, if any.
    #[allow(clippy::result_large_err)]
    pub fn first<C: Connection + ?Sized>(&self, conn: &C) -> Result<Option<Row>> {
        let limited = self.clone().limit(1);
        Ok(conn.query(&limited)?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_collects_params_across_joins_and_where() {
        let query = Select::from("roles")
            .select(vec![
                SelectItem::AllFrom("roles".into()),
                SelectItem::column_as("role_user.user_id", "pivot_user_id"),
            ])
            .join("role_user", "roles.id", BinaryOp::Eq, "role_user.role_id")
            .where_in("role_user.user_id", vec![Value::Int(1), Value::Int(2)])
            .where_eq("roles.active", true);
        let (sql, params) = query.build();
        assert_eq!(
            sql,
            "SELECT \"roles\".*, \"role_user\".\"user_id\" AS \"pivot_user_id\" FROM \"roles\" \
             INNER JOIN \"role_user\" ON \"roles\".\"id\" = \"role_user\".\"role_id\" \
             WHERE \"role_user\".\"user_id\" IN ($1, $2) AND \"roles\".\"active\" = $3"
        );
        assert_eq!(params, vec![Value::Int(1), Value::Int(2), Value::Bool(true)]);
    }

    #[test]
    fn aliased_from_and_exists() {
        let inner = Select::from_as("users", "self_0")
            .where_column("self_0.id", BinaryOp::Eq, "users.manager_id");
        let outer = Select::from("users").filter(inner.into_exists());
        let (sql, _) = outer.build_with_dialect(Dialect::Sqlite);
        assert_eq!(
            sql,
            "SELECT * FROM \"users\" WHERE EXISTS (SELECT * FROM \"users\" AS \"self_0\" \
             WHERE \"self_0\".\"id\" = \"users\".\"manager_id\")"
        );
    }

    #[test]
    fn nested_subquery_params_are_numbered_in_order() {
        let count = Select::from("posts")
            .where_column("posts.user_id", BinaryOp::Eq, "users.id")
            .where_eq("posts.published", true)
            .count_query();
        assert!(count.is_count());
        let outer = Select::from("users")
            .where_eq("users.active", true)
            .filter(Expr::Subquery(Box::new(count)).ge(2i64));
        let (sql, params) = outer.build();
        assert!(sql.ends_with("\"posts\".\"published\" = $2) >= $3"));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn add_select_keeps_star() {
        let query = Select::from("users").add_select(SelectItem::expr_as(Expr::lit(1i64), "one"));
        let (sql, _) = query.build();
        assert_eq!(sql, "SELECT \"users\".*, $1 AS \"one\" FROM \"users\"");
    }

    #[test]
    fn limit_offset_order() {
        let (sql, _) = Select::from("t")
            .order_by(OrderBy::desc("t.id"))
            .limit(10)
            .offset(5)
            .build_with_dialect(Dialect::Mysql);
        assert_eq!(sql, "SELECT * FROM `t` ORDER BY `t`.`id` DESC LIMIT 10 OFFSET 5");
    }
}
