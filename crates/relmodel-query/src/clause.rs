//! SQL clause types (WHERE, ORDER BY, LIMIT, OFFSET)

use crate::expr::{Dialect, Expr};
use relmodel_core::Value;

/// WHERE clause.
#[derive(Debug, Clone)]
pub struct Where {
    expr: Expr,
}

impl Where {
    /// Create a new WHERE clause with the given expression.
    pub fn new(expr: Expr) -> Self {
        Self { expr }
    }

    /// Add an AND condition.
    pub fn and(self, expr: Expr) -> Self {
        Self {
            expr: self.expr.and(expr),
        }
    }

    /// Add an OR condition.
    pub fn or(self, expr: Expr) -> Self {
        Self {
            expr: self.expr.or(expr),
        }
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Build the WHERE clause SQL, appending parameters to `params`.
    pub fn build_with_dialect(
        &self,
        dialect: Dialect,
        params: &mut Vec<Value>,
        offset: usize,
    ) -> String {
        self.expr.build_with_dialect(dialect, params, offset)
    }
}

/// ORDER BY clause.
#[derive(Debug, Clone)]
pub struct OrderBy {
    column: String,
    direction: OrderDirection,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderBy {
    /// Create an ascending order by clause.
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending order by clause.
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Desc,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn direction(&self) -> OrderDirection {
        self.direction
    }

    /// Generate SQL for this ORDER BY clause.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut params = Vec::new();
        let mut sql = Expr::col(self.column.as_str()).build_with_dialect(dialect, &mut params, 0);
        sql.push_str(match self.direction {
            OrderDirection::Asc => " ASC",
            OrderDirection::Desc => " DESC",
        });
        sql
    }
}

/// LIMIT clause.
#[derive(Debug, Clone, Copy)]
pub struct Limit(pub u64);

/// OFFSET clause.
#[derive(Debug, Clone, Copy)]
pub struct Offset(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_by_sql() {
        assert_eq!(OrderBy::asc("users.name").to_sql(Dialect::Postgres), "\"users\".\"name\" ASC");
        assert_eq!(OrderBy::desc("id").to_sql(Dialect::Mysql), "`id` DESC");
    }

    #[test]
    fn test_where_and() {
        let w = Where::new(Expr::col("a").eq(1i64)).and(Expr::col("b").is_null());
        let mut params = Vec::new();
        assert_eq!(
            w.build_with_dialect(Dialect::Postgres, &mut params, 0),
            "\"a\" = $1 AND \"b\" IS NULL"
        );
    }
}
