//! SQL expressions for query building.
//!
//! Expressions stay structured so they can be rendered for any [`Dialect`]
//! and evaluated directly by in-process row sources.

use crate::select::Select;
use relmodel_core::Value;

/// SQL dialect for generating dialect-specific SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier for this dialect.
    ///
    /// Properly escapes embedded quote characters by doubling them:
    /// - For Postgres/SQLite: `"` becomes `""`
    /// - For MySQL: `` ` `` becomes ``` `` ```
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => {
                let escaped = name.replace('"', "\"\"");
                format!("\"{}\"", escaped)
            }
            Dialect::Mysql => {
                let escaped = name.replace('`', "``");
                format!("`{}`", escaped)
            }
        }
    }
}

/// A SQL expression that can be used in WHERE, ON and SELECT lists.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Column reference with optional table qualifier
    Column {
        /// Optional table name or alias
        table: Option<String>,
        /// Column name
        name: String,
    },

    /// Literal value, always bound as a parameter
    Literal(Value),

    /// Binary operation (e.g., a = b, a AND b)
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// IN list of bound values
    In {
        expr: Box<Expr>,
        values: Vec<Value>,
        negated: bool,
    },

    /// IN list of integers inlined into the SQL text
    InRaw { expr: Box<Expr>, values: Vec<i64> },

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// EXISTS (subquery) / NOT EXISTS (subquery)
    Exists { query: Box<Select>, negated: bool },

    /// Scalar subquery, e.g. a correlated COUNT(*)
    Subquery(Box<Select>),

    /// Special aggregate: COUNT(*)
    CountStar,

    /// Raw SQL fragment (escape hatch, not evaluable in memory)
    Raw(String),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Get the SQL representation of this operator.
    pub const fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

impl Expr {
    /// Column reference. A dotted name (`"posts.id"`) becomes a qualified column.
    pub fn col(name: impl Into<String>) -> Self {
        let name = name.into();
        match name.rsplit_once('.') {
            Some((table, column)) => Expr::Column {
                table: Some(table.to_string()),
                name: column.to_string(),
            },
            None => Expr::Column { table: None, name },
        }
    }

    /// Create a qualified column reference (table.column).
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            name: column.into(),
        }
    }

    /// Create a literal value expression.
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Create a raw SQL expression.
    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    pub fn binary(self, op: BinaryOp, other: impl Into<Expr>) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other.into()),
        }
    }

    /// Equal to (=)
    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    /// Greater than or equal to (>=)
    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other)
    }

    /// Logical AND
    pub fn and(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::And, other)
    }

    /// Logical OR
    pub fn or(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    /// IS NULL
    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// IS NOT NULL
    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// IN list of bound values
    pub fn in_list(self, values: Vec<Value>) -> Self {
        Expr::In {
            expr: Box::new(self),
            values,
            negated: false,
        }
    }

    /// IN list of inlined integers
    pub fn in_raw(self, values: Vec<i64>) -> Self {
        Expr::InRaw {
            expr: Box::new(self),
            values,
        }
    }

    /// Build SQL string and collect parameters (default PostgreSQL dialect).
    pub fn build(&self, params: &mut Vec<Value>, offset: usize) -> String {
        self.build_with_dialect(Dialect::Postgres, params, offset)
    }

    /// Build SQL string with a specific dialect.
    ///
    /// Placeholders are numbered `offset + params.len()` after each push, so
    /// nested subqueries sharing `params` number their parameters in order.
    pub fn build_with_dialect(
        &self,
        dialect: Dialect,
        params: &mut Vec<Value>,
        offset: usize,
    ) -> String {
        match self {
            Expr::Column { table, name } => {
                if let Some(t) = table {
                    format!(
                        "{}.{}",
                        dialect.quote_identifier(t),
                        dialect.quote_identifier(name)
                    )
                } else {
                    dialect.quote_identifier(name)
                }
            }

            Expr::Literal(value) => {
                params.push(value.clone());
                dialect.placeholder(offset + params.len())
            }

            Expr::Binary { left, op, right } => {
                let left_sql = left.build_with_dialect(dialect, params, offset);
                let right_sql = right.build_with_dialect(dialect, params, offset);
                if *op == BinaryOp::Or {
                    format!("({left_sql} OR {right_sql})")
                } else {
                    format!("{left_sql} {} {right_sql}", op.as_str())
                }
            }

            Expr::In {
                expr,
                values,
                negated,
            } => {
                if values.is_empty() {
                    return if *negated { "1 = 1" } else { "0 = 1" }.to_string();
                }
                let expr_sql = expr.build_with_dialect(dialect, params, offset);
                let value_sqls: Vec<_> = values
                    .iter()
                    .map(|v| {
                        params.push(v.clone());
                        dialect.placeholder(offset + params.len())
                    })
                    .collect();
                let not_str = if *negated { "NOT " } else { "" };
                format!("{expr_sql} {not_str}IN ({})", value_sqls.join(", "))
            }

            Expr::InRaw { expr, values } => {
                if values.is_empty() {
                    return "0 = 1".to_string();
                }
                let expr_sql = expr.build_with_dialect(dialect, params, offset);
                let inlined: Vec<String> = values.iter().map(i64::to_string).collect();
                format!("{expr_sql} IN ({})", inlined.join(", "))
            }

            Expr::IsNull { expr, negated } => {
                let expr_sql = expr.build_with_dialect(dialect, params, offset);
                let not_str = if *negated { " NOT" } else { "" };
                format!("{expr_sql} IS{not_str} NULL")
            }

            Expr::Exists { query, negated } => {
                let sub = query.build_into(dialect, params, offset);
                let not_str = if *negated { "NOT " } else { "" };
                format!("{not_str}EXISTS ({sub})")
            }

            Expr::Subquery(query) => {
                let sub = query.build_into(dialect, params, offset);
                format!("({sub})")
            }

            Expr::CountStar => "COUNT(*)".to_string(),

            Expr::Raw(sql) => sql.clone(),
        }
    }

    /// Is this a bare `COUNT(*)`?
    pub fn is_count(&self) -> bool {
        matches!(self, Expr::CountStar)
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Literal(v)
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::Literal(Value::Int(v))
    }
}

impl From<&str> for Expr {
    fn from(v: &str) -> Self {
        Expr::Literal(Value::from(v))
    }
}
