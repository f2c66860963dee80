//! In-process row source.
//!
//! [`MemoryConnection`] evaluates a [`Select`] directly over in-memory
//! tables: joins, `IN` lists, column comparisons, correlated `EXISTS` and
//! `COUNT(*)` subqueries, aliases and ordering. Every executed query is
//! rendered to SQL and logged, so callers can assert exactly how many
//! queries a hydration pass issued and what they looked like.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use indexmap::IndexMap;
use relmodel_core::cast::{is_numeric, is_numeric_str};
use relmodel_core::{DEFAULT_DATE_FORMAT, Error, QueryError, QueryErrorKind, Result, Row, Value};

use crate::connection::Connection;
use crate::expr::{BinaryOp, Dialect, Expr};
use crate::join::JoinType;
use crate::select::{Select, SelectItem};

type Record = IndexMap<String, Value>;

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Record>>,
    columns: HashMap<String, Vec<String>>,
    log: Vec<String>,
    fail_next: Option<String>,
}

impl MemoryState {
    fn register_columns<'k>(&mut self, table: &str, keys: impl Iterator<Item = &'k String>) {
        let known = self.columns.entry(table.to_string()).or_default();
        for key in keys {
            if !known.contains(key) {
                known.push(key.clone());
            }
        }
    }
}

/// An in-memory [`Connection`] that counts and records every query.
#[derive(Debug)]
pub struct MemoryConnection {
    dialect: Dialect,
    date_format: String,
    state: Mutex<MemoryState>,
}

impl Default for MemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

/// One candidate result row: table references bound to records.
/// `None` marks the null side of an unmatched LEFT JOIN.
#[derive(Clone)]
struct Frame<'a> {
    bindings: Vec<(&'a str, &'a str, Option<&'a Record>)>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self {
            dialect: Dialect::default(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = format.into();
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Declare a table and its columns, so empty tables and LEFT JOIN
    /// null rows still know their shape.
    pub fn create_table(&self, table: &str, columns: &[&str]) {
        let mut state = self.lock();
        state.tables.entry(table.to_string()).or_default();
        let owned: Vec<String> = columns.iter().map(|c| (*c).to_string()).collect();
        state.register_columns(table, owned.iter());
    }

    /// Insert one row into `table`, creating the table if needed.
    pub fn insert<K, V, I>(&self, table: &str, row: I)
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let record: Record = row.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        let mut state = self.lock();
        state.register_columns(table, record.keys());
        state.tables.entry(table.to_string()).or_default().push(record);
    }

    /// Number of queries executed so far.
    pub fn query_count(&self) -> usize {
        self.lock().log.len()
    }

    /// Rendered SQL of every executed query, in order.
    pub fn queries(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    /// Forget executed queries.
    pub fn reset_log(&self) {
        self.lock().log.clear();
    }

    /// Make the next query fail with a database error.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.lock().fail_next = Some(message.into());
    }

    fn query_error(kind: QueryErrorKind, sql: &str, message: String) -> Error {
        Error::Query(QueryError {
            kind,
            sql: Some(sql.to_string()),
            message,
            source: None,
        })
    }
}

impl Connection for MemoryConnection {
    fn query(&self, select: &Select) -> Result<Vec<Row>> {
        let (sql, params) = select.build_with_dialect(self.dialect);
        let mut state = self.lock();
        state.log.push(sql.clone());
        tracing::debug!(sql = %sql, param_count = params.len(), "Executing in-memory query");

        if let Some(message) = state.fail_next.take() {
            return Err(Self::query_error(QueryErrorKind::Database, &sql, message));
        }

        let eval = Evaluator {
            state: &state,
            sql: &sql,
            dialect: self.dialect,
        };
        let rows = eval.run(select, &[])?;
        tracing::trace!(row_count = rows.len(), "In-memory query complete");
        Ok(rows)
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn date_format(&self) -> &str {
        &self.date_format
    }
}

struct Evaluator<'s> {
    state: &'s MemoryState,
    sql: &'s str,
    dialect: Dialect,
}

impl<'s> Evaluator<'s> {
    /// Name a database gives an unaliased `COUNT(*)` column.
    fn count_column(&self) -> &'static str {
        match self.dialect {
            Dialect::Postgres => "count",
            Dialect::Sqlite | Dialect::Mysql => "COUNT(*)",
        }
    }

    fn error(&self, kind: QueryErrorKind, message: String) -> Error {
        MemoryConnection::query_error(kind, self.sql, message)
    }

    fn table(&self, name: &str) -> Result<&'s [Record]> {
        self.state
            .tables
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| self.error(QueryErrorKind::NotFound, format!("no such table: {name}")))
    }

    fn table_columns(&self, name: &str) -> &'s [String] {
        self.state.columns.get(name).map_or(&[], Vec::as_slice)
    }

    fn run(&self, select: &'s Select, outer: &[&Frame<'s>]) -> Result<Vec<Row>> {
        let base = self.table(select.table())?;
        let mut frames: Vec<Frame<'s>> = base
            .iter()
            .map(|r| Frame {
                bindings: vec![(select.reference(), select.table(), Some(r))],
            })
            .collect();

        for join in select.joins() {
            let records = self.table(&join.table)?;
            let mut joined = Vec::new();
            for frame in &frames {
                let mut matched = false;
                for record in records {
                    let mut candidate = frame.clone();
                    candidate
                        .bindings
                        .push((join.reference(), join.table.as_str(), Some(record)));
                    if truthy(&self.eval(&join.on, &candidate, outer)?) {
                        matched = true;
                        joined.push(candidate);
                    }
                }
                if !matched && join.join_type == JoinType::Left {
                    let mut candidate = frame.clone();
                    candidate
                        .bindings
                        .push((join.reference(), join.table.as_str(), None));
                    joined.push(candidate);
                }
            }
            frames = joined;
        }

        if let Some(where_clause) = select.where_clause() {
            let mut kept = Vec::with_capacity(frames.len());
            for frame in frames {
                if truthy(&self.eval(where_clause.expr(), &frame, outer)?) {
                    kept.push(frame);
                }
            }
            frames = kept;
        }

        if select.is_count() {
            let name = match select.select_items() {
                [SelectItem::Expr { alias: Some(a), .. }] => a.clone(),
                _ => self.count_column().to_string(),
            };
            let count = i64::try_from(frames.len()).unwrap_or(i64::MAX);
            return Ok(vec![Row::new(vec![name], vec![Value::Int(count)])]);
        }

        if !select.order_clauses().is_empty() {
            let mut keyed = Vec::with_capacity(frames.len());
            for frame in frames {
                let mut keys = Vec::with_capacity(select.order_clauses().len());
                for order in select.order_clauses() {
                    let (table, name) = match order.column().rsplit_once('.') {
                        Some((t, n)) => (Some(t), n),
                        None => (None, order.column()),
                    };
                    keys.push(self.lookup(table, name, &frame, outer)?);
                }
                keyed.push((keys, frame));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                for (idx, order) in select.order_clauses().iter().enumerate() {
                    let ord = compare_nullable(&a[idx], &b[idx]);
                    let ord = match order.direction() {
                        crate::clause::OrderDirection::Asc => ord,
                        crate::clause::OrderDirection::Desc => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
            frames = keyed.into_iter().map(|(_, f)| f).collect();
        }

        let skip = usize::try_from(select.offset_value().unwrap_or(0)).unwrap_or(usize::MAX);
        let take = select
            .limit_value()
            .map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));

        let mut rows = Vec::new();
        for frame in frames.iter().skip(skip).take(take) {
            rows.push(self.project(select, frame, outer)?);
        }

        if select.is_distinct() {
            let mut seen = Vec::new();
            rows.retain(|row| {
                let key = format!("{:?}", row.iter().collect::<Vec<_>>());
                if seen.contains(&key) {
                    false
                } else {
                    seen.push(key);
                    true
                }
            });
        }

        Ok(rows)
    }

    fn push_binding(&self, names: &mut Vec<String>, values: &mut Vec<Value>, binding: &(&str, &str, Option<&Record>)) {
        let (_, table, record) = binding;
        match record {
            Some(record) => {
                for (k, v) in *record {
                    names.push(k.clone());
                    values.push(v.clone());
                }
            }
            None => {
                for column in self.table_columns(table) {
                    names.push(column.clone());
                    values.push(Value::Null);
                }
            }
        }
    }

    fn project(&self, select: &'s Select, frame: &Frame<'s>, outer: &[&Frame<'s>]) -> Result<Row> {
        let mut names = Vec::new();
        let mut values = Vec::new();

        if select.select_items().is_empty() {
            for binding in &frame.bindings {
                self.push_binding(&mut names, &mut values, binding);
            }
            return Ok(Row::new(names, values));
        }

        for item in select.select_items() {
            match item {
                SelectItem::All => {
                    for binding in &frame.bindings {
                        self.push_binding(&mut names, &mut values, binding);
                    }
                }
                SelectItem::AllFrom(reference) => {
                    let binding = frame
                        .bindings
                        .iter()
                        .find(|(r, _, _)| r == reference)
                        .ok_or_else(|| {
                            self.error(
                                QueryErrorKind::Syntax,
                                format!("unknown table reference in select list: {reference}"),
                            )
                        })?;
                    self.push_binding(&mut names, &mut values, binding);
                }
                SelectItem::Expr { expr, alias } => {
                    let name = match (alias, expr) {
                        (Some(alias), _) => alias.clone(),
                        (None, Expr::Column { name, .. }) => name.clone(),
                        (None, Expr::CountStar) => self.count_column().to_string(),
                        (None, _) => "?column?".to_string(),
                    };
                    names.push(name);
                    values.push(self.eval(expr, frame, outer)?);
                }
            }
        }
        Ok(Row::new(names, values))
    }

    fn lookup(
        &self,
        table: Option<&str>,
        name: &str,
        frame: &Frame<'s>,
        outer: &[&Frame<'s>],
    ) -> Result<Value> {
        let scopes = std::iter::once(frame).chain(outer.iter().copied());
        for scope in scopes {
            for (reference, source, record) in &scope.bindings {
                if table.is_some_and(|t| t != *reference) {
                    continue;
                }
                let known = self.table_columns(source).iter().any(|c| c == name);
                match record {
                    Some(record) => {
                        if let Some(v) = record.get(name) {
                            return Ok(v.clone());
                        }
                        if known {
                            return Ok(Value::Null);
                        }
                    }
                    None if known => return Ok(Value::Null),
                    None => {}
                }
                if table.is_some() {
                    return Err(self.error(
                        QueryErrorKind::NotFound,
                        format!("no such column: {}.{}", reference, name),
                    ));
                }
            }
        }
        let display = match table {
            Some(t) => format!("{t}.{name}"),
            None => name.to_string(),
        };
        Err(self.error(QueryErrorKind::NotFound, format!("no such column: {display}")))
    }

    fn eval(&self, expr: &'s Expr, frame: &Frame<'s>, outer: &[&Frame<'s>]) -> Result<Value> {
        match expr {
            Expr::Column { table, name } => self.lookup(table.as_deref(), name, frame, outer),
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Binary { left, op, right } => {
                let l = self.eval(left, frame, outer)?;
                let r = self.eval(right, frame, outer)?;
                Ok(match op {
                    BinaryOp::And => Value::Bool(truthy(&l) && truthy(&r)),
                    BinaryOp::Or => Value::Bool(truthy(&l) || truthy(&r)),
                    cmp => match compare(&l, &r) {
                        None => Value::Null,
                        Some(ord) => Value::Bool(match cmp {
                            BinaryOp::Eq => ord == Ordering::Equal,
                            BinaryOp::Ne => ord != Ordering::Equal,
                            BinaryOp::Lt => ord == Ordering::Less,
                            BinaryOp::Le => ord != Ordering::Greater,
                            BinaryOp::Gt => ord == Ordering::Greater,
                            BinaryOp::Ge => ord != Ordering::Less,
                            BinaryOp::And | BinaryOp::Or => false,
                        }),
                    },
                })
            }
            Expr::In {
                expr,
                values,
                negated,
            } => {
                let v = self.eval(expr, frame, outer)?;
                if v.is_null() {
                    return Ok(Value::Null);
                }
                let found = values
                    .iter()
                    .any(|candidate| compare(&v, candidate) == Some(Ordering::Equal));
                Ok(Value::Bool(found != *negated))
            }
            Expr::InRaw { expr, values } => {
                let v = self.eval(expr, frame, outer)?;
                if v.is_null() {
                    return Ok(Value::Null);
                }
                let found = values
                    .iter()
                    .any(|candidate| compare(&v, &Value::Int(*candidate)) == Some(Ordering::Equal));
                Ok(Value::Bool(found))
            }
            Expr::IsNull { expr, negated } => {
                let v = self.eval(expr, frame, outer)?;
                Ok(Value::Bool(v.is_null() != *negated))
            }
            Expr::Exists { query, negated } => {
                let chain = scope_chain(frame, outer);
                let rows = self.run(query, &chain)?;
                Ok(Value::Bool(rows.is_empty() == *negated))
            }
            Expr::Subquery(query) => {
                let chain = scope_chain(frame, outer);
                let rows = self.run(query, &chain)?;
                Ok(rows
                    .first()
                    .and_then(|row| row.get(0))
                    .cloned()
                    .unwrap_or(Value::Null))
            }
            Expr::CountStar => Err(self.error(
                QueryErrorKind::Syntax,
                "COUNT(*) is only supported as the sole select item".to_string(),
            )),
            Expr::Raw(sql) => Err(self.error(
                QueryErrorKind::Syntax,
                format!("raw SQL cannot be evaluated in memory: {sql}"),
            )),
        }
    }
}

fn scope_chain<'f, 's>(frame: &'f Frame<'s>, outer: &[&'f Frame<'s>]) -> Vec<&'f Frame<'s>> {
    let mut chain = Vec::with_capacity(outer.len() + 1);
    chain.push(frame);
    chain.extend(outer.iter().copied());
    chain
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Double(d) => *d != 0.0,
        Value::Text(s) if is_numeric_str(s) => s.trim().parse::<f64>().is_ok_and(|f| f != 0.0),
        _ => true,
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        Value::Text(s) | Value::Decimal(s) => s.trim().parse().ok(),
        other => other.as_f64(),
    }
}

/// SQL-style comparison: NULL compares as unknown.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        return Some(x.cmp(y));
    }
    let numeric = |v: &Value| is_numeric(v) || matches!(v, Value::Bool(_));
    if numeric(a) && numeric(b) {
        return as_number(a)?.partial_cmp(&as_number(b)?);
    }
    Some(a.to_loose_string()?.cmp(&b.to_loose_string()?))
}

/// Ordering for ORDER BY: NULLs sort first.
fn compare_nullable(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare(a, b).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> MemoryConnection {
        let conn = MemoryConnection::new();
        for (id, name, manager) in [(1, "ada", None), (2, "bob", Some(1)), (3, "cy", Some(1))] {
            conn.insert(
                "users",
                [
                    ("id", Value::Int(id)),
                    ("name", Value::from(name)),
                    ("manager_id", Value::from(manager.map(i64::from))),
                ],
            );
        }
        for (id, user_id) in [(10, 1), (11, 1), (12, 2)] {
            conn.insert(
                "posts",
                [("id", Value::Int(id)), ("user_id", Value::Int(user_id))],
            );
        }
        conn
    }

    #[test]
    fn filters_and_counts_queries() {
        let conn = conn();
        let rows = Select::from("posts")
            .where_in("posts.user_id", vec![Value::Int(1)])
            .get(&conn)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(conn.query_count(), 1);
        assert!(conn.queries()[0].contains("IN ($1)"));
    }

    #[test]
    fn unaliased_counts_are_named_per_dialect() {
        let count = Select::from("posts").count_query();
        let row = count.first(&conn()).unwrap().unwrap();
        assert_eq!(row.get_by_name("count"), Some(&Value::Int(3)));

        let sqlite = conn().with_dialect(Dialect::Sqlite);
        let row = count.first(&sqlite).unwrap().unwrap();
        assert!(row.get_by_name("count").is_none());
        assert_eq!(row.get_by_name("COUNT(*)"), Some(&Value::Int(3)));

        let aliased = Select::from("posts").select(vec![SelectItem::expr_as(Expr::CountStar, "n")]);
        let row = aliased.first(&sqlite).unwrap().unwrap();
        assert_eq!(row.get_by_name("n"), Some(&Value::Int(3)));
    }

    #[test]
    fn numeric_strings_match_integers() {
        let conn = conn();
        let rows = Select::from("posts")
            .where_in("posts.user_id", vec![Value::from("2")])
            .get(&conn)
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn inner_join_with_alias_projection() {
        let conn = conn();
        let rows = Select::from("users")
            .select(vec![
                SelectItem::AllFrom("users".into()),
                SelectItem::column_as("posts.id", "post_id"),
            ])
            .join("posts", "posts.user_id", BinaryOp::Eq, "users.id")
            .order_by(crate::clause::OrderBy::desc("posts.id"))
            .get(&conn)
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get_by_name("post_id"), Some(&Value::Int(12)));
        assert_eq!(rows[0].get_by_name("name"), Some(&Value::from("bob")));
    }

    #[test]
    fn correlated_exists_and_count() {
        let conn = conn();
        let has_posts = Select::from("posts")
            .where_column("posts.user_id", BinaryOp::Eq, "users.id")
            .into_exists();
        let rows = Select::from("users").filter(has_posts).get(&conn).unwrap();
        assert_eq!(rows.len(), 2);

        let count = Select::from("posts")
            .where_column("posts.user_id", BinaryOp::Eq, "users.id")
            .count_query();
        let rows = Select::from("users")
            .add_select(SelectItem::expr_as(Expr::Subquery(Box::new(count)), "posts_count"))
            .order_by(crate::clause::OrderBy::asc("users.id"))
            .get(&conn)
            .unwrap();
        let counts: Vec<_> = rows
            .iter()
            .map(|r| r.get_by_name("posts_count").cloned().unwrap())
            .collect();
        assert_eq!(counts, vec![Value::Int(2), Value::Int(1), Value::Int(0)]);
    }

    #[test]
    fn self_join_alias_resolves_inner_and_outer() {
        let conn = conn();
        let managed = Select::from_as("users", "m")
            .where_column("m.manager_id", BinaryOp::Eq, "users.id")
            .into_exists();
        let rows = Select::from("users").filter(managed).get(&conn).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("name"), Some(&Value::from("ada")));
    }

    #[test]
    fn unknown_table_and_column_are_query_errors() {
        let conn = conn();
        let err = Select::from("nope").get(&conn).unwrap_err();
        assert!(matches!(err, Error::Query(_)));
        let err = Select::from("users")
            .where_eq("users.missing", 1i64)
            .get(&conn)
            .unwrap_err();
        assert!(err.to_string().contains("users.missing"));
    }

    #[test]
    fn injected_failure_propagates_once() {
        let conn = conn();
        conn.fail_next("connection reset");
        let err = Select::from("users").get(&conn).unwrap_err();
        assert_eq!(err.sql(), Some("SELECT * FROM \"users\""));
        assert!(Select::from("users").get(&conn).is_ok());
        assert_eq!(conn.query_count(), 2);
    }

    #[test]
    fn left_join_fills_nulls() {
        let conn = conn();
        let rows = Select::from("users")
            .select(vec![
                SelectItem::column("users.id"),
                SelectItem::column_as("posts.id", "post_id"),
            ])
            .add_join(crate::join::Join::left(
                "posts",
                Expr::col("posts.user_id").eq(Expr::col("users.id")),
            ))
            .where_null("posts.id")
            .get(&conn)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("id"), Some(&Value::Int(3)));
    }

    #[test]
    fn first_applies_limit() {
        let conn = conn();
        let row = Select::from("users")
            .order_by(crate::clause::OrderBy::desc("id"))
            .first(&conn)
            .unwrap()
            .unwrap();
        assert_eq!(row.get_by_name("id"), Some(&Value::Int(3)));
        assert!(conn.queries()[0].ends_with("LIMIT 1"));
    }
}
