//! Relation existence and count filters.
//!
//! `has("posts")`, `where_has("posts.comments", ..)` and `with_count("posts")`
//! all become correlated subqueries on the parent query. A `>= 1` or `< 1`
//! comparison renders as `EXISTS` / `NOT EXISTS`; any other comparison
//! compares a correlated `COUNT(*)`.

use std::sync::Arc;

use relmodel_core::model::snake_case;
use relmodel_core::{EntityDef, Error, Result};
use relmodel_query::{BinaryOp, Expr, Select, SelectItem};

use crate::relation::{Constraint, Context, apply_constraint};

/// Can this comparison be expressed as (NOT) EXISTS?
pub fn uses_exists(op: BinaryOp, count: i64) -> bool {
    count == 1 && matches!(op, BinaryOp::Ge | BinaryOp::Lt)
}

/// Filter expression comparing the related rows of `path` (possibly
/// dotted) against `op count`. The constraint applies to the last segment.
///
/// Intermediate segments of a dotted path only require existence, so
/// `has("posts.comments", Ge, 3)` keeps parents with at least one post
/// that has at least three comments.
#[allow(clippy::result_large_err)]
pub fn has_expr(
    ctx: &Context<'_>,
    parent: &Arc<EntityDef>,
    parent_ref: &str,
    path: &str,
    op: BinaryOp,
    count: i64,
    constraint: Option<&Constraint>,
) -> Result<Expr> {
    let (first, rest) = match path.split_once('.') {
        Some((first, rest)) => (first, Some(rest)),
        None => (path, None),
    };
    if first.trim().is_empty() || rest.is_some_and(|r| r.trim().is_empty()) {
        return Err(Error::malformed_plan(format!(
            "relation path `{path}` has an empty segment"
        )));
    }

    let relation = ctx.registry.relation(parent.name(), first)?;
    let query = relation.existence_query(ctx, parent_ref)?;
    tracing::debug!(
        parent = parent.name(),
        relation = first,
        kind = relation.kind().as_str(),
        "Building existence query"
    );

    match rest {
        Some(rest) => {
            let related = relation
                .related()
                .ok_or_else(|| Error::invalid_relation(parent.name(), first))?;
            let reference = query.reference().to_string();
            let inner = has_expr(ctx, related, &reference, rest, op, count, constraint)?;
            Ok(query.filter(inner).into_exists())
        }
        None => Ok(compare(apply_constraint(query, constraint), op, count)),
    }
}

fn compare(query: Select, op: BinaryOp, count: i64) -> Expr {
    if uses_exists(op, count) {
        return match op {
            BinaryOp::Lt => query.into_not_exists(),
            _ => query.into_exists(),
        };
    }
    Expr::Subquery(Box::new(query.count_query())).binary(op, Expr::lit(count))
}

/// Column name a relation count is selected under.
pub fn count_alias(relation: &str) -> String {
    format!("{}_count", snake_case(relation))
}

/// `(SELECT COUNT(*) ...) AS {relation}_count` for the parent query.
#[allow(clippy::result_large_err)]
pub fn count_select(
    ctx: &Context<'_>,
    parent: &Arc<EntityDef>,
    parent_ref: &str,
    relation: &str,
    constraint: Option<&Constraint>,
) -> Result<SelectItem> {
    if relation.contains('.') || relation.trim().is_empty() {
        return Err(Error::malformed_plan(format!(
            "relation counts take a single relation name, got `{relation}`"
        )));
    }
    let query = ctx
        .registry
        .relation(parent.name(), relation)?
        .existence_query(ctx, parent_ref)?;
    let query = apply_constraint(query, constraint).count_query();
    Ok(SelectItem::expr_as(
        Expr::Subquery(Box::new(query)),
        count_alias(relation),
    ))
}
