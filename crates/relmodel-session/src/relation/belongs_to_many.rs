//! Pivot-backed many-to-many relations.

use std::sync::Arc;

use relmodel_core::model::snake_case;
use relmodel_core::{CREATED_AT, Entity, EntityDef, Loaded, Result, Row, UPDATED_AT, Value};
use relmodel_query::{BinaryOp, Expr, Join, Select, SelectItem};

use super::{
    BatchLoad, Constraint, Context, Dictionary, MorphType, RelationKind, apply_constraint,
    distinct_sorted_keys, execute, group_by, integer_keys, match_by_key, self_alias,
    where_in_keys,
};
use crate::pivot::{self, PIVOT_PREFIX};

/// `BelongsToMany`, `MorphToMany` and `MorphedByMany`.
///
/// Rows are fetched from the related table joined to the intermediate
/// table; intermediate columns come back as `pivot_<column>` and are turned
/// into a pivot record attached to each related entity.
#[derive(Debug, Clone)]
pub struct BelongsToMany {
    parent: Arc<EntityDef>,
    related: Arc<EntityDef>,
    table: String,
    foreign_pivot_key: String,
    related_pivot_key: String,
    parent_key: String,
    related_key: String,
    pivot_columns: Vec<String>,
    timestamps: bool,
    accessor: Option<String>,
    pivot_wheres: Vec<(String, Value)>,
    morph: Option<MorphType>,
    kind: RelationKind,
}

/// Conventional intermediate table: both snake-cased names, sorted, joined by `_`.
pub(crate) fn joining_table(a: &str, b: &str) -> String {
    let mut names = [snake_case(a), snake_case(b)];
    names.sort();
    names.join("_")
}

impl BelongsToMany {
    pub fn new(parent: Arc<EntityDef>, related: Arc<EntityDef>) -> Self {
        Self {
            table: joining_table(parent.name(), related.name()),
            foreign_pivot_key: parent.foreign_key(),
            related_pivot_key: related.foreign_key(),
            parent_key: parent.primary_key().to_string(),
            related_key: related.primary_key().to_string(),
            parent,
            related,
            pivot_columns: Vec::new(),
            timestamps: false,
            accessor: None,
            pivot_wheres: Vec::new(),
            morph: None,
            kind: RelationKind::BelongsToMany,
        }
    }

    /// Owning side of a polymorphic many-to-many: the intermediate table is
    /// `{name}s`, keyed by `{name}_id` / `{name}_type` for the parent.
    pub fn morph_to_many(
        parent: Arc<EntityDef>,
        related: Arc<EntityDef>,
        name: &str,
        class: String,
    ) -> Self {
        let mut relation = Self::new(parent, related);
        relation.table = format!("{name}s");
        relation.foreign_pivot_key = format!("{name}_id");
        relation.morph = Some(MorphType {
            column: format!("{name}_type"),
            class,
        });
        relation.kind = RelationKind::MorphToMany;
        relation
    }

    /// Inverse side: the related entity is the polymorphic owner.
    pub fn morphed_by_many(
        parent: Arc<EntityDef>,
        related: Arc<EntityDef>,
        name: &str,
        class: String,
    ) -> Self {
        let mut relation = Self::new(parent, related);
        relation.table = format!("{name}s");
        relation.related_pivot_key = format!("{name}_id");
        relation.morph = Some(MorphType {
            column: format!("{name}_type"),
            class,
        });
        relation.kind = RelationKind::MorphedByMany;
        relation
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    #[must_use]
    pub fn with_foreign_pivot_key(mut self, key: impl Into<String>) -> Self {
        self.foreign_pivot_key = key.into();
        self
    }

    #[must_use]
    pub fn with_related_pivot_key(mut self, key: impl Into<String>) -> Self {
        self.related_pivot_key = key.into();
        self
    }

    #[must_use]
    pub fn with_parent_key(mut self, key: impl Into<String>) -> Self {
        self.parent_key = key.into();
        self
    }

    #[must_use]
    pub fn with_related_key(mut self, key: impl Into<String>) -> Self {
        self.related_key = key.into();
        self
    }

    /// Select extra intermediate-table columns into the pivot record.
    #[must_use]
    pub fn with_pivot<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for column in columns {
            let column = column.into();
            if !self.pivot_columns.contains(&column) {
                self.pivot_columns.push(column);
            }
        }
        self
    }

    /// Select the intermediate table's `created_at` / `updated_at`.
    #[must_use]
    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = true;
        self.with_pivot([CREATED_AT, UPDATED_AT])
    }

    /// Attach pivot records under `name` instead of the session default.
    #[must_use]
    pub fn accessor(mut self, name: impl Into<String>) -> Self {
        self.accessor = Some(name.into());
        self
    }

    /// Only follow intermediate rows where `column = value`.
    #[must_use]
    pub fn where_pivot(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.pivot_wheres.push((column.into(), value.into()));
        self
    }

    pub fn parent(&self) -> &Arc<EntityDef> {
        &self.parent
    }

    pub fn related(&self) -> &Arc<EntityDef> {
        &self.related
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn foreign_pivot_key(&self) -> &str {
        &self.foreign_pivot_key
    }

    pub fn related_pivot_key(&self) -> &str {
        &self.related_pivot_key
    }

    pub fn morph_type(&self) -> Option<&MorphType> {
        self.morph.as_ref()
    }

    /// Accessor pivots attach under, falling back to `default`.
    pub fn accessor_name<'a>(&'a self, default: &'a str) -> &'a str {
        self.accessor.as_deref().unwrap_or(default)
    }

    fn pivot_column(&self, column: &str) -> String {
        format!("{}.{}", self.table, column)
    }

    /// Intermediate columns selected into the pivot record, in order.
    pub fn pivot_select_columns(&self) -> Vec<String> {
        let mut columns = vec![self.foreign_pivot_key.clone(), self.related_pivot_key.clone()];
        if let Some(morph) = &self.morph {
            columns.push(morph.column.clone());
        }
        for column in &self.pivot_columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        columns
    }

    fn pivot_filters(&self, query: Select, pivot_ref: &str) -> Select {
        let mut query = query;
        for (column, value) in &self.pivot_wheres {
            query = query.where_eq(format!("{pivot_ref}.{column}"), value.clone());
        }
        if let Some(morph) = &self.morph {
            query = query.where_eq(format!("{pivot_ref}.{}", morph.column), morph.class.as_str());
        }
        query
    }

    fn base_query(&self) -> Select {
        let mut items = vec![SelectItem::AllFrom(self.related.table().to_string())];
        items.extend(
            self.pivot_select_columns()
                .iter()
                .map(|c| SelectItem::column_as(self.pivot_column(c), format!("{PIVOT_PREFIX}{c}"))),
        );
        let query = Select::from(self.related.table()).select(items).join(
            self.table.as_str(),
            self.related.qualify_column(&self.related_key),
            BinaryOp::Eq,
            self.pivot_column(&self.related_pivot_key),
        );
        self.pivot_filters(query, &self.table)
    }

    pub fn add_constraints(&self, parent: &Entity) -> Select {
        self.base_query().where_eq(
            self.pivot_column(&self.foreign_pivot_key),
            parent.get_raw(&self.parent_key).clone(),
        )
    }

    #[allow(clippy::result_large_err)]
    pub fn get_results(
        &self,
        ctx: &Context<'_>,
        parent: &Entity,
        constraint: Option<&Constraint>,
    ) -> Result<Loaded> {
        if parent.get_raw(&self.parent_key).is_null() {
            return Ok(Loaded::Many(Vec::new()));
        }
        let query = apply_constraint(self.add_constraints(parent), constraint);
        let rows = execute(ctx, &query)?;
        Ok(Loaded::Many(self.hydrate(ctx, rows)?))
    }

    /// Correlated query joining related rows to the intermediate table.
    /// A self-referential relation aliases the related table.
    pub fn existence_query(&self, ctx: &Context<'_>, parent_ref: &str) -> Select {
        let (query, reference) =
            match self_alias(ctx, self.kind, self.parent.table(), self.related.table()) {
                Some(alias) => (Select::from_as(self.related.table(), alias.clone()), alias),
                None => (Select::from(self.related.table()), self.related.table().to_string()),
            };
        let on = Expr::col(format!("{reference}.{}", self.related_key))
            .eq(Expr::col(self.pivot_column(&self.related_pivot_key)));
        let query = query.add_join(Join::inner(self.table.as_str(), on)).where_column(
            self.pivot_column(&self.foreign_pivot_key),
            BinaryOp::Eq,
            format!("{parent_ref}.{}", self.parent_key),
        );
        self.pivot_filters(query, &self.table)
    }
}

impl BatchLoad for BelongsToMany {
    fn kind(&self) -> RelationKind {
        self.kind
    }

    fn add_eager_constraints(&self, parents: &[&Entity]) -> Result<Select> {
        let keys = distinct_sorted_keys(parents.iter().map(|p| p.get_raw(&self.parent_key)));
        tracing::debug!(
            related = self.related.name(),
            pivot_table = %self.table,
            key_count = keys.len(),
            "Constraining many-to-many relation"
        );
        Ok(where_in_keys(
            self.base_query(),
            self.pivot_column(&self.foreign_pivot_key),
            keys,
            integer_keys(&self.parent, &self.parent_key),
        ))
    }

    fn hydrate(&self, ctx: &Context<'_>, rows: Vec<Row>) -> Result<Vec<Entity>> {
        let def = pivot::pivot_def(
            &self.table,
            self.morph.is_some(),
            self.timestamps,
            ctx.date_format,
        )?;
        let accessor = self.accessor_name(ctx.pivot_accessor);
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut entity = self.related.hydrate_row(row);
                pivot::synthesize(&mut entity, &def, accessor);
                entity
            })
            .collect())
    }

    fn build_dictionary(&self, ctx: &Context<'_>, results: Vec<Entity>) -> Dictionary {
        let accessor = self.accessor_name(ctx.pivot_accessor);
        group_by(results, |e| {
            e.related_one(accessor)
                .and_then(|p| p.get_raw(&self.foreign_pivot_key).dictionary_key())
        })
    }

    fn match_results(
        &self,
        parents: &mut [&mut Entity],
        dictionary: &Dictionary,
        name: &str,
    ) -> Result<()> {
        match_by_key(parents, dictionary, name, &self.parent_key, true, |_| Ok(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conventional_joining_table() {
        assert_eq!(joining_table("User", "Role"), "role_user");
        assert_eq!(joining_table("PostTag", "Article"), "article_post_tag");
    }

    #[test]
    fn pivot_columns_are_prefixed_and_deduplicated() {
        let user = Arc::new(EntityDef::builder("User", "users").build().unwrap());
        let role = Arc::new(EntityDef::builder("Role", "roles").build().unwrap());
        let relation = BelongsToMany::new(user, role)
            .with_pivot(["level", "user_id"])
            .with_timestamps()
            .where_pivot("active", true);
        assert_eq!(
            relation.pivot_select_columns(),
            vec!["user_id", "role_id", "level", "created_at", "updated_at"]
        );
        let (sql, params) = relation.base_query().build();
        assert!(sql.starts_with(
            "SELECT \"roles\".*, \"role_user\".\"user_id\" AS \"pivot_user_id\", \
             \"role_user\".\"role_id\" AS \"pivot_role_id\""
        ));
        assert!(sql.contains(
            "INNER JOIN \"role_user\" ON \"roles\".\"id\" = \"role_user\".\"role_id\""
        ));
        assert!(sql.ends_with("WHERE \"role_user\".\"active\" = $1"));
        assert_eq!(params, vec![Value::Bool(true)]);
    }
}
