//! Inverse to-one relation: the foreign key lives on the child.

use std::sync::Arc;

use relmodel_core::model::snake_case;
use relmodel_core::{Entity, EntityDef, Loaded, Result, Row};
use relmodel_query::{BinaryOp, Select};

use super::{
    BatchLoad, Constraint, Context, DefaultModel, Dictionary, RelationKind, apply_constraint,
    distinct_sorted_keys, group_by, hydrate_rows, integer_keys, match_by_key, self_alias,
    where_in_keys,
};

#[derive(Debug, Clone)]
pub struct BelongsTo {
    child: Arc<EntityDef>,
    related: Arc<EntityDef>,
    foreign_key: String,
    owner_key: String,
    default: DefaultModel,
}

impl BelongsTo {
    /// Foreign key defaults to `{relation}_{owner_key}` (`author_id` for `author`).
    pub fn new(child: Arc<EntityDef>, related: Arc<EntityDef>, relation: &str) -> Self {
        let owner_key = related.primary_key().to_string();
        Self {
            foreign_key: format!("{}_{}", snake_case(relation), owner_key),
            owner_key,
            child,
            related,
            default: DefaultModel::Null,
        }
    }

    #[must_use]
    pub fn with_foreign_key(mut self, key: impl Into<String>) -> Self {
        self.foreign_key = key.into();
        self
    }

    #[must_use]
    pub fn with_owner_key(mut self, key: impl Into<String>) -> Self {
        self.owner_key = key.into();
        self
    }

    #[must_use]
    pub fn with_default(mut self) -> Self {
        self.default = DefaultModel::Empty;
        self
    }

    #[must_use]
    pub fn with_default_model(mut self, default: DefaultModel) -> Self {
        self.default = default;
        self
    }

    pub fn child(&self) -> &Arc<EntityDef> {
        &self.child
    }

    pub fn related(&self) -> &Arc<EntityDef> {
        &self.related
    }

    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    pub fn owner_key(&self) -> &str {
        &self.owner_key
    }

    pub fn add_constraints(&self, child: &Entity) -> Select {
        Select::from(self.related.table()).where_eq(
            self.related.qualify_column(&self.owner_key),
            child.get_raw(&self.foreign_key).clone(),
        )
    }

    #[allow(clippy::result_large_err)]
    pub fn get_results(
        &self,
        ctx: &Context<'_>,
        child: &Entity,
        constraint: Option<&Constraint>,
    ) -> Result<Loaded> {
        if child.get_raw(&self.foreign_key).is_null() {
            return Ok(Loaded::one(self.default.build(&self.related)?));
        }
        let query = apply_constraint(self.add_constraints(child), constraint);
        match query.first(ctx.conn)? {
            Some(row) => Ok(Loaded::one(Some(self.related.hydrate_row(row)))),
            None => Ok(Loaded::one(self.default.build(&self.related)?)),
        }
    }

    pub fn existence_query(&self, ctx: &Context<'_>, parent_ref: &str) -> Select {
        let (query, reference) =
            match self_alias(ctx, self.kind(), self.child.table(), self.related.table()) {
                Some(alias) => (Select::from_as(self.related.table(), alias.clone()), alias),
                None => (Select::from(self.related.table()), self.related.table().to_string()),
            };
        query.where_column(
            format!("{reference}.{}", self.owner_key),
            BinaryOp::Eq,
            format!("{parent_ref}.{}", self.foreign_key),
        )
    }
}

impl BatchLoad for BelongsTo {
    fn kind(&self) -> RelationKind {
        RelationKind::BelongsTo
    }

    fn add_eager_constraints(&self, parents: &[&Entity]) -> Result<Select> {
        let keys = distinct_sorted_keys(parents.iter().map(|p| p.get_raw(&self.foreign_key)));
        tracing::debug!(
            related = self.related.name(),
            key_count = keys.len(),
            "Constraining inverse relation"
        );
        Ok(where_in_keys(
            Select::from(self.related.table()),
            self.related.qualify_column(&self.owner_key),
            keys,
            integer_keys(&self.related, &self.owner_key),
        ))
    }

    fn hydrate(&self, _ctx: &Context<'_>, rows: Vec<Row>) -> Result<Vec<Entity>> {
        Ok(hydrate_rows(&self.related, rows))
    }

    fn build_dictionary(&self, _ctx: &Context<'_>, results: Vec<Entity>) -> Dictionary {
        group_by(results, |e| e.get_raw(&self.owner_key).dictionary_key())
    }

    fn match_results(
        &self,
        parents: &mut [&mut Entity],
        dictionary: &Dictionary,
        name: &str,
    ) -> Result<()> {
        match_by_key(parents, dictionary, name, &self.foreign_key, false, |_| {
            self.default.build(&self.related)
        })
    }
}
