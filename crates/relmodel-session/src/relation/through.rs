//! Two-hop relations through an intermediate entity.
//!
//! The related query joins the intermediate table and projects its key
//! back to the far parent under [`THROUGH_KEY`], so one query both fetches
//! the rows and keys the dictionary.

use std::sync::Arc;

use relmodel_core::{Entity, EntityDef, Loaded, Result, Row};
use relmodel_query::{BinaryOp, Expr, Join, Select, SelectItem};

use super::{
    BatchLoad, Constraint, Context, Dictionary, RelationKind, apply_constraint,
    distinct_sorted_keys, execute, hydrate_rows, integer_keys, match_by_key, self_alias,
    where_in_keys,
};

/// Reserved alias carrying the intermediate row's key to the far parent.
pub const THROUGH_KEY: &str = "relmodel_through_key";

/// `HasOneThrough` / `HasManyThrough`.
#[derive(Debug, Clone)]
pub struct HasThrough {
    far_parent: Arc<EntityDef>,
    through: Arc<EntityDef>,
    related: Arc<EntityDef>,
    /// On the intermediate table, pointing at the far parent
    first_key: String,
    /// On the related table, pointing at the intermediate row
    second_key: String,
    /// On the far parent
    local_key: String,
    /// On the intermediate table
    second_local_key: String,
    many: bool,
}

impl HasThrough {
    pub fn new(
        far_parent: Arc<EntityDef>,
        through: Arc<EntityDef>,
        related: Arc<EntityDef>,
        many: bool,
    ) -> Self {
        Self {
            first_key: far_parent.foreign_key(),
            second_key: through.foreign_key(),
            local_key: far_parent.primary_key().to_string(),
            second_local_key: through.primary_key().to_string(),
            far_parent,
            through,
            related,
            many,
        }
    }

    #[must_use]
    pub fn with_first_key(mut self, key: impl Into<String>) -> Self {
        self.first_key = key.into();
        self
    }

    #[must_use]
    pub fn with_second_key(mut self, key: impl Into<String>) -> Self {
        self.second_key = key.into();
        self
    }

    #[must_use]
    pub fn with_local_key(mut self, key: impl Into<String>) -> Self {
        self.local_key = key.into();
        self
    }

    #[must_use]
    pub fn with_second_local_key(mut self, key: impl Into<String>) -> Self {
        self.second_local_key = key.into();
        self
    }

    pub fn far_parent(&self) -> &Arc<EntityDef> {
        &self.far_parent
    }

    pub fn through(&self) -> &Arc<EntityDef> {
        &self.through
    }

    pub fn related(&self) -> &Arc<EntityDef> {
        &self.related
    }

    pub fn first_key(&self) -> &str {
        &self.first_key
    }

    pub fn second_key(&self) -> &str {
        &self.second_key
    }

    fn qualified_first_key(&self) -> String {
        self.through.qualify_column(&self.first_key)
    }

    fn base_query(&self) -> Select {
        Select::from(self.related.table())
            .select(vec![
                SelectItem::AllFrom(self.related.table().to_string()),
                SelectItem::column_as(self.qualified_first_key(), THROUGH_KEY),
            ])
            .join(
                self.through.table(),
                self.through.qualify_column(&self.second_local_key),
                BinaryOp::Eq,
                self.related.qualify_column(&self.second_key),
            )
    }

    pub fn add_constraints(&self, parent: &Entity) -> Select {
        self.base_query().where_eq(
            self.qualified_first_key(),
            parent.get_raw(&self.local_key).clone(),
        )
    }

    #[allow(clippy::result_large_err)]
    pub fn get_results(
        &self,
        ctx: &Context<'_>,
        parent: &Entity,
        constraint: Option<&Constraint>,
    ) -> Result<Loaded> {
        if parent.get_raw(&self.local_key).is_null() {
            return Ok(if self.many {
                Loaded::Many(Vec::new())
            } else {
                Loaded::one(None)
            });
        }
        let query = apply_constraint(self.add_constraints(parent), constraint);
        let mut results = hydrate_rows(&self.related, execute(ctx, &query)?);
        for entity in &mut results {
            take_through_key(entity);
        }
        Ok(if self.many {
            Loaded::Many(results)
        } else {
            Loaded::one(results.into_iter().next())
        })
    }

    /// Existence query; either hop may collide with the parent's table and
    /// is then aliased.
    pub fn existence_query(&self, ctx: &Context<'_>, parent_ref: &str) -> Select {
        let parent_table = self.far_parent.table();
        let related_alias = self_alias(ctx, self.kind(), parent_table, self.related.table());
        let through_alias = self_alias(ctx, self.kind(), parent_table, self.through.table());

        let related_ref = related_alias
            .clone()
            .unwrap_or_else(|| self.related.table().to_string());
        let through_ref = through_alias
            .clone()
            .unwrap_or_else(|| self.through.table().to_string());

        let query = match related_alias {
            Some(alias) => Select::from_as(self.related.table(), alias),
            None => Select::from(self.related.table()),
        };
        let on = Expr::col(format!("{through_ref}.{}", self.second_local_key))
            .eq(Expr::col(format!("{related_ref}.{}", self.second_key)));
        let join = match through_alias {
            Some(alias) => Join::inner(self.through.table(), on).alias(alias),
            None => Join::inner(self.through.table(), on),
        };
        query.add_join(join).where_column(
            format!("{through_ref}.{}", self.first_key),
            BinaryOp::Eq,
            format!("{parent_ref}.{}", self.local_key),
        )
    }
}

/// Remove the projected intermediate key, returning its dictionary form.
fn take_through_key(entity: &mut Entity) -> Option<String> {
    let attributes = entity.attributes_mut();
    let value = attributes.remove(THROUGH_KEY);
    attributes.sync_original_attribute(THROUGH_KEY);
    value.and_then(|v| v.dictionary_key())
}

impl BatchLoad for HasThrough {
    fn kind(&self) -> RelationKind {
        if self.many {
            RelationKind::HasManyThrough
        } else {
            RelationKind::HasOneThrough
        }
    }

    fn add_eager_constraints(&self, parents: &[&Entity]) -> Result<Select> {
        let keys = distinct_sorted_keys(parents.iter().map(|p| p.get_raw(&self.local_key)));
        tracing::debug!(
            through = self.through.name(),
            related = self.related.name(),
            key_count = keys.len(),
            "Constraining through relation"
        );
        Ok(where_in_keys(
            self.base_query(),
            self.qualified_first_key(),
            keys,
            integer_keys(&self.far_parent, &self.local_key),
        ))
    }

    fn hydrate(&self, _ctx: &Context<'_>, rows: Vec<Row>) -> Result<Vec<Entity>> {
        Ok(hydrate_rows(&self.related, rows))
    }

    fn build_dictionary(&self, _ctx: &Context<'_>, results: Vec<Entity>) -> Dictionary {
        let mut dictionary = Dictionary::new();
        for mut entity in results {
            if let Some(key) = take_through_key(&mut entity) {
                dictionary.entry(key).or_default().push(entity);
            }
        }
        dictionary
    }

    fn match_results(
        &self,
        parents: &mut [&mut Entity],
        dictionary: &Dictionary,
        name: &str,
    ) -> Result<()> {
        match_by_key(parents, dictionary, name, &self.local_key, self.many, |_| Ok(None))
    }
}
