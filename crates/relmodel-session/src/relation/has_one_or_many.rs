//! Direct relations keyed by a foreign key on the related table.

use std::sync::Arc;

use relmodel_core::{Entity, EntityDef, Loaded, Result, Row, Value};
use relmodel_query::{BinaryOp, Select};

use super::{
    BatchLoad, Constraint, Context, DefaultModel, Dictionary, MorphType, RelationKind,
    apply_constraint, distinct_sorted_keys, execute, group_by, hydrate_rows, integer_keys,
    match_by_key, self_alias, where_in_keys,
};

/// `HasOne` / `HasMany`, and their polymorphic forms `MorphOne` / `MorphMany`.
#[derive(Debug, Clone)]
pub struct HasOneOrMany {
    parent: Arc<EntityDef>,
    related: Arc<EntityDef>,
    foreign_key: String,
    local_key: String,
    many: bool,
    morph: Option<MorphType>,
    default: DefaultModel,
}

impl HasOneOrMany {
    /// Foreign key defaults to the parent's conventional foreign key
    /// (`user_id` for `User`), local key to the parent's primary key.
    pub fn new(parent: Arc<EntityDef>, related: Arc<EntityDef>, many: bool) -> Self {
        Self {
            foreign_key: parent.foreign_key(),
            local_key: parent.primary_key().to_string(),
            parent,
            related,
            many,
            morph: None,
            default: DefaultModel::Null,
        }
    }

    /// Polymorphic form over `{name}_type` / `{name}_id`.
    pub fn morph(
        parent: Arc<EntityDef>,
        related: Arc<EntityDef>,
        name: &str,
        class: String,
        many: bool,
    ) -> Self {
        let mut relation = Self::new(parent, related, many);
        relation.foreign_key = format!("{name}_id");
        relation.morph = Some(MorphType {
            column: format!("{name}_type"),
            class,
        });
        relation
    }

    #[must_use]
    pub fn with_foreign_key(mut self, key: impl Into<String>) -> Self {
        self.foreign_key = key.into();
        self
    }

    #[must_use]
    pub fn with_local_key(mut self, key: impl Into<String>) -> Self {
        self.local_key = key.into();
        self
    }

    /// Yield an empty related instance instead of `None` (to-one only).
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

    pub fn parent(&self) -> &Arc<EntityDef> {
        &self.parent
    }

    pub fn related(&self) -> &Arc<EntityDef> {
        &self.related
    }

    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    pub fn local_key(&self) -> &str {
        &self.local_key
    }

    pub fn morph_type(&self) -> Option<&MorphType> {
        self.morph.as_ref()
    }

    pub fn is_many(&self) -> bool {
        self.many
    }

    pub fn qualified_foreign_key(&self) -> String {
        self.related.qualify_column(&self.foreign_key)
    }

    fn base_query(&self) -> Select {
        let query = Select::from(self.related.table());
        match &self.morph {
            Some(morph) => query.where_eq(
                self.related.qualify_column(&morph.column),
                morph.class.as_str(),
            ),
            None => query,
        }
    }

    /// Query restricted to one parent's key.
    pub fn add_constraints(&self, parent: &Entity) -> Select {
        let fk = self.qualified_foreign_key();
        self.base_query()
            .where_eq(fk.clone(), parent.get_raw(&self.local_key).clone())
            .where_not_null(fk)
    }

    /// Default for a parent with no match; the foreign key (and morph type)
    /// are filled from the parent.
    #[allow(clippy::result_large_err)]
    fn default_for(&self, parent: &Entity) -> Result<Option<Entity>> {
        let Some(mut entity) = self.default.build(&self.related)? else {
            return Ok(None);
        };
        entity.set_raw(
            self.foreign_key.clone(),
            parent.get_raw(&self.local_key).clone(),
        );
        if let Some(morph) = &self.morph {
            entity.set_raw(morph.column.clone(), Value::from(morph.class.as_str()));
        }
        Ok(Some(entity))
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
                Loaded::one(self.default_for(parent)?)
            });
        }
        let query = apply_constraint(self.add_constraints(parent), constraint);
        if self.many {
            let rows = execute(ctx, &query)?;
            Ok(Loaded::Many(hydrate_rows(&self.related, rows)))
        } else {
            match query.first(ctx.conn)? {
                Some(row) => Ok(Loaded::one(Some(self.related.hydrate_row(row)))),
                None => Ok(Loaded::one(self.default_for(parent)?)),
            }
        }
    }

    pub fn existence_query(&self, ctx: &Context<'_>, parent_ref: &str) -> Select {
        let parent_column = format!("{parent_ref}.{}", self.local_key);
        let (query, reference) =
            match self_alias(ctx, self.kind(), self.parent.table(), self.related.table()) {
                Some(alias) => (Select::from_as(self.related.table(), alias.clone()), alias),
                None => (Select::from(self.related.table()), self.related.table().to_string()),
            };
        let query = query.where_column(
            format!("{reference}.{}", self.foreign_key),
            BinaryOp::Eq,
            parent_column,
        );
        match &self.morph {
            Some(morph) => query.where_eq(format!("{reference}.{}", morph.column), morph.class.as_str()),
            None => query,
        }
    }
}

impl BatchLoad for HasOneOrMany {
    fn kind(&self) -> RelationKind {
        match (self.morph.is_some(), self.many) {
            (false, false) => RelationKind::HasOne,
            (false, true) => RelationKind::HasMany,
            (true, false) => RelationKind::MorphOne,
            (true, true) => RelationKind::MorphMany,
        }
    }

    fn add_eager_constraints(&self, parents: &[&Entity]) -> Result<Select> {
        let keys = distinct_sorted_keys(parents.iter().map(|p| p.get_raw(&self.local_key)));
        tracing::debug!(
            related = self.related.name(),
            key_count = keys.len(),
            "Constraining direct relation"
        );
        Ok(where_in_keys(
            self.base_query(),
            self.qualified_foreign_key(),
            keys,
            integer_keys(&self.parent, &self.local_key),
        ))
    }

    fn hydrate(&self, _ctx: &Context<'_>, rows: Vec<Row>) -> Result<Vec<Entity>> {
        Ok(hydrate_rows(&self.related, rows))
    }

    fn build_dictionary(&self, _ctx: &Context<'_>, results: Vec<Entity>) -> Dictionary {
        group_by(results, |e| e.get_raw(&self.foreign_key).dictionary_key())
    }

    fn match_results(
        &self,
        parents: &mut [&mut Entity],
        dictionary: &Dictionary,
        name: &str,
    ) -> Result<()> {
        match_by_key(parents, dictionary, name, &self.local_key, self.many, |p| {
            self.default_for(p)
        })
    }
}
