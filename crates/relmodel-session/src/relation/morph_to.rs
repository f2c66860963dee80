//! Polymorphic inverse relation.
//!
//! The child row stores the parent's type in `{name}_type` and its key in
//! `{name}_id`. Eager loading groups children by stored type and issues
//! one query per distinct type.

use std::sync::Arc;

use indexmap::IndexMap;
use relmodel_core::model::snake_case;
use relmodel_core::{Entity, EntityDef, Error, Loaded, Result, Value};
use relmodel_query::Select;

use super::{
    Constraint, Context, DefaultModel, Dictionary, apply_constraint, distinct_sorted_keys,
    execute, group_by, hydrate_rows, integer_keys, where_in_keys,
};

#[derive(Debug, Clone)]
pub struct MorphTo {
    child: Arc<EntityDef>,
    name: String,
    type_column: String,
    id_column: String,
    /// Key on the resolved type; its primary key when unset
    owner_key: Option<String>,
    default: DefaultModel,
}

impl MorphTo {
    pub fn new(child: Arc<EntityDef>, name: &str) -> Self {
        let base = snake_case(name);
        Self {
            child,
            name: name.to_string(),
            type_column: format!("{base}_type"),
            id_column: format!("{base}_id"),
            owner_key: None,
            default: DefaultModel::Null,
        }
    }

    #[must_use]
    pub fn with_type_column(mut self, column: impl Into<String>) -> Self {
        self.type_column = column.into();
        self
    }

    #[must_use]
    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    #[must_use]
    pub fn with_owner_key(mut self, key: impl Into<String>) -> Self {
        self.owner_key = Some(key.into());
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

    pub fn type_column(&self) -> &str {
        &self.type_column
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    fn owner_key<'a>(&'a self, def: &'a EntityDef) -> &'a str {
        self.owner_key.as_deref().unwrap_or(def.primary_key())
    }

    fn stored_type<'e>(&self, child: &'e Entity) -> Option<&'e str> {
        child
            .get_raw(&self.type_column)
            .as_str()
            .filter(|t| !t.is_empty())
    }

    /// Default when nothing matched; without a stored type there is no
    /// type to instantiate, so the result is `None`.
    #[allow(clippy::result_large_err)]
    fn default_for(&self, ctx: &Context<'_>, child: &Entity) -> Result<Option<Entity>> {
        if self.default == DefaultModel::Null {
            return Ok(None);
        }
        match self.stored_type(child) {
            Some(class) => self.default.build(&ctx.registry.resolve_morph(class)?),
            None => Ok(None),
        }
    }

    #[allow(clippy::result_large_err)]
    pub fn get_results(
        &self,
        ctx: &Context<'_>,
        child: &Entity,
        constraint: Option<&Constraint>,
    ) -> Result<Loaded> {
        let id = child.get_raw(&self.id_column);
        let Some(class) = self.stored_type(child).filter(|_| !id.is_null()) else {
            return Ok(Loaded::one(self.default_for(ctx, child)?));
        };
        let def = ctx.registry.resolve_morph(class)?;
        let query = Select::from(def.table())
            .where_eq(def.qualify_column(self.owner_key(&def)), id.clone());
        let query = apply_constraint(query, constraint);
        match query.first(ctx.conn)? {
            Some(row) => Ok(Loaded::one(Some(def.hydrate_row(row)))),
            None => Ok(Loaded::one(self.default_for(ctx, child)?)),
        }
    }

    /// One query per distinct stored type, in first-seen order.
    #[allow(clippy::result_large_err)]
    pub fn eager_load(
        &self,
        ctx: &Context<'_>,
        children: &mut [&mut Entity],
        name: &str,
        constraint: Option<&Constraint>,
    ) -> Result<()> {
        if children.is_empty() {
            return Ok(());
        }

        let mut by_type: IndexMap<String, Vec<Value>> = IndexMap::new();
        for child in children.iter() {
            if let Some(class) = self.stored_type(child) {
                by_type
                    .entry(class.to_string())
                    .or_default()
                    .push(child.get_raw(&self.id_column).clone());
            }
        }

        let mut dictionaries: IndexMap<String, Dictionary> = IndexMap::new();
        for (class, ids) in &by_type {
            let def = ctx.registry.resolve_morph(class)?;
            let owner_key = self.owner_key(&def);
            let keys = distinct_sorted_keys(ids);
            if keys.is_empty() {
                continue;
            }
            let query = where_in_keys(
                Select::from(def.table()),
                def.qualify_column(owner_key),
                keys,
                integer_keys(&def, owner_key),
            );
            let query = apply_constraint(query, constraint);
            let results = hydrate_rows(&def, execute(ctx, &query)?);
            tracing::debug!(
                relation = name,
                morph_type = %class,
                related = def.name(),
                row_count = results.len(),
                "Loaded morph type"
            );
            dictionaries.insert(
                class.clone(),
                group_by(results, |e| e.get_raw(owner_key).dictionary_key()),
            );
        }

        for child in children.iter_mut() {
            let found = self.stored_type(child).and_then(|class| {
                let key = child.get_raw(&self.id_column).dictionary_key()?;
                dictionaries.get(class)?.get(&key)?.first().cloned()
            });
            let loaded = match found {
                Some(entity) => Loaded::one(Some(entity)),
                None => Loaded::one(self.default_for(ctx, child)?),
            };
            child.set_relation(name, loaded);
        }
        Ok(())
    }

    /// Existence over a polymorphic inverse has no single related table.
    pub fn existence_error(&self) -> Error {
        Error::malformed_plan(format!(
            "relation `{}` on `{}` is polymorphic; existence queries need a concrete related type",
            self.name,
            self.child.name()
        ))
    }
}
