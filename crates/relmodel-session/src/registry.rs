//! Entity-type and relation registry.
//!
//! Relations are declared once at startup as named factories per entity
//! type. Resolving a relation calls its factory with a [`Relate`] context
//! that knows the parent type and relation name, so declarations read like
//! `registry.define("User", "posts", |r| r.has_many("Post"))`.
//!
//! The registry also owns the morph map, which translates discriminator
//! values stored in `*_type` columns into entity types and back.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use relmodel_core::{DEFAULT_DATE_FORMAT, EntityDef, Error, Result};
use relmodel_query::Connection;

use crate::relation::{
    BelongsTo, BelongsToMany, HasOneOrMany, HasThrough, MorphTo, Relation,
};

type RelationFactory = Arc<dyn Fn(&Relate<'_>) -> Result<Option<Relation>> + Send + Sync>;

/// Anything a relation factory may return.
///
/// Returning `None` (or an `Ok(None)`) is a declaration mistake and
/// resolves to an [`InvalidRelationError`](relmodel_core::InvalidRelationError).
pub trait RelationOutcome {
    #[allow(clippy::result_large_err)]
    fn into_outcome(self) -> Result<Option<Relation>>;
}

impl RelationOutcome for Option<Relation> {
    fn into_outcome(self) -> Result<Option<Relation>> {
        Ok(self)
    }
}

impl RelationOutcome for Result<Option<Relation>> {
    fn into_outcome(self) -> Result<Option<Relation>> {
        self
    }
}

macro_rules! relation_outcome {
    ($($ty:ty),* $(,)?) => {
        $(
            impl RelationOutcome for $ty {
                fn into_outcome(self) -> Result<Option<Relation>> {
                    Ok(Some(self.into()))
                }
            }

            impl RelationOutcome for Result<$ty> {
                fn into_outcome(self) -> Result<Option<Relation>> {
                    self.map(|r| Some(r.into()))
                }
            }
        )*
    };
}

relation_outcome!(Relation, HasOneOrMany, BelongsTo, HasThrough, BelongsToMany, MorphTo);

/// Registered entity types, their relation factories and the morph map.
pub struct Registry {
    date_format: String,
    entities: IndexMap<String, Arc<EntityDef>>,
    relations: HashMap<String, IndexMap<String, RelationFactory>>,
    morph_map: IndexMap<String, String>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let relations: HashMap<&str, Vec<&str>> = self
            .relations
            .iter()
            .map(|(k, v)| (k.as_str(), v.keys().map(String::as_str).collect()))
            .collect();
        f.debug_struct("Registry")
            .field("date_format", &self.date_format)
            .field("entities", &self.entities.keys().collect::<Vec<_>>())
            .field("relations", &relations)
            .field("morph_map", &self.morph_map)
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_date_format(DEFAULT_DATE_FORMAT)
    }

    /// A registry stamping `format` into every registered definition.
    pub fn with_date_format(format: impl Into<String>) -> Self {
        Self {
            date_format: format.into(),
            entities: IndexMap::new(),
            relations: HashMap::new(),
            morph_map: IndexMap::new(),
        }
    }

    /// A registry using the stored date format of `conn`.
    pub fn for_connection<C: Connection + ?Sized>(conn: &C) -> Self {
        Self::with_date_format(conn.date_format())
    }

    pub fn date_format(&self) -> &str {
        &self.date_format
    }

    /// Register an entity type, replacing any earlier definition of the same name.
    pub fn register(&mut self, mut def: EntityDef) -> Arc<EntityDef> {
        def.set_date_format(self.date_format.clone());
        let def = Arc::new(def);
        tracing::debug!(entity = def.name(), table = def.table(), "Registered entity type");
        self.entities
            .insert(def.name().to_string(), Arc::clone(&def));
        def
    }

    /// Look up a registered entity type.
    #[allow(clippy::result_large_err)]
    pub fn entity(&self, name: &str) -> Result<Arc<EntityDef>> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| Error::config(format!("entity type `{name}` is not registered")))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDef>> {
        self.entities.values()
    }

    /// Declare relation `name` on `entity`.
    pub fn define<F, R>(&mut self, entity: &str, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&Relate<'_>) -> R + Send + Sync + 'static,
        R: RelationOutcome,
    {
        let factory: RelationFactory = Arc::new(move |ctx: &Relate<'_>| factory(ctx).into_outcome());
        self.relations
            .entry(entity.to_string())
            .or_default()
            .insert(name.to_string(), factory);
        self
    }

    pub fn has_relation(&self, entity: &str, name: &str) -> bool {
        self.relations
            .get(entity)
            .is_some_and(|r| r.contains_key(name))
    }

    /// Names of the relations declared on `entity`, in declaration order.
    pub fn relation_names(&self, entity: &str) -> Vec<&str> {
        self.relations
            .get(entity)
            .map(|r| r.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Resolve relation `name` of `entity` into a descriptor.
    ///
    /// An undeclared relation, or a factory that produced nothing, is an
    /// [`InvalidRelationError`](relmodel_core::InvalidRelationError).
    #[allow(clippy::result_large_err)]
    pub fn relation(&self, entity: &str, name: &str) -> Result<Relation> {
        let factory = self
            .relations
            .get(entity)
            .and_then(|r| r.get(name))
            .ok_or_else(|| Error::invalid_relation(entity, name))?;
        let ctx = Relate {
            registry: self,
            parent: self.entity(entity)?,
            name,
        };
        factory(&ctx)?.ok_or_else(|| Error::invalid_relation(entity, name))
    }

    /// Map discriminator value `alias` to entity type `entity`.
    pub fn morph_map(&mut self, alias: impl Into<String>, entity: impl Into<String>) -> &mut Self {
        self.morph_map.insert(alias.into(), entity.into());
        self
    }

    /// Discriminator value stored for `entity`: its alias, or its name when unmapped.
    pub fn morph_class(&self, entity: &str) -> String {
        self.morph_map
            .iter()
            .find(|(_, name)| name.as_str() == entity)
            .map_or_else(|| entity.to_string(), |(alias, _)| alias.clone())
    }

    /// Entity type for a stored discriminator value.
    #[allow(clippy::result_large_err)]
    pub fn resolve_morph(&self, value: &str) -> Result<Arc<EntityDef>> {
        let name = self.morph_map.get(value).map_or(value, String::as_str);
        self.entities.get(name).cloned().ok_or_else(|| {
            Error::config(format!("no entity type registered for morph type `{value}`"))
        })
    }
}

/// Context handed to relation factories.
///
/// Each builder fills conventional key names from the entity definitions;
/// every one can be overridden on the returned descriptor.
pub struct Relate<'r> {
    registry: &'r Registry,
    parent: Arc<EntityDef>,
    name: &'r str,
}

impl Relate<'_> {
    pub fn registry(&self) -> &Registry {
        self.registry
    }

    pub fn parent(&self) -> &Arc<EntityDef> {
        &self.parent
    }

    /// Name the relation is declared under.
    pub fn name(&self) -> &str {
        self.name
    }

    #[allow(clippy::result_large_err)]
    pub fn has_one(&self, related: &str) -> Result<HasOneOrMany> {
        let related = self.registry.entity(related)?;
        Ok(HasOneOrMany::new(Arc::clone(&self.parent), related, false))
    }

    #[allow(clippy::result_large_err)]
    pub fn has_many(&self, related: &str) -> Result<HasOneOrMany> {
        let related = self.registry.entity(related)?;
        Ok(HasOneOrMany::new(Arc::clone(&self.parent), related, true))
    }

    /// Direct to-one relation filtered on `{morph_name}_type` = parent morph class.
    #[allow(clippy::result_large_err)]
    pub fn morph_one(&self, related: &str, morph_name: &str) -> Result<HasOneOrMany> {
        let related = self.registry.entity(related)?;
        let class = self.registry.morph_class(self.parent.name());
        Ok(HasOneOrMany::morph(Arc::clone(&self.parent), related, morph_name, class, false))
    }

    #[allow(clippy::result_large_err)]
    pub fn morph_many(&self, related: &str, morph_name: &str) -> Result<HasOneOrMany> {
        let related = self.registry.entity(related)?;
        let class = self.registry.morph_class(self.parent.name());
        Ok(HasOneOrMany::morph(Arc::clone(&self.parent), related, morph_name, class, true))
    }

    /// Inverse to-one relation; the foreign key defaults to `{relation}_{owner_key}`.
    #[allow(clippy::result_large_err)]
    pub fn belongs_to(&self, related: &str) -> Result<BelongsTo> {
        let related = self.registry.entity(related)?;
        Ok(BelongsTo::new(Arc::clone(&self.parent), related, self.name))
    }

    #[allow(clippy::result_large_err)]
    pub fn has_one_through(&self, related: &str, through: &str) -> Result<HasThrough> {
        let related = self.registry.entity(related)?;
        let through = self.registry.entity(through)?;
        Ok(HasThrough::new(Arc::clone(&self.parent), through, related, false))
    }

    #[allow(clippy::result_large_err)]
    pub fn has_many_through(&self, related: &str, through: &str) -> Result<HasThrough> {
        let related = self.registry.entity(related)?;
        let through = self.registry.entity(through)?;
        Ok(HasThrough::new(Arc::clone(&self.parent), through, related, true))
    }

    #[allow(clippy::result_large_err)]
    pub fn belongs_to_many(&self, related: &str) -> Result<BelongsToMany> {
        let related = self.registry.entity(related)?;
        Ok(BelongsToMany::new(Arc::clone(&self.parent), related))
    }

    /// Polymorphic many-to-many from the owning side (e.g. `Post` to `Tag`
    /// through `taggables`).
    #[allow(clippy::result_large_err)]
    pub fn morph_to_many(&self, related: &str, morph_name: &str) -> Result<BelongsToMany> {
        let related = self.registry.entity(related)?;
        let class = self.registry.morph_class(self.parent.name());
        Ok(BelongsToMany::morph_to_many(
            Arc::clone(&self.parent),
            related,
            morph_name,
            class,
        ))
    }

    /// Inverse polymorphic many-to-many (e.g. `Tag` to `Post`).
    #[allow(clippy::result_large_err)]
    pub fn morphed_by_many(&self, related: &str, morph_name: &str) -> Result<BelongsToMany> {
        let related = self.registry.entity(related)?;
        let class = self.registry.morph_class(related.name());
        Ok(BelongsToMany::morphed_by_many(
            Arc::clone(&self.parent),
            related,
            morph_name,
            class,
        ))
    }

    /// Polymorphic to-one over `{relation}_type` / `{relation}_id`.
    pub fn morph_to(&self) -> MorphTo {
        MorphTo::new(Arc::clone(&self.parent), self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmodel_core::{EntityDef, KeyType};

    fn registry() -> Registry {
        let mut registry = Registry::with_date_format("%d/%m/%Y %H:%M");
        registry.register(EntityDef::builder("User", "users").build().unwrap());
        registry.register(
            EntityDef::builder("Post", "posts")
                .key_type(KeyType::Int)
                .build()
                .unwrap(),
        );
        registry
    }

    #[test]
    fn register_stamps_date_format() {
        let registry = registry();
        let user = registry.entity("User").unwrap();
        assert_eq!(user.casts().date_format(), "%d/%m/%Y %H:%M");
        assert!(registry.entity("Nope").unwrap_err().is_programmer_error());
    }

    #[test]
    fn undeclared_or_empty_relation_is_invalid() {
        let mut registry = registry();
        registry.define("User", "nothing", |_| None::<Relation>);
        let err = registry.relation("User", "nothing").unwrap_err();
        assert!(matches!(err, Error::InvalidRelation(_)));
        assert_eq!(err.to_string(), "User::nothing must return a relationship instance");

        let err = registry.relation("User", "missing").unwrap_err();
        assert!(matches!(err, Error::InvalidRelation(_)));
    }

    #[test]
    fn factories_resolve_with_conventional_keys() {
        let mut registry = registry();
        registry.define("User", "posts", |r| r.has_many("Post"));
        registry.define("Post", "author", |r| r.belongs_to("User"));
        assert!(registry.has_relation("User", "posts"));
        assert_eq!(registry.relation_names("User"), vec!["posts"]);

        match registry.relation("User", "posts").unwrap() {
            Relation::HasOneOrMany(rel) => {
                assert_eq!(rel.foreign_key(), "user_id");
                assert_eq!(rel.local_key(), "id");
            }
            other => panic!("unexpected relation {other:?}"),
        }
        match registry.relation("Post", "author").unwrap() {
            Relation::BelongsTo(rel) => {
                assert_eq!(rel.foreign_key(), "author_id");
                assert_eq!(rel.owner_key(), "id");
            }
            other => panic!("unexpected relation {other:?}"),
        }
    }

    #[test]
    fn morph_map_round_trip() {
        let mut registry = registry();
        registry.morph_map("post", "Post");
        assert_eq!(registry.morph_class("Post"), "post");
        assert_eq!(registry.morph_class("User"), "User");
        assert_eq!(registry.resolve_morph("post").unwrap().name(), "Post");
        assert_eq!(registry.resolve_morph("User").unwrap().name(), "User");
        assert!(registry.resolve_morph("Video").is_err());
    }
}
