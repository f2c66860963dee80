//! Relation descriptors.
//!
//! A [`Relation`] describes one declared association and knows how to
//! constrain a query for a single parent or for a whole batch, how to key
//! result rows into a [`Dictionary`], and how to attach dictionary buckets
//! back onto parents. Descriptors hold no per-query state: everything that
//! varies per hydration pass (connection, registry, alias counter) arrives
//! through a [`Context`].

mod belongs_to;
mod belongs_to_many;
mod has_one_or_many;
mod morph_to;
mod through;

pub use belongs_to::BelongsTo;
pub use belongs_to_many::BelongsToMany;
pub use has_one_or_many::HasOneOrMany;
pub use morph_to::MorphTo;
pub use through::{HasThrough, THROUGH_KEY};

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use relmodel_core::{Entity, EntityDef, KeyType, Loaded, Result, Row, Value};
use relmodel_query::{AliasCounter, Connection, Select};

use crate::registry::Registry;

/// Caller-supplied query refinement for a relation.
pub type Constraint = Arc<dyn Fn(Select) -> Select + Send + Sync>;

/// Result rows grouped by the key that links them back to a parent.
pub type Dictionary = HashMap<String, Vec<Entity>>;

/// Everything a relation needs from the current hydration pass.
pub struct Context<'a> {
    pub conn: &'a dyn Connection,
    pub registry: &'a Registry,
    pub aliases: &'a AliasCounter,
    /// Accessor pivot records attach under unless a relation overrides it.
    pub pivot_accessor: &'a str,
    /// Stored date format for synthesized pivot records.
    pub date_format: &'a str,
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("dialect", &self.conn.dialect())
            .field("pivot_accessor", &self.pivot_accessor)
            .field("date_format", &self.date_format)
            .finish_non_exhaustive()
    }
}

/// Declared association kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    HasOne,
    HasMany,
    MorphOne,
    MorphMany,
    BelongsTo,
    HasOneThrough,
    HasManyThrough,
    BelongsToMany,
    MorphToMany,
    MorphedByMany,
    MorphTo,
}

impl RelationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            RelationKind::HasOne => "has_one",
            RelationKind::HasMany => "has_many",
            RelationKind::MorphOne => "morph_one",
            RelationKind::MorphMany => "morph_many",
            RelationKind::BelongsTo => "belongs_to",
            RelationKind::HasOneThrough => "has_one_through",
            RelationKind::HasManyThrough => "has_many_through",
            RelationKind::BelongsToMany => "belongs_to_many",
            RelationKind::MorphToMany => "morph_to_many",
            RelationKind::MorphedByMany => "morphed_by_many",
            RelationKind::MorphTo => "morph_to",
        }
    }

    /// Does this relation resolve to at most one entity?
    pub const fn is_to_one(self) -> bool {
        matches!(
            self,
            RelationKind::HasOne
                | RelationKind::MorphOne
                | RelationKind::BelongsTo
                | RelationKind::HasOneThrough
                | RelationKind::MorphTo
        )
    }
}

/// What a to-one relation yields when nothing matched.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DefaultModel {
    /// Nothing: the relation reads as `None`
    #[default]
    Null,
    /// A fresh, non-existing instance of the related type
    Empty,
    /// A fresh instance filled with these attributes
    Attributes(Vec<(String, Value)>),
}

impl DefaultModel {
    /// Collect `attributes` into a seeded default.
    pub fn attributes<K, V, I>(attributes: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        DefaultModel::Attributes(
            attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn build(&self, def: &Arc<EntityDef>) -> Result<Option<Entity>> {
        match self {
            DefaultModel::Null => Ok(None),
            DefaultModel::Empty => Ok(Some(def.make())),
            DefaultModel::Attributes(attributes) => def
                .make_with(attributes.iter().map(|(k, v)| (k.as_str(), v.clone())))
                .map(Some),
        }
    }
}

/// `type_column = class` filter shared by the polymorphic variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MorphType {
    pub column: String,
    pub class: String,
}

/// Batched resolution for the relations that issue exactly one query per batch.
pub trait BatchLoad {
    /// Name of the relation kind, used for logging and self-join aliases.
    fn kind(&self) -> RelationKind;

    /// One query constrained to the distinct, sorted keys of all `parents`.
    #[allow(clippy::result_large_err)]
    fn add_eager_constraints(&self, parents: &[&Entity]) -> Result<Select>;

    /// Turn result rows into entities.
    #[allow(clippy::result_large_err)]
    fn hydrate(&self, ctx: &Context<'_>, rows: Vec<Row>) -> Result<Vec<Entity>>;

    /// Group hydrated results by the key linking them back to a parent.
    fn build_dictionary(&self, ctx: &Context<'_>, results: Vec<Entity>) -> Dictionary;

    /// Attach each parent's bucket under `name`.
    #[allow(clippy::result_large_err)]
    fn match_results(
        &self,
        parents: &mut [&mut Entity],
        dictionary: &Dictionary,
        name: &str,
    ) -> Result<()>;

    /// Constrain, execute, key and match in one pass. Issues no query for
    /// an empty parent set and exactly one otherwise.
    #[allow(clippy::result_large_err)]
    fn eager_load(
        &self,
        ctx: &Context<'_>,
        parents: &mut [&mut Entity],
        name: &str,
        constraint: Option<&Constraint>,
    ) -> Result<()> {
        if parents.is_empty() {
            return Ok(());
        }
        let query = {
            let view: Vec<&Entity> = parents.iter().map(|p| &**p).collect();
            self.add_eager_constraints(&view)?
        };
        let query = apply_constraint(query, constraint);
        let rows = execute(ctx, &query)?;
        let row_count = rows.len();
        let results = self.hydrate(ctx, rows)?;
        let dictionary = self.build_dictionary(ctx, results);
        self.match_results(parents, &dictionary, name)?;
        tracing::debug!(
            relation = name,
            kind = self.kind().as_str(),
            parent_count = parents.len(),
            row_count,
            bucket_count = dictionary.len(),
            "Matched eager results"
        );
        Ok(())
    }
}

/// A declared association.
#[derive(Debug, Clone)]
pub enum Relation {
    /// `HasOne`, `HasMany`, `MorphOne`, `MorphMany`
    HasOneOrMany(HasOneOrMany),
    BelongsTo(BelongsTo),
    /// `HasOneThrough`, `HasManyThrough`
    HasThrough(HasThrough),
    /// `BelongsToMany`, `MorphToMany`, `MorphedByMany`
    BelongsToMany(BelongsToMany),
    MorphTo(MorphTo),
}

impl From<HasOneOrMany> for Relation {
    fn from(r: HasOneOrMany) -> Self {
        Relation::HasOneOrMany(r)
    }
}

impl From<BelongsTo> for Relation {
    fn from(r: BelongsTo) -> Self {
        Relation::BelongsTo(r)
    }
}

impl From<HasThrough> for Relation {
    fn from(r: HasThrough) -> Self {
        Relation::HasThrough(r)
    }
}

impl From<BelongsToMany> for Relation {
    fn from(r: BelongsToMany) -> Self {
        Relation::BelongsToMany(r)
    }
}

impl From<MorphTo> for Relation {
    fn from(r: MorphTo) -> Self {
        Relation::MorphTo(r)
    }
}

impl Relation {
    pub fn kind(&self) -> RelationKind {
        match self {
            Relation::HasOneOrMany(r) => r.kind(),
            Relation::BelongsTo(r) => r.kind(),
            Relation::HasThrough(r) => r.kind(),
            Relation::BelongsToMany(r) => r.kind(),
            Relation::MorphTo(_) => RelationKind::MorphTo,
        }
    }

    /// Related entity type; `None` for `MorphTo`, whose type varies per row.
    pub fn related(&self) -> Option<&Arc<EntityDef>> {
        match self {
            Relation::HasOneOrMany(r) => Some(r.related()),
            Relation::BelongsTo(r) => Some(r.related()),
            Relation::HasThrough(r) => Some(r.related()),
            Relation::BelongsToMany(r) => Some(r.related()),
            Relation::MorphTo(_) => None,
        }
    }

    fn as_batch(&self) -> Option<&dyn BatchLoad> {
        match self {
            Relation::HasOneOrMany(r) => Some(r),
            Relation::BelongsTo(r) => Some(r),
            Relation::HasThrough(r) => Some(r),
            Relation::BelongsToMany(r) => Some(r),
            Relation::MorphTo(_) => None,
        }
    }

    /// Resolve this relation for every parent in one batch (one query per
    /// discriminator type for `MorphTo`, one query otherwise).
    #[allow(clippy::result_large_err)]
    pub fn eager_load(
        &self,
        ctx: &Context<'_>,
        parents: &mut [&mut Entity],
        name: &str,
        constraint: Option<&Constraint>,
    ) -> Result<()> {
        tracing::info!(
            relation = name,
            kind = self.kind().as_str(),
            parent_count = parents.len(),
            "Eager loading relation"
        );
        if let Relation::MorphTo(r) = self {
            return r.eager_load(ctx, parents, name, constraint);
        }
        match self.as_batch() {
            Some(batch) => batch.eager_load(ctx, parents, name, constraint),
            None => Ok(()),
        }
    }

    /// Resolve this relation for one already-loaded parent.
    #[allow(clippy::result_large_err)]
    pub fn get_results(
        &self,
        ctx: &Context<'_>,
        parent: &Entity,
        constraint: Option<&Constraint>,
    ) -> Result<Loaded> {
        match self {
            Relation::HasOneOrMany(r) => r.get_results(ctx, parent, constraint),
            Relation::BelongsTo(r) => r.get_results(ctx, parent, constraint),
            Relation::HasThrough(r) => r.get_results(ctx, parent, constraint),
            Relation::BelongsToMany(r) => r.get_results(ctx, parent, constraint),
            Relation::MorphTo(r) => r.get_results(ctx, parent, constraint),
        }
    }

    /// Correlated query over the related rows of the row referenced as
    /// `parent_ref` in an enclosing query.
    ///
    /// Self-referential relations alias the related table with a fresh name
    /// from the context's alias counter.
    #[allow(clippy::result_large_err)]
    pub fn existence_query(&self, ctx: &Context<'_>, parent_ref: &str) -> Result<Select> {
        match self {
            Relation::HasOneOrMany(r) => Ok(r.existence_query(ctx, parent_ref)),
            Relation::BelongsTo(r) => Ok(r.existence_query(ctx, parent_ref)),
            Relation::HasThrough(r) => Ok(r.existence_query(ctx, parent_ref)),
            Relation::BelongsToMany(r) => Ok(r.existence_query(ctx, parent_ref)),
            Relation::MorphTo(r) => Err(r.existence_error()),
        }
    }
}

pub(crate) fn apply_constraint(query: Select, constraint: Option<&Constraint>) -> Select {
    match constraint {
        Some(constraint) => constraint(query),
        None => query,
    }
}

#[allow(clippy::result_large_err)]
pub(crate) fn execute(ctx: &Context<'_>, query: &Select) -> Result<Vec<Row>> {
    let rows = query.get(ctx.conn)?;
    tracing::trace!(table = query.table(), row_count = rows.len(), "Relation query returned");
    Ok(rows)
}

pub(crate) fn hydrate_rows(def: &Arc<EntityDef>, rows: Vec<Row>) -> Vec<Entity> {
    rows.into_iter().map(|row| def.hydrate_row(row)).collect()
}

fn compare_keys(a: &Value, b: &Value) -> Ordering {
    let (ka, kb) = (a.dictionary_key(), b.dictionary_key());
    let parsed = (
        ka.as_deref().and_then(|k| k.parse::<i64>().ok()),
        kb.as_deref().and_then(|k| k.parse::<i64>().ok()),
    );
    match parsed {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => ka.cmp(&kb),
    }
}

/// Distinct, sorted, non-null key values.
///
/// Values that share a dictionary key (`5` and `"5"`) collapse to the
/// first one seen.
pub(crate) fn distinct_sorted_keys<'a>(values: impl IntoIterator<Item = &'a Value>) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    let mut keys: Vec<Value> = values
        .into_iter()
        .filter(|v| v.dictionary_key().is_some_and(|k| seen.insert(k)))
        .cloned()
        .collect();
    keys.sort_by(compare_keys);
    keys
}

/// `column IN (...)`, inlining the keys when they are all plain integers
/// and `integer` says the column holds integer primary keys.
pub(crate) fn where_in_keys(query: Select, column: String, keys: Vec<Value>, integer: bool) -> Select {
    if integer {
        let ints: Option<Vec<i64>> = keys
            .iter()
            .map(|v| match v {
                Value::Int(i) => Some(*i),
                _ => None,
            })
            .collect();
        if let Some(ints) = ints {
            return query.where_integer_in_raw(column, ints);
        }
    }
    query.where_in(column, keys)
}

/// Whether keys read from `column` of `def` are inlinable integers.
pub(crate) fn integer_keys(def: &EntityDef, column: &str) -> bool {
    column == def.primary_key() && def.key_type() == KeyType::Int
}

pub(crate) fn group_by(results: Vec<Entity>, key: impl Fn(&Entity) -> Option<String>) -> Dictionary {
    let mut dictionary = Dictionary::new();
    for entity in results {
        if let Some(k) = key(&entity) {
            dictionary.entry(k).or_default().push(entity);
        }
    }
    dictionary
}

/// The alias the related side of a self-referential query should use, if any.
pub(crate) fn self_alias(
    ctx: &Context<'_>,
    kind: RelationKind,
    parent_table: &str,
    related_table: &str,
) -> Option<String> {
    (parent_table == related_table).then(|| ctx.aliases.next(kind.as_str()))
}

/// Shared matching for direct and through relations: one entity or a
/// collection per parent, keyed by `parent_key`.
#[allow(clippy::result_large_err)]
pub(crate) fn match_by_key(
    parents: &mut [&mut Entity],
    dictionary: &Dictionary,
    name: &str,
    parent_key: &str,
    many: bool,
    mut default: impl FnMut(&Entity) -> Result<Option<Entity>>,
) -> Result<()> {
    for parent in parents.iter_mut() {
        let bucket = parent
            .get_raw(parent_key)
            .dictionary_key()
            .and_then(|k| dictionary.get(&k));
        let loaded = if many {
            Loaded::Many(bucket.cloned().unwrap_or_default())
        } else {
            match bucket.and_then(|b| b.first()) {
                Some(entity) => Loaded::one(Some(entity.clone())),
                None => Loaded::one(default(&**parent)?),
            }
        };
        parent.set_relation(name, loaded);
    }
    Ok(())
}
