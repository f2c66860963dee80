//! Entity-type metadata.
//!
//! An [`EntityDef`] describes one record type: its table, primary key, casts,
//! date fields, serialization visibility and appended accessors. Definitions
//! are built once at startup with [`EntityDef::builder`], shared as
//! `Arc<EntityDef>`, and act as the factory for [`Entity`] instances.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::Result;
use crate::attributes::{AttributeCasts, AttributeStore};
use crate::cast::Cast;
use crate::entity::Entity;
use crate::error::Error;
use crate::row::Row;
use crate::value::Value;

/// Column name for the creation timestamp.
pub const CREATED_AT: &str = "created_at";
/// Column name for the update timestamp.
pub const UPDATED_AT: &str = "updated_at";

/// How the primary key is represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyType {
    /// Plain integer keys; batch constraints may inline them.
    #[default]
    Int,
    /// Any other key representation, always bound as parameters.
    String,
}

/// Computed attribute appended during serialization.
pub type Accessor = Arc<dyn Fn(&Entity) -> Result<Value> + Send + Sync>;

/// Metadata and factory for one entity type.
pub struct EntityDef {
    name: String,
    table: String,
    primary_key: String,
    key_type: KeyType,
    incrementing: bool,
    timestamps: bool,
    casts: AttributeCasts,
    hidden: Vec<String>,
    visible: Vec<String>,
    appends: IndexMap<String, Accessor>,
}

impl fmt::Debug for EntityDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDef")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("key_type", &self.key_type)
            .field("incrementing", &self.incrementing)
            .field("timestamps", &self.timestamps)
            .field("casts", &self.casts)
            .field("hidden", &self.hidden)
            .field("visible", &self.visible)
            .field("appends", &self.appends.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EntityDef {
    /// Start describing an entity type named `name` stored in `table`.
    pub fn builder(name: impl Into<String>, table: impl Into<String>) -> EntityDefBuilder {
        EntityDefBuilder::new(name.into(), table.into())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// `table.primary_key`
    pub fn qualified_key_name(&self) -> String {
        self.qualify_column(&self.primary_key)
    }

    /// Prefix `column` with the table name unless it is already qualified.
    pub fn qualify_column(&self, column: &str) -> String {
        if column.contains('.') {
            column.to_string()
        } else {
            format!("{}.{}", self.table, column)
        }
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn incrementing(&self) -> bool {
        self.incrementing
    }

    pub fn uses_timestamps(&self) -> bool {
        self.timestamps
    }

    pub fn casts(&self) -> &AttributeCasts {
        &self.casts
    }

    pub fn hidden(&self) -> &[String] {
        &self.hidden
    }

    pub fn visible(&self) -> &[String] {
        &self.visible
    }

    pub fn appends(&self) -> impl Iterator<Item = (&str, &Accessor)> {
        self.appends.iter().map(|(k, a)| (k.as_str(), a))
    }

    /// Replace the stored date format.
    ///
    /// Called by the registry with the connection's format before the
    /// definition is shared.
    pub fn set_date_format(&mut self, format: impl Into<String>) {
        self.casts.set_date_format(format);
    }

    /// Default foreign key name used when another entity points at this one:
    /// `snake_case(name)_primary_key`.
    pub fn foreign_key(&self) -> String {
        format!("{}_{}", snake_case(&self.name), self.primary_key)
    }

    /// Hydrate a loaded row into an existing, clean entity.
    pub fn new_instance<I>(self: &Arc<Self>, raw: I) -> Entity
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Entity::from_store(Arc::clone(self), AttributeStore::from_raw(raw), true)
    }

    /// Hydrate a result row.
    pub fn hydrate_row(self: &Arc<Self>, row: Row) -> Entity {
        self.new_instance(row.into_pairs())
    }

    /// A fresh, empty entity that does not exist in storage.
    pub fn make(self: &Arc<Self>) -> Entity {
        Entity::from_store(Arc::clone(self), AttributeStore::new(), false)
    }

    /// A fresh entity filled through the attribute casts.
    #[allow(clippy::result_large_err)]
    pub fn make_with<K, V, I>(self: &Arc<Self>, attributes: I) -> Result<Entity>
    where
        K: AsRef<str>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut entity = self.make();
        for (key, value) in attributes {
            entity.set(key.as_ref(), value.into())?;
        }
        Ok(entity)
    }
}

/// Builder for [`EntityDef`].
///
/// Cast tags are collected as strings and validated in [`build`](Self::build),
/// so a malformed tag fails at registration rather than on first use.
pub struct EntityDefBuilder {
    name: String,
    table: String,
    primary_key: String,
    key_type: KeyType,
    incrementing: bool,
    timestamps: bool,
    cast_tags: Vec<(String, String)>,
    casts: Vec<(String, Cast)>,
    dates: Vec<String>,
    hidden: Vec<String>,
    visible: Vec<String>,
    appends: IndexMap<String, Accessor>,
}

impl EntityDefBuilder {
    fn new(name: String, table: String) -> Self {
        Self {
            name,
            table,
            primary_key: "id".to_string(),
            key_type: KeyType::Int,
            incrementing: true,
            timestamps: true,
            cast_tags: Vec::new(),
            casts: Vec::new(),
            dates: Vec::new(),
            hidden: Vec::new(),
            visible: Vec::new(),
            appends: IndexMap::new(),
        }
    }

    pub fn primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    pub fn key_type(mut self, key_type: KeyType) -> Self {
        self.key_type = key_type;
        self
    }

    pub fn incrementing(mut self, incrementing: bool) -> Self {
        self.incrementing = incrementing;
        self
    }

    /// Whether `created_at`/`updated_at` are maintained and treated as dates.
    pub fn timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Register a cast by tag, e.g. `cast("price", "decimal:2")`.
    pub fn cast(mut self, key: impl Into<String>, tag: impl Into<String>) -> Self {
        self.cast_tags.push((key.into(), tag.into()));
        self
    }

    /// Register an already-parsed cast.
    pub fn cast_as(mut self, key: impl Into<String>, cast: Cast) -> Self {
        self.casts.push((key.into(), cast));
        self
    }

    pub fn date(mut self, key: impl Into<String>) -> Self {
        self.dates.push(key.into());
        self
    }

    pub fn hidden<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn visible<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.visible.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Append a computed attribute to serialized output.
    pub fn append<F>(mut self, key: impl Into<String>, accessor: F) -> Self
    where
        F: Fn(&Entity) -> Result<Value> + Send + Sync + 'static,
    {
        self.appends.insert(key.into(), Arc::new(accessor));
        self
    }

    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<EntityDef> {
        if self.name.is_empty() || self.table.is_empty() {
            return Err(Error::config("entity name and table must not be empty"));
        }
        if self.primary_key.is_empty() {
            return Err(Error::config(format!(
                "entity {} has an empty primary key name",
                self.name
            )));
        }

        let mut casts = AttributeCasts::new();
        for (key, tag) in &self.cast_tags {
            let cast = Cast::parse(tag).map_err(|e| {
                Error::config(format!("entity {}, attribute {}: {}", self.name, key, e))
            })?;
            casts.insert(key.clone(), cast);
        }
        for (key, cast) in self.casts {
            casts.insert(key, cast);
        }
        if self.incrementing
            && self.key_type == KeyType::Int
            && casts.cast_for(&self.primary_key).is_none()
        {
            casts.insert(self.primary_key.clone(), Cast::Int);
        }
        for key in self.dates {
            casts.add_date(key);
        }
        if self.timestamps {
            casts.add_date(CREATED_AT);
            casts.add_date(UPDATED_AT);
        }

        tracing::debug!(
            entity = %self.name,
            table = %self.table,
            cast_count = self.cast_tags.len(),
            "Built entity definition"
        );

        Ok(EntityDef {
            name: self.name,
            table: self.table,
            primary_key: self.primary_key,
            key_type: self.key_type,
            incrementing: self.incrementing,
            timestamps: self.timestamps,
            casts,
            hidden: self.hidden,
            visible: self.visible,
            appends: self.appends,
        })
    }
}

/// `PostComment` -> `post_comment`
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
