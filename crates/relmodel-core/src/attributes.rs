//! Per-instance attribute storage with change tracking.
//!
//! An [`AttributeStore`] holds raw values exactly as the row source returned
//! them (or as they were normalized on assignment), a snapshot of the values
//! at the last sync, and the change set recorded by the last
//! [`sync_changes`](AttributeStore::sync_changes). Cast behaviour comes from
//! an [`AttributeCasts`] table owned by the entity type.

use indexmap::IndexMap;

use crate::Result;
use crate::cast::{self, Cast};
use crate::error::Error;
use crate::value::Value;

/// Default stored date format.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Cast metadata for one entity type.
#[derive(Debug, Clone)]
pub struct AttributeCasts {
    casts: IndexMap<String, Cast>,
    dates: Vec<String>,
    date_format: String,
}

impl Default for AttributeCasts {
    fn default() -> Self {
        Self {
            casts: IndexMap::new(),
            dates: Vec::new(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }
}

impl AttributeCasts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cast for `key`, replacing any previous one.
    pub fn insert(&mut self, key: impl Into<String>, cast: Cast) {
        self.casts.insert(key.into(), cast);
    }

    /// Mark `key` as a date field without giving it a cast.
    pub fn add_date(&mut self, key: impl Into<String>) {
        let key = key.into();
        if !self.dates.contains(&key) {
            self.dates.push(key);
        }
    }

    pub fn set_date_format(&mut self, format: impl Into<String>) {
        self.date_format = format.into();
    }

    pub fn date_format(&self) -> &str {
        &self.date_format
    }

    pub fn cast_for(&self, key: &str) -> Option<&Cast> {
        self.casts.get(key)
    }

    pub fn casts(&self) -> impl Iterator<Item = (&str, &Cast)> {
        self.casts.iter().map(|(k, c)| (k.as_str(), c))
    }

    /// Is `key` a date field, either declared or through a date cast?
    pub fn is_date(&self, key: &str) -> bool {
        self.dates.iter().any(|d| d == key) || self.casts.get(key).is_some_and(Cast::is_date)
    }

    /// Convert a raw value to the attribute's presented form.
    ///
    /// With a cast, the cast applies. Without one, a date field is coerced
    /// to a date-time. Anything else is returned as stored.
    #[allow(clippy::result_large_err)]
    pub fn present(&self, key: &str, raw: &Value) -> Result<Value> {
        let with_column = |e: Error| match e {
            Error::Type(mut te) => {
                te.column = Some(key.to_string());
                Error::Type(te)
            }
            e => e,
        };

        if let Some(c) = self.casts.get(key) {
            return cast::cast(c, raw, &self.date_format).map_err(with_column);
        }
        if self.is_date(key) && !raw.is_null() {
            return cast::as_date_time(raw, &self.date_format)
                .map(Value::DateTime)
                .map_err(with_column);
        }
        Ok(raw.clone())
    }

    fn is_dirty_value(&self, key: &str, current: &Value, original: Option<&Value>) -> bool {
        cast::compare_for_dirty(
            self.casts.get(key),
            self.is_date(key),
            current,
            original,
            &self.date_format,
        )
    }
}

/// Raw attribute values, the original snapshot and the last change set.
///
/// Invariant: immediately after [`from_raw`](Self::from_raw) or
/// [`sync_original`](Self::sync_original), raw values equal the original.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeStore {
    attributes: IndexMap<String, Value>,
    original: IndexMap<String, Value>,
    changes: IndexMap<String, Value>,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from freshly loaded values, already in sync.
    pub fn from_raw<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let attributes: IndexMap<String, Value> = pairs.into_iter().collect();
        Self {
            original: attributes.clone(),
            attributes,
            changes: IndexMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Iterate over raw `(key, value)` pairs in insertion order.
    pub fn iter_raw(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Write a raw value, bypassing casts and date normalization.
    pub fn set_raw(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    /// Remove a raw value, returning it. The original snapshot is untouched.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.attributes.shift_remove(key)
    }

    /// Read `key` through its cast. A missing key reads as NULL.
    #[allow(clippy::result_large_err)]
    pub fn get(&self, key: &str, casts: &AttributeCasts) -> Result<Value> {
        match self.attributes.get(key) {
            Some(raw) => casts.present(key, raw),
            None => Ok(Value::Null),
        }
    }

    /// Assign `key`, normalizing date fields and encoding JSON casts.
    #[allow(clippy::result_large_err)]
    pub fn set(&mut self, key: &str, value: Value, casts: &AttributeCasts) -> Result<()> {
        let stored = cast::normalize_for_storage(
            key,
            casts.cast_for(key),
            casts.is_date(key),
            value,
            casts.date_format(),
        )?;
        tracing::trace!(attribute = key, value = ?stored, "Setting attribute");
        self.attributes.insert(key.to_string(), stored);
        Ok(())
    }

    /// Original value of `key` through its cast.
    #[allow(clippy::result_large_err)]
    pub fn get_original(&self, key: &str, casts: &AttributeCasts) -> Result<Value> {
        match self.original.get(key) {
            Some(raw) => casts.present(key, raw),
            None => Ok(Value::Null),
        }
    }

    pub fn get_raw_original(&self, key: &str) -> Option<&Value> {
        self.original.get(key)
    }

    /// Snapshot the current raw values as the original.
    pub fn sync_original(&mut self) {
        self.original = self.attributes.clone();
    }

    /// Snapshot a single attribute.
    pub fn sync_original_attribute(&mut self, key: &str) {
        match self.attributes.get(key) {
            Some(v) => {
                self.original.insert(key.to_string(), v.clone());
            }
            None => {
                self.original.shift_remove(key);
            }
        }
    }

    /// Raw values that differ from the original, in attribute order.
    pub fn get_dirty(&self, casts: &AttributeCasts) -> IndexMap<String, Value> {
        self.attributes
            .iter()
            .filter(|(k, v)| casts.is_dirty_value(k, v, self.original.get(k.as_str())))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Have any of `keys` (or any attribute, when `keys` is empty) changed
    /// since the last sync?
    pub fn is_dirty(&self, keys: &[&str], casts: &AttributeCasts) -> bool {
        let dirty = self.get_dirty(casts);
        if keys.is_empty() {
            !dirty.is_empty()
        } else {
            keys.iter().any(|k| dirty.contains_key(*k))
        }
    }

    pub fn is_clean(&self, keys: &[&str], casts: &AttributeCasts) -> bool {
        !self.is_dirty(keys, casts)
    }

    /// Record the current dirty set as the last change set.
    pub fn sync_changes(&mut self, casts: &AttributeCasts) {
        self.changes = self.get_dirty(casts);
    }

    /// Was any of `keys` (or anything, when empty) part of the last change set?
    pub fn was_changed(&self, keys: &[&str]) -> bool {
        if keys.is_empty() {
            !self.changes.is_empty()
        } else {
            keys.iter().any(|k| self.changes.contains_key(*k))
        }
    }

    pub fn get_changes(&self) -> &IndexMap<String, Value> {
        &self.changes
    }
}
