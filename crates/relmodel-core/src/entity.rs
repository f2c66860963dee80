//! Hydrated entity instances.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::Result;
use crate::attributes::AttributeStore;
use crate::cast::Cast;
use crate::error::{EncodingError, Error};
use crate::model::EntityDef;
use crate::value::Value;

/// A loaded relation value.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded {
    /// To-one relation; `None` when nothing matched and no default applies
    One(Option<Box<Entity>>),
    /// To-many relation; empty when nothing matched
    Many(Vec<Entity>),
}

impl Loaded {
    pub fn one(entity: Option<Entity>) -> Self {
        Loaded::One(entity.map(Box::new))
    }

    pub fn as_one(&self) -> Option<&Entity> {
        match self {
            Loaded::One(e) => e.as_deref(),
            Loaded::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> &[Entity] {
        match self {
            Loaded::Many(items) => items,
            Loaded::One(_) => &[],
        }
    }

    /// All entities held by this relation, regardless of cardinality.
    pub fn entities(&self) -> Vec<&Entity> {
        match self {
            Loaded::One(e) => e.as_deref().into_iter().collect(),
            Loaded::Many(items) => items.iter().collect(),
        }
    }

    pub fn entities_mut(&mut self) -> Vec<&mut Entity> {
        match self {
            Loaded::One(e) => e.as_deref_mut().into_iter().collect(),
            Loaded::Many(items) => items.iter_mut().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Loaded::One(e) => usize::from(e.is_some()),
            Loaded::Many(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An in-memory record hydrated from one result row.
///
/// The entity exclusively owns its attribute store. Loaded relations are
/// owned copies; the entity never manages the lifecycle of related rows in
/// storage.
#[derive(Debug, Clone)]
pub struct Entity {
    def: Arc<EntityDef>,
    attributes: AttributeStore,
    relations: IndexMap<String, Loaded>,
    exists: bool,
    hidden: Vec<String>,
    visible: Vec<String>,
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.def, &other.def)
            && self.exists == other.exists
            && self.attributes == other.attributes
            && self.relations == other.relations
    }
}

impl Entity {
    pub(crate) fn from_store(def: Arc<EntityDef>, attributes: AttributeStore, exists: bool) -> Self {
        let hidden = def.hidden().to_vec();
        let visible = def.visible().to_vec();
        Self {
            def,
            attributes,
            relations: IndexMap::new(),
            exists,
            hidden,
            visible,
        }
    }

    pub fn def(&self) -> &Arc<EntityDef> {
        &self.def
    }

    /// Entity type name.
    pub fn name(&self) -> &str {
        self.def.name()
    }

    pub fn table(&self) -> &str {
        self.def.table()
    }

    pub fn key_name(&self) -> &str {
        self.def.primary_key()
    }

    /// Raw primary key value, NULL when unset.
    pub fn key(&self) -> &Value {
        self.attributes
            .get_raw(self.def.primary_key())
            .unwrap_or(&Value::Null)
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn set_exists(&mut self, exists: bool) {
        self.exists = exists;
    }

    pub fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeStore {
        &mut self.attributes
    }

    /// Read an attribute through its cast.
    #[allow(clippy::result_large_err)]
    pub fn get(&self, key: &str) -> Result<Value> {
        self.attributes.get(key, self.def.casts())
    }

    /// Raw stored value, NULL when missing.
    pub fn get_raw(&self, key: &str) -> &Value {
        self.attributes.get_raw(key).unwrap_or(&Value::Null)
    }

    /// Assign an attribute through its cast.
    #[allow(clippy::result_large_err)]
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.attributes.set(key, value.into(), self.def.casts())
    }

    pub fn set_raw(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.set_raw(key, value.into());
    }

    /// Assign several attributes through their casts.
    #[allow(clippy::result_large_err)]
    pub fn fill<K, V, I>(&mut self, attributes: I) -> Result<()>
    where
        K: AsRef<str>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in attributes {
            self.set(key.as_ref(), value)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Change tracking
    // ------------------------------------------------------------------

    pub fn is_dirty(&self, keys: &[&str]) -> bool {
        self.attributes.is_dirty(keys, self.def.casts())
    }

    pub fn is_clean(&self, keys: &[&str]) -> bool {
        self.attributes.is_clean(keys, self.def.casts())
    }

    pub fn get_dirty(&self) -> IndexMap<String, Value> {
        self.attributes.get_dirty(self.def.casts())
    }

    #[allow(clippy::result_large_err)]
    pub fn get_original(&self, key: &str) -> Result<Value> {
        self.attributes.get_original(key, self.def.casts())
    }

    pub fn sync_original(&mut self) {
        self.attributes.sync_original();
    }

    pub fn sync_changes(&mut self) {
        self.attributes.sync_changes(self.def.casts());
    }

    pub fn was_changed(&self, keys: &[&str]) -> bool {
        self.attributes.was_changed(keys)
    }

    // ------------------------------------------------------------------
    // Relations
    // ------------------------------------------------------------------

    pub fn relation(&self, name: &str) -> Option<&Loaded> {
        self.relations.get(name)
    }

    pub fn relation_mut(&mut self, name: &str) -> Option<&mut Loaded> {
        self.relations.get_mut(name)
    }

    pub fn relation_loaded(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    pub fn set_relation(&mut self, name: impl Into<String>, value: Loaded) {
        self.relations.insert(name.into(), value);
    }

    pub fn unset_relation(&mut self, name: &str) -> Option<Loaded> {
        self.relations.shift_remove(name)
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &Loaded)> {
        self.relations.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The single entity loaded under `name`, if any.
    pub fn related_one(&self, name: &str) -> Option<&Entity> {
        self.relations.get(name).and_then(Loaded::as_one)
    }

    /// The entities loaded under `name`; empty when not loaded.
    pub fn related_many(&self, name: &str) -> &[Entity] {
        self.relations
            .get(name)
            .map(Loaded::as_many)
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    pub fn make_hidden<I, S>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            let key = key.into();
            self.visible.retain(|v| *v != key);
            if !self.hidden.contains(&key) {
                self.hidden.push(key);
            }
        }
        self
    }

    pub fn make_visible<I, S>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            let key = key.into();
            self.hidden.retain(|h| *h != key);
            if !self.visible.is_empty() && !self.visible.contains(&key) {
                self.visible.push(key);
            }
        }
        self
    }

    fn is_visible(&self, key: &str) -> bool {
        filter_visible(key, &self.hidden, &self.visible)
    }

    /// Visible attributes with casts applied and appended accessors added.
    #[allow(clippy::result_large_err)]
    pub fn attributes_to_array(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let casts = self.def.casts();
        let mut out = serde_json::Map::new();

        for (key, raw) in self.attributes.iter_raw() {
            if !self.is_visible(key) {
                continue;
            }
            let presented = casts.present(key, raw)?;
            let json = match (casts.cast_for(key).and_then(Cast::date_format), &presented) {
                (Some(fmt), Value::DateTime(dt)) => {
                    serde_json::Value::String(dt.format(fmt).to_string())
                }
                _ => presented.to_json(),
            };
            out.insert(key.to_string(), json);
        }

        for (key, accessor) in self.def.appends() {
            if !self.is_visible(key) {
                continue;
            }
            out.insert(key.to_string(), accessor(self)?.to_json());
        }

        Ok(out)
    }

    /// Visible loaded relations, serialized recursively.
    #[allow(clippy::result_large_err)]
    pub fn relations_to_array(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut out = serde_json::Map::new();
        for (name, loaded) in &self.relations {
            if !self.is_visible(name) {
                continue;
            }
            let json = match loaded {
                Loaded::One(None) => serde_json::Value::Null,
                Loaded::One(Some(entity)) => serde_json::Value::Object(entity.to_array()?),
                Loaded::Many(items) => serde_json::Value::Array(
                    items
                        .iter()
                        .map(|e| e.to_array().map(serde_json::Value::Object))
                        .collect::<Result<Vec<_>>>()?,
                ),
            };
            out.insert(name.clone(), json);
        }
        Ok(out)
    }

    /// Attributes followed by relations.
    #[allow(clippy::result_large_err)]
    pub fn to_array(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut out = self.attributes_to_array()?;
        out.extend(self.relations_to_array()?);
        Ok(out)
    }

    #[allow(clippy::result_large_err)]
    pub fn to_json(&self) -> Result<String> {
        let array = self.to_array()?;
        serde_json::to_string(&serde_json::Value::Object(array)).map_err(|e| {
            Error::Encoding(EncodingError {
                attribute: self.name().to_string(),
                message: e.to_string(),
                source: Some(Box::new(e)),
            })
        })
    }
}

/// Should `key` appear in serialized output?
///
/// A non-empty `visible` list acts as an allow-list; `hidden` always wins.
pub fn filter_visible(key: &str, hidden: &[String], visible: &[String]) -> bool {
    if !visible.is_empty() && !visible.iter().any(|v| v == key) {
        return false;
    }
    !hidden.iter().any(|h| h == key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_def() -> Arc<EntityDef> {
        Arc::new(
            EntityDef::builder("User", "users")
                .cast("is_admin", "bool")
                .cast("options", "json")
                .cast("born_on", "date:%d/%m/%Y")
                .hidden(["password"])
                .append("display_name", |e: &Entity| {
                    let name = e.get("name")?;
                    Ok(Value::Text(format!(
                        "@{}",
                        name.as_str().unwrap_or_default()
                    )))
                })
                .build()
                .unwrap(),
        )
    }

    fn user() -> Entity {
        user_def().new_instance([
            ("id".to_string(), Value::Int(1)),
            ("name".to_string(), Value::from("ada")),
            ("password".to_string(), Value::from("secret")),
            ("is_admin".to_string(), Value::Int(1)),
            ("options".to_string(), Value::from(r#"{"theme":"dark"}"#)),
            ("born_on".to_string(), Value::from("1815-12-10 00:00:00")),
            ("created_at".to_string(), Value::from("2024-01-02 03:04:05")),
        ])
    }

    #[test]
    fn filter_visible_rules() {
        let hidden = vec!["password".to_string()];
        assert!(filter_visible("name", &hidden, &[]));
        assert!(!filter_visible("password", &hidden, &[]));
        let visible = vec!["name".to_string(), "password".to_string()];
        assert!(filter_visible("name", &hidden, &visible));
        assert!(!filter_visible("password", &hidden, &visible));
        assert!(!filter_visible("email", &[], &visible));
    }

    #[test]
    fn attributes_to_array_applies_casts_and_visibility() {
        let array = user().attributes_to_array().unwrap();
        assert_eq!(array.get("id"), Some(&json!(1)));
        assert_eq!(array.get("is_admin"), Some(&json!(true)));
        assert_eq!(array.get("options"), Some(&json!({"theme": "dark"})));
        assert_eq!(array.get("born_on"), Some(&json!("10/12/1815")));
        assert_eq!(
            array.get("created_at"),
            Some(&json!("2024-01-02T03:04:05.000000Z"))
        );
        assert_eq!(array.get("display_name"), Some(&json!("@ada")));
        assert!(!array.contains_key("password"));
    }

    #[test]
    fn make_visible_and_hidden_per_instance() {
        let mut entity = user();
        entity.make_visible(["password"]).make_hidden(["options"]);
        let array = entity.attributes_to_array().unwrap();
        assert!(array.contains_key("password"));
        assert!(!array.contains_key("options"));
    }

    #[test]
    fn relations_serialize_recursively() {
        let def = user_def();
        let mut parent = user();
        let friend = def.new_instance([("id".to_string(), Value::Int(2))]);
        parent.set_relation("friends", Loaded::Many(vec![friend]));
        parent.set_relation("manager", Loaded::one(None));

        let rel = parent.relations_to_array().unwrap();
        assert_eq!(rel.get("manager"), Some(&json!(null)));
        assert_eq!(rel["friends"][0]["id"], json!(2));

        let text = parent.to_json().unwrap();
        assert!(text.starts_with("{\"id\":1"));
        assert!(text.contains("\"friends\":[{"));
    }

    #[test]
    fn relation_accessors() {
        let mut parent = user();
        assert!(!parent.relation_loaded("posts"));
        assert!(parent.related_many("posts").is_empty());
        parent.set_relation("posts", Loaded::Many(Vec::new()));
        assert!(parent.relation_loaded("posts"));
        assert!(parent.related_one("posts").is_none());
        assert!(parent.unset_relation("posts").is_some());
    }

    #[test]
    fn key_reads_primary_key() {
        let entity = user();
        assert_eq!(entity.key(), &Value::Int(1));
        assert_eq!(user_def().make().key(), &Value::Null);
    }
}
