//! Pivot synthesis for many-to-many relations.
//!
//! Many-to-many queries select intermediate-table columns as
//! `pivot_<column>`. After each batch is hydrated, every prefixed key is
//! moved out of the related entity into a fresh pivot record, which is then
//! attached to the related entity under the relation's accessor.

use std::sync::Arc;

use relmodel_core::{CREATED_AT, Entity, EntityDef, Loaded, Result, UPDATED_AT};

/// Prefix marking intermediate-table columns in many-to-many results.
pub const PIVOT_PREFIX: &str = "pivot_";

/// Entity type name of plain pivot records.
pub const PIVOT_ENTITY: &str = "Pivot";
/// Entity type name of polymorphic pivot records.
pub const MORPH_PIVOT_ENTITY: &str = "MorphPivot";

/// Definition for pivot records of intermediate table `table`.
///
/// Pivot rows have no incrementing key of their own. With `timestamps`
/// the pivot's `created_at`/`updated_at` are treated as dates.
#[allow(clippy::result_large_err)]
pub fn pivot_def(
    table: &str,
    morph: bool,
    timestamps: bool,
    date_format: &str,
) -> Result<Arc<EntityDef>> {
    let name = if morph { MORPH_PIVOT_ENTITY } else { PIVOT_ENTITY };
    let mut builder = EntityDef::builder(name, table)
        .incrementing(false)
        .timestamps(false);
    if timestamps {
        builder = builder.date(CREATED_AT).date(UPDATED_AT);
    }
    let mut def = builder.build()?;
    def.set_date_format(date_format);
    Ok(Arc::new(def))
}

/// Move every `pivot_` attribute of `entity` into a pivot record attached
/// under `accessor`. Returns the number of attributes moved.
pub fn synthesize(entity: &mut Entity, def: &Arc<EntityDef>, accessor: &str) -> usize {
    let keys: Vec<String> = entity
        .attributes()
        .keys()
        .filter(|k| k.starts_with(PIVOT_PREFIX))
        .map(str::to_string)
        .collect();

    let attributes = entity.attributes_mut();
    let mut pairs = Vec::with_capacity(keys.len());
    for key in &keys {
        if let Some(value) = attributes.remove(key) {
            attributes.sync_original_attribute(key);
            pairs.push((key[PIVOT_PREFIX.len()..].to_string(), value));
        }
    }
    let moved = pairs.len();
    tracing::trace!(
        related = entity.name(),
        accessor,
        moved,
        "Synthesized pivot record"
    );
    entity.set_relation(accessor, Loaded::one(Some(def.new_instance(pairs))));
    moved
}

/// The pivot record attached to `entity` under `accessor`, if any.
pub fn pivot_of<'e>(entity: &'e Entity, accessor: &str) -> Option<&'e Entity> {
    entity.related_one(accessor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmodel_core::Value;

    #[test]
    fn strips_prefixed_columns_into_pivot() {
        let role = Arc::new(EntityDef::builder("Role", "roles").build().unwrap());
        let mut entity = role.new_instance(vec![
            ("id".to_string(), Value::Int(10)),
            ("name".to_string(), Value::from("admin")),
            ("pivot_user_id".to_string(), Value::Int(1)),
            ("pivot_role_id".to_string(), Value::Int(10)),
        ]);
        let def = pivot_def("role_user", false, false, "%Y-%m-%d %H:%M:%S").unwrap();

        assert_eq!(synthesize(&mut entity, &def, "pivot"), 2);
        assert!(!entity.attributes().contains("pivot_user_id"));
        assert!(entity.is_clean(&[]));
        let pivot = pivot_of(&entity, "pivot").unwrap();
        assert_eq!(pivot.name(), "Pivot");
        assert_eq!(pivot.table(), "role_user");
        assert_eq!(pivot.get_raw("user_id"), &Value::Int(1));
        assert_eq!(pivot.get_raw("role_id"), &Value::Int(10));
        assert!(pivot.exists());
    }

    #[test]
    fn timestamps_are_dates() {
        let def = pivot_def("taggables", true, true, "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(def.name(), "MorphPivot");
        assert!(def.casts().is_date(CREATED_AT));
        assert!(def.casts().is_date(UPDATED_AT));
    }
}
