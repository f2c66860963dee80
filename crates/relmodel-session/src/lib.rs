//! Relations, eager loading and sessions for RelModel.
//!
//! `relmodel-session` is the **hydration layer**. It turns declared
//! associations into constrained queries and matches the results back onto
//! already-loaded parents.
//!
//! # Role In The Architecture
//!
//! - **Registry**: entity types, relation factories and the morph map.
//! - **Relation descriptors**: one per association kind, stateless.
//! - **Eager loading**: one query per relation per nesting level, however
//!   many parents are loaded.
//! - **Pivot synthesis**: intermediate-table columns become pivot records.
//! - **N+1 detection**: repeated lazy loads of one relation are reported.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = Registry::for_connection(&conn);
//! registry.register(EntityDef::builder("User", "users").build()?);
//! registry.register(EntityDef::builder("Post", "posts").build()?);
//! registry.define("User", "posts", |r: &Relate<'_>| r.has_many("Post"));
//!
//! let session = Session::new(conn, registry);
//! let users = session.query("User")?.with("posts").has("posts")?.get()?;
//! ```

pub mod config;
pub mod eager;
pub mod existence;
pub mod n1_detection;
pub mod pivot;
pub mod query;
pub mod registry;
pub mod relation;

pub use config::{DEFAULT_PIVOT_ACCESSOR, SessionConfig};
pub use eager::{EagerPlan, IncludePath};
pub use n1_detection::{CallSite, DEFAULT_N1_THRESHOLD, N1DetectionScope, N1QueryTracker, N1Stats};
pub use pivot::{PIVOT_PREFIX, pivot_of};
pub use query::EntityQuery;
pub use registry::{Registry, Relate, RelationOutcome};
pub use relation::{
    BatchLoad, BelongsTo, BelongsToMany, Constraint, Context, DefaultModel, Dictionary,
    HasOneOrMany, HasThrough, MorphTo, MorphType, Relation, RelationKind, THROUGH_KEY,
};

use std::sync::Arc;

use indexmap::IndexMap;
use relmodel_core::{Entity, EntityDef, Error, Loaded, Result, Value};
use relmodel_query::{AliasCounter, Connection, Select};

/// Entry point for loading entities and their relations.
///
/// A session owns a connection, shares an immutable [`Registry`], and owns
/// the self-join alias counter for the queries it builds.
pub struct Session<C: Connection> {
    connection: C,
    registry: Arc<Registry>,
    aliases: AliasCounter,
    config: SessionConfig,
    n1_tracker: Option<N1QueryTracker>,
}

impl<C: Connection> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("dialect", &self.connection.dialect())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("n1_tracker", &self.n1_tracker)
            .finish_non_exhaustive()
    }
}

impl<C: Connection> Session<C> {
    /// Create a session; the stored date format comes from the connection.
    pub fn new(connection: C, registry: impl Into<Arc<Registry>>) -> Self {
        let config = SessionConfig::default().date_format(connection.date_format());
        Self::with_config(connection, registry, config)
    }

    pub fn with_config(
        connection: C,
        registry: impl Into<Arc<Registry>>,
        config: SessionConfig,
    ) -> Self {
        let n1_tracker = config
            .n1_threshold
            .map(|threshold| N1QueryTracker::new().with_threshold(threshold));
        Self {
            connection,
            registry: registry.into(),
            aliases: AliasCounter::new(),
            config,
            n1_tracker,
        }
    }

    /// Share an alias counter with other sessions serving one logical request.
    #[must_use]
    pub fn with_alias_counter(mut self, aliases: AliasCounter) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn aliases(&self) -> &AliasCounter {
        &self.aliases
    }

    /// Per-pass context handed to relation descriptors.
    pub fn context(&self) -> Context<'_> {
        Context {
            conn: &self.connection,
            registry: &self.registry,
            aliases: &self.aliases,
            pivot_accessor: &self.config.pivot_accessor,
            date_format: &self.config.date_format,
        }
    }

    /// Start a query over entity type `entity`.
    #[allow(clippy::result_large_err)]
    pub fn query(&self, entity: &str) -> Result<EntityQuery<'_, C>> {
        Ok(EntityQuery::new(self, self.registry.entity(entity)?))
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    #[allow(clippy::result_large_err)]
    pub fn find(&self, entity: &str, id: impl Into<Value>) -> Result<Option<Entity>> {
        self.query(entity)?.find(id)
    }

    /// Like [`find`](Self::find), but a missing row is a `NotFound` error.
    #[allow(clippy::result_large_err)]
    pub fn find_or_fail(&self, entity: &str, id: impl Into<Value>) -> Result<Entity> {
        self.query(entity)?.find_or_fail(id)
    }

    /// Run an arbitrary query and hydrate its rows as `def` entities.
    #[allow(clippy::result_large_err)]
    pub fn hydrate(&self, def: &Arc<EntityDef>, query: &Select) -> Result<Vec<Entity>> {
        let rows = query.get(&self.connection)?;
        tracing::debug!(entity = def.name(), row_count = rows.len(), "Hydrating rows");
        Ok(rows.into_iter().map(|row| def.hydrate_row(row)).collect())
    }

    // ========================================================================
    // Eager Loading
    // ========================================================================

    /// Eager load `plan` onto already-loaded `entities`.
    ///
    /// Issues one query per relation per nesting level (plus one per extra
    /// discriminator type for polymorphic relations), independent of how
    /// many entities are passed. An empty plan or entity set is a no-op.
    ///
    /// ```ignore
    /// session.load(&mut posts, ["author", "comments.author"])?;
    /// ```
    #[tracing::instrument(level = "debug", skip_all, fields(parent_count = entities.len()))]
    #[allow(clippy::result_large_err)]
    pub fn load(&self, entities: &mut [Entity], plan: impl Into<EagerPlan>) -> Result<()> {
        self.load_plan(entities, &plan.into(), false)
    }

    /// Like [`load`](Self::load), but skip relations already loaded on an
    /// entity. Nested paths still descend into previously loaded relations.
    #[tracing::instrument(level = "debug", skip_all, fields(parent_count = entities.len()))]
    #[allow(clippy::result_large_err)]
    pub fn load_missing(&self, entities: &mut [Entity], plan: impl Into<EagerPlan>) -> Result<()> {
        self.load_plan(entities, &plan.into(), true)
    }

    #[allow(clippy::result_large_err)]
    fn load_plan(&self, entities: &mut [Entity], plan: &EagerPlan, missing_only: bool) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }
        let roots = plan.expand()?;
        if entities.is_empty() {
            return Ok(());
        }
        tracing::info!(
            parent_count = entities.len(),
            paths = plan.len(),
            missing_only,
            "Eager loading plan"
        );
        let ctx = self.context();
        for node in &roots {
            let parents: Vec<&mut Entity> = entities.iter_mut().collect();
            load_node(&ctx, parents, node, missing_only)?;
        }
        Ok(())
    }

    // ========================================================================
    // Lazy Loading
    // ========================================================================

    /// Resolve relation `name` for one entity, caching the result on it.
    ///
    /// A relation already loaded on the entity is returned as is. Each
    /// actual lazy load counts towards N+1 detection.
    #[track_caller]
    #[allow(clippy::result_large_err)]
    pub fn load_relation<'e>(&mut self, entity: &'e mut Entity, name: &str) -> Result<&'e Loaded> {
        if !entity.relation_loaded(name) {
            if self.config.prevent_lazy_loading {
                return Err(Error::malformed_plan(format!(
                    "lazy loading `{name}` on `{}` is disabled; eager load it instead",
                    entity.name()
                )));
            }
            let relation = self.registry.relation(entity.name(), name)?;
            if let Some(tracker) = &mut self.n1_tracker {
                tracker.record_load(entity.name(), name);
            }
            tracing::debug!(entity = entity.name(), relation = name, "Lazy loading relation");
            let loaded = relation.get_results(&self.context(), entity, None)?;
            entity.set_relation(name, loaded);
        }
        let entity: &'e Entity = entity;
        entity
            .relation(name)
            .ok_or_else(|| Error::invalid_relation(entity.name(), name))
    }

    /// Lazily resolve a to-one relation that must be present.
    #[track_caller]
    #[allow(clippy::result_large_err)]
    pub fn related_one_or_fail<'e>(&mut self, entity: &'e mut Entity, name: &str) -> Result<&'e Entity> {
        let parent = entity.name().to_string();
        let key = entity.key().to_loose_string();
        match self.load_relation(entity, name)?.as_one() {
            Some(related) => Ok(related),
            None => Err(Error::not_found(
                format!("{parent}.{name}"),
                key.into_iter().collect(),
            )),
        }
    }

    // ========================================================================
    // N+1 Detection
    // ========================================================================

    pub fn enable_n1_detection(&mut self, threshold: usize) {
        self.n1_tracker = Some(N1QueryTracker::new().with_threshold(threshold));
    }

    pub fn disable_n1_detection(&mut self) {
        self.n1_tracker = None;
    }

    #[must_use]
    pub fn n1_detection_enabled(&self) -> bool {
        self.n1_tracker.is_some()
    }

    pub fn n1_tracker(&self) -> Option<&N1QueryTracker> {
        self.n1_tracker.as_ref()
    }

    #[must_use]
    pub fn n1_stats(&self) -> Option<N1Stats> {
        self.n1_tracker.as_ref().map(N1QueryTracker::stats)
    }

    /// Forget lazy-load counts, e.g. at the start of a new request.
    pub fn reset_n1_tracking(&mut self) {
        if let Some(tracker) = &mut self.n1_tracker {
            tracker.reset();
        }
    }
}

/// Load one plan node for `parents`, then its children for the combined
/// results. Parents are grouped by entity type, since a polymorphic
/// relation can yield several types at one level.
#[allow(clippy::result_large_err)]
fn load_node(
    ctx: &Context<'_>,
    parents: Vec<&mut Entity>,
    node: &IncludePath,
    missing_only: bool,
) -> Result<()> {
    let mut groups: IndexMap<String, Vec<&mut Entity>> = IndexMap::new();
    for parent in parents {
        groups.entry(parent.name().to_string()).or_default().push(parent);
    }

    for (entity, mut group) in groups {
        let mut pending: Vec<&mut Entity> = group
            .iter_mut()
            .filter(|p| !missing_only || !p.relation_loaded(&node.relation))
            .map(|p| &mut **p)
            .collect();
        if !pending.is_empty() {
            let relation = ctx.registry.relation(&entity, &node.relation)?;
            relation.eager_load(ctx, &mut pending, &node.relation, node.constraint.as_ref())?;
        }
        drop(pending);

        for nested in &node.nested {
            let children: Vec<&mut Entity> = group
                .iter_mut()
                .filter_map(|p| p.relation_mut(&node.relation))
                .flat_map(Loaded::entities_mut)
                .collect();
            if children.is_empty() {
                continue;
            }
            load_node(ctx, children, nested, missing_only)?;
        }
    }
    Ok(())
}
