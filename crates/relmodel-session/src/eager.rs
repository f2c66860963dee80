//! Eager-load plans.
//!
//! An [`EagerPlan`] is an ordered map from relation path to an optional
//! constraint. Dotted paths (`posts.comments.author`) expand into an
//! [`IncludePath`] tree: every prefix is loaded for the whole parent set
//! before its children are loaded for the combined results.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use relmodel_core::{Error, Result};
use relmodel_query::Select;

use crate::relation::Constraint;

/// Which relations to load, with optional per-relation query constraints.
///
/// ```ignore
/// let plan = EagerPlan::new()
///     .with("author")
///     .with_constraint("comments", |q| q.where_eq("comments.approved", true))
///     .with("comments.author");
/// session.load(&mut posts, &plan)?;
/// ```
#[derive(Clone, Default)]
pub struct EagerPlan {
    entries: IndexMap<String, Option<Constraint>>,
}

impl fmt::Debug for EagerPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.entries
                    .iter()
                    .map(|(path, c)| (path, if c.is_some() { "constrained" } else { "-" })),
            )
            .finish()
    }
}

impl EagerPlan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path`. Re-adding a path keeps its existing constraint.
    #[must_use]
    pub fn with(mut self, path: impl Into<String>) -> Self {
        self.entries.entry(path.into()).or_insert(None);
        self
    }

    /// Load `path`, refining the query for its last segment.
    #[must_use]
    pub fn with_constraint<F>(mut self, path: impl Into<String>, constraint: F) -> Self
    where
        F: Fn(Select) -> Select + Send + Sync + 'static,
    {
        self.entries
            .insert(path.into(), Some(Arc::new(constraint) as Constraint));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Build the include tree.
    ///
    /// Fails with a malformed-plan error on an empty path or an empty
    /// segment (`"posts..author"`).
    #[allow(clippy::result_large_err)]
    pub fn expand(&self) -> Result<Vec<IncludePath>> {
        let mut roots: Vec<IncludePath> = Vec::new();
        for (path, constraint) in &self.entries {
            let segments: Vec<&str> = path.split('.').map(str::trim).collect();
            if segments.iter().any(|s| s.is_empty()) {
                return Err(Error::malformed_plan(format!(
                    "eager load path `{path}` has an empty segment"
                )));
            }
            insert_path(&mut roots, &segments, constraint.clone());
        }
        Ok(roots)
    }
}

fn insert_path(level: &mut Vec<IncludePath>, segments: &[&str], constraint: Option<Constraint>) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    let index = match level.iter().position(|n| n.relation == *first) {
        Some(index) => index,
        None => {
            level.push(IncludePath::new(*first));
            level.len() - 1
        }
    };
    let node = &mut level[index];
    if rest.is_empty() {
        if constraint.is_some() {
            node.constraint = constraint;
        }
    } else {
        insert_path(&mut node.nested, rest, constraint);
    }
}

impl From<&EagerPlan> for EagerPlan {
    fn from(plan: &EagerPlan) -> Self {
        plan.clone()
    }
}

impl From<&str> for EagerPlan {
    fn from(path: &str) -> Self {
        EagerPlan::new().with(path)
    }
}

impl From<String> for EagerPlan {
    fn from(path: String) -> Self {
        EagerPlan::new().with(path)
    }
}

impl From<&[&str]> for EagerPlan {
    fn from(paths: &[&str]) -> Self {
        paths.iter().fold(EagerPlan::new(), |plan, p| plan.with(*p))
    }
}

impl<const N: usize> From<[&str; N]> for EagerPlan {
    fn from(paths: [&str; N]) -> Self {
        EagerPlan::from(&paths[..])
    }
}

impl From<Vec<&str>> for EagerPlan {
    fn from(paths: Vec<&str>) -> Self {
        EagerPlan::from(&paths[..])
    }
}

/// One node of an expanded plan.
#[derive(Clone)]
pub struct IncludePath {
    pub relation: String,
    pub constraint: Option<Constraint>,
    pub nested: Vec<IncludePath>,
}

impl fmt::Debug for IncludePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncludePath")
            .field("relation", &self.relation)
            .field("constrained", &self.constraint.is_some())
            .field("nested", &self.nested)
            .finish()
    }
}

impl IncludePath {
    #[must_use]
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            constraint: None,
            nested: Vec::new(),
        }
    }

    #[must_use]
    pub fn nest(mut self, path: IncludePath) -> Self {
        self.nested.push(path);
        self
    }

    /// Deepest nesting below and including this node.
    pub fn depth(&self) -> usize {
        1 + self.nested.iter().map(IncludePath::depth).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_plan_expands_to_nothing() {
        let plan = EagerPlan::new();
        assert!(plan.is_empty());
        assert!(plan.expand().unwrap().is_empty());
    }

    #[test]
    fn dotted_paths_share_prefixes() {
        let plan = EagerPlan::from(["posts.comments.author", "posts.tags", "profile"]);
        let roots = plan.expand().unwrap();
        assert_eq!(roots.len(), 2);

        let posts = &roots[0];
        assert_eq!(posts.relation, "posts");
        assert_eq!(posts.depth(), 3);
        let nested: Vec<&str> = posts.nested.iter().map(|n| n.relation.as_str()).collect();
        assert_eq!(nested, vec!["comments", "tags"]);
        assert_eq!(posts.nested[0].nested[0].relation, "author");
        assert_eq!(roots[1].relation, "profile");
    }

    #[test]
    fn constraint_attaches_to_last_segment() {
        let plan = EagerPlan::new()
            .with("posts")
            .with_constraint("posts.comments", |q| q.limit(5));
        let roots = plan.expand().unwrap();
        assert!(roots[0].constraint.is_none());
        assert!(roots[0].nested[0].constraint.is_some());
    }

    #[test]
    fn plain_with_keeps_existing_constraint() {
        let plan = EagerPlan::new()
            .with_constraint("posts", |q| q.limit(1))
            .with("posts");
        assert_eq!(plan.len(), 1);
        assert!(plan.expand().unwrap()[0].constraint.is_some());
    }

    #[test]
    fn empty_segments_are_malformed() {
        for path in ["", "posts..author", "posts."] {
            let err = EagerPlan::from(path).expand().unwrap_err();
            assert!(matches!(err, Error::MalformedPlan(_)), "{path}");
        }
    }
}
