//! N+1 detection for lazy relation loads.
//!
//! Every lazy single-parent resolution goes through
//! [`Session::load_relation`](crate::Session::load_relation), which records
//! the `(entity type, relation)` pair here. Reaching the threshold for one
//! pair logs a warning suggesting eager loading instead:
//!
//! ```ignore
//! // N queries:
//! for post in &mut posts {
//!     session.load_relation(post, "author")?;
//! }
//!
//! // One query:
//! session.load(&mut posts, &EagerPlan::from("author"))?;
//! ```

use std::collections::HashMap;
use std::time::Instant;

/// Default lazy loads per relation before warning.
pub const DEFAULT_N1_THRESHOLD: usize = 3;

const TARGET: &str = "relmodel::n1";

/// Counts lazy loads per `(entity type, relation)`.
#[derive(Debug)]
pub struct N1QueryTracker {
    counts: HashMap<(String, String), usize>,
    threshold: usize,
    enabled: bool,
    call_sites: Vec<CallSite>,
}

impl Default for N1QueryTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a lazy load was triggered.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub entity: String,
    pub relation: String,
    pub file: &'static str,
    pub line: u32,
    pub at: Instant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct N1Stats {
    /// Lazy loads recorded
    pub total_loads: usize,
    /// Distinct `(entity type, relation)` pairs loaded lazily
    pub relations_loaded: usize,
    /// Pairs at or over the threshold
    pub potential_n1: usize,
}

impl N1QueryTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            threshold: DEFAULT_N1_THRESHOLD,
            enabled: true,
            call_sites: Vec::new(),
        }
    }

    /// Tracker configured from a session threshold; `None` disables it.
    #[must_use]
    pub fn from_threshold(threshold: Option<usize>) -> Self {
        match threshold {
            Some(threshold) => Self::new().with_threshold(threshold),
            None => {
                let mut tracker = Self::new();
                tracker.disable();
                tracker
            }
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Record one lazy load. Warns once per pair, when its count first
    /// reaches the threshold.
    #[track_caller]
    pub fn record_load(&mut self, entity: &str, relation: &str) {
        if !self.enabled {
            return;
        }

        let count = self
            .counts
            .entry((entity.to_string(), relation.to_string()))
            .or_insert(0);
        *count += 1;
        let count = *count;

        let caller = std::panic::Location::caller();
        self.call_sites.push(CallSite {
            entity: entity.to_string(),
            relation: relation.to_string(),
            file: caller.file(),
            line: caller.line(),
            at: Instant::now(),
        });

        if count == self.threshold {
            self.emit_warning(entity, relation, count);
        }
    }

    fn emit_warning(&self, entity: &str, relation: &str, count: usize) {
        tracing::warn!(
            target: TARGET,
            entity,
            relation,
            queries = count,
            threshold = self.threshold,
            "Possible N+1 query pattern; eager load this relation instead"
        );

        for (i, site) in self
            .call_sites
            .iter()
            .filter(|s| s.entity == entity && s.relation == relation)
            .take(5)
            .enumerate()
        {
            tracing::debug!(target: TARGET, index = i, file = site.file, line = site.line, "Lazy load site");
        }
    }

    /// Forget all counts and call sites.
    pub fn reset(&mut self) {
        self.counts.clear();
        self.call_sites.clear();
    }

    #[must_use]
    pub fn count_for(&self, entity: &str, relation: &str) -> usize {
        self.counts
            .get(&(entity.to_string(), relation.to_string()))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn stats(&self) -> N1Stats {
        N1Stats {
            total_loads: self.counts.values().sum(),
            relations_loaded: self.counts.len(),
            potential_n1: self
                .counts
                .values()
                .filter(|&&c| c >= self.threshold)
                .count(),
        }
    }

    #[must_use]
    pub fn call_sites(&self) -> &[CallSite] {
        &self.call_sites
    }
}

/// Summarizes N+1 findings between two points of a session's life.
///
/// ```ignore
/// let scope = session.n1_tracker().map(N1DetectionScope::from_tracker);
/// // ... lazy loads ...
/// if let (Some(scope), Some(stats)) = (scope, session.n1_stats()) {
///     scope.log_summary(&stats);
/// }
/// ```
#[derive(Debug)]
pub struct N1DetectionScope {
    initial: N1Stats,
    threshold: usize,
    verbose: bool,
}

impl N1DetectionScope {
    #[must_use]
    pub fn new(initial: N1Stats, threshold: usize) -> Self {
        tracing::debug!(target: TARGET, threshold, "N+1 detection scope started");
        Self {
            initial,
            threshold,
            verbose: false,
        }
    }

    #[must_use]
    pub fn from_tracker(tracker: &N1QueryTracker) -> Self {
        Self::new(tracker.stats(), tracker.threshold())
    }

    /// Log the summary at `info` even when nothing was found.
    #[must_use]
    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    /// Differences between `current` and the stats captured at creation.
    #[must_use]
    pub fn delta(&self, current: &N1Stats) -> N1Stats {
        N1Stats {
            total_loads: current.total_loads.saturating_sub(self.initial.total_loads),
            relations_loaded: current
                .relations_loaded
                .saturating_sub(self.initial.relations_loaded),
            potential_n1: current.potential_n1.saturating_sub(self.initial.potential_n1),
        }
    }

    pub fn log_summary(&self, current: &N1Stats) {
        let delta = self.delta(current);
        if delta.potential_n1 > 0 {
            tracing::warn!(
                target: TARGET,
                potential_n1 = delta.potential_n1,
                total_loads = delta.total_loads,
                relations = delta.relations_loaded,
                threshold = self.threshold,
                "N+1 patterns detected in scope"
            );
        } else if self.verbose {
            tracing::info!(
                target: TARGET,
                total_loads = delta.total_loads,
                relations = delta.relations_loaded,
                "N+1 detection scope completed"
            );
        } else {
            tracing::debug!(
                target: TARGET,
                total_loads = delta.total_loads,
                relations = delta.relations_loaded,
                "N+1 detection scope completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let tracker = N1QueryTracker::new();
        assert_eq!(tracker.threshold(), DEFAULT_N1_THRESHOLD);
        assert!(tracker.is_enabled());
    }

    #[test]
    fn from_threshold_none_disables() {
        let mut tracker = N1QueryTracker::from_threshold(None);
        assert!(!tracker.is_enabled());
        tracker.record_load("Post", "author");
        assert_eq!(tracker.count_for("Post", "author"), 0);

        let tracker = N1QueryTracker::from_threshold(Some(5));
        assert!(tracker.is_enabled());
        assert_eq!(tracker.threshold(), 5);
    }

    #[test]
    fn counts_per_pair() {
        let mut tracker = N1QueryTracker::new().with_threshold(10);
        tracker.record_load("Post", "author");
        tracker.record_load("Post", "author");
        tracker.record_load("Post", "comments");
        tracker.record_load("User", "posts");

        assert_eq!(tracker.count_for("Post", "author"), 2);
        assert_eq!(tracker.count_for("Post", "comments"), 1);
        assert_eq!(tracker.count_for("User", "posts"), 1);
        assert_eq!(tracker.count_for("User", "roles"), 0);
    }

    #[test]
    fn reset_clears_everything() {
        let mut tracker = N1QueryTracker::new();
        tracker.record_load("Post", "author");
        tracker.reset();
        assert_eq!(tracker.count_for("Post", "author"), 0);
        assert!(tracker.call_sites().is_empty());
    }

    #[test]
    fn call_site_points_at_caller() {
        let mut tracker = N1QueryTracker::new();
        tracker.record_load("Post", "author");
        let site = &tracker.call_sites()[0];
        assert_eq!(site.entity, "Post");
        assert_eq!(site.relation, "author");
        assert!(site.file.ends_with("n1_detection.rs"));
        assert!(site.line > 0);
    }

    #[test]
    fn stats_count_pairs_over_threshold() {
        let mut tracker = N1QueryTracker::new().with_threshold(2);
        tracker.record_load("Post", "author");
        tracker.record_load("Post", "author");
        tracker.record_load("Post", "comments");

        assert_eq!(
            tracker.stats(),
            N1Stats {
                total_loads: 3,
                relations_loaded: 2,
                potential_n1: 1,
            }
        );
    }

    #[test]
    fn scope_reports_delta() {
        let initial = N1Stats {
            total_loads: 5,
            relations_loaded: 2,
            potential_n1: 0,
        };
        let scope = N1DetectionScope::new(initial, 3).verbose();
        let current = N1Stats {
            total_loads: 15,
            relations_loaded: 4,
            potential_n1: 2,
        };
        assert_eq!(
            scope.delta(&current),
            N1Stats {
                total_loads: 10,
                relations_loaded: 2,
                potential_n1: 2,
            }
        );
        scope.log_summary(&current);
    }
}
