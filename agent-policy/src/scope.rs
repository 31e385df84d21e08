//! Scope hierarchy expansion and validation.
//!
//! A hierarchy is a directed graph where holding a parent scope implies every
//! scope reachable from it. The [`ScopeService`] fails closed: until a graph
//! has been installed, validation denies every request and expansion returns
//! its input untouched.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{debug, warn};

use crate::decision::AccessDecision;

/// Immutable parent to children scope graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeHierarchy {
    edges: HashMap<String, BTreeSet<String>>,
}

impl ScopeHierarchy {
    /// Builds a hierarchy from `(parent, children)` pairs. Repeated parents
    /// accumulate their children.
    pub fn from_edges<I, P, C, S>(edges: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut graph: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (parent, children) in edges {
            graph
                .entry(parent.into())
                .or_default()
                .extend(children.into_iter().map(Into::into));
        }
        Self { edges: graph }
    }

    /// Returns the direct children of `scope`.
    #[must_use]
    pub fn children(&self, scope: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(scope)
    }

    /// Returns the input scopes plus every transitive descendant.
    ///
    /// Traversal is depth first with a visited set, so cycles terminate and
    /// `expand(expand(s)) == expand(s)`.
    pub fn expand<I, S>(&self, scopes: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut visited = BTreeSet::new();
        let mut stack: Vec<String> = scopes.into_iter().map(|s| s.as_ref().to_owned()).collect();

        while let Some(scope) = stack.pop() {
            if !visited.insert(scope.clone()) {
                continue;
            }
            if let Some(children) = self.edges.get(&scope) {
                stack.extend(
                    children
                        .iter()
                        .filter(|child| !visited.contains(*child))
                        .cloned(),
                );
            }
        }

        visited
    }

    fn summary(&self) -> HierarchySummary {
        let mut distinct: BTreeSet<&str> = BTreeSet::new();
        let mut edge_count = 0;
        for (parent, children) in &self.edges {
            distinct.insert(parent);
            edge_count += children.len();
            distinct.extend(children.iter().map(String::as_str));
        }
        HierarchySummary {
            initialized: true,
            parents: self.edges.len(),
            edges: edge_count,
            distinct_scopes: distinct.len(),
        }
    }
}

/// Introspection snapshot of the installed hierarchy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HierarchySummary {
    /// Whether a hierarchy has been installed.
    pub initialized: bool,
    /// Number of scopes with at least one child.
    pub parents: usize,
    /// Number of parent to child edges.
    pub edges: usize,
    /// Number of distinct scopes mentioned by the graph.
    pub distinct_scopes: usize,
}

/// Shared service that owns the active [`ScopeHierarchy`].
#[derive(Default)]
pub struct ScopeService {
    hierarchy: RwLock<Option<Arc<ScopeHierarchy>>>,
}

impl fmt::Debug for ScopeService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeService")
            .field("summary", &self.summary())
            .finish()
    }
}

impl ScopeService {
    /// Creates an uninitialised service. Every validation denies until
    /// [`ScopeService::initialize`] is called.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a service with the supplied hierarchy already installed.
    #[must_use]
    pub fn with_hierarchy(hierarchy: ScopeHierarchy) -> Self {
        let service = Self::new();
        service.initialize(hierarchy);
        service
    }

    /// Installs (or replaces) the hierarchy. The last call wins.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn initialize(&self, hierarchy: ScopeHierarchy) {
        let summary = hierarchy.summary();
        *self.hierarchy.write().expect("scope hierarchy poisoned") = Some(Arc::new(hierarchy));
        debug!(
            parents = summary.parents,
            edges = summary.edges,
            "scope hierarchy initialised"
        );
    }

    /// Returns true once a hierarchy has been installed.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.hierarchy
            .read()
            .expect("scope hierarchy poisoned")
            .is_some()
    }

    fn snapshot(&self) -> Option<Arc<ScopeHierarchy>> {
        self.hierarchy
            .read()
            .expect("scope hierarchy poisoned")
            .clone()
    }

    /// Expands `scopes` with every implied descendant.
    ///
    /// When no hierarchy is installed the input is returned unchanged and a
    /// warning is logged.
    pub fn expand<I, S>(&self, scopes: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match self.snapshot() {
            Some(hierarchy) => hierarchy.expand(scopes),
            None => {
                warn!("scope hierarchy not initialised; returning original scopes");
                scopes.into_iter().map(|s| s.as_ref().to_owned()).collect()
            }
        }
    }

    /// Checks whether `held` (after expansion) covers every `required` scope.
    ///
    /// An uninitialised service denies and reports every required scope as
    /// missing.
    pub fn validate<H, R, S, T>(&self, held: H, required: R) -> AccessDecision
    where
        H: IntoIterator<Item = S>,
        S: AsRef<str>,
        R: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let Some(hierarchy) = self.snapshot() else {
            warn!("scope hierarchy not initialised; denying access");
            return AccessDecision::deny(
                required.into_iter().map(|s| s.as_ref().to_owned()).collect(),
            );
        };
        decide(&hierarchy.expand(held), required)
    }

    /// Checks a single required scope.
    pub fn validate_scope<H, S>(&self, held: H, scope: &str) -> bool
    where
        H: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.validate(held, [scope]).is_allowed()
    }

    /// Validates several independent requirements against the same held set,
    /// expanding `held` once.
    pub fn validate_many<H, S>(&self, held: H, requirements: &[&[&str]]) -> Vec<AccessDecision>
    where
        H: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut cache = self.request_cache();
        let held: Vec<String> = held.into_iter().map(|s| s.as_ref().to_owned()).collect();
        let decisions = requirements
            .iter()
            .map(|required| cache.validate(&held, required.iter()))
            .collect();
        cache.close();
        decisions
    }

    /// Opens a request-scoped expansion cache bound to the current hierarchy.
    ///
    /// The cache lives for one dispatch. Call [`ScopeRequestCache::close`]
    /// when the turn finishes; dropping the handle releases it as well.
    #[must_use]
    pub fn request_cache(&self) -> ScopeRequestCache {
        ScopeRequestCache {
            hierarchy: self.snapshot(),
            memo: HashMap::new(),
            hits: 0,
        }
    }

    /// Returns an introspection summary of the installed hierarchy.
    #[must_use]
    pub fn summary(&self) -> HierarchySummary {
        self.snapshot()
            .map(|hierarchy| hierarchy.summary())
            .unwrap_or_default()
    }
}

fn decide<R, T>(expanded: &BTreeSet<String>, required: R) -> AccessDecision
where
    R: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let missing: Vec<String> = required
        .into_iter()
        .filter(|scope| !expanded.contains(scope.as_ref()))
        .map(|scope| scope.as_ref().to_owned())
        .collect();
    if missing.is_empty() {
        AccessDecision::allow()
    } else {
        AccessDecision::deny(missing)
    }
}

/// Per-dispatch memo of scope expansions.
///
/// Holds a snapshot of the hierarchy taken when it was opened, so a rebuild
/// during a turn does not change the answers given within that turn.
#[derive(Debug)]
pub struct ScopeRequestCache {
    hierarchy: Option<Arc<ScopeHierarchy>>,
    memo: HashMap<Vec<String>, Arc<BTreeSet<String>>>,
    hits: usize,
}

impl ScopeRequestCache {
    /// Expands `held`, reusing a previous expansion of the same set.
    pub fn expand<S: AsRef<str>>(&mut self, held: &[S]) -> Arc<BTreeSet<String>> {
        let mut key: Vec<String> = held.iter().map(|s| s.as_ref().to_owned()).collect();
        key.sort_unstable();
        key.dedup();

        if let Some(expanded) = self.memo.get(&key) {
            self.hits += 1;
            return Arc::clone(expanded);
        }

        let expanded = Arc::new(match &self.hierarchy {
            Some(hierarchy) => hierarchy.expand(&key),
            None => key.iter().cloned().collect(),
        });
        self.memo.insert(key, Arc::clone(&expanded));
        expanded
    }

    /// Validates `required` against the cached expansion of `held`.
    pub fn validate<S, R, T>(&mut self, held: &[S], required: R) -> AccessDecision
    where
        S: AsRef<str>,
        R: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        if self.hierarchy.is_none() {
            return AccessDecision::deny(
                required.into_iter().map(|s| s.as_ref().to_owned()).collect(),
            );
        }
        let expanded = self.expand(held);
        decide(&expanded, required)
    }

    /// Number of lookups answered from the memo.
    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Closes the cache, discarding every memoised expansion. Returns the
    /// number of lookups the cache served.
    pub fn close(mut self) -> usize {
        self.memo.clear();
        debug!(hits = self.hits, "scope request cache closed");
        self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ScopeService {
        ScopeService::with_hierarchy(ScopeHierarchy::from_edges([
            ("admin", vec!["files:admin", "api:admin"]),
            ("files:admin", vec!["files:write"]),
            ("files:write", vec!["files:read"]),
            ("api:admin", vec!["api:read"]),
        ]))
    }

    #[test]
    fn expansion_includes_transitive_descendants() {
        let expanded = service().expand(["admin"]);
        for scope in ["admin", "files:admin", "files:write", "files:read", "api:read"] {
            assert!(expanded.contains(scope), "missing {scope}");
        }
    }

    #[test]
    fn expansion_is_idempotent() {
        let service = service();
        let once = service.expand(["files:admin", "api:admin"]);
        let twice = service.expand(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn cycles_terminate() {
        let service = ScopeService::with_hierarchy(ScopeHierarchy::from_edges([
            ("a", vec!["b"]),
            ("b", vec!["c"]),
            ("c", vec!["a"]),
        ]));
        let expanded = service.expand(["b"]);
        assert_eq!(expanded.len(), 3);
    }

    #[test]
    fn validate_reports_missing_scopes() {
        let decision = service().validate(["files:write"], ["files:read", "api:read"]);
        assert!(!decision.is_allowed());
        assert_eq!(decision.missing(), ["api:read"]);

        assert!(service().validate(["admin"], ["files:read"]).is_allowed());
    }

    #[test]
    fn uninitialised_service_fails_closed() {
        let service = ScopeService::new();
        assert!(!service.is_initialized());

        let decision = service.validate(["files:read"], ["files:read"]);
        assert!(!decision.is_allowed());
        assert_eq!(decision.missing(), ["files:read"]);

        let expanded = service.expand(["files:read"]);
        assert_eq!(expanded.len(), 1);
    }

    #[test]
    fn reinitialise_replaces_graph() {
        let service = service();
        service.initialize(ScopeHierarchy::from_edges([("root", vec!["leaf"])]));
        assert!(!service.validate_scope(["admin"], "files:read"));
        assert!(service.validate_scope(["root"], "leaf"));
    }

    #[test]
    fn request_cache_reuses_expansions() {
        let service = service();
        let mut cache = service.request_cache();
        let held = ["files:admin"];
        assert!(cache.validate(&held, ["files:read"]).is_allowed());
        assert!(!cache.validate(&held, ["api:read"]).is_allowed());
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.close(), 1);
    }

    #[test]
    fn validate_many_checks_each_requirement() {
        let requirements: [&[&str]; 2] = [&["api:read"], &["files:read"]];
        let decisions = service().validate_many(["api:admin"], &requirements);
        assert!(decisions[0].is_allowed());
        assert!(!decisions[1].is_allowed());
    }

    #[test]
    fn summary_counts_edges() {
        let summary = service().summary();
        assert!(summary.initialized);
        assert_eq!(summary.parents, 4);
        assert_eq!(summary.edges, 5);
        assert_eq!(ScopeService::new().summary(), HierarchySummary::default());
    }
}
