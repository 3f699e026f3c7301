//! The active route table.
//!
//! Readers load an immutable [`RouteSnapshot`] through `ArcSwap` and never
//! take a lock. Writers (the change detector) build the next snapshot off to
//! the side and publish it with a single pointer swap, so a request sees
//! either the old table or the new one, never a mix.
use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;

use crate::core::{
    change_detector::RouteChange,
    matcher::{CompiledRoute, HostMatcherIndex, RequestView, specificity},
    route::Route,
    trie::PathTrie,
};

type Candidates = Vec<Arc<CompiledRoute>>;

/// One routing scope: either a single host or the host-agnostic set.
#[derive(Debug, Clone, Default)]
struct Scope {
    trie: PathTrie<Candidates>,
    /// Routes without a path prefix (host and/or regex only).
    unprefixed: Candidates,
}

impl Scope {
    fn with_route(&self, compiled: &Arc<CompiledRoute>) -> Self {
        let mut next = self.clone();
        match compiled.route.prefix() {
            Some(prefix) => {
                next.trie = next.trie.update(prefix, |current| {
                    let mut group: Candidates = current.cloned().unwrap_or_default();
                    group.push(compiled.clone());
                    group.sort_by(|a, b| specificity(a, b));
                    Some(group)
                });
            }
            None => {
                next.unprefixed.push(compiled.clone());
                next.unprefixed.sort_by(|a, b| specificity(a, b));
            }
        }
        next
    }

    fn without(&self, previous: &Route) -> Self {
        let mut next = self.clone();
        match previous.prefix() {
            Some(prefix) => {
                next.trie = next.trie.update(prefix, |current| {
                    let group: Candidates = current
                        .map(|g| {
                            g.iter()
                                .filter(|c| c.route.name != previous.name)
                                .cloned()
                                .collect()
                        })
                        .unwrap_or_default();
                    (!group.is_empty()).then_some(group)
                });
            }
            None => next.unprefixed.retain(|c| c.route.name != previous.name),
        }
        next
    }

    fn resolve(&self, req: &RequestView<'_>) -> Option<Arc<CompiledRoute>> {
        self.trie
            .matches(req.path)
            .into_iter()
            .flatten()
            .chain(self.unprefixed.iter())
            .find(|candidate| candidate.is_match(req))
            .cloned()
    }
}

/// Immutable view of the whole table.
#[derive(Debug, Clone, Default)]
pub struct RouteSnapshot {
    by_name: HashMap<String, Arc<CompiledRoute>>,
    host_scopes: HashMap<String, Scope>,
    agnostic: Scope,
    matchers: HostMatcherIndex,
}

impl RouteSnapshot {
    /// Build a snapshot from scratch. Later duplicates of a name win.
    pub fn build(routes: impl IntoIterator<Item = Route>) -> Self {
        let mut snapshot = Self::default();
        for route in routes {
            snapshot = snapshot.with_route(route);
        }
        snapshot
    }

    /// Copy of this snapshot with `route` upserted by name.
    pub fn with_route(&self, route: Route) -> Self {
        let compiled = Arc::new(CompiledRoute::compile(Arc::new(route)));
        let mut next = self.clone();

        if let Some(previous) = self.by_name.get(&compiled.route.name) {
            let previous = previous.route.clone();
            match previous.host() {
                Some(host) => {
                    if let Some(scope) = next.host_scopes.get(host) {
                        let scope = scope.without(&previous);
                        next.host_scopes.insert(host.to_string(), scope);
                    }
                }
                None => next.agnostic = next.agnostic.without(&previous),
            }
        }

        match compiled.route.host() {
            Some(host) => {
                let scope = next
                    .host_scopes
                    .get(host)
                    .map(|s| s.with_route(&compiled))
                    .unwrap_or_else(|| Scope::default().with_route(&compiled));
                next.host_scopes.insert(host.to_string(), scope);
            }
            None => next.agnostic = next.agnostic.with_route(&compiled),
        }

        next.matchers = next.matchers.with_route(compiled.clone());
        next.by_name
            .insert(compiled.route.name.clone(), compiled);
        next
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Route>> {
        self.by_name.get(name).map(|c| c.route.clone())
    }

    /// All routes ordered by name.
    pub fn routes(&self) -> Vec<Arc<Route>> {
        let mut routes: Vec<_> = self.by_name.values().map(|c| c.route.clone()).collect();
        routes.sort_by(|a, b| a.name.cmp(&b.name));
        routes
    }

    /// Trie dispatch: host scope first, then host-agnostic routes; longest
    /// prefix first inside each scope.
    pub fn resolve(&self, req: &RequestView<'_>) -> Option<Arc<Route>> {
        let scoped = req
            .host
            .and_then(|host| self.host_scopes.get(host))
            .and_then(|scope| scope.resolve(req));
        scoped
            .or_else(|| self.agnostic.resolve(req))
            .map(|c| c.route.clone())
    }

    /// Predicate-only evaluation over every route.
    pub fn match_rules(&self, req: &RequestView<'_>) -> Option<Arc<Route>> {
        self.matchers.find(req).map(|c| c.route.clone())
    }
}

/// Route manager: the authoritative, concurrently readable route table.
#[derive(Debug, Default)]
pub struct RouteTable {
    current: ArcSwap<RouteSnapshot>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_routes(routes: impl IntoIterator<Item = Route>) -> Self {
        Self {
            current: ArcSwap::from_pointee(RouteSnapshot::build(routes)),
        }
    }

    /// The snapshot currently published to readers.
    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        self.current.load_full()
    }

    /// Copy of every active route.
    pub fn get_routes(&self) -> Vec<Arc<Route>> {
        self.current.load().routes()
    }

    pub fn get_route_by_name(&self, name: &str) -> Option<Arc<Route>> {
        self.current.load().get(name)
    }

    pub fn get_route_by_request(&self, req: &RequestView<'_>) -> Option<Arc<Route>> {
        self.current.load().resolve(req)
    }

    /// Rule-based match (host priority, then most specific).
    pub fn match_request(&self, req: &RequestView<'_>) -> Option<Arc<Route>> {
        self.current.load().match_rules(req)
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }

    /// Upsert a single route; its matchers are recompiled.
    pub fn add_route(&self, route: Route) {
        let name = route.name.clone();
        self.current
            .rcu(|current| Arc::new(current.with_route(route.clone())));
        tracing::debug!(route = %name, "Route upserted");
    }

    /// Swap in a table built from `routes`.
    pub fn replace_routes(&self, routes: Vec<Route>) {
        let snapshot = RouteSnapshot::build(routes);
        let count = snapshot.len();
        self.current.store(Arc::new(snapshot));
        tracing::info!(routes = count, "Route table replaced");
    }

    /// Apply a batch produced by the change detector.
    pub fn apply(&self, change: RouteChange) {
        match change {
            RouteChange::Upsert(routes) => {
                if routes.is_empty() {
                    return;
                }
                self.current.rcu(|current| {
                    let mut next = current.as_ref().clone();
                    for route in &routes {
                        next = next.with_route(route.clone());
                    }
                    Arc::new(next)
                });
                tracing::info!(routes = routes.len(), "Route changes applied");
            }
            RouteChange::Replace(routes) => self.replace_routes(routes),
        }
    }
}
