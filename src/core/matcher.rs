//! Predicate matching.
//!
//! A route's [`MatchRule`] is compiled once into a [`MatcherSet`] (regex
//! compiled, method set built) when the route enters the table. Matching a
//! request is then a conjunction over the compiled predicates.
//!
//! [`HostMatcherIndex`] is the rule-based lookup over a whole table: routes
//! bound to a host are tried first (scoped by the request `Host` header),
//! then host-agnostic routes. Inside each group candidates are ordered
//! most-specific first so the outcome does not depend on map iteration order.
use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use http::{Method, Request, header};
use regex::Regex;

use crate::core::route::{MatchRule, MethodName, Route};

/// The parts of an inbound request the matchers look at.
#[derive(Debug, Clone, Copy)]
pub struct RequestView<'a> {
    pub host: Option<&'a str>,
    pub path: &'a str,
    pub method: &'a Method,
}

impl<'a> RequestView<'a> {
    pub fn new(host: Option<&'a str>, path: &'a str, method: &'a Method) -> Self {
        Self { host, path, method }
    }

    /// Build a view from a request; the `Host` header wins over the URI
    /// authority.
    pub fn from_request<B>(req: &'a Request<B>) -> Self {
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| req.uri().host());
        Self {
            host,
            path: req.uri().path(),
            method: req.method(),
        }
    }
}

#[derive(Debug)]
enum Predicate {
    Host(String),
    Prefix(String),
    Regex(Regex),
    Methods(Vec<MethodName>),
}

impl Predicate {
    fn holds(&self, req: &RequestView<'_>) -> bool {
        match self {
            Predicate::Host(host) => req.host == Some(host.as_str()),
            Predicate::Prefix(prefix) => req.path.as_bytes().starts_with(prefix.as_bytes()),
            Predicate::Regex(re) => re.is_match(req.path),
            Predicate::Methods(methods) => methods.iter().any(|m| m.matches(req.method)),
        }
    }
}

/// Compiled predicates for one route.
#[derive(Debug)]
pub struct MatcherSet {
    predicates: Vec<Predicate>,
}

impl MatcherSet {
    pub fn compile(rule: &MatchRule) -> Result<Self, regex::Error> {
        let mut predicates = Vec::with_capacity(4);
        if let Some(host) = &rule.host {
            predicates.push(Predicate::Host(host.clone()));
        }
        if let Some(prefix) = &rule.prefix {
            predicates.push(Predicate::Prefix(prefix.clone()));
        }
        if let Some(pattern) = &rule.regex {
            predicates.push(Predicate::Regex(Regex::new(pattern)?));
        }
        if let Some(methods) = &rule.methods {
            predicates.push(Predicate::Methods(methods.iter().cloned().collect()));
        }
        Ok(Self { predicates })
    }

    pub fn is_match(&self, req: &RequestView<'_>) -> bool {
        self.predicates.iter().all(|p| p.holds(req))
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

/// A route paired with its compiled matchers.
///
/// `matchers` is `None` when the rule failed to compile; such a route stays
/// addressable by name but never matches a request.
#[derive(Debug)]
pub struct CompiledRoute {
    pub route: Arc<Route>,
    matchers: Option<MatcherSet>,
}

impl CompiledRoute {
    pub fn compile(route: Arc<Route>) -> Self {
        let matchers = match MatcherSet::compile(&route.rule) {
            Ok(set) => Some(set),
            Err(e) => {
                tracing::error!(
                    route = %route.name,
                    error = %e,
                    "Failed to compile route matchers, route will never match"
                );
                None
            }
        };
        Self { route, matchers }
    }

    pub fn is_matchable(&self) -> bool {
        self.matchers.is_some()
    }

    pub fn is_match(&self, req: &RequestView<'_>) -> bool {
        self.matchers.as_ref().is_some_and(|m| m.is_match(req))
    }
}

/// Most-specific first: longer prefix, then regex, then explicit methods,
/// then name.
pub(crate) fn specificity(a: &CompiledRoute, b: &CompiledRoute) -> Ordering {
    let (ra, rb) = (&a.route.rule, &b.route.rule);
    let prefix_len = |r: &MatchRule| r.prefix.as_ref().map_or(0, String::len);
    prefix_len(rb)
        .cmp(&prefix_len(ra))
        .then_with(|| rb.regex.is_some().cmp(&ra.regex.is_some()))
        .then_with(|| rb.methods.is_some().cmp(&ra.methods.is_some()))
        .then_with(|| a.route.name.cmp(&b.route.name))
}

/// Rule-based lookup over every route in a table.
#[derive(Debug, Default, Clone)]
pub struct HostMatcherIndex {
    by_host: HashMap<String, Vec<Arc<CompiledRoute>>>,
    agnostic: Vec<Arc<CompiledRoute>>,
}

impl HostMatcherIndex {
    pub fn build<'a>(routes: impl IntoIterator<Item = &'a Arc<CompiledRoute>>) -> Self {
        let mut index = Self::default();
        for route in routes {
            index.push(route.clone());
        }
        index.sort();
        index
    }

    fn push(&mut self, route: Arc<CompiledRoute>) {
        match route.route.host() {
            Some(host) => self
                .by_host
                .entry(host.to_string())
                .or_default()
                .push(route),
            None => self.agnostic.push(route),
        }
    }

    fn sort(&mut self) {
        for group in self.by_host.values_mut() {
            group.sort_by(|a, b| specificity(a, b));
        }
        self.agnostic.sort_by(|a, b| specificity(a, b));
    }

    /// Copy of this index with `route` inserted, replacing any entry with
    /// the same name.
    pub fn with_route(&self, route: Arc<CompiledRoute>) -> Self {
        let mut next = self.without(&route.route.name);
        next.push(route);
        next.sort();
        next
    }

    fn without(&self, name: &str) -> Self {
        let mut by_host = HashMap::with_capacity(self.by_host.len());
        for (host, group) in &self.by_host {
            let kept: Vec<_> = group
                .iter()
                .filter(|r| r.route.name != name)
                .cloned()
                .collect();
            if !kept.is_empty() {
                by_host.insert(host.clone(), kept);
            }
        }
        let agnostic = self
            .agnostic
            .iter()
            .filter(|r| r.route.name != name)
            .cloned()
            .collect();
        Self { by_host, agnostic }
    }

    /// First matching route; host-scoped routes beat host-agnostic ones.
    pub fn find(&self, req: &RequestView<'_>) -> Option<Arc<CompiledRoute>> {
        let scoped = req
            .host
            .and_then(|host| self.by_host.get(host))
            .into_iter()
            .flatten();
        scoped
            .chain(self.agnostic.iter())
            .find(|candidate| candidate.is_match(req))
            .cloned()
    }
}
