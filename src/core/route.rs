//! Route model.
//!
//! A [`RouteDefinition`] is the persisted record as it arrives from a route
//! repository (one per file, row or config entry). It is converted into a
//! validated [`Route`] through [`TryFrom`]; invalid definitions are rejected
//! with a [`RouteValidationError`] and skipped by the repositories without
//! failing the rest of the batch.
use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    time::Duration,
};

use http::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// Timeout applied to backend calls when a route does not configure one.
pub const DEFAULT_ROUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised while validating a single route definition.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RouteValidationError {
    #[error("route name must not be empty")]
    EmptyName,

    #[error("route '{route}': target URL must not be empty")]
    EmptyTarget { route: String },

    #[error("route '{route}': invalid target URL '{target}': {reason}")]
    InvalidTarget {
        route: String,
        target: String,
        reason: String,
    },

    #[error("route '{route}': match rule needs at least one of host, prefix or regex")]
    EmptyMatchRule { route: String },

    #[error("route '{route}': path prefix '{prefix}' must start with '/'")]
    InvalidPrefix { route: String, prefix: String },

    #[error("route '{route}': unknown HTTP method '{method}'")]
    UnknownMethod { route: String, method: String },

    #[error("route '{route}': invalid timeout '{value}': {reason}")]
    InvalidTimeout {
        route: String,
        value: String,
        reason: String,
    },
}

/// Match conditions of a route. Every configured predicate must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRule {
    pub host: Option<String>,
    pub prefix: Option<String>,
    pub regex: Option<String>,
    /// `None` means every method is accepted.
    pub methods: Option<BTreeSet<MethodName>>,
}

impl MatchRule {
    pub fn is_empty(&self) -> bool {
        self.host.is_none() && self.prefix.is_none() && self.regex.is_none()
    }
}

/// An HTTP verb accepted in route configuration.
///
/// Wraps [`http::Method`] but only admits the standard verbs, so a typo in a
/// route file is reported instead of silently matching nothing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodName(String);

impl MethodName {
    const KNOWN: [&'static str; 9] = [
        "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_ascii_uppercase();
        Self::KNOWN
            .contains(&upper.as_str())
            .then_some(Self(upper))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_method(&self) -> Method {
        // Only standard verbs get past `parse`.
        Method::from_bytes(self.0.as_bytes()).unwrap_or(Method::GET)
    }

    pub fn matches(&self, method: &Method) -> bool {
        self.0 == method.as_str()
    }
}

impl fmt::Display for MethodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A path (and optional method list) whose authentication requirement is
/// inverted relative to [`Authentication::required`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthException {
    pub path: String,
    #[serde(default)]
    pub methods: Vec<String>,
}

impl AuthException {
    fn covers(&self, path: &str, method: &Method) -> bool {
        self.path == path
            && (self.methods.is_empty()
                || self
                    .methods
                    .iter()
                    .any(|m| m.eq_ignore_ascii_case(method.as_str())))
    }
}

/// Per-route authentication policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub except: Vec<AuthException>,
}

impl Authentication {
    /// Whether a request to `path` with `method` must be authenticated.
    ///
    /// With `required = true` the exceptions are public; with
    /// `required = false` only the exceptions are protected.
    pub fn is_required_for(&self, path: &str, method: &Method) -> bool {
        let excepted = self.except.iter().any(|e| e.covers(path, method));
        self.required != excepted
    }
}

/// A validated, immutable route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub description: Option<String>,
    pub rule: MatchRule,
    pub target: Url,
    pub strip_prefix: bool,
    pub authentication: Authentication,
    pub timeout: Duration,
    /// Version stamp of the source record (e.g. file mtime in millis).
    pub updated_at: i64,
}

impl Route {
    pub fn requires_auth(&self, path: &str, method: &Method) -> bool {
        self.authentication.is_required_for(path, method)
    }

    pub fn host(&self) -> Option<&str> {
        self.rule.host.as_deref()
    }

    pub fn prefix(&self) -> Option<&str> {
        self.rule.prefix.as_deref()
    }
}

/// Match block of a persisted route definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
}

/// Persisted route record as supplied by a repository.
///
/// Older route files put the prefix at the top level (`pathPrefix`) and call
/// the backend `targetURL`; both spellings are accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDefinition {
    #[serde(alias = "id")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "match")]
    pub match_rule: MatchDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub authentication: Option<Authentication>,
    #[serde(default, alias = "targetURL", alias = "targetUrl")]
    pub target: String,
    #[serde(default)]
    pub strip_prefix: bool,
    /// Humantime string such as `"5s"` or `"1m 30s"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing)]
    pub updated_at: i64,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl TryFrom<RouteDefinition> for Route {
    type Error = RouteValidationError;

    fn try_from(def: RouteDefinition) -> Result<Self, Self::Error> {
        let name = def.name.trim().to_string();
        if name.is_empty() {
            return Err(RouteValidationError::EmptyName);
        }

        let raw_target = def.target.trim();
        if raw_target.is_empty() {
            return Err(RouteValidationError::EmptyTarget { route: name });
        }
        let target = Url::parse(raw_target).map_err(|e| RouteValidationError::InvalidTarget {
            route: name.clone(),
            target: raw_target.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(target.scheme(), "http" | "https") || target.host_str().is_none() {
            return Err(RouteValidationError::InvalidTarget {
                route: name,
                target: raw_target.to_string(),
                reason: "expected an absolute http(s) URL".to_string(),
            });
        }

        let prefix = non_empty(def.match_rule.prefix).or_else(|| non_empty(def.path_prefix));
        if let Some(p) = &prefix {
            if !p.starts_with('/') {
                return Err(RouteValidationError::InvalidPrefix {
                    route: name,
                    prefix: p.clone(),
                });
            }
        }

        let methods = if def.match_rule.methods.is_empty() {
            None
        } else {
            let mut set = BTreeSet::new();
            for raw in &def.match_rule.methods {
                let method =
                    MethodName::parse(raw).ok_or_else(|| RouteValidationError::UnknownMethod {
                        route: name.clone(),
                        method: raw.clone(),
                    })?;
                set.insert(method);
            }
            Some(set)
        };

        let rule = MatchRule {
            host: non_empty(def.match_rule.host),
            prefix,
            regex: non_empty(def.match_rule.regex),
            methods,
        };
        if rule.is_empty() {
            return Err(RouteValidationError::EmptyMatchRule { route: name });
        }

        let authentication = def.authentication.unwrap_or_default();
        for exception in &authentication.except {
            if let Some(bad) = exception
                .methods
                .iter()
                .find(|m| MethodName::parse(m).is_none())
            {
                return Err(RouteValidationError::UnknownMethod {
                    route: name,
                    method: bad.clone(),
                });
            }
        }

        let timeout = match non_empty(def.timeout) {
            None => DEFAULT_ROUTE_TIMEOUT,
            Some(raw) => match humantime::parse_duration(&raw) {
                Ok(d) if d.is_zero() => DEFAULT_ROUTE_TIMEOUT,
                Ok(d) => d,
                Err(e) => {
                    return Err(RouteValidationError::InvalidTimeout {
                        route: name,
                        value: raw,
                        reason: e.to_string(),
                    });
                }
            },
        };

        Ok(Route {
            name,
            description: non_empty(def.description),
            rule,
            target,
            strip_prefix: def.strip_prefix,
            authentication,
            timeout,
            updated_at: def.updated_at,
        })
    }
}

/// Convert a batch of definitions, logging and dropping the invalid ones.
///
/// Route names are unique: when several definitions share a name, the one
/// with the highest `updated_at` is kept, and on a tie the first one in
/// batch order. The others are dropped with a warning.
///
/// `source` is only used for log context (a file path, a URL ...).
pub fn validate_batch(
    definitions: impl IntoIterator<Item = RouteDefinition>,
    source: &str,
) -> Vec<Route> {
    let mut routes: Vec<Route> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for def in definitions {
        let route = match Route::try_from(def) {
            Ok(route) => route,
            Err(e) => {
                tracing::warn!(source, error = %e, "Skipping invalid route definition");
                continue;
            }
        };
        match by_name.get(&route.name).copied() {
            None => {
                by_name.insert(route.name.clone(), routes.len());
                routes.push(route);
            }
            Some(index) => {
                let kept = &mut routes[index];
                let (dropped, winner) = if route.updated_at > kept.updated_at {
                    (std::mem::replace(kept, route), &*kept)
                } else {
                    (route, &*kept)
                };
                tracing::warn!(
                    source,
                    route = %dropped.name,
                    kept_target = %winner.target,
                    kept_updated_at = winner.updated_at,
                    dropped_target = %dropped.target,
                    dropped_updated_at = dropped.updated_at,
                    "Skipping duplicate route definition"
                );
            }
        }
    }
    routes
}
