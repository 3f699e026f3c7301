//! Authentication.
//!
//! [`AuthManager`] delegates to a pluggable [`AuthStrategy`]. Strategies
//! validate the bearer credential, consult a [`DecisionCache`] and return the
//! caller's [`Claims`]. The manager stores those claims in the request
//! extensions so the forwarding step can rebuild identity headers from them
//! instead of trusting anything the client sent.
pub mod cache;
pub mod jwt;
pub mod remote;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use http::{HeaderMap, Request, header};
use serde::{Deserialize, Serialize};

pub use cache::{DecisionCache, InMemoryDecisionCache};
pub use jwt::{EnvKeySource, HttpKeySource, JwtStrategy, KeySource, StaticKeySource};
pub use remote::RemoteValidatorStrategy;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer credential")]
    MissingCredential,

    #[error("malformed credential: {0}")]
    Malformed(String),

    #[error("credential has expired")]
    Expired,

    #[error("credential rejected: {0}")]
    Rejected(String),

    #[error("authentication authority unavailable: {0}")]
    Unavailable(String),

    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("route requires authentication but no authentication is configured")]
    NotConfigured,
}

/// A user or profile identifier; issuers emit both numbers and strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Numeric(i64),
    Text(String),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Numeric(n) => write!(f, "{n}"),
            Identifier::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Identifier,
}

/// Identity claims carried by a validated credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, alias = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Identifier>,
    #[serde(default, alias = "userUuid", skip_serializing_if = "Option::is_none")]
    pub user_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub profiles: Vec<Profile>,
    /// Expiry as seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl Claims {
    /// The user id, falling back to `sub`.
    pub fn subject(&self) -> Option<String> {
        self.user_id
            .as_ref()
            .map(ToString::to_string)
            .or_else(|| self.sub.clone())
            .filter(|s| !s.is_empty())
    }

    pub fn profile_ids(&self) -> Vec<String> {
        self.profiles.iter().map(|p| p.id.to_string()).collect()
    }

    /// True if the caller holds any of `roles` or any of `permissions`.
    pub fn has_any(&self, roles: &[&str], permissions: &[&str]) -> bool {
        self.roles.iter().any(|r| roles.contains(&r.as_str()))
            || self
                .permissions
                .iter()
                .any(|p| permissions.contains(&p.as_str()))
    }
}

/// Bearer credential from the `Authorization` header, without the scheme.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingCredential)?
        .to_str()
        .map_err(|_| AuthError::Malformed("authorization header is not ASCII".to_string()))?
        .trim();
    let token = match value.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ if value.eq_ignore_ascii_case("bearer") => "",
        _ => value,
    };
    if token.is_empty() {
        return Err(AuthError::MissingCredential);
    }
    Ok(token)
}

/// Read a JWT payload without checking its signature.
///
/// Only used where the signature is verified elsewhere (by the upstream
/// authority or an earlier, cached verification).
pub fn decode_unverified(token: &str) -> Result<Claims, AuthError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(AuthError::Malformed("expected three dot-separated parts".to_string())),
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::Malformed(format!("payload is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::Malformed(format!("payload is not a claims object: {e}")))
}

#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Validate the credential carried by `headers` and return its claims.
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Claims, AuthError>;
}

/// Entry point used by the dispatch pipeline.
#[derive(Clone)]
pub struct AuthManager {
    strategy: Arc<dyn AuthStrategy>,
}

impl AuthManager {
    pub fn new(strategy: Arc<dyn AuthStrategy>) -> Self {
        Self { strategy }
    }

    /// Authenticate `req` and attach the resulting claims to its extensions.
    pub async fn authenticate<B>(&self, req: &mut Request<B>) -> Result<Claims, AuthError> {
        let claims = self.strategy.authenticate(req.headers()).await?;
        req.extensions_mut().insert(claims.clone());
        Ok(claims)
    }
}
