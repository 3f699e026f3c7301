//! Strategy delegating signature and revocation checks to a remote authority.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use http::HeaderMap;

use super::{AuthError, AuthStrategy, Claims, DecisionCache, bearer_token, decode_unverified};
use crate::ports::auth_authority::{AuthAuthority, AuthorityError};

pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Seconds until `exp`, or `None` if it already passed.
pub(crate) fn remaining_lifetime(exp: i64) -> Option<Duration> {
    let now = chrono::Utc::now().timestamp();
    (exp > now).then(|| Duration::from_secs((exp - now) as u64))
}

pub struct RemoteValidatorStrategy {
    authority: Arc<dyn AuthAuthority>,
    cache: Arc<dyn DecisionCache>,
    negative_ttl: Duration,
    call_timeout: Duration,
}

impl RemoteValidatorStrategy {
    pub fn new(authority: Arc<dyn AuthAuthority>, cache: Arc<dyn DecisionCache>) -> Self {
        Self {
            authority,
            cache,
            negative_ttl: DEFAULT_NEGATIVE_TTL,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = ttl;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

#[async_trait]
impl AuthStrategy for RemoteValidatorStrategy {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Claims, AuthError> {
        let token = bearer_token(headers)?;

        match self.cache.get(token).await {
            // Claims are still needed for identity headers.
            Some(true) => return decode_unverified(token),
            Some(false) => {
                return Err(AuthError::Rejected("recently rejected credential".to_string()));
            }
            None => {}
        }

        let claims = decode_unverified(token)?;
        let exp = claims
            .exp
            .ok_or_else(|| AuthError::Malformed("missing exp claim".to_string()))?;
        if remaining_lifetime(exp).is_none() {
            return Err(AuthError::Expired);
        }

        let outcome = tokio::time::timeout(self.call_timeout, self.authority.is_authenticated(token))
            .await
            .unwrap_or_else(|_| {
                Err(AuthorityError::Unavailable(format!(
                    "no answer within {:?}",
                    self.call_timeout
                )))
            });

        match outcome {
            Ok(()) => {
                if let Some(ttl) = remaining_lifetime(exp) {
                    self.cache.set(token, true, ttl).await;
                }
                Ok(claims)
            }
            Err(AuthorityError::Rejected(reason)) => {
                tracing::warn!(reason = %reason, "Credential rejected by authority");
                self.cache.set(token, false, self.negative_ttl).await;
                Err(AuthError::Rejected(reason))
            }
            Err(AuthorityError::Unavailable(reason)) => {
                tracing::error!(reason = %reason, "Authentication authority call failed");
                Err(AuthError::Unavailable(reason))
            }
        }
    }
}
