//! Local HS256 verification with a refreshed signing secret.
use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    AuthError, AuthStrategy, Claims, DecisionCache, bearer_token, decode_unverified,
    remote::{DEFAULT_NEGATIVE_TTL, remaining_lifetime},
};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Supplies the current signing secret.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch_key(&self) -> Result<String, AuthError>;
}

/// Secret read from an environment variable on every refresh.
#[derive(Debug, Clone)]
pub struct EnvKeySource {
    var: String,
}

impl EnvKeySource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl KeySource for EnvKeySource {
    async fn fetch_key(&self) -> Result<String, AuthError> {
        std::env::var(&self.var)
            .map_err(|e| AuthError::KeyUnavailable(format!("{}: {e}", self.var)))
    }
}

#[derive(Debug, Clone)]
pub struct StaticKeySource {
    key: String,
}

impl StaticKeySource {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch_key(&self) -> Result<String, AuthError> {
        Ok(self.key.clone())
    }
}

/// Secret served by a key endpoint as a string `field` of a JSON object.
#[derive(Debug, Clone)]
pub struct HttpKeySource {
    client: reqwest::Client,
    url: String,
    field: String,
}

impl HttpKeySource {
    pub fn new(client: reqwest::Client, url: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            field: field.into(),
        }
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch_key(&self) -> Result<String, AuthError> {
        let unavailable = |e: reqwest::Error| AuthError::KeyUnavailable(e.to_string());
        let body: serde_json::Value = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(unavailable)?
            .json()
            .await
            .map_err(unavailable)?;
        body.get(&self.field)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                AuthError::KeyUnavailable(format!("field '{}' missing from key response", self.field))
            })
    }
}

pub struct JwtStrategy {
    key_source: Arc<dyn KeySource>,
    key: ArcSwapOption<DecodingKey>,
    cache: Arc<dyn DecisionCache>,
    negative_ttl: Duration,
    validation: Validation,
}

impl JwtStrategy {
    pub fn new(key_source: Arc<dyn KeySource>, cache: Arc<dyn DecisionCache>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            key_source,
            key: ArcSwapOption::empty(),
            cache,
            negative_ttl: DEFAULT_NEGATIVE_TTL,
            validation,
        }
    }

    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = ttl;
        self
    }

    /// Fetch the secret and swap it in. On failure the previous key stays.
    pub async fn refresh_key(&self) -> Result<(), AuthError> {
        let secret = self.key_source.fetch_key().await?;
        if secret.is_empty() {
            return Err(AuthError::KeyUnavailable("empty signing secret".to_string()));
        }
        self.key
            .store(Some(Arc::new(DecodingKey::from_secret(secret.as_bytes()))));
        tracing::debug!("JWT signing key refreshed");
        Ok(())
    }

    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let key = self
            .key
            .load_full()
            .ok_or_else(|| AuthError::KeyUnavailable("no signing key loaded".to_string()))?;
        jsonwebtoken::decode::<Claims>(token, &key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidSignature | ErrorKind::ImmatureSignature => {
                    AuthError::Rejected(e.to_string())
                }
                _ => AuthError::Malformed(e.to_string()),
            })
    }
}

#[async_trait]
impl AuthStrategy for JwtStrategy {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Claims, AuthError> {
        let token = bearer_token(headers)?;

        match self.cache.get(token).await {
            Some(true) => return decode_unverified(token),
            Some(false) => {
                return Err(AuthError::Rejected("recently rejected credential".to_string()));
            }
            None => {}
        }

        match self.verify(token) {
            Ok(claims) => {
                if let Some(ttl) = claims.exp.and_then(remaining_lifetime) {
                    self.cache.set(token, true, ttl).await;
                }
                Ok(claims)
            }
            Err(AuthError::Rejected(reason)) => {
                tracing::warn!(reason = %reason, "JWT signature rejected");
                self.cache.set(token, false, self.negative_ttl).await;
                Err(AuthError::Rejected(reason))
            }
            Err(e) => Err(e),
        }
    }
}

/// Periodically refresh `strategy`'s key until `cancel` fires. Failures keep
/// the previous key and are retried on the next tick.
pub fn spawn_key_refresh(
    strategy: Arc<JwtStrategy>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let interval = if interval.is_zero() {
        DEFAULT_REFRESH_INTERVAL
    } else {
        interval
    };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = strategy.refresh_key().await {
                        tracing::error!(error = %e, "Failed to refresh JWT signing key");
                    }
                }
            }
        }
        tracing::debug!("JWT key refresh stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use http::{HeaderValue, header};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    use super::*;
    use crate::core::auth::InMemoryDecisionCache;

    struct RotatingKey(Mutex<String>);

    #[async_trait]
    impl KeySource for RotatingKey {
        async fn fetch_key(&self) -> Result<String, AuthError> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    fn sign(secret: &str, exp_offset: i64) -> String {
        let claims = json!({
            "user_id": "u-1",
            "roles": ["admin"],
            "exp": chrono::Utc::now().timestamp() + exp_offset
        });
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn headers_for(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    fn strategy(secret: &str) -> JwtStrategy {
        JwtStrategy::new(
            Arc::new(StaticKeySource::new(secret)),
            Arc::new(InMemoryDecisionCache::new()),
        )
    }

    #[tokio::test]
    async fn test_valid_token() {
        let strategy = strategy("s3cret");
        strategy.refresh_key().await.unwrap();
        let claims = strategy
            .authenticate(&headers_for(&sign("s3cret", 600)))
            .await
            .unwrap();
        assert_eq!(claims.subject().as_deref(), Some("u-1"));
        assert_eq!(claims.roles, vec!["admin"]);
    }

    #[tokio::test]
    async fn test_wrong_secret_is_rejected() {
        let strategy = strategy("s3cret");
        strategy.refresh_key().await.unwrap();
        let result = strategy
            .authenticate(&headers_for(&sign("other", 600)))
            .await;
        assert!(matches!(result, Err(AuthError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let strategy = strategy("s3cret");
        strategy.refresh_key().await.unwrap();
        let result = strategy
            .authenticate(&headers_for(&sign("s3cret", -60)))
            .await;
        assert_eq!(result, Err(AuthError::Expired));
    }

    #[tokio::test]
    async fn test_no_key_loaded() {
        let strategy = strategy("s3cret");
        let result = strategy
            .authenticate(&headers_for(&sign("s3cret", 600)))
            .await;
        assert!(matches!(result, Err(AuthError::KeyUnavailable(_))));
    }

    #[tokio::test]
    async fn test_key_rotation() {
        let source = Arc::new(RotatingKey(Mutex::new("old".to_string())));
        let strategy = JwtStrategy::new(source.clone(), Arc::new(InMemoryDecisionCache::new()));
        strategy.refresh_key().await.unwrap();
        assert!(
            strategy
                .authenticate(&headers_for(&sign("old", 600)))
                .await
                .is_ok()
        );

        *source.0.lock().unwrap() = "new".to_string();
        strategy.refresh_key().await.unwrap();
        assert!(
            strategy
                .authenticate(&headers_for(&sign("new", 600)))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_env_key_source() {
        let source = EnvKeySource::new("SWITCHYARD_TEST_JWT_KEY_THAT_IS_NEVER_SET");
        assert!(matches!(
            source.fetch_key().await,
            Err(AuthError::KeyUnavailable(_))
        ));
    }
}
