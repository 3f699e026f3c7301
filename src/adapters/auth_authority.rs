use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result};
use reqwest::{Client, StatusCode};

use crate::ports::auth_authority::{AuthAuthority, AuthorityError};

/// Remote authority asked over HTTP: `POST <url>` with the credential as a
/// bearer token. Any 2xx means authenticated; 401 and 403 are rejections;
/// everything else counts as the authority being unavailable.
pub struct HttpAuthAuthority {
    url: String,
    client: Client,
}

impl HttpAuthAuthority {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .wrap_err("Failed to build auth authority client")?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl AuthAuthority for HttpAuthAuthority {
    async fn is_authenticated(&self, token: &str) -> Result<(), AuthorityError> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthorityError::Unavailable(e.to_string()))?;

        match resp.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let reason = resp.text().await.unwrap_or_default();
                Err(AuthorityError::Rejected(if reason.is_empty() {
                    "not authenticated".to_string()
                } else {
                    reason
                }))
            }
            status => Err(AuthorityError::Unavailable(format!(
                "unexpected status {status} from {}",
                self.url
            ))),
        }
    }
}
