use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    time::Duration,
};

use async_trait::async_trait;
use eyre::{Context, Result};
use reqwest::Client;
use scc::HashMap;
use serde_json::Value;

use crate::{
    core::route::{Route, RouteDefinition, validate_batch},
    ports::route_repository::{RepositoryError, RepositoryResult, RouteRepository},
};

/// Stamp handed out to a record that carries no `updatedAt`.
#[derive(Debug, Clone, Copy)]
struct Revision {
    digest: u64,
    updated_at: i64,
}

/// Route repository backed by a config service returning a JSON array of
/// route definitions.
///
/// Records without an `updatedAt` field are versioned by content: the first
/// time a given body is seen for a name it gets a fresh stamp, strictly
/// greater than the previous one for that name.
pub struct HttpRouteRepository {
    url: String,
    client: Client,
    revisions: HashMap<String, Revision>,
}

impl HttpRouteRepository {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .wrap_err("Failed to build config service client")?;
        Ok(Self::with_client(url, client))
    }

    pub fn with_client(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
            revisions: HashMap::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Version stamp for an unversioned record.
    async fn stamp(&self, name: &str, record: &Value) -> i64 {
        let mut hasher = DefaultHasher::new();
        record.to_string().hash(&mut hasher);
        let digest = hasher.finish();
        let now = chrono::Utc::now().timestamp_millis();

        match self.revisions.entry_async(name.to_string()).await {
            scc::hash_map::Entry::Occupied(mut entry) => {
                let revision = entry.get_mut();
                if revision.digest != digest {
                    *revision = Revision {
                        digest,
                        updated_at: now.max(revision.updated_at + 1),
                    };
                }
                revision.updated_at
            }
            scc::hash_map::Entry::Vacant(entry) => {
                entry.insert_entry(Revision {
                    digest,
                    updated_at: now,
                });
                now
            }
        }
    }
}

#[async_trait]
impl RouteRepository for HttpRouteRepository {
    async fn get_routes(&self) -> RepositoryResult<Vec<Route>> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| RepositoryError::Unavailable(format!("{}: {e}", self.url)))?;
        let entries = resp
            .json::<Vec<Value>>()
            .await
            .map_err(|e| RepositoryError::Malformed(format!("{}: {e}", self.url)))?;

        // Decode entry by entry so one bad record does not sink the batch.
        let mut definitions = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let versioned = entry.get("updatedAt").is_some();
            match serde_json::from_value::<RouteDefinition>(entry.clone()) {
                Ok(mut definition) => {
                    if !versioned {
                        definition.updated_at = self.stamp(definition.name.trim(), &entry).await;
                    }
                    definitions.push(definition);
                }
                Err(e) => {
                    tracing::warn!(source = %self.url, index, error = %e, "Skipping undecodable route definition");
                }
            }
        }

        let routes = validate_batch(definitions, &self.url);
        self.revisions
            .retain_async(|name, _| routes.iter().any(|route| &route.name == name))
            .await;
        Ok(routes)
    }
}
