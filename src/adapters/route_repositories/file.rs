use std::{
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use async_trait::async_trait;
use eyre::{Context, Result};
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::{
    core::route::{Route, RouteDefinition, validate_batch},
    ports::route_repository::{RepositoryError, RepositoryResult, RouteRepository},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefinitionFormat {
    Json,
    Yaml,
}

impl DefinitionFormat {
    fn of(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Some(Self::Json),
            Some("yaml") | Some("yml") => Some(Self::Yaml),
            _ => None,
        }
    }
}

/// Route repository reading one route definition per file from a directory
/// tree, optionally watching it for changes.
pub struct FileRouteRepository {
    root: PathBuf,
    // Kept alive for as long as the repository exists.
    _watcher: Option<notify::RecommendedWatcher>,
    hint_rx: std::sync::Mutex<Option<mpsc::Receiver<()>>>,
}

impl FileRouteRepository {
    /// Repository without change hints; the change detector's timer is the
    /// only trigger.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            _watcher: None,
            hint_rx: std::sync::Mutex::new(None),
        }
    }

    /// Repository that also emits a change hint whenever a route file is
    /// created, modified or removed.
    pub fn watched(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let (tx, rx) = mpsc::channel(1);

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if (event.kind.is_modify()
                            || event.kind.is_create()
                            || event.kind.is_remove())
                            && event
                                .paths
                                .iter()
                                .any(|p| DefinitionFormat::of(p).is_some())
                        {
                            tracing::debug!("Route file changed: {:?}", event.kind);
                            // A full channel already holds a pending hint.
                            let _ = tx.try_send(());
                        }
                    }
                    Err(e) => tracing::error!("Route directory watch error: {:?}", e),
                }
            })?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .wrap_err_with(|| format!("Failed to watch route directory {}", root.display()))?;

        Ok(Self {
            root,
            _watcher: Some(watcher),
            hint_rx: std::sync::Mutex::new(Some(rx)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every route file below the root, sorted by path.
    async fn collect_files(&self) -> RepositoryResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
                RepositoryError::Unavailable(format!("cannot read {}: {e}", dir.display()))
            })?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if DefinitionFormat::of(&path).is_some() {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Parse one file. `Ok(None)` for empty files.
    async fn read_definition(path: &Path) -> Result<Option<RouteDefinition>> {
        let Some(format) = DefinitionFormat::of(path) else {
            return Ok(None);
        };
        let contents = tokio::fs::read_to_string(path)
            .await
            .wrap_err("Failed to read route file")?;
        if contents.trim().is_empty() {
            return Ok(None);
        }

        let mut definition: RouteDefinition = match format {
            DefinitionFormat::Json => {
                serde_json::from_str(&contents).wrap_err("Failed to parse JSON route")?
            }
            DefinitionFormat::Yaml => {
                serde_yaml::from_str(&contents).wrap_err("Failed to parse YAML route")?
            }
        };

        let modified = tokio::fs::metadata(path)
            .await
            .and_then(|m| m.modified())
            .wrap_err("Failed to read route file mtime")?;
        definition.updated_at = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Ok(Some(definition))
    }
}

#[async_trait]
impl RouteRepository for FileRouteRepository {
    async fn get_routes(&self) -> RepositoryResult<Vec<Route>> {
        let files = self.collect_files().await?;
        let mut definitions = Vec::with_capacity(files.len());
        for path in &files {
            match Self::read_definition(path).await {
                Ok(Some(definition)) => definitions.push(definition),
                Ok(None) => tracing::debug!(file = %path.display(), "Skipping empty route file"),
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %format!("{e:#}"), "Skipping unreadable route file");
                }
            }
        }
        let source = self.root.display().to_string();
        Ok(validate_batch(definitions, &source))
    }

    fn watch(&self) -> Option<mpsc::Receiver<()>> {
        self.hint_rx.lock().ok().and_then(|mut rx| rx.take())
    }
}
