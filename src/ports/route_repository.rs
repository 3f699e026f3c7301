use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::route::Route;

/// Errors raised while fetching route definitions from a source.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RepositoryError {
    /// The source could not be reached or read
    #[error("Route source unavailable: {0}")]
    Unavailable(String),

    /// The source answered with something that is not a route list
    #[error("Malformed route source payload: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// RouteRepository defines the port for external sources of route definitions
/// (a directory of route files, a remote config service, a database ...).
#[async_trait]
pub trait RouteRepository: Send + Sync {
    /// Fetch the full current list of routes, in no particular order.
    ///
    /// Individual invalid definitions are logged and skipped; only a failure
    /// to reach the source as a whole is an error.
    async fn get_routes(&self) -> RepositoryResult<Vec<Route>>;

    /// Optional stream of change hints. Each message asks the change detector
    /// to reconcile early instead of waiting for its next tick.
    fn watch(&self) -> Option<mpsc::Receiver<()>> {
        None
    }
}
