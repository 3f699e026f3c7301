use async_trait::async_trait;
use thiserror::Error;

/// Outcome of a failed upstream credential check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthorityError {
    /// The authority looked at the credential and refused it
    #[error("Credential rejected: {0}")]
    Rejected(String),

    /// The authority could not be reached or answered unexpectedly
    #[error("Authority unavailable: {0}")]
    Unavailable(String),
}

/// AuthAuthority defines the port for the upstream service that has the final
/// say on whether a bearer credential is valid.
#[async_trait]
pub trait AuthAuthority: Send + Sync + 'static {
    /// Ask the authority whether `token` (without the `Bearer ` prefix) is
    /// currently authenticated.
    async fn is_authenticated(&self, token: &str) -> Result<(), AuthorityError>;
}
