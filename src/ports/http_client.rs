use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to backend fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when the backend does not answer within the route timeout
    #[error("Timeout error after {0:?}")]
    Timeout(Duration),

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for making HTTP requests to backends
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request to a backend server
    ///
    /// # Arguments
    /// * `req` - The HTTP request to send, with an absolute backend URI
    /// * `timeout` - Upper bound on the wait for response headers; also the
    ///   lifetime of idle pooled connections used for this request
    ///
    /// # Returns
    /// A future that resolves to the backend's response or an error
    async fn send_request(
        &self,
        req: Request<AxumBody>,
        timeout: Duration,
    ) -> HttpClientResult<Response<AxumBody>>;
}
