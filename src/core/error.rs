use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{core::auth::AuthError, ports::http_client::HttpClientError};

/// Per-request failures of the dispatch pipeline.
///
/// Every variant is contained to the response of the request that raised it.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("no route matches {method} {path}")]
    NoRoute { method: String, path: String },

    #[error("authentication failed for route '{route}': {source}")]
    Unauthenticated {
        route: String,
        #[source]
        source: AuthError,
    },

    #[error("backend {target} for route '{route}' failed: {source}")]
    Proxy {
        route: String,
        target: String,
        #[source]
        source: HttpClientError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NoRoute { .. } => StatusCode::NOT_FOUND,
            GatewayError::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            GatewayError::Proxy { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to clients. Details stay in the logs.
    fn public_message(&self) -> &'static str {
        match self {
            GatewayError::NoRoute { .. } => "No route found for this request",
            GatewayError::Unauthenticated { .. } => "Authentication required",
            GatewayError::Proxy { .. } => "Service unavailable",
            GatewayError::Internal(_) => "Internal server error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.public_message() }))).into_response()
    }
}
