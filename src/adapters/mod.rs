pub mod auth_authority;
pub mod http_client;
pub mod http_handler;
pub mod route_repositories;

/// Re-export commonly used types from adapters
pub use auth_authority::HttpAuthAuthority;
pub use http_client::HttpClientAdapter;
pub use http_handler::{ConnectionMeta, DispatchPipeline, router};
pub use route_repositories::{FileRouteRepository, HttpRouteRepository};
