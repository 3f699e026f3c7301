pub mod auth_authority;
pub mod http_client;
pub mod route_repository;
