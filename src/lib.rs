//! Switchyard - an API gateway request-dispatch pipeline.
//!
//! Every inbound request is matched against a hot-reloadable route table,
//! optionally authenticated, rewritten and proxied to the route's backend.
//! Route definitions come from a pluggable repository (a directory of
//! JSON/YAML files or a remote config service) and are reconciled into the
//! live table by a background change detector without ever blocking
//! request handling.
//!
//! # Quick Example
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use switchyard::{
//!     ChangeDetector, DispatchPipeline, FileRouteRepository, HttpClientAdapter, RouteTable,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let table = Arc::new(RouteTable::new());
//! let repository = Arc::new(FileRouteRepository::new("routes/"));
//! let detector = ChangeDetector::new(repository, table.clone(), Duration::from_secs(30));
//! detector.initial_load().await?;
//!
//! let pipeline = DispatchPipeline::new(table, Arc::new(HttpClientAdapter::new()?));
//! let app = switchyard::adapters::router(pipeline);
//! # let _ = app;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! Traits live in `ports`, their implementations in `adapters`, and the
//! route model, matching, reconciliation and authentication logic in
//! `core`.
//!
//! # Concurrency
//! Readers load an immutable [`RouteSnapshot`] through `arc-swap`; writers
//! publish a new snapshot built by path copying, so lookups never wait on
//! a lock. Shared caches use `scc::HashMap`.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{
        ConnectionMeta, DispatchPipeline, FileRouteRepository, HttpAuthAuthority,
        HttpClientAdapter, HttpRouteRepository,
    },
    core::{
        AuthManager, ChangeDetector, GatewayError, Route, RouteSnapshot, RouteTable,
        RouteTableUpdater,
    },
    ports::{auth_authority::AuthAuthority, http_client::HttpClient, route_repository::RouteRepository},
    utils::GracefulShutdown,
};
