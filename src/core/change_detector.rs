//! Background reconciliation of the route table against a route repository.
//!
//! Each tick walks `Idle -> Fetching -> Diffing -> Applying -> Idle`:
//! fetch the full route list, diff it against the current table and publish
//! the resulting [`RouteChange`] on a bounded channel. A single
//! [`RouteTableUpdater`] drains that channel into the [`RouteTable`].
//!
//! A route missing from a fetch is never removed on its own. Any deletion
//! turns the whole batch into [`RouteChange::Replace`], which swaps in a
//! freshly built table.
use std::{collections::HashSet, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use crate::{
    core::{
        route::Route,
        route_table::{RouteSnapshot, RouteTable},
    },
    ports::route_repository::{RepositoryError, RouteRepository},
};

/// Default reconciliation interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// A batch of changes to apply to the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteChange {
    /// New or newer routes, applied one by one.
    Upsert(Vec<Route>),
    /// Full reload: the table becomes exactly these routes.
    Replace(Vec<Route>),
}

/// Observable phase of the reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Idle,
    Fetching,
    Diffing,
    Applying,
    Stopped,
}

/// Compare a fresh fetch with the current table.
///
/// Returns `None` when nothing changed. Routes whose `updated_at` did not
/// increase are left alone so their matchers are not recompiled.
pub fn diff_routes(current: &RouteSnapshot, fetched: Vec<Route>) -> Option<RouteChange> {
    let fetched_names: HashSet<&str> = fetched.iter().map(|r| r.name.as_str()).collect();
    let deleted: Vec<String> = current
        .routes()
        .iter()
        .filter(|r| !fetched_names.contains(r.name.as_str()))
        .map(|r| r.name.clone())
        .collect();

    if !deleted.is_empty() {
        tracing::info!(
            deleted = ?deleted,
            "Route deletion detected, scheduling full reload"
        );
        return Some(RouteChange::Replace(fetched));
    }

    let changed: Vec<Route> = fetched
        .into_iter()
        .filter(|route| match current.get(&route.name) {
            None => {
                tracing::info!(route = %route.name, target = %route.target, "New route detected");
                true
            }
            Some(existing) if route.updated_at > existing.updated_at => {
                tracing::info!(route = %route.name, target = %route.target, "Route update detected");
                true
            }
            Some(_) => false,
        })
        .collect();

    (!changed.is_empty()).then_some(RouteChange::Upsert(changed))
}

/// Polls a [`RouteRepository`] and publishes route changes.
pub struct ChangeDetector {
    repository: Arc<dyn RouteRepository>,
    table: Arc<RouteTable>,
    interval: Duration,
    state: watch::Sender<DetectorState>,
}

impl ChangeDetector {
    pub fn new(
        repository: Arc<dyn RouteRepository>,
        table: Arc<RouteTable>,
        interval: Duration,
    ) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            interval
        };
        let (state, _) = watch::channel(DetectorState::Idle);
        Self {
            repository,
            table,
            interval,
            state,
        }
    }

    /// Subscribe to state transitions (mainly for diagnostics and tests).
    pub fn subscribe(&self) -> watch::Receiver<DetectorState> {
        self.state.subscribe()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn set_state(&self, state: DetectorState) {
        self.state.send_replace(state);
    }

    /// Synchronous first load, applied straight to the table.
    ///
    /// A fetch failure here is returned to the caller: the gateway cannot
    /// serve without any route knowledge.
    pub async fn initial_load(&self) -> Result<usize, RepositoryError> {
        if let Some(change) = self.check().await? {
            self.set_state(DetectorState::Applying);
            self.table.apply(change);
        }
        self.set_state(DetectorState::Idle);
        let count = self.table.len();
        tracing::info!(routes = count, "Initial route table loaded");
        Ok(count)
    }

    /// Fetch and diff once.
    pub async fn check(&self) -> Result<Option<RouteChange>, RepositoryError> {
        self.set_state(DetectorState::Fetching);
        let fetched = match self.repository.get_routes().await {
            Ok(routes) => routes,
            Err(e) => {
                self.set_state(DetectorState::Idle);
                return Err(e);
            }
        };
        self.set_state(DetectorState::Diffing);
        Ok(diff_routes(&self.table.snapshot(), fetched))
    }

    /// Reconcile until `cancel` fires. Fetch errors are logged and retried on
    /// the next tick. Dropping the returned sender half (when this returns)
    /// lets the updater finish.
    pub async fn run(self, changes: mpsc::Sender<RouteChange>, cancel: CancellationToken) {
        tracing::info!(interval = ?self.interval, "Route change detector started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the initial load already ran.
        ticker.tick().await;

        let mut hints = self.repository.watch();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                hint = recv_hint(&mut hints) => {
                    if hint.is_none() {
                        tracing::debug!("Route change hint stream closed");
                        hints = None;
                        continue;
                    }
                    tracing::debug!("Route change hint received");
                }
            }

            match self.check().await {
                Ok(Some(change)) => {
                    self.set_state(DetectorState::Applying);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        sent = changes.send(change) => {
                            if sent.is_err() {
                                tracing::warn!("Route table updater is gone, stopping change detector");
                                break;
                            }
                        }
                    }
                }
                Ok(None) => tracing::debug!("No route changes detected"),
                Err(e) => {
                    tracing::error!(error = %e, "Error checking for route changes, keeping current table");
                }
            }
            self.set_state(DetectorState::Idle);
        }

        self.set_state(DetectorState::Stopped);
        tracing::info!("Route change detector stopped");
    }
}

async fn recv_hint(hints: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match hints {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Single consumer applying change batches to the route table.
pub struct RouteTableUpdater {
    table: Arc<RouteTable>,
    changes: mpsc::Receiver<RouteChange>,
}

impl RouteTableUpdater {
    pub fn new(table: Arc<RouteTable>, changes: mpsc::Receiver<RouteChange>) -> Self {
        Self { table, changes }
    }

    /// Apply batches until every sender is dropped.
    pub async fn run(mut self) {
        while let Some(change) = self.changes.recv().await {
            self.table.apply(change);
        }
        tracing::debug!("Route table updater finished");
    }
}

/// Spawn the detector loop and its updater, connected by a bounded channel
/// of `capacity` batches.
pub fn spawn(
    detector: ChangeDetector,
    capacity: usize,
    cancel: CancellationToken,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let updater = RouteTableUpdater::new(detector.table.clone(), rx);
    let updater_handle = tokio::spawn(updater.run());
    let detector_handle = tokio::spawn(detector.run(tx, cancel));
    (detector_handle, updater_handle)
}
