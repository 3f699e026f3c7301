//! Background reconciliation of the route table against a repository.
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::http::Method;
use serde_json::{Value, json};
use switchyard::{
    core::{
        ChangeDetector, DetectorState, RequestView, Route, RouteDefinition, RouteTable,
        change_detector,
    },
    ports::route_repository::{RepositoryError, RepositoryResult, RouteRepository},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn route(value: Value) -> Route {
    let definition: RouteDefinition = serde_json::from_value(value).unwrap();
    Route::try_from(definition).unwrap()
}

fn simple(name: &str, target: &str, updated_at: i64) -> Route {
    route(json!({
        "name": name,
        "match": {"prefix": format!("/{name}")},
        "target": target,
        "updatedAt": updated_at
    }))
}

/// Repository whose contents the test swaps at will.
struct ScriptedRepository {
    routes: Mutex<Option<Vec<Route>>>,
    hints: Mutex<Option<mpsc::Receiver<()>>>,
}

impl ScriptedRepository {
    fn new(routes: Vec<Route>) -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(Some(routes)),
            hints: Mutex::new(None),
        })
    }

    fn with_hints(routes: Vec<Route>) -> (Arc<Self>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel(1);
        let repo = Arc::new(Self {
            routes: Mutex::new(Some(routes)),
            hints: Mutex::new(Some(rx)),
        });
        (repo, tx)
    }

    fn set(&self, routes: Vec<Route>) {
        *self.routes.lock().unwrap() = Some(routes);
    }

    fn fail(&self) {
        *self.routes.lock().unwrap() = None;
    }
}

#[async_trait]
impl RouteRepository for ScriptedRepository {
    async fn get_routes(&self) -> RepositoryResult<Vec<Route>> {
        self.routes
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| RepositoryError::Unavailable("scripted outage".to_string()))
    }

    fn watch(&self) -> Option<mpsc::Receiver<()>> {
        self.hints.lock().unwrap().take()
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

fn target_of(table: &RouteTable, name: &str) -> Option<String> {
    table
        .get_route_by_name(name)
        .map(|route| route.target.to_string())
}

#[tokio::test]
async fn test_initial_load_then_upsert_and_delete() {
    let repo = ScriptedRepository::new(vec![
        simple("users", "http://users:1", 1),
        simple("orders", "http://orders:1", 1),
    ]);
    let table = Arc::new(RouteTable::new());
    let detector = ChangeDetector::new(repo.clone(), table.clone(), Duration::from_millis(20));
    assert_eq!(detector.initial_load().await.unwrap(), 2);

    let cancel = CancellationToken::new();
    let (detector_task, updater_task) = change_detector::spawn(detector, 4, cancel.clone());

    // Newer revision replaces the old one.
    repo.set(vec![
        simple("users", "http://users:2", 2),
        simple("orders", "http://orders:1", 1),
    ]);
    eventually(|| target_of(&table, "users").as_deref() == Some("http://users:2/")).await;

    // Same revision with a different body is ignored.
    repo.set(vec![
        simple("users", "http://elsewhere:9", 2),
        simple("orders", "http://orders:1", 1),
    ]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(target_of(&table, "users").as_deref(), Some("http://users:2/"));

    // Deletion rebuilds the table from the fetched list.
    repo.set(vec![simple("users", "http://users:2", 2)]);
    eventually(|| table.len() == 1).await;
    let method = Method::GET;
    assert!(
        table
            .get_route_by_request(&RequestView::new(None, "/orders/1", &method))
            .is_none()
    );

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), detector_task)
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(1), updater_task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_fetch_failure_keeps_current_table() {
    let repo = ScriptedRepository::new(vec![simple("users", "http://users:1", 1)]);
    let table = Arc::new(RouteTable::new());
    let detector = ChangeDetector::new(repo.clone(), table.clone(), Duration::from_millis(20));
    detector.initial_load().await.unwrap();
    let mut states = detector.subscribe();

    let cancel = CancellationToken::new();
    let (detector_task, _updater_task) = change_detector::spawn(detector, 4, cancel.clone());

    repo.fail();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(table.len(), 1);
    assert!(table.get_route_by_name("users").is_some());

    // Recovery resumes reconciliation.
    repo.set(vec![
        simple("users", "http://users:1", 1),
        simple("billing", "http://billing:1", 1),
    ]);
    eventually(|| table.len() == 2).await;

    cancel.cancel();
    detector_task.await.unwrap();
    states.changed().await.ok();
    assert_eq!(*states.borrow_and_update(), DetectorState::Stopped);
}

#[tokio::test]
async fn test_initial_load_failure_is_reported() {
    let repo = ScriptedRepository::new(Vec::new());
    repo.fail();
    let table = Arc::new(RouteTable::new());
    let detector = ChangeDetector::new(repo, table.clone(), Duration::from_secs(30));
    assert!(matches!(
        detector.initial_load().await,
        Err(RepositoryError::Unavailable(_))
    ));
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_change_hint_triggers_early_reconciliation() {
    let (repo, hints) = ScriptedRepository::with_hints(vec![simple("users", "http://users:1", 1)]);
    let table = Arc::new(RouteTable::new());
    let detector = ChangeDetector::new(repo.clone(), table.clone(), Duration::from_secs(3600));
    detector.initial_load().await.unwrap();

    let cancel = CancellationToken::new();
    let _tasks = change_detector::spawn(detector, 4, cancel.clone());

    repo.set(vec![
        simple("users", "http://users:1", 1),
        simple("search", "http://search:1", 5),
    ]);
    hints.send(()).await.unwrap();
    eventually(|| table.get_route_by_name("search").is_some()).await;

    cancel.cancel();
}
