//! Full request path: gateway router in front of real backend and
//! authority servers.
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    extract::Request,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::{Value, json};
use switchyard::{
    adapters::{DispatchPipeline, HttpAuthAuthority, HttpClientAdapter, router},
    core::{
        AuthManager, Route, RouteDefinition, RouteTable,
        auth::{InMemoryDecisionCache, RemoteValidatorStrategy},
    },
};
use tokio::net::TcpListener;

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

/// Backend answering every request with what it received. Paths under
/// `/status/<code>` answer with that status and a plain-text body instead.
async fn backend(hits: Arc<AtomicUsize>) -> SocketAddr {
    let app = Router::new().fallback(move |req: Request| {
        let hits = hits.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            if let Some(code) = req.uri().path().strip_prefix("/status/") {
                let status = code.parse().ok().and_then(|c| StatusCode::from_u16(c).ok());
                let status = status.unwrap_or(StatusCode::IM_A_TEAPOT);
                return (
                    status,
                    [("x-backend", "status")],
                    format!("backend said {}", status.as_u16()),
                )
                    .into_response();
            }
            let headers: serde_json::Map<String, Value> = req
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.to_string(),
                        Value::String(value.to_str().unwrap_or_default().to_string()),
                    )
                })
                .collect();
            Json(json!({
                "method": req.method().as_str(),
                "path": req.uri().path(),
                "query": req.uri().query(),
                "headers": headers,
            }))
            .into_response()
        }
    });
    serve(app).await
}

/// Authority accepting only `good-token`.
async fn authority(calls: Arc<AtomicUsize>, good_token: String) -> SocketAddr {
    let app = Router::new().route(
        "/validate",
        post(move |headers: HeaderMap| {
            let calls = calls.clone();
            let expected = format!("Bearer {good_token}");
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                    Some(value) if value == expected => StatusCode::OK,
                    _ => StatusCode::UNAUTHORIZED,
                }
            }
        }),
    );
    serve(app).await
}

fn token(payload: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.signature")
}

fn route(value: Value) -> Route {
    let definition: RouteDefinition = serde_json::from_value(value).unwrap();
    Route::try_from(definition).unwrap()
}

struct Harness {
    gateway: String,
    client: reqwest::Client,
    backend_hits: Arc<AtomicUsize>,
    authority_calls: Arc<AtomicUsize>,
    good_token: String,
    bad_token: String,
}

async fn harness() -> Harness {
    let exp = chrono::Utc::now().timestamp() + 3600;
    let good_token = token(json!({
        "userId": 7,
        "userUuid": "8f14e45f",
        "permissions": ["orders:read", "orders:write"],
        "profiles": [{"id": 1}, {"id": 2}],
        "exp": exp
    }));
    let bad_token = token(json!({"userId": 8, "exp": exp}));

    let backend_hits = Arc::new(AtomicUsize::new(0));
    let backend_addr = backend(backend_hits.clone()).await;
    let authority_calls = Arc::new(AtomicUsize::new(0));
    let authority_addr = authority(authority_calls.clone(), good_token.clone()).await;

    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed_addr = closed.local_addr().unwrap();
    drop(closed);

    let table = Arc::new(RouteTable::with_routes([
        route(json!({
            "name": "users",
            "match": {"prefix": "/users"},
            "target": format!("http://{backend_addr}")
        })),
        route(json!({
            "name": "orders",
            "match": {"prefix": "/api/orders"},
            "target": format!("http://{backend_addr}"),
            "stripPrefix": true,
            "authentication": {"required": true}
        })),
        route(json!({
            "name": "status",
            "match": {"prefix": "/status"},
            "target": format!("http://{backend_addr}")
        })),
        route(json!({
            "name": "down",
            "match": {"prefix": "/down"},
            "target": format!("http://{closed_addr}"),
            "timeout": "2s"
        })),
    ]));

    let strategy = RemoteValidatorStrategy::new(
        Arc::new(
            HttpAuthAuthority::new(
                format!("http://{authority_addr}/validate"),
                Duration::from_secs(5),
            )
            .unwrap(),
        ),
        Arc::new(InMemoryDecisionCache::new()),
    );
    let pipeline = DispatchPipeline::new(table, Arc::new(HttpClientAdapter::new().unwrap()))
        .with_auth(Arc::new(AuthManager::new(Arc::new(strategy))));
    let gateway = serve(router(pipeline)).await;

    Harness {
        gateway: format!("http://{gateway}"),
        client: reqwest::Client::new(),
        backend_hits,
        authority_calls,
        good_token,
        bad_token,
    }
}

#[tokio::test]
async fn test_public_route_is_proxied_with_forwarding_headers() {
    let h = harness().await;
    let resp = h
        .client
        .get(format!("{}/users/42?expand=profile", h.gateway))
        .header("user-id", "spoofed")
        .header("permissions", "admin")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let echo: Value = resp.json().await.unwrap();

    assert_eq!(echo["path"], "/users/42");
    assert_eq!(echo["query"], "expand=profile");
    let headers = &echo["headers"];
    assert!(headers.get("user-id").is_none());
    assert!(headers.get("permissions").is_none());
    assert_eq!(headers["x-forwarded-host"], h.gateway.trim_start_matches("http://"));
    assert_eq!(headers["x-forwarded-for"], "127.0.0.1");
    assert_eq!(headers["x-forwarded-proto"], "http");
    assert_eq!(headers["x-real-ip"], "127.0.0.1");
    assert_eq!(h.authority_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_protected_route_without_token_never_reaches_backend() {
    let h = harness().await;
    let resp = h
        .client
        .get(format!("{}/api/orders/7", h.gateway))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"error": "Authentication required"}));
    assert_eq!(h.backend_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_valid_token_injects_identity_and_is_cached() {
    let h = harness().await;
    for _ in 0..2 {
        let resp = h
            .client
            .post(format!("{}/api/orders/7", h.gateway))
            .bearer_auth(&h.good_token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let echo: Value = resp.json().await.unwrap();
        assert_eq!(echo["method"], "POST");
        assert_eq!(echo["path"], "/7");
        let headers = &echo["headers"];
        assert_eq!(headers["user-id"], "7");
        assert_eq!(headers["user-uuid"], "8f14e45f");
        assert_eq!(headers["profile-ids"], "1,2");
        assert_eq!(headers["permissions"], "orders:read,orders:write");
        assert!(headers.get("authorization").is_none());
    }
    assert_eq!(h.authority_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_rejected_token_is_negatively_cached() {
    let h = harness().await;
    for _ in 0..3 {
        let resp = h
            .client
            .get(format!("{}/api/orders", h.gateway))
            .bearer_auth(&h.bad_token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
    assert_eq!(h.authority_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let h = harness().await;
    let resp = h
        .client
        .get(format!("{}/down/anything", h.gateway))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"error": "Service unavailable"}));
}

#[tokio::test]
async fn test_backend_error_status_is_passed_through() {
    let h = harness().await;
    for code in [404u16, 503] {
        let resp = h
            .client
            .get(format!("{}/status/{code}", h.gateway))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), code);
        assert_eq!(resp.headers()["x-backend"], "status");
        assert_eq!(resp.text().await.unwrap(), format!("backend said {code}"));
    }
    assert_eq!(h.backend_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unknown_path_and_health() {
    let h = harness().await;
    let resp = h
        .client
        .get(format!("{}/nothing/here", h.gateway))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"error": "No route found for this request"}));

    let resp = h
        .client
        .get(format!("{}/health", h.gateway))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["routes"], 4);
    assert_eq!(h.backend_hits.load(Ordering::SeqCst), 0);
}
