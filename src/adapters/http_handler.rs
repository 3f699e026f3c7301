use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Body as AxumBody,
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::{
    core::{
        AuthManager, GatewayError, RequestView, RouteTable,
        auth::AuthError,
        forwarding::{
            apply_forwarding_headers, build_upstream_uri, inject_identity,
            remove_hop_by_hop_headers, sanitize_identity_headers, strip_route_prefix,
            target_authority,
        },
    },
    ports::http_client::HttpClient,
    tracing_setup::request_span,
};

/// Path roots served by the gateway itself and never proxied.
const RESERVED_ROOTS: [&str; 2] = ["/health", "/internal"];

pub fn is_reserved_path(path: &str) -> bool {
    RESERVED_ROOTS.iter().any(|root| {
        path.strip_prefix(root)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}

/// Facts about the inbound connection that the request itself does not carry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionMeta {
    pub peer: Option<SocketAddr>,
    pub tls: bool,
}

impl ConnectionMeta {
    pub fn from_peer(peer: SocketAddr) -> Self {
        Self {
            peer: Some(peer),
            tls: false,
        }
    }
}

/// Per-request orchestration: resolve the route, authenticate when the
/// route asks for it, rewrite the request and forward it to the backend.
#[derive(Clone)]
pub struct DispatchPipeline {
    routes: Arc<RouteTable>,
    auth: Option<Arc<AuthManager>>,
    http_client: Arc<dyn HttpClient>,
}

impl DispatchPipeline {
    pub fn new(routes: Arc<RouteTable>, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            routes,
            auth: None,
            http_client,
        }
    }

    pub fn with_auth(mut self, auth: Arc<AuthManager>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub async fn dispatch(
        &self,
        mut req: Request,
        conn: ConnectionMeta,
    ) -> Result<Response<AxumBody>, GatewayError> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let no_route = || GatewayError::NoRoute {
            method: method.to_string(),
            path: path.clone(),
        };

        if is_reserved_path(&path) {
            return Err(no_route());
        }
        let route = self
            .routes
            .get_route_by_request(&RequestView::from_request(&req))
            .ok_or_else(no_route)?;
        tracing::Span::current().record("route", route.name.as_str());

        let claims = if route.requires_auth(&path, &method) {
            let Some(auth) = &self.auth else {
                tracing::error!(route = %route.name, "Route requires authentication but no strategy is configured");
                return Err(GatewayError::Unauthenticated {
                    route: route.name.clone(),
                    source: AuthError::NotConfigured,
                });
            };
            match auth.authenticate(&mut req).await {
                Ok(claims) => Some(claims),
                Err(source) => {
                    tracing::warn!(route = %route.name, error = %source, "Authentication failed");
                    return Err(GatewayError::Unauthenticated {
                        route: route.name.clone(),
                        source,
                    });
                }
            }
        } else {
            None
        };

        let forward_path = match route.prefix() {
            Some(prefix) if route.strip_prefix => strip_route_prefix(&path, prefix),
            _ => path.clone(),
        };
        let uri = build_upstream_uri(&route.target, &forward_path, req.uri().query())
            .map_err(|e| GatewayError::Internal(format!("invalid upstream uri: {e}")))?;
        let authority = HeaderValue::from_str(target_authority(&route.target))
            .map_err(|e| GatewayError::Internal(format!("invalid target authority: {e}")))?;

        let (mut parts, body) = req.into_parts();
        remove_hop_by_hop_headers(&mut parts.headers);
        sanitize_identity_headers(&mut parts.headers);
        apply_forwarding_headers(&mut parts.headers, conn.peer, conn.tls);
        if let Some(claims) = &claims {
            inject_identity(&mut parts.headers, claims);
        }
        parts.headers.insert(header::HOST, authority);
        parts.uri = uri;

        tracing::debug!(route = %route.name, upstream = %parts.uri, "Forwarding request");
        self.http_client
            .send_request(Request::from_parts(parts, body), route.timeout)
            .await
            .map_err(|source| {
                tracing::error!(
                    route = %route.name,
                    target = %route.target,
                    error = %source,
                    "Backend request failed"
                );
                GatewayError::Proxy {
                    route: route.name.clone(),
                    target: route.target.to_string(),
                    source,
                }
            })
    }

    /// Dispatch and turn every failure into its client response.
    pub async fn handle(&self, req: Request, conn: ConnectionMeta) -> Response<AxumBody> {
        let span = request_span(req.method().as_str(), req.uri().path());
        async move {
            let response = match self.dispatch(req, conn).await {
                Ok(response) => response,
                Err(e) => e.into_response(),
            };
            tracing::Span::current().record("http.status_code", response.status().as_u16());
            response
        }
        .instrument(span)
        .await
    }
}

async fn health(State(pipeline): State<DispatchPipeline>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "routes": pipeline.routes().len(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

async fn proxy(State(pipeline): State<DispatchPipeline>, req: Request) -> Response<AxumBody> {
    let conn = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(peer)| ConnectionMeta::from_peer(*peer))
        .unwrap_or_default();
    pipeline.handle(req, conn).await
}

/// Router serving `/health` and sending everything else through `pipeline`.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` so
/// the pipeline sees the peer address.
pub fn router(pipeline: DispatchPipeline) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", any(proxy))
        .route("/{*path}", any(proxy))
        .with_state(pipeline)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use async_trait::async_trait;
    use axum::http::{HeaderMap, Method};
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        core::{
            Claims, Route, RouteDefinition,
            auth::{AuthStrategy, test_support::unsigned_token},
            forwarding::{USER_ID, X_FORWARDED_FOR, X_FORWARDED_HOST},
        },
        ports::http_client::{HttpClientError, HttpClientResult},
    };

    #[derive(Debug, Clone)]
    struct Seen {
        uri: String,
        headers: HeaderMap,
        timeout: Duration,
    }

    #[derive(Default)]
    struct RecordingClient {
        seen: Mutex<Vec<Seen>>,
        fail: bool,
    }

    impl RecordingClient {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Seen> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpClient for RecordingClient {
        async fn send_request(
            &self,
            req: Request,
            timeout: Duration,
        ) -> HttpClientResult<Response<AxumBody>> {
            self.seen.lock().unwrap().push(Seen {
                uri: req.uri().to_string(),
                headers: req.headers().clone(),
                timeout,
            });
            if self.fail {
                return Err(HttpClientError::ConnectionError("refused".to_string()));
            }
            Ok(Response::new(AxumBody::from("backend")))
        }
    }

    /// Accepts tokens whose payload decodes; rejects everything else.
    struct UnverifiedStrategy;

    #[async_trait]
    impl AuthStrategy for UnverifiedStrategy {
        async fn authenticate(&self, headers: &HeaderMap) -> Result<Claims, AuthError> {
            let token = crate::core::auth::bearer_token(headers)?;
            crate::core::auth::decode_unverified(token)
        }
    }

    fn route(value: serde_json::Value) -> Route {
        let definition: RouteDefinition = serde_json::from_value(value).unwrap();
        Route::try_from(definition).unwrap()
    }

    fn table() -> Arc<RouteTable> {
        Arc::new(RouteTable::with_routes([
            route(json!({
                "name": "users",
                "match": {"prefix": "/users"},
                "target": "http://svc:9000",
                "timeout": "3s"
            })),
            route(json!({
                "name": "orders",
                "match": {"host": "a.example.com", "prefix": "/api"},
                "target": "http://orders:8080/v1",
                "stripPrefix": true,
                "authentication": {"required": true, "except": [{"path": "/api/ping"}]}
            })),
        ]))
    }

    fn request(method: Method, uri: &str, host: &str) -> Request {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, host)
            .body(AxumBody::empty())
            .unwrap()
    }

    fn peer() -> ConnectionMeta {
        ConnectionMeta::from_peer("10.0.0.9:5555".parse().unwrap())
    }

    #[test]
    fn test_reserved_paths() {
        assert!(is_reserved_path("/health"));
        assert!(is_reserved_path("/internal/routes"));
        assert!(!is_reserved_path("/healthz"));
        assert!(!is_reserved_path("/users"));
    }

    #[tokio::test]
    async fn test_forwards_to_route_target() {
        let client = Arc::new(RecordingClient::default());
        let pipeline = DispatchPipeline::new(table(), client.clone());

        let mut req = request(Method::GET, "/users/42?page=2", "gw.local");
        req.headers_mut()
            .insert(USER_ID, HeaderValue::from_static("spoofed"));
        let resp = pipeline.dispatch(req, peer()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.uri, "http://svc:9000/users/42?page=2");
        assert_eq!(call.timeout, Duration::from_secs(3));
        assert_eq!(call.headers[header::HOST], "svc:9000");
        assert_eq!(call.headers[X_FORWARDED_HOST], "gw.local");
        assert_eq!(call.headers[X_FORWARDED_FOR], "10.0.0.9");
        assert!(!call.headers.contains_key(USER_ID));
    }

    #[tokio::test]
    async fn test_no_route_is_not_found() {
        let client = Arc::new(RecordingClient::default());
        let pipeline = DispatchPipeline::new(table(), client.clone());

        let err = pipeline
            .dispatch(request(Method::GET, "/nothing", "gw.local"), peer())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NoRoute { .. }));

        // Host-scoped route does not answer for other hosts.
        let err = pipeline
            .dispatch(request(Method::GET, "/api/orders", "b.example.com"), peer())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_auth_required_without_strategy() {
        let client = Arc::new(RecordingClient::default());
        let pipeline = DispatchPipeline::new(table(), client.clone());

        let err = pipeline
            .dispatch(request(Method::GET, "/api/orders", "a.example.com"), peer())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Unauthenticated {
                source: AuthError::NotConfigured,
                ..
            }
        ));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_authenticated_request_gets_identity_and_stripped_path() {
        let client = Arc::new(RecordingClient::default());
        let pipeline = DispatchPipeline::new(table(), client.clone())
            .with_auth(Arc::new(AuthManager::new(Arc::new(UnverifiedStrategy))));

        let token = unsigned_token(json!({"userId": 7, "permissions": ["read"]}));
        let mut req = request(Method::POST, "/api/orders/1", "a.example.com");
        req.headers_mut().insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        pipeline.dispatch(req, peer()).await.unwrap();

        let call = &client.calls()[0];
        assert_eq!(call.uri, "http://orders:8080/v1/orders/1");
        assert_eq!(call.headers[USER_ID], "7");
        assert_eq!(call.headers["permissions"], "read");
        assert!(!call.headers.contains_key(header::AUTHORIZATION));
    }

    #[tokio::test]
    async fn test_missing_credential_is_unauthorized() {
        let client = Arc::new(RecordingClient::default());
        let pipeline = DispatchPipeline::new(table(), client.clone())
            .with_auth(Arc::new(AuthManager::new(Arc::new(UnverifiedStrategy))));

        let resp = pipeline
            .handle(request(Method::GET, "/api/orders", "a.example.com"), peer())
            .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(client.calls().is_empty());

        // Excepted path goes through without a token.
        let resp = pipeline
            .handle(request(Method::GET, "/api/ping", "a.example.com"), peer())
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(client.calls()[0].uri, "http://orders:8080/v1/ping");
    }

    #[tokio::test]
    async fn test_backend_failure_is_bad_gateway() {
        let pipeline = DispatchPipeline::new(table(), Arc::new(RecordingClient::failing()));
        let resp = pipeline
            .handle(request(Method::GET, "/users", "gw.local"), peer())
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"error": "Service unavailable"}));
    }

    #[tokio::test]
    async fn test_router_health_and_reserved() {
        let client = Arc::new(RecordingClient::default());
        let app = router(DispatchPipeline::new(table(), client.clone()));

        let resp = app
            .clone()
            .oneshot(request(Method::GET, "/health", "gw.local"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["routes"], 2);

        let resp = app
            .clone()
            .oneshot(request(Method::GET, "/internal/debug", "gw.local"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app
            .oneshot(request(Method::DELETE, "/users/1", "gw.local"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(client.calls().len(), 1);
    }
}
