use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response, Version, header};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use scc::HashMap;
use tokio::time::timeout;
use tracing::Instrument;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

type PooledClient = Client<HttpsConnector<HttpConnector>, AxumBody>;

/// Backend transport using Hyper with Rustls (HTTP/1.1 + HTTP/2 via ALPN).
///
/// Each distinct route timeout gets its own connection pool whose idle
/// lifetime equals that timeout; the same timeout bounds the wait for
/// response headers.
pub struct HttpClientAdapter {
    connector: HttpsConnector<HttpConnector>,
    clients: HashMap<Duration, PooledClient>,
}

impl HttpClientAdapter {
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }
        tracing::debug!("Loaded {} native root certificates.", root_cert_store.len());

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        Ok(Self {
            connector,
            clients: HashMap::new(),
        })
    }

    /// Pooled client for `idle_timeout`, created on first use.
    async fn client_for(&self, idle_timeout: Duration) -> PooledClient {
        if let Some(client) = self
            .clients
            .read_async(&idle_timeout, |_, client| client.clone())
            .await
        {
            return client;
        }
        let entry = self
            .clients
            .entry_async(idle_timeout)
            .await
            .or_insert_with(|| {
                tracing::debug!(idle_timeout = ?idle_timeout, "Creating backend connection pool");
                Client::builder(TokioExecutor::new())
                    .pool_idle_timeout(idle_timeout)
                    .build(self.connector.clone())
            });
        entry.get().clone()
    }

    /// Number of distinct connection pools (one per timeout seen).
    pub fn pool_count(&self) -> usize {
        self.clients.len()
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        req: Request<AxumBody>,
        request_timeout: Duration,
    ) -> HttpClientResult<Response<AxumBody>> {
        if req.uri().host().is_none() {
            tracing::error!("Outgoing URI has no host: {}", req.uri());
            return Err(HttpClientError::InvalidRequest(
                "Outgoing URI has no host".to_string(),
            ));
        }

        let backend_identifier = format!(
            "{}://{}",
            req.uri().scheme_str().unwrap_or("http"),
            req.uri()
                .authority()
                .map_or_else(|| "unknown".to_string(), |a| a.to_string())
        );
        let span = crate::tracing_setup::backend_request_span(
            &backend_identifier,
            req.method().as_str(),
            req.uri().path(),
        );

        async move {
            let client = self.client_for(request_timeout).await;

            let (mut parts, body) = req.into_parts();
            parts.version = Version::HTTP_11;
            let method = parts.method.clone();
            let uri = parts.uri.clone();
            tracing::debug!("Sending request: {} {}", method, uri);

            match timeout(request_timeout, client.request(Request::from_parts(parts, body))).await
            {
                Ok(Ok(response)) => {
                    tracing::Span::current()
                        .record("http.status_code", response.status().as_u16());

                    let (mut parts, hyper_body) = response.into_parts();
                    // Axum re-frames the streamed body.
                    parts.headers.remove(header::TRANSFER_ENCODING);
                    Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
                }
                Ok(Err(e)) => {
                    tracing::Span::current().record("http.status_code", 599u16);
                    tracing::error!(
                        "Error making request to backend {} ({} {}): {}",
                        backend_identifier,
                        method,
                        uri,
                        e
                    );
                    Err(HttpClientError::ConnectionError(format!(
                        "Request to {method} {uri} failed: {e}"
                    )))
                }
                Err(_) => {
                    tracing::Span::current().record("http.status_code", 504u16);
                    tracing::error!(
                        "Backend {} did not answer {} {} within {:?}",
                        backend_identifier,
                        method,
                        uri,
                        request_timeout
                    );
                    Err(HttpClientError::Timeout(request_timeout))
                }
            }
        }
        .instrument(span)
        .await
    }
}
