use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use switchyard::{
    adapters::{
        DispatchPipeline, FileRouteRepository, HttpAuthAuthority, HttpClientAdapter,
        HttpRouteRepository, router,
    },
    config::{
        GatewayConfigValidator, load_config,
        models::{AuthConfig, GatewayConfig, KeySourceConfig, RepositoryConfig},
    },
    core::{
        AuthManager, ChangeDetector, RouteTable,
        auth::{
            AuthStrategy, EnvKeySource, HttpKeySource, InMemoryDecisionCache, JwtStrategy,
            KeySource, RemoteValidatorStrategy, StaticKeySource, jwt::spawn_key_refresh,
        },
        change_detector,
    },
    ports::{http_client::HttpClient, route_repository::RouteRepository},
    tracing_setup,
    utils::{GracefulShutdown, ShutdownReason},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "switchyard.yaml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate the gateway configuration and every route definition
    Validate {
        #[clap(short, long, default_value = "switchyard.yaml")]
        config: String,
    },
    /// Start the gateway (default)
    Serve {
        #[clap(short, long, default_value = "switchyard.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    match args.command {
        Some(Commands::Validate { config }) => validate_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let config = load_config(config_path)
        .await
        .wrap_err_with(|| format!("Failed to load configuration from {config_path}"))?;
    tracing_setup::init_tracing(&config.logging).wrap_err("Failed to initialize tracing")?;
    GatewayConfigValidator::validate(&config).wrap_err("Invalid configuration")?;

    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        tracing::warn!(
            "CryptoProvider::install_default for aws-lc-rs reported an error: {:?}. \
            A provider was probably installed already.",
            e
        );
    }

    let shutdown = GracefulShutdown::new(config.shutdown.drain_timeout());
    let mut background: Vec<JoinHandle<()>> = Vec::new();

    // Routes
    let repository = build_repository(&config.repository, true)?;
    let table = Arc::new(RouteTable::new());
    let detector = ChangeDetector::new(
        repository,
        table.clone(),
        config.change_detector.interval(),
    );
    detector
        .initial_load()
        .await
        .wrap_err("Initial route load failed")?;
    let (detector_handle, updater_handle) = change_detector::spawn(
        detector,
        config.change_detector.channel_capacity,
        shutdown.token(),
    );
    background.push(detector_handle);
    background.push(updater_handle);

    // Authentication and transport
    let auth = build_auth(config.auth.as_ref(), shutdown.token(), &mut background).await?;
    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().wrap_err("Failed to create HTTP client adapter")?);

    let mut pipeline = DispatchPipeline::new(table.clone(), http_client);
    if let Some(auth) = auth {
        pipeline = pipeline.with_auth(auth);
    }
    let app = router(pipeline);

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .wrap_err("Failed to parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Failed to bind to {addr}"))?;
    tracing::info!(%addr, routes = table.len(), "Switchyard listening");

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.run_signal_handler().await });
    }

    let server_token = shutdown.token();
    let mut server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await
    });

    tokio::select! {
        res = &mut server => {
            shutdown.trigger_shutdown(ShutdownReason::Manual);
            join_background(background).await;
            return match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(eyre!(e).wrap_err("Server error")),
                Err(e) => Err(eyre!(e).wrap_err("Server task failed")),
            };
        }
        _ = shutdown.wait_for_shutdown_signal() => {}
    }

    tracing::info!(
        drain_timeout = ?shutdown.drain_timeout(),
        "Draining in-flight requests"
    );
    let drained = shutdown
        .drain(async {
            match (&mut server).await {
                Ok(Err(e)) => tracing::error!(error = %e, "Server error during drain"),
                Err(e) => tracing::error!(error = %e, "Server task failed during drain"),
                Ok(Ok(())) => {}
            }
        })
        .await;
    if !drained {
        server.abort();
    }
    join_background(background).await;

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

async fn join_background(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }
}

fn build_repository(config: &RepositoryConfig, watch: bool) -> Result<Arc<dyn RouteRepository>> {
    match config {
        RepositoryConfig::File { path } if watch => Ok(Arc::new(
            FileRouteRepository::watched(path)
                .wrap_err_with(|| format!("Failed to watch route directory {path}"))?,
        )),
        RepositoryConfig::File { path } => Ok(Arc::new(FileRouteRepository::new(path))),
        RepositoryConfig::Http { url, timeout_secs } => Ok(Arc::new(
            HttpRouteRepository::new(url.clone(), Duration::from_secs(*timeout_secs))
                .wrap_err_with(|| format!("Failed to set up config service client for {url}"))?,
        )),
    }
}

async fn build_auth(
    config: Option<&AuthConfig>,
    cancel: CancellationToken,
    background: &mut Vec<JoinHandle<()>>,
) -> Result<Option<Arc<AuthManager>>> {
    let Some(config) = config else {
        tracing::info!("No authentication strategy configured");
        return Ok(None);
    };

    let cache = Arc::new(InMemoryDecisionCache::new());
    let strategy: Arc<dyn AuthStrategy> = match config {
        AuthConfig::Remote { url, .. } => {
            tracing::info!(authority = %url, "Using remote token validation");
            let authority = Arc::new(
                HttpAuthAuthority::new(url.clone(), config.call_timeout())
                    .wrap_err("Failed to set up auth authority client")?,
            );
            Arc::new(
                RemoteValidatorStrategy::new(authority, cache.clone())
                    .with_negative_ttl(config.negative_ttl())
                    .with_call_timeout(config.call_timeout()),
            )
        }
        AuthConfig::Jwt { key_source, .. } => {
            tracing::info!("Using local JWT validation");
            let source: Arc<dyn KeySource> = match key_source {
                KeySourceConfig::Env { var } => Arc::new(EnvKeySource::new(var.clone())),
                KeySourceConfig::Static { key } => Arc::new(StaticKeySource::new(key.clone())),
                KeySourceConfig::Http { url, field } => Arc::new(HttpKeySource::new(
                    reqwest::Client::new(),
                    url.clone(),
                    field.clone(),
                )),
            };
            let strategy = Arc::new(
                JwtStrategy::new(source, cache.clone()).with_negative_ttl(config.negative_ttl()),
            );
            strategy
                .refresh_key()
                .await
                .wrap_err("Failed to load JWT signing key")?;
            background.push(spawn_key_refresh(
                strategy.clone(),
                config.refresh_interval(),
                cancel.clone(),
            ));
            strategy
        }
    };

    background.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CACHE_PURGE_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let purged = cache.purge_expired().await;
                    if purged > 0 {
                        tracing::debug!(purged, "Purged expired auth decisions");
                    }
                }
            }
        }
    }));

    Ok(Some(Arc::new(AuthManager::new(strategy))))
}

fn describe_repository(config: &RepositoryConfig) -> String {
    match config {
        RepositoryConfig::File { path } => format!("directory {path}"),
        RepositoryConfig::Http { url, .. } => format!("config service {url}"),
    }
}

fn describe_auth(config: &GatewayConfig) -> &'static str {
    match config.auth {
        Some(AuthConfig::Remote { .. }) => "remote validator",
        Some(AuthConfig::Jwt { .. }) => "local JWT",
        None => "none",
    }
}

/// Validate the configuration and the route definitions it points at.
async fn validate_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = GatewayConfigValidator::validate(&config) {
        eprintln!("❌ Configuration validation failed:");
        eprintln!("{e}");
        std::process::exit(1);
    }
    println!("✅ Configuration validation: OK");

    let repository = build_repository(&config.repository, false)?;
    let mut routes = match repository.get_routes().await {
        Ok(routes) => routes,
        Err(e) => {
            eprintln!("❌ Failed to read route definitions: {e}");
            std::process::exit(1);
        }
    };
    routes.sort_by(|a, b| a.name.cmp(&b.name));

    println!();
    println!("📋 Configuration Summary:");
    println!("   • Listen Address: {}", config.listen_addr);
    println!("   • Routes From: {}", describe_repository(&config.repository));
    println!("   • Authentication: {}", describe_auth(&config));
    println!("   • Valid Routes: {}", routes.len());
    for route in &routes {
        println!(
            "     - {} [host: {}, prefix: {}] -> {}{}",
            route.name,
            route.host().unwrap_or("*"),
            route.prefix().unwrap_or("-"),
            route.target,
            if route.authentication.required {
                " (auth)"
            } else {
                ""
            }
        );
    }
    println!();
    println!("🎉 Configuration is valid and ready to use!");
    Ok(())
}
