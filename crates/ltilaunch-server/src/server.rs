use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get};
use ltilaunch::{LaunchResult, LaunchService, LtiState, LtiStores, lti_router};
use ltilaunch_postgres::{PostgresConfig, PostgresLtiStorage, create_pool};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::bootstrap::run_bootstrap;
use crate::config::{AppConfig, StorageBackend};
use crate::handlers;

/// State of the service-level routes.
#[derive(Clone)]
pub struct AppState {
    pub stores: LtiStores,
}

pub struct LtiLaunchServer {
    addr: SocketAddr,
    app: Router,
}

/// Assembles the router over `stores`.
///
/// # Errors
///
/// Returns an error if the launch configuration is invalid.
pub fn build_app(cfg: &AppConfig, stores: LtiStores) -> LaunchResult<Router> {
    let service = LaunchService::new(stores.clone(), &cfg.lti, cfg.session.clone())?;
    let lti_state = LtiState {
        service,
        base_url: cfg.base_url(),
        trust_forwarded_headers: cfg.lti.trust_forwarded_headers,
        launch_redirect: cfg.lti.launch_redirect.clone(),
    };

    let app = Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .with_state(AppState { stores })
        .merge(lti_router(lti_state))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &axum::http::Request<_>| {
                            tracing::info_span!(
                                "http.request",
                                http.method = %req.method(),
                                http.target = %req.uri().path(),
                                http.status_code = tracing::field::Empty,
                            )
                        })
                        .on_response(
                            |res: &axum::http::Response<_>,
                             latency: Duration,
                             span: &tracing::Span| {
                                span.record(
                                    "http.status_code",
                                    tracing::field::display(res.status().as_u16()),
                                );
                                tracing::info!(
                                    http.status = %res.status().as_u16(),
                                    elapsed_ms = %latency.as_millis(),
                                    "request handled"
                                );
                            },
                        ),
                )
                .layer(TimeoutLayer::new(cfg.request_timeout()))
                .layer(CorsLayer::permissive()),
        )
        .layer(axum::extract::DefaultBodyLimit::max(cfg.server.body_limit_bytes));

    Ok(app)
}

/// Opens the configured storage backend.
///
/// # Errors
///
/// Returns an error if the database is unreachable or a migration fails.
pub async fn open_stores(cfg: &AppConfig) -> anyhow::Result<LtiStores> {
    match cfg.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; launch data is lost on restart");
            Ok(LtiStores::in_memory())
        }
        StorageBackend::Postgres => {
            let pg = cfg.storage.postgres.clone().unwrap_or_else(PostgresConfig::default);
            let pool = create_pool(&pg).await?;
            let storage = PostgresLtiStorage::new(Arc::new(pool));
            if pg.run_migrations {
                storage.migrate().await?;
            }
            Ok(LtiStores::from_backend(Arc::new(storage)))
        }
    }
}

pub struct ServerBuilder {
    config: AppConfig,
    stores: Option<LtiStores>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            stores: None,
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Uses `stores` instead of opening the configured backend.
    pub fn with_stores(mut self, stores: LtiStores) -> Self {
        self.stores = Some(stores);
        self
    }

    /// Opens storage, seeds bootstrap records and assembles the router.
    pub async fn build(self) -> anyhow::Result<LtiLaunchServer> {
        let stores = match self.stores {
            Some(stores) => stores,
            None => open_stores(&self.config).await?,
        };

        let report = run_bootstrap(&stores, &self.config.bootstrap).await?;
        tracing::info!(
            groups = report.groups_created,
            consumers = report.consumers_created,
            providers = report.providers_created,
            "Bootstrap complete"
        );

        let app = build_app(&self.config, stores)?;
        Ok(LtiLaunchServer {
            addr: self.config.addr(),
            app,
        })
    }
}

impl LtiLaunchServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
