//! Application wiring and server lifecycle.

use crate::config::{FactureConfig, StoreBackend};
use crate::export::{BulkExportCoordinator, ProgressRegistry};
use crate::handlers;
use crate::rendering::{ChromiumEngine, DocumentRenderer, HtmlTemplate, RenderEngine};
use crate::services::{
    InMemoryStore, InvoiceCreationService, MongoDb, OrderInvoiceSync, RenumberingEngine,
    SequenceAllocator, Stores,
};
use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware, REQUEST_ID_HEADER};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: FactureConfig,
    /// Present with the MongoDB backend; used by health probes.
    pub db: Option<MongoDb>,
    pub stores: Stores,
    pub creation: InvoiceCreationService,
    pub sync: OrderInvoiceSync,
    pub renumbering: RenumberingEngine,
    pub renderer: DocumentRenderer,
    pub exports: BulkExportCoordinator,
}

impl AppState {
    pub fn new(
        config: FactureConfig,
        stores: Stores,
        db: Option<MongoDb>,
        engine: Arc<dyn RenderEngine>,
    ) -> Self {
        let sync = OrderInvoiceSync::new(stores.invoices.clone(), stores.orders.clone());
        let creation = InvoiceCreationService::new(
            stores.orders.clone(),
            stores.invoices.clone(),
            SequenceAllocator::new(stores.counters.clone()),
            sync.clone(),
        );
        let renumbering = RenumberingEngine::new(stores.invoices.clone());
        let renderer = DocumentRenderer::new(
            stores.invoices.clone(),
            stores.orders.clone(),
            stores.directory.clone(),
            Arc::new(HtmlTemplate),
            engine,
        );
        let exports = BulkExportCoordinator::new(
            stores.invoices.clone(),
            renderer.clone(),
            ProgressRegistry::new(config.export.progress_timings()),
            config.export.concurrency,
        );

        Self {
            config,
            db,
            stores,
            creation,
            sync,
            renumbering,
            renderer,
            exports,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route(
            "/orders/:order_id/invoice",
            post(handlers::invoices::create_invoice),
        )
        .route(
            "/hooks/orders/:order_id/saved",
            post(handlers::orders::order_saved),
        )
        .route("/invoices", get(handlers::invoices::list_invoices))
        .route(
            "/invoices/bulk-delete",
            post(handlers::invoices::bulk_delete),
        )
        .route("/invoices/:invoice_id", get(handlers::invoices::get_invoice))
        .route(
            "/invoices/:invoice_id/cancel",
            post(handlers::invoices::cancel_invoice),
        )
        .route(
            "/invoices/by-reference/:reference/pdf",
            get(handlers::invoices::download_pdf),
        )
        .route("/exports/zip", post(handlers::exports::export_zip))
        .route(
            "/exports/:progress_id/events",
            get(handlers::exports::export_events),
        )
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the configured store and rendering engine.
    pub async fn build(config: FactureConfig) -> Result<Self, AppError> {
        let (stores, db) = match config.store {
            StoreBackend::Mongo => {
                let db = MongoDb::connect(&config.mongodb.uri, &config.mongodb.database).await?;
                db.initialize_indexes().await.map_err(|e| {
                    tracing::error!("Failed to initialize database indexes: {}", e);
                    e
                })?;
                (Stores::from_backend(db.clone()), Some(db))
            }
            StoreBackend::Memory => {
                tracing::warn!("Using the in-memory store; data is lost on restart");
                (Stores::from_backend(InMemoryStore::new()), None)
            }
        };

        let engine = ChromiumEngine::new(
            config.renderer.binary.clone(),
            config.renderer.timeout(),
            config.renderer.temp_dir.clone(),
        );
        match engine.probe().await {
            Ok(()) => tracing::info!(binary = %config.renderer.binary, "Render engine available"),
            Err(e) => tracing::warn!(
                binary = %config.renderer.binary,
                error = %e,
                "Render engine not usable; PDF endpoints will fail"
            ),
        }

        let state = AppState::new(config, stores, db, Arc::new(engine));
        Self::build_with_state(state).await
    }

    /// Bind the listener for an already wired state (port 0 picks a free port).
    pub async fn build_with_state(state: AppState) -> Result<Self, AppError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], state.config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Facture service: HTTP on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
