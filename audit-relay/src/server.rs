//! Router construction and the HTTP server with graceful shutdown

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::{
    config::ServiceConfig,
    error::Result,
    handlers, health,
    middleware::{request_id_layer, request_id_propagation_layer, sensitive_headers_layer},
    state::AppState,
};

#[cfg(feature = "jwt")]
use crate::middleware::JwtAuth;

/// Build the application routes without authentication
pub fn router(state: AppState) -> Router {
    build_router(state, |api| api)
}

/// Build the application routes with bearer JWT required on every `/api` route
#[cfg(feature = "jwt")]
pub fn authenticated_router(state: AppState, auth: JwtAuth) -> Router {
    build_router(state, move |api| {
        api.layer(axum::middleware::from_fn_with_state(auth, JwtAuth::middleware))
    })
}

/// `/health` and `/ready` stay outside `wrap_api`, so they are never authenticated
fn build_router(
    state: AppState,
    wrap_api: impl FnOnce(Router<AppState>) -> Router<AppState>,
) -> Router {
    let api = Router::new()
        .route(
            "/events",
            post(handlers::create_event).get(handlers::list_events),
        )
        .route(
            "/events/{id}",
            get(handlers::get_event).delete(handlers::delete_event),
        )
        .route("/events/types/{code}", get(handlers::list_events_by_type))
        .route("/pipeline/stats", get(handlers::pipeline_stats));

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::readiness))
        .nest("/api", wrap_api(api))
        .with_state(state)
}

/// HTTP server
pub struct Server {
    config: ServiceConfig,
}

impl Server {
    pub fn new(config: ServiceConfig) -> Self {
        Self { config }
    }

    /// Wrap the routes in the standard middleware stack
    ///
    /// Layers are applied in reverse order: the last one is outermost.
    pub fn layered(&self, app: Router) -> Router {
        let body_limit = self.config.body_limit_mb * 1024 * 1024;

        app.layer(CatchPanicLayer::new())
            .layer(sensitive_headers_layer())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().include_headers(true))
                    .on_response(DefaultOnResponse::new().include_headers(true)),
            )
            .layer(request_id_propagation_layer())
            .layer(request_id_layer())
            .layer(RequestBodyLimitLayer::new(body_limit))
            .layer(TimeoutLayer::with_status_code(
                http::StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(self.config.timeout_secs),
            ))
            .layer(CompressionLayer::new())
            .layer(self.build_cors_layer())
    }

    /// Serve until a shutdown signal arrives or `shutdown` is cancelled
    ///
    /// A received signal cancels `shutdown`, so background tasks observing
    /// the same token stop together with the server.
    pub async fn serve(self, app: Router, shutdown: CancellationToken) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let app = self.layered(app);

        tracing::info!(
            body_limit_mb = self.config.body_limit_mb,
            timeout_secs = self.config.timeout_secs,
            cors_mode = %self.config.cors_mode,
            "Starting {} on {}",
            self.config.name,
            addr
        );

        let listener = TcpListener::bind(&addr).await?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown))
            .await?;

        tracing::info!("Server shutdown complete");

        Ok(())
    }

    fn build_cors_layer(&self) -> CorsLayer {
        match self.config.cors_mode.as_str() {
            "permissive" => CorsLayer::permissive(),
            "restrictive" | "disabled" => CorsLayer::new(),
            other => {
                tracing::warn!("Unknown CORS mode: {}, defaulting to permissive", other);
                CorsLayer::permissive()
            }
        }
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown requested, starting graceful shutdown");
        },
    }

    shutdown.cancel();
    tracing::info!("Draining in-flight requests...");
}
