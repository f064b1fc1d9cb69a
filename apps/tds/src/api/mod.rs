//! # TDS HTTP API Module
//!
//! REST API over the datastore, served with axum.
//!
//! ## Endpoints
//!
//! - `GET /health`, `GET /status`
//! - `POST /provenance`, `GET|DELETE /provenance/{id}`
//! - `POST /provenance/derived-from`
//! - `POST /provenance/mirror/replay`, `POST /provenance/mirror/prune`
//! - `GET|POST /projects`, `GET|PUT|DELETE /projects/{id}`
//! - `GET /projects/{id}/assets?types=a,b`
//! - `POST|DELETE /projects/{id}/assets/{type}/{resource_id}`
//! - `POST /publications`, `GET /publications/{id}`
//! - `PUT|DELETE /documents/{type}/{id}`
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `TDS_CORS_ORIGINS`: Comma-separated allowed origins, or "*" for all (default: localhost only)
//! - `TDS_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)
//! - `TDS_API_KEY`: If set, requires Bearer token authentication

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::get_api_key_from_env;
pub use middleware::{create_rate_limiter, get_rate_limit_from_env};
pub use types::{
    ApiError, AssetsQuery, CreatedResponse, DeletedResponse, DerivedFromRequest,
    DerivedFromResponse, DocumentResponse, ErrorResponse, HealthResponse, ListQuery,
    ProjectListResponse, PruneResponse, StatusResponse,
};

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post, put},
};
use std::sync::Arc;
use tds_core::{Datastore, TdsError};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Largest accepted request body (2 MB).
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Datastore>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Datastore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

const CORS_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
];

/// CORS layer from `TDS_CORS_ORIGINS`.
///
/// `*` allows every origin; unset or unparsable falls back to localhost.
fn build_cors_layer() -> CorsLayer {
    match std::env::var("TDS_CORS_ORIGINS").ok().as_deref() {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins (TDS_CORS_ORIGINS=*). This is insecure for production!"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(hv) => {
                        tracing::info!("CORS: Allowing origin: {}", origin);
                        Some(hv)
                    }
                    Err(e) => {
                        tracing::warn!("CORS: Invalid origin '{}': {}", origin, e);
                        None
                    }
                })
                .collect();

            if allowed.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in TDS_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed)
                    .allow_methods(CORS_METHODS)
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            }
        }
        None => {
            tracing::info!("CORS: No TDS_CORS_ORIGINS set, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(CORS_METHODS)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Body limit
/// 4. Rate Limiting (if enabled)
/// 5. Authentication (if configured)
pub fn create_router(state: AppState) -> Router {
    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let has_auth = get_api_key_from_env().is_some();
    if has_auth {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED - all endpoints are publicly accessible. \
             Set TDS_API_KEY to enable authentication."
        );
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/provenance", post(handlers::create_relation_handler))
        .route(
            "/provenance/derived-from",
            post(handlers::derived_from_handler),
        )
        .route(
            "/provenance/mirror/replay",
            post(handlers::replay_handler),
        )
        .route("/provenance/mirror/prune", post(handlers::prune_handler))
        .route(
            "/provenance/{id}",
            get(handlers::get_relation_handler).delete(handlers::delete_relation_handler),
        )
        .route(
            "/projects",
            get(handlers::list_projects_handler).post(handlers::create_project_handler),
        )
        .route(
            "/projects/{id}",
            get(handlers::get_project_handler)
                .put(handlers::update_project_handler)
                .delete(handlers::deactivate_project_handler),
        )
        .route(
            "/projects/{id}/assets",
            get(handlers::project_assets_handler),
        )
        .route(
            "/projects/{id}/assets/{resource_type}/{resource_id}",
            post(handlers::add_asset_handler).delete(handlers::remove_asset_handler),
        )
        .route("/publications", post(handlers::create_publication_handler))
        .route(
            "/publications/{id}",
            get(handlers::get_publication_handler),
        )
        .route(
            "/documents/{resource_type}/{id}",
            put(handlers::put_document_handler).delete(handlers::delete_document_handler),
        );

    if has_auth {
        router = router.layer(axum_middleware::from_fn(auth::api_key_auth_middleware));
    }

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer())
                .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve `store` on `addr` until interrupted.
pub async fn run_server(addr: &str, store: Datastore) -> Result<(), TdsError> {
    let router = create_router(AppState::new(store));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| TdsError::InvalidConfig(format!("bind {addr} failed: {e}")))?;

    tracing::info!("TDS HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| TdsError::InvalidConfig(format!("server error: {e}")))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
