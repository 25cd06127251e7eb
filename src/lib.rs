//! Validate-then-commit handshake for the Active Directory identity
//! provider of Autha.

#![forbid(unsafe_code)]
pub mod config;
mod database;
pub mod directory;
pub mod error;
pub mod handshake;
#[cfg(test)]
mod memory;
mod router;
pub mod session;
pub mod store;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use error::ServerError;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};

use crate::directory::LdapAuthenticator;
use crate::handshake::Handshake;
use crate::session::{AccountPort, PostgresAccounts};
use crate::store::PostgresConfigStore;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_GRACE: Duration = Duration::from_secs(5);

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    token: Option<&str>,
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub handshake: Arc<Handshake>,
    pub accounts: Arc<dyn AccountPort>,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let timeout = REQUEST_TIMEOUT.max(state.handshake.timeout + HANDSHAKE_GRACE);

    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    let auth_configs = Router::new()
        // `POST /v3/authConfigs/{name}?action=...` goes to the action dispatcher.
        .route("/{name}", post(router::auth_configs::handler))
        .route_layer(AxumMiddleware::from_fn_with_state(state.clone(), router::auth));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        .route("/metrics", get(telemetry::render))
        .nest("/v3/authConfigs", auth_configs)
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state(
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    // read configuration file. let it in memory.
    let config = config::Configuration::default().read();

    let Some(postgres) = &config.postgres else {
        // Stored configuration and sessions both live in PostgreSQL.
        return Err("missing `postgres` entry on `config.yaml` file".into());
    };
    let pool = database::connect(postgres).await?;

    let accounts: Arc<dyn AccountPort> = Arc::new(PostgresAccounts::new(pool.clone()));
    let handshake = Handshake {
        provider: config.provider.clone(),
        store: Arc::new(PostgresConfigStore::new(pool)),
        authenticator: Arc::new(LdapAuthenticator),
        accounts: Arc::clone(&accounts),
        session_ttl: config.session.ttl,
        timeout: Duration::from_secs(config.handshake.timeout),
    };

    Ok(AppState {
        config,
        handshake: Arc::new(handshake),
        accounts,
        metrics,
    })
}
