//! HTTP surface for the radial feed.
//!
//! Provides endpoints for:
//! - `GET /health` - Health check
//! - `GET /status` - Feed, queue and listener status
//! - `GET /metrics` - Prometheus metrics
//! - `GET /api/sites` - Configured sites with location and listener counts
//! - `GET /api/sites/:site/latest` - Most recent radial for a site
//! - `GET /api/sites/:site/stream` - Live radials as Server-Sent Events

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use chunk_feed::{FeedState, RadarFeed, SharedRadial};
use radar_common::{FeedError, SiteTable};

/// Shared state for the HTTP server.
pub struct AppState {
    pub feed: Arc<RadarFeed>,
    pub sites: SiteTable,
    pub prometheus: PrometheusHandle,
    /// Cancelled on shutdown; ends open event streams
    pub shutdown: CancellationToken,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SiteResponse {
    pub id: String,
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation_m: Option<f64>,
    pub listeners: usize,
    pub latest_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SitesResponse {
    pub feed_state: FeedState,
    pub sites: Vec<SiteResponse>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Feed errors mapped onto HTTP status codes.
pub struct ApiError(FeedError);

impl From<FeedError> for ApiError {
    fn from(e: FeedError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FeedError::UnknownSite(_) => StatusCode::NOT_FOUND,
            FeedError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/sites", get(sites_handler))
        .route("/api/sites/:site/latest", get(latest_handler))
        .route("/api/sites/:site/stream", get(stream_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /status
async fn status_handler(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    Json(state.feed.status())
}

/// GET /metrics
async fn metrics_handler(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.prometheus.render(),
    )
}

/// GET /api/sites
async fn sites_handler(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let status = state.feed.status();
    let sites = status
        .sites
        .into_iter()
        .map(|site| {
            let info = state.sites.get(&site.site_id);
            SiteResponse {
                name: info.map(|i| i.name.clone()),
                latitude: info.map(|i| i.latitude),
                longitude: info.map(|i| i.longitude),
                elevation_m: info.map(|i| i.elevation_m),
                id: site.site_id,
                listeners: site.listeners,
                latest_timestamp: site.latest_timestamp,
            }
        })
        .collect();

    Json(SitesResponse {
        feed_state: status.state,
        sites,
    })
}

/// GET /api/sites/:site/latest
async fn latest_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(site): Path<String>,
) -> Result<Response, ApiError> {
    let site = site.to_uppercase();
    match state.feed.latest(&site)? {
        Some(record) => Ok(Json(record.as_ref()).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// GET /api/sites/:site/stream
///
/// Each open connection counts as one listener. The latest radial (if any)
/// is sent first as a `latest` event, then every new radial as `radial`.
async fn stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(site): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let site = site.to_uppercase();
    let subscription = state.feed.subscribe(&site).await?;
    info!(site = %site, "Stream client connected");

    let latest = subscription.latest().map(|record| radial_event("latest", &record));
    let live = stream::unfold(subscription, |mut subscription| async move {
        let record = subscription.recv().await?;
        Some((radial_event("radial", &record), subscription))
    });

    let events = stream::iter(latest)
        .chain(live)
        .take_until(state.shutdown.clone().cancelled_owned());

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn radial_event(name: &str, record: &SharedRadial) -> Result<Event, axum::Error> {
    Event::default().event(name).json_data(record.as_ref())
}

/// Serve until `shutdown` resolves.
pub async fn run_server(
    state: Arc<AppState>,
    listen: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(address = %listen, "Starting radial streamer HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Resolves on Ctrl+C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        // Never resolve; the process is stopped externally
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
