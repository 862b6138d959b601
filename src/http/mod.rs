mod auth;
mod booking;
mod error;
mod facility;
mod settings;

pub use auth::AdminSession;
pub use error::ApiError;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::PathRejection;
use axum::extract::{MatchedPath, Path, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use ulid::Ulid;

use crate::engine::Engine;
use crate::observability;

/// Shared handler state, owned by `main`.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub admin_token: Arc<str>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, admin_token: impl Into<Arc<str>>) -> Self {
        Self {
            engine,
            admin_token: admin_token.into(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/bookings/availability", get(booking::availability))
        .route("/api/bookings", get(booking::list).post(booking::create))
        .route(
            "/api/bookings/:id",
            get(booking::get).put(booking::update).delete(booking::cancel),
        )
        .route("/api/facilities", get(facility::list).post(facility::create))
        .route(
            "/api/facilities/:id",
            get(facility::get).put(facility::update).delete(facility::delete),
        )
        .route("/api/settings", get(settings::get).put(settings::update))
        .route_layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::bad_request(format!("invalid {what} id: {raw}")))
}

pub(crate) fn path_id(path: Result<Path<String>, PathRejection>, what: &str) -> Result<Ulid, ApiError> {
    let Path(raw) = path?;
    parse_id(&raw, what)
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let method = req.method().to_string();

    let response = next.run(req).await;

    let status = observability::status_class(response.status().as_u16());
    metrics::counter!(
        observability::HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        observability::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method,
        "route" => route
    )
    .record(start.elapsed().as_secs_f64());
    response
}
