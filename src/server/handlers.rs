use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::entity::{EntityRecord, Lookup, RankedResult, ResolveError};
use crate::geo::Location;

use super::state::AppState;

const DEFAULT_PAGE_SIZE: u32 = 20;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
    retryable: bool,
}

pub(super) struct ApiError {
    status: StatusCode,
    message: String,
    retryable: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.message,
            code: self.status.as_u16(),
            retryable: self.retryable,
        };
        (self.status, Json(body)).into_response()
    }
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    ApiError {
        status,
        message: msg.into(),
        retryable: false,
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        let status = match &err {
            ResolveError::Validation(_) => StatusCode::BAD_REQUEST,
            ResolveError::ResolutionFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ResolveError::Superseded | ResolveError::Cancelled => StatusCode::CONFLICT,
        };
        ApiError {
            status,
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

// ─── GET /api/health ─────────────────────────────────────────────

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ─── GET /api/entities ───────────────────────────────────────────

#[derive(Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl ListQuery {
    fn location(&self) -> Result<Option<Location>, ApiError> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Ok(Some(Location {
                lat,
                lng,
                city: self.city.clone(),
                state: self.state.clone(),
                country: self.country.clone(),
            })),
            (None, None) => Ok(None),
            _ => Err(api_error(
                StatusCode::BAD_REQUEST,
                "Provide both 'lat' and 'lng', or neither",
            )),
        }
    }
}

pub async fn list_entities(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<RankedResult>>, ApiError> {
    let start = Instant::now();
    let location = params.location()?;
    let page = params.page.unwrap_or(1);
    let page_size = params.page_size.unwrap_or(DEFAULT_PAGE_SIZE);

    let results = state
        .resolver
        .get_list(page, page_size, location.as_ref())
        .await?;

    tracing::info!(
        page,
        page_size,
        count = results.len(),
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "GET /api/entities"
    );
    Ok(Json(results))
}

// ─── GET /api/entities/{identifier} ──────────────────────────────

pub async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
) -> Result<Json<EntityRecord>, ApiError> {
    let start = Instant::now();
    let lookup = state.resolver.get_by_id(&identifier).await?;

    tracing::info!(
        identifier = %identifier,
        found = matches!(lookup, Lookup::Found(_)),
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "GET /api/entities/{{identifier}}"
    );

    match lookup {
        Lookup::Found(record) => Ok(Json(record)),
        Lookup::NotFound => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("No entity matches '{}'", identifier),
        )),
    }
}
