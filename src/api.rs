//! JSON surface for the map UI. Handlers only read from the [`Engine`]; the
//! aggregation result is passed through unchanged.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::config::catalog::SpeciesDescriptor;
use crate::engine::{Engine, EngineError, FetchFailure, RefreshReport, SpeciesState};
use crate::grid::{validate_cell_size, AggregationResult, Thresholds};
use crate::ingest::types::OccurrenceRecord;

/// Shown to users when the occurrence service could not be reached.
pub const CONNECTIVITY_MESSAGE: &str =
    "Could not load occurrence data. Check your connection and try again.";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/species", get(list_species))
        .route("/species/{id}/occurrences", get(species_occurrences))
        .route("/species/{id}/grid", get(species_grid))
        .route("/admin/refresh", post(admin_refresh))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                error: msg.into(),
                upstream_status: None,
                reason: None,
            },
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::UnknownSpecies(_) => Self {
                status: StatusCode::NOT_FOUND,
                body: ErrorBody {
                    error: e.to_string(),
                    upstream_status: None,
                    reason: None,
                },
            },
            EngineError::Pending(_) => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: ErrorBody {
                    error: e.to_string(),
                    upstream_status: None,
                    reason: None,
                },
            },
            EngineError::Failed { failure, .. } => Self {
                status: StatusCode::BAD_GATEWAY,
                body: ErrorBody {
                    error: CONNECTIVITY_MESSAGE.to_string(),
                    upstream_status: failure.status,
                    reason: Some(failure.reason),
                },
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Serialize)]
struct SpeciesView {
    #[serde(flatten)]
    descriptor: SpeciesDescriptor,
    status: &'static str,
    records: Option<usize>,
    error: Option<FetchFailure>,
}

#[derive(Serialize)]
struct SpeciesList {
    last_refresh: Option<DateTime<Utc>>,
    species: Vec<SpeciesView>,
}

async fn list_species(State(state): State<AppState>) -> Json<SpeciesList> {
    let engine = &state.engine;
    let species = engine
        .catalog()
        .iter()
        .zip(engine.status())
        .map(|(sp, (_, state))| {
            let (status, records, error) = match state {
                SpeciesState::Ready(r) => ("ready", Some(r.len()), None),
                SpeciesState::Failed(f) => ("failed", None, Some(f)),
                SpeciesState::Pending => ("pending", None, None),
            };
            SpeciesView {
                descriptor: sp.clone(),
                status,
                records,
                error,
            }
        })
        .collect();
    Json(SpeciesList {
        last_refresh: engine.last_refresh(),
        species,
    })
}

async fn species_occurrences(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<OccurrenceRecord>>, ApiError> {
    let records = state.engine.occurrences_for(&id)?;
    Ok(Json(records.as_ref().clone()))
}

#[derive(Debug, Deserialize)]
struct GridQuery {
    cell_size: Option<f64>,
    high: Option<u32>,
    medium: Option<u32>,
    #[serde(default)]
    sorted: bool,
}

async fn species_grid(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<GridQuery>,
) -> Result<Json<AggregationResult>, ApiError> {
    let defaults = state.engine.grid_defaults();

    let cell_size = q.cell_size.unwrap_or(defaults.cell_size_degrees);
    validate_cell_size(cell_size).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let thresholds = Thresholds::new(
        q.high.unwrap_or(defaults.thresholds.high),
        q.medium.unwrap_or(defaults.thresholds.medium),
    );
    thresholds
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let grid = state.engine.grid_for(&id, cell_size, thresholds)?;
    let out = grid.as_ref().clone();
    Ok(Json(if q.sorted { out.sorted() } else { out }))
}

async fn admin_refresh(State(state): State<AppState>) -> Json<RefreshReport> {
    Json(state.engine.refresh_now().await)
}
