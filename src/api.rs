// Livestock Gate Tracker - REST API with Axum
//
// Routes (all under /api):
//   GET    /health
//   GET    /pens
//   POST   /pens/:pen_id/gate              {"payload": "<raw QR text>"}
//   GET    /pens/:pen_id/occupancy
//   GET    /animals/:animal_id/location
//   GET    /animals/:animal_id/history     ?from=&to=
//   GET    /animals/:animal_id/vaccinations
//   POST   /animals/:animal_id/vaccinations {"vaccine_id": "VX-1", "dose": "2ml"}
//   GET    /history/gate                   ?from=&to=&direction=
//   GET    /history/gate/:event_id
//   PUT    /history/gate/:event_id         {"direction": "Exit", "actor": "admin"}
//   DELETE /history/gate/:event_id         ?actor=
//   GET    /history/gate/:event_id/audit
//   GET    /history/stats                  ?from=&to=

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use crate::db::Event;
use crate::entities::{Pen, VaccinationRecord};
use crate::error::GateError;
use crate::ledger::Ledger;
use crate::movement::{Direction, Location, MovementEvent, TimeRange};
use crate::query::DashboardStats;
use crate::system::GateSystem;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub system: Arc<GateSystem>,
}

/// API Response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = match &self {
            GateError::UnknownAnimal(_)
            | GateError::UnknownPen(_)
            | GateError::UnknownVaccine(_)
            | GateError::UnknownEvent(_) => StatusCode::NOT_FOUND,
            GateError::ConcurrentScanConflict(_)
            | GateError::AlternationViolation { .. }
            | GateError::ClockSkew { .. } => StatusCode::CONFLICT,
            GateError::Storage(_) | GateError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if self.is_rejection() {
            warn!(error = %self, status = %status, "request rejected");
        } else {
            error!(error = %self, "request failed");
        }

        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, GateError>;

#[derive(Debug, Default, Deserialize)]
pub struct RangeParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub direction: Option<Direction>,
}

impl RangeParams {
    fn range(&self) -> TimeRange {
        TimeRange {
            from: self.from,
            to: self.to,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub payload: String,
}

#[derive(Debug, Deserialize)]
pub struct CorrectionRequest {
    pub direction: Direction,
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct VaccinationRequest {
    pub vaccine_id: String,
    pub dose: String,
    /// Defaults to now
    pub vaccinated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ActorParams {
    pub actor: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct OccupancyResponse {
    pen_id: String,
    animals: Vec<String>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok(HealthResponse {
        status: "OK",
        version: crate::VERSION,
    }))
}

/// GET /api/pens - Registered pens
async fn list_pens(State(state): State<AppState>) -> ApiResult<Vec<Pen>> {
    Ok(Json(ApiResponse::ok(state.system.pens()?)))
}

/// POST /api/pens/:pen_id/gate - Record a gate scan
async fn record_gate_scan(
    State(state): State<AppState>,
    Path(pen_id): Path<String>,
    Json(req): Json<ScanRequest>,
) -> Result<impl IntoResponse, GateError> {
    let receipt = state.system.engine.scan(&pen_id, &req.payload)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(receipt))))
}

/// GET /api/pens/:pen_id/occupancy - Animals currently inside a pen
async fn pen_occupancy(
    State(state): State<AppState>,
    Path(pen_id): Path<String>,
) -> ApiResult<OccupancyResponse> {
    let animals = state.system.query.occupancy(&pen_id)?;
    Ok(Json(ApiResponse::ok(OccupancyResponse { pen_id, animals })))
}

/// GET /api/animals/:animal_id/location
async fn animal_location(
    State(state): State<AppState>,
    Path(animal_id): Path<String>,
) -> ApiResult<Location> {
    Ok(Json(ApiResponse::ok(
        state.system.query.current_location(&animal_id)?,
    )))
}

/// GET /api/animals/:animal_id/history
async fn animal_history(
    State(state): State<AppState>,
    Path(animal_id): Path<String>,
    Query(params): Query<RangeParams>,
) -> ApiResult<Vec<MovementEvent>> {
    Ok(Json(ApiResponse::ok(
        state.system.query.history_for(&animal_id, params.range())?,
    )))
}

/// GET /api/animals/:animal_id/vaccinations
async fn animal_vaccinations(
    State(state): State<AppState>,
    Path(animal_id): Path<String>,
) -> ApiResult<Vec<VaccinationRecord>> {
    Ok(Json(ApiResponse::ok(
        state.system.vaccinations(&animal_id)?,
    )))
}

/// POST /api/animals/:animal_id/vaccinations
async fn record_vaccination(
    State(state): State<AppState>,
    Path(animal_id): Path<String>,
    Json(req): Json<VaccinationRequest>,
) -> Result<impl IntoResponse, GateError> {
    let record = state.system.vaccinate(
        &animal_id,
        &req.vaccine_id,
        &req.dose,
        req.vaccinated_at.unwrap_or_else(Utc::now),
    )?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(record))))
}

/// GET /api/history/gate - Gate history across all animals
async fn gate_history(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> ApiResult<Vec<MovementEvent>> {
    Ok(Json(ApiResponse::ok(
        state
            .system
            .query
            .gate_history(params.range(), params.direction)?,
    )))
}

/// GET /api/history/gate/:event_id
async fn gate_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> ApiResult<MovementEvent> {
    Ok(Json(ApiResponse::ok(state.system.query.event(&event_id)?)))
}

/// PUT /api/history/gate/:event_id - Administrative direction correction
async fn correct_gate_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Json(req): Json<CorrectionRequest>,
) -> ApiResult<MovementEvent> {
    Ok(Json(ApiResponse::ok(state.system.ledger.correct(
        &event_id,
        req.direction,
        &req.actor,
    )?)))
}

/// DELETE /api/history/gate/:event_id - Administrative removal
async fn remove_gate_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Query(params): Query<ActorParams>,
) -> ApiResult<MovementEvent> {
    Ok(Json(ApiResponse::ok(
        state.system.ledger.remove(&event_id, &params.actor)?,
    )))
}

/// GET /api/history/gate/:event_id/audit
async fn gate_event_audit(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> ApiResult<Vec<Event>> {
    Ok(Json(ApiResponse::ok(
        state.system.query.audit_trail(&event_id)?,
    )))
}

/// GET /api/history/stats - Dashboard statistics
async fn gate_stats(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> ApiResult<DashboardStats> {
    Ok(Json(ApiResponse::ok(
        state.system.query.dashboard(params.range())?,
    )))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(system: Arc<GateSystem>) -> Router {
    let state = AppState { system };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/pens", get(list_pens))
        .route("/pens/:pen_id/gate", post(record_gate_scan))
        .route("/pens/:pen_id/occupancy", get(pen_occupancy))
        .route("/animals/:animal_id/location", get(animal_location))
        .route("/animals/:animal_id/history", get(animal_history))
        .route(
            "/animals/:animal_id/vaccinations",
            get(animal_vaccinations).post(record_vaccination),
        )
        .route("/history/gate", get(gate_history))
        .route(
            "/history/gate/:event_id",
            get(gate_event).put(correct_gate_event).delete(remove_gate_event),
        )
        .route("/history/gate/:event_id/audit", get(gate_event_audit))
        .route("/history/stats", get(gate_stats))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// TESTS
// ============================================================================
