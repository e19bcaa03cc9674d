//! HTTP API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::engine::ranking::RankingService;
use crate::engine::service::{PredictError, PredictionService};
use crate::sources::fallback::SourceStatus;
use crate::types::{Horizon, Market, PredictionReport, RankingBoard};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub service_name: String,
    pub service: PredictionService,
    pub rankings: RankingService,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(service_name: &str, service: PredictionService, rankings: RankingService) -> Self {
        Self {
            service_name: service_name.to_string(),
            service,
            rankings,
            started_at: Utc::now(),
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
    pub predictors: Vec<String>,
    pub horizons: Vec<Horizon>,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RankingsQuery {
    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

/// Error half of every handler result.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, kind: &str, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: error.into(),
                kind: kind.to_string(),
            },
        }
    }
}

impl From<PredictError> for ApiError {
    fn from(e: PredictError) -> Self {
        let status = match e {
            PredictError::InvalidSymbol(_) => StatusCode::BAD_REQUEST,
            PredictError::Ensemble(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        ApiError::new(status, e.kind(), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: state.service_name.clone(),
        predictors: state.service.predictor_names(),
        horizons: state.service.horizons().to_vec(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// GET /api/sources
pub async fn get_sources(State(state): State<AppState>) -> Json<Vec<SourceStatus>> {
    Json(state.service.source_status())
}

/// POST /api/sources/reset
pub async fn reset_sources(State(state): State<AppState>) -> Json<Vec<SourceStatus>> {
    info!("Source breakers reset via API");
    Json(state.service.reset_sources())
}

/// GET /api/rankings?force_refresh=
pub async fn get_rankings(
    State(state): State<AppState>,
    Query(query): Query<RankingsQuery>,
) -> Json<RankingBoard> {
    Json(state.rankings.rankings(query.force_refresh).await)
}

/// GET /api/predict/:market/:symbol
pub async fn predict(
    State(state): State<AppState>,
    Path((market, symbol)): Path<(String, String)>,
) -> Result<Json<PredictionReport>, ApiError> {
    let market: Market = market
        .parse()
        .map_err(|e: anyhow::Error| ApiError::new(StatusCode::BAD_REQUEST, "InvalidMarket", e.to_string()))?;

    match state.service.predict(&symbol, market).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            warn!(symbol = %symbol, %market, error = %e, "Prediction request failed");
            Err(e.into())
        }
    }
}
