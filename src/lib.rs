pub mod aggregator;
pub mod cache;
pub mod config;
pub mod dates;
pub mod error;
pub mod fetcher;
pub mod github;
pub mod querier;
pub mod report;
pub mod stats;
pub mod types;

use aggregator::RepoWarning;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use cache::ReportCache;
use config::AppConfig;
use error::{AggregateError, ReportError};
use github::OctocrabTransport;
use querier::{Report, ReportQuerier, ReportRequest};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<RepoWarning>,
}

/// Shared application state accessible to all request handlers.
pub struct AppState {
    /// Service producing pull request reports.
    pub querier: ReportQuerier<OctocrabTransport>,
    /// Application configuration loaded from environment variables.
    pub config: AppConfig,
}

impl AppState {
    /// Initializes the application state: the GitHub transport, the result
    /// cache and the report querier.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let transport = OctocrabTransport::new(config.github_api_url.as_deref())?;
        let cache = ReportCache::new(config.cache_ttl(), config.cache_max_capacity);
        let querier = ReportQuerier::new(Arc::new(transport), cache, config.clone());
        Ok(Self { querier, config })
    }
}

pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/reports", post(create_report))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "prflow",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn create_report(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReportRequest>,
) -> Result<Json<Report>, (StatusCode, Json<ErrorResponse>)> {
    match state.querier.generate(&request).await {
        Ok(report) => {
            tracing::debug!(
                username = %report.username,
                records = report.records.len(),
                "Returning report"
            );
            Ok(Json(report))
        }
        Err(e) => {
            tracing::error!("Failed to generate report for {}: {}", request.username, e);
            Err(error_response(e))
        }
    }
}

fn error_response(error: ReportError) -> (StatusCode, Json<ErrorResponse>) {
    match error {
        ReportError::DateFilter(_) | ReportError::InvalidRequest(_) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: error.to_string(),
                warnings: Vec::new(),
            }),
        ),
        ReportError::Aggregate(inner) => {
            let AggregateError::AllRepositoriesFailed { warnings } = inner.as_ref();
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: inner.to_string(),
                    warnings: warnings.clone(),
                }),
            )
        }
    }
}
