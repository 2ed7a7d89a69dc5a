//! Axum read API over the snapshot store.

use std::ops::RangeInclusive;
use std::sync::Arc;

use amt_core::{compute_trending, Model, ModelSnapshot, TrendingModel, Window};
use amt_storage::{collect_window_snapshots, SnapshotQuery, StoreError, TrackerStore, DEFAULT_WINDOW_PAGE_SIZE};
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "amt-web";

const DEFAULT_DAYS: u32 = 7;
const DEFAULT_LIMIT: u32 = 20;
const DEFAULT_HISTORY_LIMIT: u32 = 30;
const DAYS_RANGE: RangeInclusive<u32> = 1..=90;
const LIMIT_RANGE: RangeInclusive<u32> = 1..=100;
const HISTORY_LIMIT_RANGE: RangeInclusive<u32> = 1..=180;

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub port: u16,
    pub window_page_size: usize,
}

impl WebConfig {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("AMT_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
            window_page_size: std::env::var("AMT_WINDOW_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(DEFAULT_WINDOW_PAGE_SIZE),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TrackerStore>,
    pub window_page_size: usize,
}

impl AppState {
    pub fn new(store: Arc<dyn TrackerStore>) -> Self {
        Self {
            store,
            window_page_size: DEFAULT_WINDOW_PAGE_SIZE,
        }
    }

    pub fn with_window_page_size(mut self, page_size: usize) -> Self {
        self.window_page_size = page_size.max(1);
        self
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("no snapshots found for model {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ApiError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, "store unavailable".to_string()),
        };
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "read failed");
        } else {
            warn!(error = %self, status = status.as_u16(), "rejected request");
        }
        (status, Json(ErrorBody { detail })).into_response()
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

#[derive(Debug, Default, Deserialize)]
struct WindowParams {
    pipeline_tag: Option<String>,
    days: Option<u32>,
    limit: Option<u32>,
}

impl WindowParams {
    fn window(&self) -> Result<Window, ApiError> {
        let days = bounded("days", self.days, DEFAULT_DAYS, DAYS_RANGE)?;
        Ok(Window::ending_today(days))
    }

    fn limit(&self) -> Result<usize, ApiError> {
        bounded("limit", self.limit, DEFAULT_LIMIT, LIMIT_RANGE).map(|n| n as usize)
    }

    fn pipeline_tag(&self) -> Option<&str> {
        self.pipeline_tag.as_deref().filter(|tag| !tag.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
struct HistoryParams {
    limit: Option<u32>,
}

fn bounded(
    name: &str,
    value: Option<u32>,
    default: u32,
    range: RangeInclusive<u32>,
) -> Result<u32, ApiError> {
    let value = value.unwrap_or(default);
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ApiError::Validation(format!(
            "{name} must be between {} and {}, got {value}",
            range.start(),
            range.end()
        )))
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryRow {
    pub snapshot_date: NaiveDate,
    pub downloads_30d: Option<i64>,
    pub likes: Option<i64>,
    pub pipeline_tag: Option<String>,
    pub tags: Vec<String>,
}

impl From<ModelSnapshot> for HistoryRow {
    fn from(snap: ModelSnapshot) -> Self {
        Self {
            snapshot_date: snap.snapshot_date,
            downloads_30d: snap.downloads,
            likes: snap.likes,
            pipeline_tag: snap.pipeline_tag,
            tags: snap.tags,
        }
    }
}

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/models/trending", get(trending_handler))
        .route("/models/new", get(new_models_handler))
        .route("/models/{id}/history", get(history_handler))
        .route("/models/{author}/{name}/history", get(namespaced_history_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "read api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health_handler() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn trending_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<WindowParams>, QueryRejection>,
) -> Result<Json<Vec<TrendingModel>>, ApiError> {
    let Query(params) = params?;
    let window = params.window()?;
    let limit = params.limit()?;
    let query = SnapshotQuery {
        window,
        pipeline_tag: params.pipeline_tag().map(str::to_string),
    };
    let snapshots =
        collect_window_snapshots(state.store.as_ref(), &query, state.window_page_size).await?;
    Ok(Json(compute_trending(&snapshots, window, limit)))
}

async fn new_models_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<WindowParams>, QueryRejection>,
) -> Result<Json<Vec<Model>>, ApiError> {
    let Query(params) = params?;
    let window = params.window()?;
    let limit = params.limit()?;
    let models = state
        .store
        .models_first_seen_since(window.start_instant(), params.pipeline_tag(), limit)
        .await?;
    Ok(Json(models))
}

async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<Vec<HistoryRow>>, ApiError> {
    let Query(params) = params?;
    model_history(&state, &id, &params).await
}

async fn namespaced_history_handler(
    State(state): State<Arc<AppState>>,
    Path((author, name)): Path<(String, String)>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<Vec<HistoryRow>>, ApiError> {
    let Query(params) = params?;
    model_history(&state, &format!("{author}/{name}"), &params).await
}

async fn model_history(
    state: &AppState,
    model_id: &str,
    params: &HistoryParams,
) -> Result<Json<Vec<HistoryRow>>, ApiError> {
    let limit = bounded("limit", params.limit, DEFAULT_HISTORY_LIMIT, HISTORY_LIMIT_RANGE)?;
    let rows = state.store.model_history(model_id, limit as usize).await?;
    if rows.is_empty() {
        return Err(ApiError::NotFound(model_id.to_string()));
    }
    Ok(Json(rows.into_iter().map(HistoryRow::from).collect()))
}
