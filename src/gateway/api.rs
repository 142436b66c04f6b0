use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;
use crate::errors::{JobError, PublishError, SanitizeError};
use crate::jobs::{
    ArgPolicy, JobSupervisor, LogStream, StartJob, StopOutcome, build_task_args, parse_signal,
    sanitize_args,
};
use crate::preview::{BranchPublisher, LiveReload, Publication};

/// Default page size for log tails.
const DEFAULT_LOG_PAGE: usize = 64 * 1024;

// ── Shared application state ──────────────────────────────────────────

/// How jobs are launched.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub binary: String,
    pub log_capacity: usize,
    pub default_args: Vec<String>,
}

pub struct AppState {
    pub supervisor: JobSupervisor,
    pub publisher: BranchPublisher,
    pub live: LiveReload,
    pub policy: ArgPolicy,
    pub jobs: JobSettings,
    pub workdir: PathBuf,
    pub api_token: Option<String>,
    /// Held for the duration of any publish or checkout in the working tree.
    pub publish_lock: tokio::sync::Mutex<()>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            supervisor: JobSupervisor::new(),
            publisher: BranchPublisher::new(config.layout(), config.branch_fallback.clone()),
            live: LiveReload::new(),
            policy: config.arg_policy(),
            jobs: JobSettings {
                binary: config.binary(),
                log_capacity: config.toml.jobs.log_capacity,
                default_args: config.toml.jobs.default_args.clone(),
            },
            workdir: config.workdir.clone(),
            api_token: config.api_token().map(str::to_string),
            publish_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Publish the checked-out branch and tell every viewer to reload.
    pub async fn publish_and_notify(&self) -> Result<Publication, PublishError> {
        let _guard = self.publish_lock.lock().await;
        let publication = self.publisher.publish_current_branch(&self.workdir).await?;
        self.live.broadcast(&publication.branch, &publication.url);
        Ok(publication)
    }

    pub async fn publish_all_and_notify(&self) -> Vec<Publication> {
        let _guard = self.publish_lock.lock().await;
        let published = self.publisher.publish_all_branches(&self.workdir).await;
        for publication in &published {
            self.live.broadcast(&publication.branch, &publication.url);
        }
        published
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CreateJobRequest {
    /// Natural-language task, passed as `-p <prompt>`.
    pub prompt: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Label recorded with the job.
    pub command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StopRequest {
    pub signal: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub stream: Option<String>,
    pub offset: Option<usize>,
    pub max_bytes: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub id: String,
    pub stream: LogStream,
    pub data: String,
    pub next_offset: usize,
    pub is_end: bool,
    /// Bytes discarded from the front of the buffer so far.
    pub dropped: u64,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub id: String,
    pub outcome: StopOutcome,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unauthorized,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Missing or invalid bearer token".to_string(),
            ),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::Busy { .. } => ApiError::Conflict(e.to_string()),
            JobError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            JobError::LockPoisoned => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<SanitizeError> for ApiError {
    fn from(e: SanitizeError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<PublishError> for ApiError {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::UnknownBranch { .. } => ApiError::NotFound(e.to_string()),
            PublishError::PathEscape { .. } => {
                tracing::error!(error = %e, "publish target escaped the preview root");
                ApiError::Internal(e.to_string())
            }
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

/// Routes under `/api`. Authentication is layered on by the caller.
pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/jobs", get(list_jobs).post(create_job))
        .route("/api/jobs/running", get(running_job))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/logs", get(get_job_logs))
        .route("/api/jobs/{id}/output", get(get_job_output))
        .route("/api/jobs/{id}/stop", post(stop_job))
        .route("/api/publish", post(publish_current))
        .route("/api/publish/all", post(publish_all))
        .route("/api/branches", get(list_branches))
        .route("/api/branches/{name}/promote", post(promote_branch))
        .route("/api/undo", post(undo_commit))
}

// ── Handlers ──────────────────────────────────────────────────────────

pub async fn health_check() -> &'static str {
    "ok"
}

async fn create_job(
    State(state): State<SharedState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let prompt = req.prompt.as_deref().filter(|p| !p.trim().is_empty());
    if prompt.is_none() && req.args.is_empty() {
        return Err(ApiError::BadRequest(
            "Either prompt or args must be provided".to_string(),
        ));
    }

    // Caller-supplied tokens are screened; configured defaults are trusted.
    let requested = sanitize_args(&state.policy, &build_task_args(prompt, &[], &req.args))?;
    let mut args = state.jobs.default_args.clone();
    args.extend(requested);

    let preview_url = state
        .publisher
        .layout()
        .url(&state.publisher.resolve_branch(&state.workdir));
    let started = state.supervisor.start(StartJob {
        command: req.command.unwrap_or_else(|| "task".to_string()),
        args,
        working_dir: state.workdir.clone(),
        binary: state.jobs.binary.clone(),
        log_capacity: state.jobs.log_capacity,
        env: vec![("GANTRY_PREVIEW_URL".to_string(), preview_url)],
    })?;
    Ok((StatusCode::ACCEPTED, Json(started)))
}

async fn list_jobs(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.supervisor.list()?))
}

async fn running_job(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let running = state.supervisor.running_id()?;
    Ok(Json(serde_json::json!({ "running": running })))
}

async fn get_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.supervisor.status(&id)?))
}

async fn get_job_logs(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let stream = match query.stream.as_deref() {
        Some(name) => name
            .parse::<LogStream>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => LogStream::Stdout,
    };
    let chunk = state.supervisor.stream_logs(
        &id,
        stream,
        query.offset.unwrap_or(0),
        query.max_bytes.unwrap_or(DEFAULT_LOG_PAGE),
    )?;
    Ok(Json(LogsResponse {
        id,
        stream,
        data: String::from_utf8_lossy(&chunk.data).into_owned(),
        next_offset: chunk.next_offset,
        is_end: chunk.is_end,
        dropped: chunk.dropped,
    }))
}

async fn get_job_output(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.supervisor.output(&id)?))
}

async fn stop_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: StopRequest = if body.is_empty() {
        StopRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    let signal = parse_signal(req.signal.as_deref().unwrap_or("SIGTERM"))
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let outcome = state.supervisor.stop(&id, signal)?;
    Ok(Json(StopResponse { id, outcome }))
}

async fn publish_current(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.publish_and_notify().await?))
}

async fn publish_all(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.publish_all_and_notify().await))
}

async fn list_branches(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.publisher.branches(&state.workdir)?))
}

async fn promote_branch(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let publication = {
        let _guard = state.publish_lock.lock().await;
        state.publisher.promote(&state.workdir, &name).await?
    };
    state.live.broadcast(&publication.branch, &publication.url);
    Ok(Json(publication))
}

async fn undo_commit(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let publication = {
        let _guard = state.publish_lock.lock().await;
        state.publisher.undo(&state.workdir).await?
    };
    state.live.broadcast(&publication.branch, &publication.url);
    Ok(Json(publication))
}

// ── Tests ─────────────────────────────────────────────────────────────
